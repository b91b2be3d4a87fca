//! Adapters for values transformation and Kubernetes resource building

pub mod helm_chart_builder;
pub mod helm_release_builder;
pub mod namespace_builder;
pub mod values;
