//! Vocabulary and configuration shared by every controller

pub mod labels;
pub mod options;

pub use labels::*;
pub use options::{Options, RuntimeOptions};
