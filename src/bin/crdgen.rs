//! CRD YAML Generator
//!
//! This binary generates the ProjectHelmChart CRD manifest.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/projecthelmchart.yaml

use helm_project_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
