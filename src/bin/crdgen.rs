//! # CRD Generator
//!
//! Prints the `AuthProxyWorkload` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/authproxyworkload.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use clap::Parser;
use cloudsql_proxy_operator::crd::AuthProxyWorkload;
use kube::core::CustomResourceExt;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crdgen", about = "Generate the AuthProxyWorkload CRD")]
struct Args {
    /// Write the CRD to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let yaml = match serde_yaml::to_string(&AuthProxyWorkload::crd()) {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    };
    match args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, yaml) {
                eprintln!("Failed to write {}: {e}", path.display());
                std::process::exit(1);
            }
        }
        None => print!("{yaml}"),
    }
}
