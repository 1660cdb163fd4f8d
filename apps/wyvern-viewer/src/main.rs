//! Wyvern Demo Viewer
//!
//! Uploads a quad and a cube and spins them with an animated model matrix.
//!
//! ## Usage
//!
//! ```bash
//! glslc shaders/mesh.vert -o shaders/mesh.vert.spv
//! glslc shaders/mesh.frag -o shaders/mesh.frag.spv
//! cargo run -p wyvern-viewer -- [--config <PATH>]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use std::path::PathBuf;

use wyvern_app::{run_app, AppConfig};

use crate::app::Viewer;

const DEFAULT_CONFIG: &str = "wyvern.toml";

fn main() -> anyhow::Result<()> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG);
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-c" | "--config" => match args.next() {
                Some(path) => config_path = PathBuf::from(path),
                None => anyhow::bail!("--config requires a path"),
            },
            other => anyhow::bail!("Unknown argument: {other}"),
        }
    }

    run_app::<Viewer>(AppConfig::load(&config_path)?)
}

fn print_help() {
    eprintln!(
        "Wyvern Demo Viewer

USAGE:
    cargo run -p wyvern-viewer -- [OPTIONS]

OPTIONS:
    -c, --config <PATH>     TOML configuration (default: {DEFAULT_CONFIG})
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
