//! Forge runtime
//!
//! Renders the demo scene on the recording headless device for a fixed
//! number of frames and prints the accumulated render stats as JSON.
//!
//! Run with: cargo run -p forge_runtime -- [config.toml]
//!
//! `FORGE_FRAMES` overrides the frame count and `FORGE_LOG` the default log
//! filter. `RUST_LOG` still takes precedence over both filters.

mod config;
mod demo;

use std::path::PathBuf;

use config::RuntimeConfig;
use demo::Demo;

fn main() {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = match RuntimeConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("forge: {}", e);
            std::process::exit(2);
        }
    };

    forge_core::logging::init(&config.log_filter);
    log::info!(
        "Forge runtime v{}: {} frames at {}x{}",
        env!("CARGO_PKG_VERSION"),
        config.frames,
        config.width,
        config.height
    );

    let report = match Demo::new(config).and_then(Demo::run) {
        Ok(report) => report,
        Err(e) => {
            log::error!("Run failed: {}", e);
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Failed to serialize frame report: {}", e);
            std::process::exit(1);
        }
    }
}
