// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use edgecam::CameraBackendType;
use edgecam::backends::camera::Size;
use std::path::PathBuf;

mod cli;
mod terminal;

#[derive(Parser)]
#[command(name = "edgecam")]
#[command(about = "Camera-to-GPU frame pipeline with a pluggable frame processor")]
#[command(version = env!("EDGECAM_BUILD_VERSION"))]
#[command(subcommand_required = false)]
struct Cli {
    /// Camera backend (synthetic or v4l2); overrides the config file
    #[arg(short, long, global = true)]
    backend: Option<CameraBackendType>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run in terminal mode (renders the processed preview to the terminal)
    Terminal,

    /// List available cameras
    List,

    /// Show which preview size would be picked for a surface
    Negotiate {
        /// Surface size, e.g. 1280x720
        surface: Size,

        /// Display size (default: the surface size)
        #[arg(short, long)]
        display: Option<Size>,

        /// Display rotation in degrees
        #[arg(short, long, default_value = "0")]
        rotation: i32,
    },

    /// Run the pipeline headless for a number of frames
    Run {
        /// Surface size
        #[arg(short, long, default_value = "1280x720")]
        surface: Size,

        /// Number of frames to draw
        #[arg(short, long, default_value = "120")]
        frames: u64,

        /// Save the last presented screen as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Copy frames unchanged instead of binarizing them
        #[arg(long)]
        passthrough: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=edgecam=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    let mut config = edgecam::Config::load();
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }

    match cli.command {
        Some(Commands::Terminal) | None => terminal::run(&config),
        Some(Commands::List) => cli::list_cameras(&config),
        Some(Commands::Negotiate {
            surface,
            display,
            rotation,
        }) => cli::negotiate(&config, surface, display, rotation),
        Some(Commands::Run {
            surface,
            frames,
            output,
            passthrough,
        }) => cli::run_headless(&config, surface, frames, output, passthrough),
    }
}
