//! Montage CLI — export timelines and scenes, preview frames.
//!
//! Usage:
//!   montage export <PROJECT>      Export a project to video
//!   montage scene <DEFINITION>    Export a declarative scene definition
//!   montage frame <PROJECT>       Render a single frame to PNG
//!   montage info <PROJECT>        Show project information
//!   montage check                 Check ffmpeg, ffprobe and fonts

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use montage_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "montage",
    about = "Scene compositor and frame-accurate video exporter",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/montage/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a project to video
    Export {
        /// Path to the project file
        path: PathBuf,

        /// Output file path (defaults next to the project)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: mp4 | webm (defaults to the project's)
        #[arg(long)]
        format: Option<String>,

        /// Video bitrate in bits per second (defaults to the project's)
        #[arg(long)]
        bitrate: Option<u64>,
    },

    /// Export a scene from a JSON node definition
    Scene {
        /// Path to the definition file
        path: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output width (defaults to config)
        #[arg(long)]
        width: Option<u32>,

        /// Output height (defaults to config)
        #[arg(long)]
        height: Option<u32>,

        /// Frame rate (defaults to config)
        #[arg(long)]
        fps: Option<u32>,

        /// Output format: mp4 | webm (defaults to config)
        #[arg(long)]
        format: Option<String>,
    },

    /// Render one frame of a project to PNG
    Frame {
        /// Path to the project file
        path: PathBuf,

        /// Frame index to render
        #[arg(short, long, default_value = "0")]
        frame: u64,

        /// Output PNG path
        #[arg(short, long, default_value = "frame.png")]
        output: PathBuf,

        /// Scale the preview to this width
        #[arg(long)]
        width: Option<u32>,

        /// Scale the preview to this height
        #[arg(long)]
        height: Option<u32>,
    },

    /// Show project information
    Info {
        /// Path to the project file
        path: PathBuf,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Check system capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    montage_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            path,
            output,
            format,
            bitrate,
        } => commands::export::run(&config, path, output, format, bitrate).await,
        Commands::Scene {
            path,
            output,
            width,
            height,
            fps,
            format,
        } => commands::scene::run(&config, path, output, width, height, fps, format).await,
        Commands::Frame {
            path,
            frame,
            output,
            width,
            height,
        } => commands::frame::run(&config, path, frame, output, width, height).await,
        Commands::Info { path, json } => commands::info::run(path, json),
        Commands::Check => commands::check::run(&config).await,
    }
}
