use std::path::PathBuf;

use clap::Parser;
use editor::{Editor, EditorConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Runs the volume editor headless and streams the viewport to a browser.
#[derive(Parser)]
struct Args {
    /// JSON config file. Missing fields keep their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address the stream server listens on
    #[arg(long)]
    ip: Option<String>,

    /// First port tried by the stream server
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable the browser stream
    #[arg(long)]
    no_streaming: bool,

    /// Also write the encoded stream to the configured file
    #[arg(long)]
    stream_to_file: bool,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Volume or gaussian file to open at startup
    #[arg(short, long)]
    input: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => EditorConfig::load(path)?,
        None => EditorConfig::default(),
    };
    config.headless = true;
    config.streaming = !args.no_streaming;
    config.stream_to_file |= args.stream_to_file;
    if let Some(ip) = args.ip {
        config.ip_address = ip;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(width) = args.width {
        config.width = width;
    }
    if let Some(height) = args.height {
        config.height = height;
    }

    let editor = Editor::init()?;
    if let Some(input) = &args.input {
        editor.import_file(input, true, None)?;
    }
    editor.start(&config)?;
    if config.streaming {
        let port = editor.get_resolved_port(true);
        if port >= 0 {
            info!("Viewer at http://{}:{port}", config.ip_address);
        }
    }

    editor.wait_for_interrupt();
    editor.shutdown();
    Ok(())
}
