use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tickwise::logging::{init_logging, LogConfig};
use tickwise::remote::{serve, FileSource};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve collection schedules from a TOML file", long_about = None)]
struct Args {
    /// Schedule file, re-read on every request
    #[arg(short, long, default_value = "schedules.toml")]
    file: PathBuf,

    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:50420")]
    listen: String,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&LogConfig {
        level: args.log_level.clone(),
        ..Default::default()
    });

    let source = FileSource::new(&args.file);
    // Fail fast on a broken file; later edits are picked up per request.
    source.load()?;

    let listener = TcpListener::bind(&args.listen).await?;
    info!(addr = %listener.local_addr()?, file = %args.file.display(), "config server listening");

    tokio::select! {
        result = serve(listener, Arc::new(source)) => result?,
        result = tokio::signal::ctrl_c() => result?,
    }
    Ok(())
}
