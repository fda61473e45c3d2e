mod generator;
mod network;

use clap::Parser;
use log::info;
use network::{FrameSender, StreamConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Points per frame
    #[arg(short = 'n', long, default_value = "50")]
    points: usize,

    /// Delay between frames in milliseconds
    #[arg(short = 'i', long, default_value = "1000")]
    interval_ms: u64,

    /// Number of frames to send (0 = until interrupted)
    #[arg(short = 'c', long, default_value = "0")]
    count: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Streaming to: {}", args.server);
    info!(
        "{} points every {}ms{}",
        args.points,
        args.interval_ms,
        if args.count > 0 {
            format!(", {} frames", args.count)
        } else {
            String::new()
        }
    );

    let config = StreamConfig {
        points_per_frame: args.points,
        interval: Duration::from_millis(args.interval_ms.max(1)),
        frame_count: args.count,
    };

    let mut sender = FrameSender::connect(&args.server).await?;

    tokio::select! {
        result = sender.run(&config) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted after {} frames", sender.frames_sent());
        }
    }

    Ok(())
}
