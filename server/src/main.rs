use clap::Parser;
use log::{info, warn};
use server::{IngestService, LatestFrame, ListenerConfig, LogNotifier};
use shared::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Largest accepted frame payload in bytes
    #[arg(short, long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: u32,

    /// Start with frame delivery paused
    #[arg(long)]
    paused: bool,
}

/// Commands accepted on stdin.
#[derive(Debug, PartialEq)]
enum Command {
    Start(Option<u16>),
    Pause,
    Resume,
    Stop,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let command = match words.next() {
        Some("start") => match words.next() {
            Some(port) => Command::Start(Some(
                port.parse()
                    .map_err(|_| format!("invalid port '{}', expected 0-65535", port))?,
            )),
            None => Command::Start(None),
        },
        Some("pause") => Command::Pause,
        Some("resume") => Command::Resume,
        Some("stop") => Command::Stop,
        Some("status") => Command::Status,
        Some("quit") | Some("exit") => Command::Quit,
        Some(other) => return Err(format!("unknown command '{}'", other)),
        None => return Err("empty command".to_string()),
    };

    if words.next().is_some() {
        return Err(format!("too many arguments in '{}'", line.trim()));
    }
    Ok(command)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let mut config = ListenerConfig {
        host: args.host,
        port: args.port,
        max_frame_bytes: args.max_frame_bytes,
    };

    let service = IngestService::new(tokio::runtime::Handle::current());
    let latest = Arc::new(LatestFrame::new());
    service.subscribe(Arc::new(LogNotifier));
    service.subscribe(latest.clone());

    service.start_with(config.clone())?;
    if args.paused {
        service.pause();
    }
    info!("Commands: start [port], pause, resume, stop, status, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        };

        // stdin closed
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Start(port)) => {
                if let Some(port) = port {
                    config.port = port;
                }
                if let Err(e) = service.start_with(config.clone()) {
                    warn!("{}", e);
                }
            }
            Ok(Command::Pause) => service.pause(),
            Ok(Command::Resume) => service.resume(),
            Ok(Command::Stop) => service.stop(),
            Ok(Command::Status) => {
                let latest_len = latest.latest().map_or(0, |points| points.len());
                println!(
                    "state: {}, listening on: {:?}, peer: {:?}, frames: {}, latest frame: {} points",
                    service.state(),
                    service.local_addr(),
                    service.peer_addr(),
                    latest.frames_seen(),
                    latest_len
                );
            }
            Ok(Command::Quit) => break,
            Err(e) => eprintln!("{}", e),
        }
    }

    service.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("start"), Ok(Command::Start(None)));
        assert_eq!(parse_command("start 9000"), Ok(Command::Start(Some(9000))));
        assert_eq!(parse_command("  pause "), Ok(Command::Pause));
        assert_eq!(parse_command("resume"), Ok(Command::Resume));
        assert_eq!(parse_command("stop"), Ok(Command::Stop));
        assert_eq!(parse_command("status"), Ok(Command::Status));
        assert_eq!(parse_command("exit"), Ok(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_command("start 70000").is_err());
        assert!(parse_command("start abc").is_err());
        assert!(parse_command("stop now").is_err());
        assert!(parse_command("jump").is_err());
        assert!(parse_command("").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["server"]);
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.host.to_string(), "127.0.0.1");
        assert!(!args.paused);

        let args = Args::parse_from(["server", "-p", "9000", "--paused"]);
        assert_eq!(args.port, 9000);
        assert!(args.paused);
    }
}
