//! TCP producer that streams point-cloud frames to the ingestion server.

use crate::generator::random_cloud;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shared::{encode_frame, Point};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};

/// Settings for a streaming run.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub points_per_frame: usize,
    pub interval: Duration,
    /// Number of frames to send; 0 streams until interrupted.
    pub frame_count: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            points_per_frame: 50,
            interval: Duration::from_secs(1),
            frame_count: 0,
        }
    }
}

pub struct FrameSender {
    stream: TcpStream,
    frames_sent: u64,
}

impl FrameSender {
    pub async fn connect(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let server_addr: SocketAddr = server_addr.parse()?;
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", server_addr);

        Ok(Self {
            stream,
            frames_sent: 0,
        })
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Sends one frame containing `points`.
    pub async fn send_points(&mut self, points: &[Point]) -> std::io::Result<()> {
        let frame = encode_frame(points);
        self.send_raw(&frame).await?;
        self.frames_sent += 1;
        debug!("Sent frame {} ({} points)", self.frames_sent, points.len());
        Ok(())
    }

    /// Writes bytes as-is, without framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Streams random clouds according to `config`.
    pub async fn run(&mut self, config: &StreamConfig) -> std::io::Result<()> {
        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut rng = StdRng::from_entropy();

        while config.frame_count == 0 || self.frames_sent < config.frame_count {
            ticker.tick().await;
            let cloud = random_cloud(&mut rng, config.points_per_frame);
            self.send_points(&cloud).await?;
        }

        info!("Finished after {} frames", self.frames_sent);
        Ok(())
    }

    /// Closes the write side so the server sees a clean end of stream.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.stream.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode_header, decode_payload, HEADER_LEN};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_sender_writes_framed_points() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let receiver = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; HEADER_LEN];
            socket.read_exact(&mut header).await.unwrap();
            let length = decode_header(header);
            let mut payload = vec![0u8; length as usize];
            socket.read_exact(&mut payload).await.unwrap();
            decode_payload(&payload, length).unwrap()
        });

        let mut sender = FrameSender::connect(&addr).await.unwrap();
        let points = vec![Point::new(1.0, 2.0, 3.0), Point::new(-1.0, 0.5, 0.25)];
        assert_ok!(sender.send_points(&points).await);
        assert_eq!(sender.frames_sent(), 1);

        assert_eq!(receiver.await.unwrap(), points);
    }

    #[tokio::test]
    async fn test_run_stops_after_frame_count() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let receiver = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received.len()
        });

        let mut sender = FrameSender::connect(&addr).await.unwrap();
        let config = StreamConfig {
            points_per_frame: 4,
            interval: Duration::from_millis(1),
            frame_count: 3,
        };
        assert_ok!(sender.run(&config).await);
        assert_eq!(sender.frames_sent(), 3);
        assert_ok!(sender.close().await);

        assert_eq!(receiver.await.unwrap(), 3 * (HEADER_LEN + 4 * 12));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_address() {
        assert!(FrameSender::connect("not an address").await.is_err());
    }
}
