//! # Point Cloud Producer
//!
//! Client side of the point-cloud stream: connects to an ingestion server and
//! sends length-prefixed frames of `f32` triples. Used for manual testing of
//! the viewer and by the end-to-end test suite.
//!
//! ## Module Organization
//!
//! ### Generator Module (`generator`)
//! Produces random point clouds uniformly distributed in a cube.
//!
//! ### Network Module (`network`)
//! Owns the TCP connection and frames points with the shared codec:
//! - one-off frames via `FrameSender::send_points`
//! - raw byte injection via `FrameSender::send_raw` for protocol tests
//! - paced streaming via `FrameSender::run`
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{FrameSender, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut sender = FrameSender::connect("127.0.0.1:8080").await?;
//!     sender.run(&StreamConfig::default()).await?;
//!     Ok(())
//! }
//! ```

pub mod generator;
pub mod network;
