//! # Point Cloud Ingestion Server
//!
//! This library receives a continuous stream of binary point-cloud frames from
//! a single producer over TCP and hands every decoded frame to whoever is
//! listening. It is the I/O core of a viewer; display and the user interface
//! live elsewhere and only talk to this crate through the
//! control methods of [`IngestService`] and the [`IngestEvent`] stream.
//!
//! ## Core Responsibilities
//!
//! ### Lifecycle Control
//! An external controller drives the service with `start`, `pause`,
//! `resume` and `stop`. The state machine lives in [`service`] and is the
//! single authority on whether the service is idle, listening, connected,
//! paused or stopped.
//!
//! ### Frame Ingestion
//! One producer at a time. Each frame is a big-endian length prefix followed
//! by packed `f32` triples (see the `shared` crate). Malformed frames are
//! dropped with a warning; the connection stays open.
//!
//! ### Event Publication
//! Frames, connection changes, protocol warnings, bind failures and state
//! changes are published synchronously to registered [`EventSink`]s. The
//! [`LatestFrame`] sink keeps exactly one frame, always the newest.
//!
//! ## Architecture Design
//!
//! ### Control Side and I/O Task
//! Control calls are synchronous and only touch state behind a mutex. A
//! single tokio task per session runs the accept loop ([`network`]) and the
//! per-connection reader. The task never holds the state lock while awaiting
//! a socket.
//!
//! ### Cancellation
//! `stop()` does not wait for the task. It closes the listening socket and
//! shuts down the client socket itself, so the port is free when it returns,
//! then raises a stop signal that every accept, read and pause wait is raced
//! against. [`IngestService::join`] waits for the task to finish.
//!
//! ### Error Policy
//! Only binding can fail a control call ([`ServiceError`]). Protocol and
//! connection errors are handled on the I/O task and surface as events; the
//! service keeps listening for the next producer.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{IngestService, LatestFrame, LogNotifier};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = IngestService::new(tokio::runtime::Handle::current());
//!     let latest = Arc::new(LatestFrame::new());
//!     service.subscribe(Arc::new(LogNotifier));
//!     service.subscribe(latest.clone());
//!
//!     service.start(8080)?;
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     if let Some(points) = latest.latest() {
//!         println!("latest frame has {} points", points.len());
//!     }
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

mod connection;
pub mod error;
pub mod events;
pub mod gate;
pub mod network;
pub mod publisher;
pub mod service;

pub use error::ServiceError;
pub use events::{DisconnectReason, IngestEvent, Severity};
pub use publisher::{ChannelSink, EventSink, LatestFrame, LogNotifier, Publisher};
pub use service::{IngestService, LifecycleState, ListenerConfig};
