//! Events produced by the ingestion service for its consumers.

use crate::service::LifecycleState;
use serde::{Deserialize, Serialize};
use shared::Point;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// Why a client connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The peer closed the connection, possibly mid-frame.
    PeerClosed,
    /// A socket error ended the connection.
    Error(String),
    /// The service was stopped while the client was connected.
    Stopped,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::PeerClosed => write!(f, "peer closed the connection"),
            DisconnectReason::Error(reason) => write!(f, "connection error: {}", reason),
            DisconnectReason::Stopped => write!(f, "service stopped"),
        }
    }
}

/// Everything the service reports to the outside world.
///
/// Frames carry their points behind an `Arc` so fanning out to several sinks
/// does not copy the buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    ClientConnected {
        peer: SocketAddr,
    },
    ClientDisconnected {
        peer: SocketAddr,
        reason: DisconnectReason,
    },
    FrameReceived {
        /// Position of the frame within its connection, starting at 0.
        sequence: u64,
        points: Arc<[Point]>,
    },
    ProtocolWarning {
        reason: String,
    },
    BindError {
        reason: String,
    },
    StateChanged {
        state: LifecycleState,
    },
}

/// Notification levels understood by the log/notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Debug,
    Success,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn log_level(self) -> log::Level {
        match self {
            Severity::Debug => log::Level::Debug,
            Severity::Success | Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "DEBUG",
            Severity::Success => "SUCCESS",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        f.write_str(name)
    }
}

impl IngestEvent {
    pub fn severity(&self) -> Severity {
        match self {
            IngestEvent::ClientConnected { .. } => Severity::Info,
            IngestEvent::ClientDisconnected { reason, .. } => match reason {
                DisconnectReason::Error(_) => Severity::Warning,
                _ => Severity::Info,
            },
            IngestEvent::FrameReceived { .. } => Severity::Debug,
            IngestEvent::ProtocolWarning { .. } => Severity::Warning,
            IngestEvent::BindError { .. } => Severity::Error,
            IngestEvent::StateChanged { state } => match state {
                LifecycleState::Listening => Severity::Success,
                _ => Severity::Info,
            },
        }
    }

    /// Human readable line for notification panels.
    pub fn message(&self) -> String {
        match self {
            IngestEvent::ClientConnected { peer } => format!("Client connected from {}", peer),
            IngestEvent::ClientDisconnected { peer, reason } => {
                format!("Client {} disconnected: {}", peer, reason)
            }
            IngestEvent::FrameReceived { sequence, points } => {
                format!("Frame {} received with {} points", sequence, points.len())
            }
            IngestEvent::ProtocolWarning { reason } => format!("Dropped malformed frame: {}", reason),
            IngestEvent::BindError { reason } => format!("Could not start listening: {}", reason),
            IngestEvent::StateChanged { state } => format!("Socket {}", state),
        }
    }
}
