//! Error types surfaced by the ingestion service.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors returned synchronously from control operations.
///
/// Connection and protocol failures never show up here: they are handled on
/// the I/O task and reported as events.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_bind_error_display_and_source() {
        let err = ServiceError::Bind {
            addr: "127.0.0.1:8080".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };

        assert!(err.to_string().starts_with("failed to bind 127.0.0.1:8080"));
        let source = err.source().unwrap().downcast_ref::<io::Error>().unwrap();
        assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
    }
}
