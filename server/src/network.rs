//! Listening socket and accept loop.
//!
//! One client at a time: the loop accepts a producer, hands the stream to a
//! [`ConnectionReader`] and only goes back to `accept()` once that connection
//! is finished.
//!
//! Both sockets can be closed from the control side without waiting for the
//! I/O task: the listener lives in a [`ListenerSlot`] the task only borrows
//! while polling, and every accepted stream has a duplicate handle the
//! controller can shut down.

use crate::connection::{ConnectionEnd, ConnectionReader};
use crate::error::{Result, ServiceError};
use crate::service::SessionContext;
use log::{info, warn};
use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

/// Single-client model: no queue of waiting producers.
pub const LISTEN_BACKLOG: u32 = 1;

/// Pause after a failed `accept()` so persistent errors (e.g. out of file
/// descriptors) do not spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Binds `addr` with address reuse and a backlog of [`LISTEN_BACKLOG`].
///
/// Must be called from within a tokio runtime context. Returns the listener
/// together with the address it actually bound, which differs from `addr`
/// when port 0 was requested.
pub fn bind_listener(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let bind_error = |source| ServiceError::Bind { addr, source };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;

    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(addr).map_err(bind_error)?;
    let listener = socket.listen(LISTEN_BACKLOG).map_err(bind_error)?;
    let local_addr = listener.local_addr().map_err(bind_error)?;

    Ok((listener, local_addr))
}

/// Listening socket shared by the controller and the accept loop.
///
/// The mutex is only held for a single poll, never across an await.
#[derive(Debug, Clone)]
pub(crate) struct ListenerSlot(Arc<Mutex<Option<TcpListener>>>);

impl ListenerSlot {
    pub(crate) fn new(listener: TcpListener) -> Self {
        Self(Arc::new(Mutex::new(Some(listener))))
    }

    fn lock(&self) -> MutexGuard<'_, Option<TcpListener>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the listener, which closes its descriptor and frees the port.
    /// Returns false if it was already closed.
    pub(crate) fn close(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Next incoming connection, or `None` once the slot has been closed.
    pub(crate) async fn accept(&self) -> Option<io::Result<(TcpStream, SocketAddr)>> {
        poll_fn(|cx| match self.lock().as_ref() {
            Some(listener) => listener.poll_accept(cx).map(Some),
            None => Poll::Ready(None),
        })
        .await
    }
}

/// Splits off a second handle to the same socket. Shutting the handle down
/// ends the connection for the reader as well.
fn detach_closer(stream: TcpStream) -> io::Result<(TcpStream, std::net::TcpStream)> {
    let stream = stream.into_std()?;
    let closer = stream.try_clone()?;
    Ok((TcpStream::from_std(stream)?, closer))
}

/// Accept loop of one session. Returns when the session is stopped or its
/// listener has been closed.
pub(crate) async fn run_listener(
    listener: ListenerSlot,
    local_addr: SocketAddr,
    mut ctx: SessionContext,
) {
    info!("Waiting for point cloud producer on {}", local_addr);

    loop {
        let accepted = tokio::select! {
            biased;
            _ = ctx.stop.requested() => break,
            accepted = listener.accept() => match accepted {
                Some(accepted) => accepted,
                None => break,
            },
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::select! {
                    biased;
                    _ = ctx.stop.requested() => break,
                    _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => continue,
                }
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let (stream, closer) = match detach_closer(stream) {
            Ok(split) => split,
            Err(e) => {
                warn!("Dropping connection from {}: {}", peer, e);
                continue;
            }
        };

        if !ctx.connection_opened(peer, closer) {
            // Stopped between accept and bookkeeping
            break;
        }
        info!("Client connected from {}", peer);

        let end = ConnectionReader::new(stream, peer, &mut ctx).run().await;
        let cancelled = matches!(end, ConnectionEnd::Cancelled);
        match &end {
            ConnectionEnd::Failed(e) => warn!("Connection to {} failed: {}", peer, e),
            _ => info!("Client {} disconnected", peer),
        }
        ctx.connection_closed(peer, end.into_reason());

        if cancelled {
            break;
        }
    }

    info!("Listener on {} closed", local_addr);
}
