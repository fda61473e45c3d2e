//! Cross-task signals between the control side and the I/O task.
//!
//! Both are backed by `tokio::sync::watch` so the control side can flip them
//! from synchronous code while the I/O task awaits the change.

use tokio::sync::watch;

/// Controls whether the connection reader may start on the next frame.
#[derive(Debug)]
pub struct PauseGate {
    tx: watch::Sender<bool>,
}

impl PauseGate {
    pub fn new(open: bool) -> Self {
        let (tx, _) = watch::channel(open);
        Self { tx }
    }

    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn close(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn watcher(&self) -> GateWatcher {
        GateWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateWatcher {
    rx: watch::Receiver<bool>,
}

impl GateWatcher {
    /// Resolves once the gate is open. Returns immediately if it already is.
    pub async fn opened(&mut self) {
        // A dropped sender means the session is gone; never block on it.
        let _ = self.rx.wait_for(|open| *open).await;
    }

    /// Resolves once the gate is closed. Pends forever if the sender is gone.
    pub async fn closed(&mut self) {
        if self.rx.wait_for(|open| !*open).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// One-shot stop request for a session's I/O task.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn watcher(&self) -> StopWatcher {
        StopWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct StopWatcher {
    rx: watch::Receiver<bool>,
}

impl StopWatcher {
    /// Resolves once a stop has been requested or the signal was dropped.
    pub async fn requested(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
