//! Lifecycle controller for the ingestion service.
//!
//! [`IngestService`] is the only type a controller talks to. It owns the
//! lifecycle state machine and the I/O task that runs the listener and the
//! connection reader:
//!
//! ```text
//!            start(port)                 accept
//!   Idle ───────────────► Listening ───────────────► Connected ◄──┐
//!    ▲                      ▲   ▲   peer gone / error     │ pause │ start/resume
//!    │                      │   └─────────────────────────┤       │
//!    │                      │                             ▼       │
//!    │                      │   peer gone / error       Paused ───┘
//!    │                      └─────────────────────────────┘
//!    │        stop (from Listening, Connected or Paused)
//!    └─ Stopped ◄──────────────────────────────────────────
//!         │ start(port): fresh session, new bind
//!         └──────────────► Listening
//! ```
//!
//! All shared state lives behind one mutex that is never held across an
//! await point or a blocking socket call. Stopping a session closes the
//! listening socket and shuts down the connected one before `stop()` returns,
//! then flips the stop signal that the I/O task races against every accept
//! and read.

use crate::error::Result;
use crate::events::{DisconnectReason, IngestEvent};
use crate::gate::{GateWatcher, PauseGate, StopSignal, StopWatcher};
use crate::network::{self, ListenerSlot};
use crate::publisher::{EventSink, Publisher};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use shared::{DEFAULT_MAX_FRAME_BYTES, DEFAULT_PORT};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    Idle,
    Listening,
    Connected,
    Paused,
    Stopped,
}

impl LifecycleState {
    /// True while a session owns a listening socket.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            LifecycleState::Listening | LifecycleState::Connected | LifecycleState::Paused
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Listening => "listening",
            LifecycleState::Connected => "connected",
            LifecycleState::Paused => "paused",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Settings for one listening session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub host: IpAddr,
    /// Port 0 binds an ephemeral port, see [`IngestService::local_addr`].
    pub port: u16,
    /// Frames declaring a larger payload are discarded unread.
    pub max_frame_bytes: u32,
}

impl ListenerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Control handles of the running session.
struct SessionControls {
    gate: PauseGate,
    stop: StopSignal,
    listener: ListenerSlot,
    worker: JoinHandle<()>,
}

struct Inner {
    state: LifecycleState,
    session_id: u64,
    /// Present iff state is Connected or Paused.
    peer: Option<SocketAddr>,
    /// Second handle to the connected client's socket, used to force it shut.
    connection: Option<TcpStream>,
    local_addr: Option<SocketAddr>,
    controls: Option<SessionControls>,
    /// Workers of stopped sessions that have not been joined yet.
    retired: Vec<JoinHandle<()>>,
}

impl Inner {
    fn set_state(&mut self, state: LifecycleState, events: &mut Vec<IngestEvent>) {
        if self.state != state {
            info!("Ingestion service {} -> {}", self.state, state);
            self.state = state;
            events.push(IngestEvent::StateChanged { state });
        }
    }

    fn close_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.shutdown(Shutdown::Both) {
                debug!("Shutting down client socket: {}", e);
            }
        }
    }

    fn gate_open(&self) -> bool {
        self.controls
            .as_ref()
            .map_or(true, |controls| controls.gate.is_open())
    }
}

/// Streaming point-cloud ingestion service.
///
/// Control methods are synchronous and never wait on socket I/O, so they can
/// be called from any thread, including from inside an event sink.
pub struct IngestService {
    runtime: Handle,
    publisher: Arc<Publisher>,
    inner: Arc<Mutex<Inner>>,
}

impl IngestService {
    /// Creates an idle service that spawns its I/O task on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self::with_publisher(runtime, Arc::new(Publisher::new()))
    }

    pub fn with_publisher(runtime: Handle, publisher: Arc<Publisher>) -> Self {
        Self {
            runtime,
            publisher,
            inner: Arc::new(Mutex::new(Inner {
                state: LifecycleState::Idle,
                session_id: 0,
                peer: None,
                connection: None,
                local_addr: None,
                controls: None,
                retired: Vec::new(),
            })),
        }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.publisher.subscribe(sink);
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Address the current session is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().local_addr
    }

    /// Address of the connected producer, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.lock().peer
    }

    pub fn is_paused(&self) -> bool {
        let inner = self.lock();
        inner.state.is_running() && !inner.gate_open()
    }

    /// Starts listening on `port` with default settings.
    ///
    /// While already running this resumes a paused session instead of
    /// rebinding.
    pub fn start(&self, port: u16) -> Result<()> {
        self.start_with(ListenerConfig::new(port))
    }

    /// Starts a session with `config`, or resumes if one is running.
    ///
    /// A bind failure leaves the state untouched, is published as
    /// [`IngestEvent::BindError`] and returned before any task is spawned.
    pub fn start_with(&self, config: ListenerConfig) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.lock();
            if inner.state.is_running() {
                debug!("start while {}; treating as resume", inner.state);
                Self::resume_locked(&mut inner, &mut events);
                Ok(())
            } else {
                self.launch(&mut inner, config, &mut events)
            }
        };
        self.publish_all(events);
        result
    }

    fn launch(
        &self,
        inner: &mut Inner,
        config: ListenerConfig,
        events: &mut Vec<IngestEvent>,
    ) -> Result<()> {
        let listener = {
            // Registering the socket with the reactor needs a runtime context
            let _guard = self.runtime.enter();
            network::bind_listener(config.socket_addr())
        };
        let (listener, local_addr) = match listener {
            Ok(bound) => bound,
            Err(err) => {
                error!("{}", err);
                events.push(IngestEvent::BindError {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        inner.session_id += 1;
        let gate = PauseGate::new(true);
        let stop = StopSignal::new();
        let context = SessionContext {
            id: inner.session_id,
            inner: Arc::clone(&self.inner),
            publisher: Arc::clone(&self.publisher),
            gate: gate.watcher(),
            stop: stop.watcher(),
            max_frame_bytes: config.max_frame_bytes,
        };
        let listener = ListenerSlot::new(listener);
        let worker = self.runtime.spawn(network::run_listener(
            listener.clone(),
            local_addr,
            context,
        ));

        inner.local_addr = Some(local_addr);
        inner.peer = None;
        inner.controls = Some(SessionControls {
            gate,
            stop,
            listener,
            worker,
        });
        inner.set_state(LifecycleState::Listening, events);
        Ok(())
    }

    /// Stops frame delivery at the next frame boundary.
    ///
    /// The connection stays open; unread data waits in the OS buffer. Pausing
    /// while no client is connected makes the next client start paused.
    pub fn pause(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            match inner.state {
                LifecycleState::Connected | LifecycleState::Listening => {
                    if let Some(controls) = &inner.controls {
                        controls.gate.close();
                    }
                    if inner.state == LifecycleState::Connected {
                        inner.set_state(LifecycleState::Paused, &mut events);
                    }
                }
                LifecycleState::Paused => {}
                state => warn!("pause ignored, service is {}", state),
            }
        }
        self.publish_all(events);
    }

    pub fn resume(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if inner.state.is_running() {
                Self::resume_locked(&mut inner, &mut events);
            } else {
                warn!("resume ignored, service is {}", inner.state);
            }
        }
        self.publish_all(events);
    }

    fn resume_locked(inner: &mut Inner, events: &mut Vec<IngestEvent>) {
        if let Some(controls) = &inner.controls {
            controls.gate.open();
        }
        if inner.state == LifecycleState::Paused {
            inner.set_state(LifecycleState::Connected, events);
        }
    }

    /// Tears the session down. Idempotent.
    ///
    /// The listening socket is closed and the client socket shut down before
    /// this returns, so the port can be bound again right away. The I/O task
    /// is then told to stop and the gate is opened so a paused reader cannot
    /// hold it up. Use [`IngestService::join`] to wait until the task has
    /// actually exited.
    pub fn stop(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if !inner.state.is_running() {
                debug!("stop ignored, service is {}", inner.state);
                return;
            }

            inner.close_connection();
            if let Some(controls) = inner.controls.take() {
                controls.listener.close();
                controls.stop.trigger();
                controls.gate.open();
                inner.retired.retain(|worker| !worker.is_finished());
                inner.retired.push(controls.worker);
            }
            inner.peer = None;
            inner.local_addr = None;
            inner.set_state(LifecycleState::Stopped, &mut events);
        }
        self.publish_all(events);
    }

    /// Waits for every stopped session's I/O task to exit.
    pub async fn join(&self) {
        let workers = std::mem::take(&mut self.lock().retired);
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Ingestion task failed: {}", e);
            }
        }
    }

    /// Stops the service and waits for the I/O task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_all(&self, events: Vec<IngestEvent>) {
        for event in events {
            self.publisher.publish(event);
        }
    }
}

impl Drop for IngestService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// What the I/O task of one session sees of the service.
///
/// State updates are ignored once the session is no longer current, so a
/// task that is still winding down cannot clobber a newer session.
pub(crate) struct SessionContext {
    id: u64,
    inner: Arc<Mutex<Inner>>,
    publisher: Arc<Publisher>,
    pub(crate) gate: GateWatcher,
    pub(crate) stop: StopWatcher,
    pub(crate) max_frame_bytes: u32,
}

impl SessionContext {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, event: IngestEvent) {
        self.publisher.publish(event);
    }

    /// Records an accepted client. Returns false if the session was stopped
    /// in the meantime, in which case the connection must be dropped.
    pub(crate) fn connection_opened(&self, peer: SocketAddr, closer: TcpStream) -> bool {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if inner.session_id != self.id || inner.state != LifecycleState::Listening {
                return false;
            }
            inner.peer = Some(peer);
            inner.connection = Some(closer);
            let state = if inner.gate_open() {
                LifecycleState::Connected
            } else {
                LifecycleState::Paused
            };
            inner.set_state(state, &mut events);
        }

        self.publish(IngestEvent::ClientConnected { peer });
        for event in events {
            self.publish(event);
        }
        true
    }

    /// Records the end of a client connection and returns to listening.
    pub(crate) fn connection_closed(&self, peer: SocketAddr, reason: DisconnectReason) {
        let mut events = Vec::new();
        {
            let mut inner = self.lock();
            if inner.session_id == self.id
                && matches!(
                    inner.state,
                    LifecycleState::Connected | LifecycleState::Paused
                )
            {
                inner.peer = None;
                inner.connection = None;
                inner.set_state(LifecycleState::Listening, &mut events);
            }
        }

        self.publish(IngestEvent::ClientDisconnected { peer, reason });
        for event in events {
            self.publish(event);
        }
    }
}
