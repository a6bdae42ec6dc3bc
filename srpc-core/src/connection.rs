//! SRPC connection state machine
//!
//! Mediates between the transport, the envelope codec and the call handler:
//! - Outgoing calls get a fresh id and wait in the pending registry until the
//!   matching CALLRESULT / CALLERROR arrives
//! - Incoming calls are dispatched to the handler on their own task and
//!   tracked until their response has been written
//! - Lifecycle: `Open → ClosingGraceful → Closed`, or `Open → Closed` on
//!   force-close and peer disconnect. The state never goes back.
//!
//! A graceful close waits for in-flight incoming calls before the transport
//! is closed. Outgoing calls keep resolving until that moment; whatever is
//! still unanswered then is abandoned according to [`AbandonPolicy`].
//!
//! [`AbandonPolicy`]: crate::AbandonPolicy

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::ConnectionConfig;
use crate::envelope::{Call, CallError, CallResult, Envelope, FrameError};
use crate::error::{ErrorCode, HandlerError, SrpcError, TransportError};
use crate::registry::PendingCalls;
use crate::transport::{CallHandler, Transport};

/// Description sent with `GenericError` when a call arrives during shutdown
const SHUTTING_DOWN: &str = "Connection is shutting down";

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Calls flow both ways
    Open,
    /// `close()` was requested; waiting for in-flight incoming calls
    ClosingGraceful,
    /// Transport closed or gone
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::ClosingGraceful => write!(f, "closing"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

type DisconnectCallback = Box<dyn FnOnce() + Send>;

/// State guarded by the connection's lock
struct Shared {
    state: ConnectionState,
    pending: PendingCalls,
    /// Ids of incoming calls whose response has not been written yet
    in_flight: HashSet<String>,
    /// Set once; no write reaches the transport afterwards
    transport_closed: bool,
}

impl Shared {
    /// Move to `Closed` and settle unanswered outgoing calls
    fn enter_closed(&mut self, config: &ConnectionConfig) {
        self.state = ConnectionState::Closed;

        let abandoned = self.pending.abandon_all(config.abandon_policy);
        if abandoned > 0 {
            warn!(
                "{}: {} outgoing calls left unanswered ({:?})",
                config.label, abandoned, config.abandon_policy
            );
        }
    }
}

struct Inner {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn CallHandler>,
    shared: Mutex<Shared>,
    /// Held shared by every transport write. Only a graceful close takes it
    /// exclusively; force-close and disconnect never wait on it.
    writes: RwLock<()>,
    closed_tx: watch::Sender<bool>,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
}

impl Inner {
    /// Write a frame unless the transport has been closed
    async fn write(&self, envelope: Envelope) -> Result<(), TransportError> {
        let _writing = self.writes.read().await;
        if self.shared.lock().transport_closed {
            return Err(TransportError::Closed);
        }

        debug!("{}: sending {}", self.config.label, envelope.to_text());
        self.transport.send(envelope.to_value()).await
    }

    /// Write a response to an incoming call, logging failures
    async fn reply(&self, envelope: Envelope) {
        let id = envelope.id().to_string();

        match self.write(envelope).await {
            Ok(()) => {}
            Err(TransportError::Closed) => {
                debug!("{}: transport closed, dropping response to {}", self.config.label, id);
            }
            Err(e) => {
                warn!("{}: failed to send response to {}: {}", self.config.label, id, e);
            }
        }
    }

    /// Mark the transport closed. True for the first caller only.
    fn shut(&self) -> bool {
        let mut shared = self.shared.lock();
        !std::mem::replace(&mut shared.transport_closed, true)
    }

    /// Close the transport now, without waiting for writes in progress
    async fn close_transport(&self) {
        if self.shut() {
            info!("{}: closing transport", self.config.label);
            if let Err(e) = self.transport.close().await {
                warn!("{}: transport close failed: {}", self.config.label, e);
            }
        }

        self.closed_tx.send_replace(true);
    }

    /// Close the transport once writes already in progress have finished,
    /// unless a force-close or disconnect gets there first
    async fn close_transport_after_writes(&self) {
        tokio::select! {
            _drained = self.writes.write() => self.close_transport().await,
            _ = self.wait_closed() => {}
        }
    }

    /// The peer is gone; nothing left to close
    fn transport_gone(&self) {
        self.shut();
        self.closed_tx.send_replace(true);
    }

    async fn wait_closed(&self) {
        let mut closed_rx = self.closed_tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = closed_rx.wait_for(|closed| *closed).await;
    }
}

/// Builder for [`Connection`]
pub struct ConnectionBuilder {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn CallHandler>,
    config: ConnectionConfig,
    on_disconnect: Option<DisconnectCallback>,
}

impl ConnectionBuilder {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Called once when the peer drops the transport
    pub fn on_disconnect(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_disconnect = Some(Box::new(callback));
        self
    }

    pub fn build(self) -> Connection {
        let (closed_tx, _) = watch::channel(false);

        Connection {
            inner: Arc::new(Inner {
                config: self.config,
                transport: self.transport,
                handler: self.handler,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Open,
                    pending: PendingCalls::default(),
                    in_flight: HashSet::new(),
                    transport_closed: false,
                }),
                writes: RwLock::new(()),
                closed_tx,
                on_disconnect: Mutex::new(self.on_disconnect),
            }),
        }
    }
}

enum Admission {
    Dispatch,
    Duplicate,
    Reject(ConnectionState),
}

/// One SRPC connection over one transport
///
/// Cloning is cheap; all clones drive the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub fn builder(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn CallHandler>,
    ) -> ConnectionBuilder {
        ConnectionBuilder {
            transport,
            handler,
            config: ConnectionConfig::default(),
            on_disconnect: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Outgoing calls awaiting a response
    pub fn pending_calls(&self) -> usize {
        self.inner.shared.lock().pending.len()
    }

    /// Incoming calls whose response has not been sent yet
    pub fn in_flight_calls(&self) -> usize {
        self.inner.shared.lock().in_flight.len()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Send a call and wait for the peer's response
    ///
    /// Fails immediately with [`SrpcError::InvalidState`] unless the
    /// connection is open. There is no timeout at this layer; wrap the
    /// future in `tokio::time::timeout` if one is needed.
    pub async fn send_call(
        &self,
        action: impl Into<String>,
        payload: Value,
    ) -> Result<Value, SrpcError> {
        let (call, response_rx) = {
            let mut shared = self.inner.shared.lock();
            if shared.state != ConnectionState::Open {
                return Err(SrpcError::InvalidState(shared.state));
            }
            shared.pending.register(action.into(), payload)
        };

        let id = call.id.clone();
        if let Err(e) = self.inner.write(Envelope::Call(call)).await {
            warn!("{}: failed to send call {}: {}", self.inner.config.label, id, e);
            // A close may already have settled the call
            self.inner
                .shared
                .lock()
                .pending
                .resolve(&id, Err(SrpcError::Transport(e)));
        }

        response_rx.await.unwrap_or(Err(SrpcError::ConnectionClosed))
    }

    /// Typed wrapper around [`send_call`](Self::send_call)
    pub async fn request<Req, Res>(
        &self,
        action: impl Into<String>,
        request: &Req,
    ) -> Result<Res, SrpcError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)?;
        let response = self.send_call(action, payload).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Process a text frame delivered by the transport
    pub async fn on_message(&self, text: &str) {
        match Envelope::from_text(text) {
            Ok(envelope) => self.on_envelope(envelope).await,
            Err(e) => self.on_frame_error(e).await,
        }
    }

    /// Process a frame that is already decoded JSON
    pub async fn on_frame(&self, frame: Value) {
        match Envelope::parse(&frame) {
            Ok(envelope) => self.on_envelope(envelope).await,
            Err(e) => self.on_frame_error(e).await,
        }
    }

    async fn on_envelope(&self, envelope: Envelope) {
        match envelope {
            Envelope::Call(call) => self.on_call(call).await,
            Envelope::Result(result) => self.settle(&result.id, Ok(result.payload)),
            Envelope::Error(error) => {
                let id = error.id.clone();
                self.settle(&id, Err(error.into_error()));
            }
        }
    }

    fn settle(&self, id: &str, outcome: Result<Value, SrpcError>) {
        let resolved = self.inner.shared.lock().pending.resolve(id, outcome);
        if !resolved {
            warn!("{}: discarding response to unknown call {}", self.inner.config.label, id);
        }
    }

    async fn on_frame_error(&self, error: FrameError) {
        match error.reply() {
            Some((id, code)) => {
                warn!("{}: rejecting frame with {}: {}", self.inner.config.label, code, error);
                let reply = CallError::new(id, code, error.to_string());
                self.inner.reply(reply.into()).await;
            }
            None => {
                let failed = error.response_id().is_some_and(|id| {
                    let outcome = Err(SrpcError::MalformedResponse(error.to_string()));
                    self.inner.shared.lock().pending.resolve(id, outcome)
                });

                if failed {
                    warn!("{}: failing call on malformed response: {}", self.inner.config.label, error);
                } else {
                    warn!("{}: dropping unparseable frame: {}", self.inner.config.label, error);
                }
            }
        }
    }

    async fn on_call(&self, call: Call) {
        let admission = {
            let mut shared = self.inner.shared.lock();
            let state = shared.state;
            match state {
                ConnectionState::Open => {
                    if shared.in_flight.insert(call.id.clone()) {
                        Admission::Dispatch
                    } else {
                        Admission::Duplicate
                    }
                }
                state => Admission::Reject(state),
            }
        };

        match admission {
            Admission::Dispatch => {
                debug!("{}: dispatching {} ({})", self.inner.config.label, call.action, call.id);
                let connection = self.clone();
                tokio::spawn(connection.run_handler(call));
            }
            Admission::Duplicate => {
                warn!(
                    "{}: call id {} is already in flight, dropping {}",
                    self.inner.config.label, call.id, call.action
                );
            }
            Admission::Reject(state) => {
                info!(
                    "{}: rejecting {} ({}), connection is {}",
                    self.inner.config.label, call.action, call.id, state
                );
                let reply = CallError::new(call.id, ErrorCode::GenericError, SHUTTING_DOWN);
                self.inner.reply(reply.into()).await;
            }
        }
    }

    async fn run_handler(self, call: Call) {
        let id = call.id.clone();
        let action = call.action.clone();

        let outcome = AssertUnwindSafe(self.inner.handler.handle(call))
            .catch_unwind()
            .await;

        let response: Envelope = match outcome {
            Ok(Ok(payload)) => CallResult::new(id.clone(), payload).into(),
            Ok(Err(HandlerError::Call {
                code,
                description,
                details,
            })) => CallError {
                id: id.clone(),
                code,
                description,
                details,
            }
            .into(),
            Ok(Err(HandlerError::Failed(reason))) => {
                warn!("{}: handler for {} ({}) failed: {}", self.inner.config.label, action, id, reason);
                CallError::new(id.clone(), ErrorCode::InternalError, reason).into()
            }
            Err(_) => {
                error!("{}: handler for {} ({}) panicked", self.inner.config.label, action, id);
                CallError::new(id.clone(), ErrorCode::InternalError, "Call handler panicked").into()
            }
        };

        self.inner.reply(response).await;
        self.finish_incoming(&id).await;
    }

    /// Forget an answered incoming call; completes a pending graceful close
    /// once nothing is in flight anymore.
    async fn finish_incoming(&self, id: &str) {
        let drained = {
            let mut shared = self.inner.shared.lock();
            shared.in_flight.remove(id);

            if shared.state == ConnectionState::ClosingGraceful && shared.in_flight.is_empty() {
                shared.enter_closed(&self.inner.config);
                true
            } else {
                false
            }
        };

        if drained {
            info!("{}: last in-flight call answered", self.inner.config.label);
            self.inner.close_transport_after_writes().await;
        }
    }

    /// Close gracefully
    ///
    /// Completes once every in-flight incoming call has been answered and the
    /// transport is closed. Concurrent and repeated calls share the same
    /// close; the transport is closed only once.
    pub async fn close(&self) {
        let close_now = {
            let mut shared = self.inner.shared.lock();
            let state = shared.state;
            match state {
                ConnectionState::Open if shared.in_flight.is_empty() => {
                    shared.enter_closed(&self.inner.config);
                    true
                }
                ConnectionState::Open => {
                    shared.state = ConnectionState::ClosingGraceful;
                    info!(
                        "{}: closing, waiting for {} in-flight calls",
                        self.inner.config.label,
                        shared.in_flight.len()
                    );
                    false
                }
                ConnectionState::ClosingGraceful | ConnectionState::Closed => false,
            }
        };

        if close_now {
            self.inner.close_transport_after_writes().await;
        }

        self.inner.wait_closed().await;
    }

    /// Close the transport now, abandoning in-flight work
    ///
    /// A concurrently pending [`close`](Self::close) completes as well.
    pub async fn force_close(&self) {
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != ConnectionState::Closed {
                if !shared.in_flight.is_empty() {
                    warn!(
                        "{}: force-closing with {} in-flight calls",
                        self.inner.config.label,
                        shared.in_flight.len()
                    );
                }
                shared.enter_closed(&self.inner.config);
            }
        }

        self.inner.close_transport().await;
    }

    /// Report that the peer closed the transport
    ///
    /// The disconnect callback fires on the first report only.
    pub async fn on_transport_disconnect(&self) {
        {
            let mut shared = self.inner.shared.lock();
            if shared.state == ConnectionState::Closed {
                debug!("{}: disconnect after close, ignoring", self.inner.config.label);
                return;
            }
            shared.enter_closed(&self.inner.config);
        }

        warn!("{}: transport disconnected by peer", self.inner.config.label);
        self.inner.transport_gone();

        let callback = self.inner.on_disconnect.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Wait until the connection is closed, whichever way that happens
    pub async fn closed(&self) {
        self.inner.wait_closed().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("Connection")
            .field("label", &self.inner.config.label)
            .field("state", &shared.state)
            .field("pending", &shared.pending.len())
            .field("in_flight", &shared.in_flight.len())
            .finish()
    }
}
