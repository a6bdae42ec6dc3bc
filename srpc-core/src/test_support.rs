//! Doubles for the transport and handler capabilities

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::envelope::Call;
use crate::error::{HandlerError, TransportError};
use crate::transport::{CallHandler, Transport};

/// Poll `condition` until it holds, yielding to spawned tasks in between
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Transport that records what it was asked to do
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Value>>,
    sent_after_close: AtomicBool,
    closes: AtomicUsize,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn sent_before_close(&self) -> bool {
        !self.sent_after_close.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Wait until at least `count` frames were sent
    pub async fn wait_for_frames(&self, count: usize) -> Vec<Value> {
        eventually(|| self.sent.lock().len() >= count).await;
        self.sent()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, frame: Value) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("socket on fire".into()));
        }
        if self.close_count() > 0 {
            self.sent_after_close.store(true, Ordering::SeqCst);
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport whose sends never complete until it is closed, like a socket
/// the peer stopped reading from
pub struct StalledTransport {
    closed: Semaphore,
    sends: AtomicUsize,
    closes: AtomicUsize,
}

impl Default for StalledTransport {
    fn default() -> Self {
        Self {
            closed: Semaphore::new(0),
            sends: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }
}

impl StalledTransport {
    /// Sends started so far, finished or not
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StalledTransport {
    async fn send(&self, _frame: Value) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        // No permits are ever added; this only returns once closed
        let _ = self.closed.acquire().await;
        Err(TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.close();
        Ok(())
    }
}

/// Handler that echoes the payload, but only once released
pub struct GatedHandler {
    gate: Semaphore,
    calls: AtomicUsize,
}

impl Default for GatedHandler {
    fn default() -> Self {
        Self {
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }
}

impl GatedHandler {
    /// Let `n` waiting (or future) calls complete
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Number of calls that reached the handler
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CallHandler for GatedHandler {
    async fn handle(&self, call: Call) -> Result<Value, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate
            .acquire()
            .await
            .map_err(HandlerError::failed)?
            .forget();
        Ok(json!({"echo": call.payload}))
    }
}
