//! Pending outgoing call registry
//!
//! Correlates CALLRESULT / CALLERROR frames with the CALL that asked for
//! them. Each entry is resolved at most once: by a response, by a send
//! failure, or by abandonment when the transport goes away.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::config::AbandonPolicy;
use crate::envelope::Call;
use crate::error::SrpcError;

pub(crate) type CallOutcome = Result<Value, SrpcError>;

/// Outgoing call awaiting its response
pub(crate) struct PendingCall {
    call: Call,
    response_tx: oneshot::Sender<CallOutcome>,
}

impl PendingCall {
    fn complete(self, outcome: CallOutcome) {
        if self.response_tx.send(outcome).is_err() {
            debug!(
                "Caller of {} ({}) stopped waiting for the response",
                self.call.action, self.call.id
            );
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingCalls {
    calls: HashMap<String, PendingCall>,
    /// Calls abandoned under `AbandonPolicy::LeaveUnresolved`; holding the
    /// senders keeps the callers' futures pending.
    abandoned: Vec<PendingCall>,
}

impl PendingCalls {
    /// Allocate a fresh call id and register the call under it
    pub fn register(
        &mut self,
        action: String,
        payload: Value,
    ) -> (Call, oneshot::Receiver<CallOutcome>) {
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !self.calls.contains_key(&candidate) {
                break candidate;
            }
        };

        let call = Call {
            id: id.clone(),
            action,
            payload,
        };
        let (response_tx, response_rx) = oneshot::channel();

        self.calls.insert(
            id,
            PendingCall {
                call: call.clone(),
                response_tx,
            },
        );

        (call, response_rx)
    }

    /// Resolve the call registered under `id`. Returns false for unknown ids.
    pub fn resolve(&mut self, id: &str, outcome: CallOutcome) -> bool {
        match self.calls.remove(id) {
            Some(pending) => {
                debug!("Resolved {} ({})", pending.call.action, id);
                pending.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Settle every registered call after the transport has gone away
    pub fn abandon_all(&mut self, policy: AbandonPolicy) -> usize {
        let count = self.calls.len();

        for (_, pending) in self.calls.drain() {
            match policy {
                AbandonPolicy::Fail => pending.complete(Err(SrpcError::ConnectionClosed)),
                AbandonPolicy::LeaveUnresolved => self.abandoned.push(pending),
            }
        }

        count
    }

    #[cfg(test)]
    pub fn contains(&self, id: &str) -> bool {
        self.calls.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with_call() -> (PendingCalls, Call, oneshot::Receiver<CallOutcome>) {
        let mut registry = PendingCalls::default();
        let (call, rx) = registry.register("FireMissiles".into(), json!({"aargh": 42}));
        (registry, call, rx)
    }

    #[test]
    fn test_register_allocates_unique_ids() {
        let mut registry = PendingCalls::default();
        let mut ids = std::collections::HashSet::new();

        for _ in 0..100 {
            let (call, _rx) = registry.register("Heartbeat".into(), json!({}));
            assert!(ids.insert(call.id));
        }

        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn test_resolve_exactly_once() {
        let (mut registry, call, mut rx) = registry_with_call();
        assert_eq!(call.action, "FireMissiles");
        assert_eq!(call.payload, json!({"aargh": 42}));
        assert!(registry.contains(&call.id));

        assert!(registry.resolve(&call.id, Ok(json!({"urgh": 2}))));
        assert!(!registry.contains(&call.id));
        assert!(!registry.resolve(&call.id, Ok(json!({"urgh": 3}))));

        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"urgh": 2}));
    }

    #[test]
    fn test_unknown_id_resolves_nothing() {
        let (mut registry, _call, mut rx) = registry_with_call();

        assert!(!registry.resolve("someone-else", Ok(json!({}))));
        assert_eq!(registry.len(), 1);
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
    }

    #[test]
    fn test_abandon_fail() {
        let (mut registry, _call, mut rx) = registry_with_call();

        assert_eq!(registry.abandon_all(AbandonPolicy::Fail), 1);
        assert_eq!(registry.len(), 0);
        assert!(matches!(rx.try_recv(), Ok(Err(SrpcError::ConnectionClosed))));
    }

    #[test]
    fn test_abandon_leave_unresolved() {
        let (mut registry, call, mut rx) = registry_with_call();

        assert_eq!(registry.abandon_all(AbandonPolicy::LeaveUnresolved), 1);
        assert_eq!(registry.len(), 0);
        assert!(!registry.resolve(&call.id, Ok(json!({}))));
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
    }
}
