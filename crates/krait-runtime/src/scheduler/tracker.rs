//! Invocation tracker — routes async executor completions back to the
//! waiting scheduler task via oneshot channels keyed by invocation ID.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

/// Tracks invocations awaiting an external completion signal.
pub struct InvocationTracker {
    pending: HashMap<String, oneshot::Sender<Value>>,
}

impl InvocationTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register an invocation, returning the receiver that will deliver
    /// its result payload.
    pub fn register(&mut self, invocation_id: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.insert(invocation_id.to_owned(), tx);
        rx
    }

    /// Resolve a pending invocation with its result payload. Returns
    /// `false` if the ID is unknown or already resolved.
    pub fn resolve(&mut self, invocation_id: &str, value: Value) -> bool {
        match self.pending.remove(invocation_id) {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Drop a registration without resolving (sync completion paths).
    pub fn forget(&mut self, invocation_id: &str) {
        let _ = self.pending.remove(invocation_id);
    }

    /// Whether an invocation is awaiting completion.
    #[must_use]
    pub fn has_pending(&self, invocation_id: &str) -> bool {
        self.pending.contains_key(invocation_id)
    }

    /// Number of invocations awaiting completion.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cancel everything pending. Waiting receivers observe an error and
    /// mark their invocations terminal.
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }
}

impl Default for InvocationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolve_delivers_payload() {
        let mut tracker = InvocationTracker::new();
        let rx = tracker.register("call_1");
        assert!(tracker.has_pending("call_1"));

        assert!(tracker.resolve("call_1", json!({"content": "done"})));
        assert!(!tracker.has_pending("call_1"));
        assert_eq!(rx.await.unwrap()["content"], "done");
    }

    #[test]
    fn resolve_unknown_returns_false() {
        let mut tracker = InvocationTracker::new();
        assert!(!tracker.resolve("nope", json!(null)));
    }

    #[tokio::test]
    async fn cancel_all_errors_waiting_receivers() {
        let mut tracker = InvocationTracker::new();
        let rx1 = tracker.register("call_1");
        let rx2 = tracker.register("call_2");

        tracker.cancel_all();
        assert_eq!(tracker.pending_count(), 0);
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[tokio::test]
    async fn resolve_only_once() {
        let mut tracker = InvocationTracker::new();
        let rx = tracker.register("call_1");
        assert!(tracker.resolve("call_1", json!("first")));
        assert!(!tracker.resolve("call_1", json!("second")));
        assert_eq!(rx.await.unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn reregister_replaces_sender() {
        let mut tracker = InvocationTracker::new();
        let rx1 = tracker.register("call_1");
        let rx2 = tracker.register("call_1");
        assert_eq!(tracker.pending_count(), 1);

        assert!(rx1.await.is_err());
        let _ = tracker.resolve("call_1", json!("result"));
        assert_eq!(rx2.await.unwrap(), json!("result"));
    }

    #[tokio::test]
    async fn forget_drops_without_resolving() {
        let mut tracker = InvocationTracker::new();
        let rx = tracker.register("call_1");
        tracker.forget("call_1");
        assert!(!tracker.has_pending("call_1"));
        assert!(rx.await.is_err());
    }
}
