//! Request/response correlation
//!
//! Both the DAP client and the CDP adapter keep outstanding requests in a
//! [`PendingRequests`] table keyed by their integer id. Every entry leaves
//! the table exactly once: through a matching response, a timeout, or a
//! session-wide `fail_all`.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use super::{Error, Result};

/// Outcome delivered to a waiting caller
pub type Outcome = Result<Value>;

#[derive(Debug)]
struct PendingRequest {
    command: String,
    tx: oneshot::Sender<Outcome>,
}

/// Outstanding requests, ordered by id
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: Mutex<BTreeMap<i64, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<i64, PendingRequest>> {
        super::lock(&self.entries)
    }

    /// Record a request and get the receiver its outcome will arrive on
    ///
    /// Ids are expected to be fresh; registering an id twice replaces the
    /// older entry, whose caller then observes `SessionStopped`.
    pub fn register(&self, id: i64, command: &str) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        let previous = self.entries().insert(
            id,
            PendingRequest {
                command: command.to_string(),
                tx,
            },
        );
        if previous.is_some() {
            tracing::warn!(id, command, "Replaced pending request with duplicate id");
        }
        rx
    }

    /// Deliver an outcome to the request with this id
    ///
    /// Returns the command name, or `None` if the id is unknown (never
    /// sent, already answered, or timed out).
    pub fn resolve(&self, id: i64, outcome: Outcome) -> Option<String> {
        let entry = self.entries().remove(&id)?;
        // The caller may have given up already; that still counts as resolved
        let _ = entry.tx.send(outcome);
        Some(entry.command)
    }

    /// Command name of a still-pending request
    pub fn command(&self, id: i64) -> Option<String> {
        self.entries().get(&id).map(|entry| entry.command.clone())
    }

    /// Drop an entry without resolving it
    pub fn remove(&self, id: i64) -> bool {
        self.entries().remove(&id).is_some()
    }

    /// Reject every outstanding request, oldest first
    pub fn fail_all(&self, make_error: impl Fn(&str) -> Error) -> usize {
        let drained = std::mem::take(&mut *self.entries());
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(id, command = %entry.command, "Failing pending request");
            let _ = entry.tx.send(Err(make_error(&entry.command)));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Wait for the outcome of a registered request
    ///
    /// On timeout the entry is removed first, so a late response finds
    /// nothing to resolve.
    pub async fn wait(
        &self,
        id: i64,
        command: &str,
        rx: oneshot::Receiver<Outcome>,
        timeout: Duration,
    ) -> Outcome {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(Error::SessionStopped(command.to_string())),
            Err(_elapsed) => {
                self.remove(id);
                tracing::warn!(id, command, secs = timeout.as_secs(), "Request timed out");
                Err(Error::timeout(command, timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_reverse_order_responses_reach_their_callers() {
        let pending = PendingRequests::new();
        let receivers: Vec<_> = (1..=5)
            .map(|id| (id, pending.register(id, "evaluate")))
            .collect();

        for id in (1..=5).rev() {
            assert_eq!(
                pending.resolve(id, Ok(json!({ "id": id }))).as_deref(),
                Some("evaluate")
            );
        }

        for (id, rx) in receivers {
            let value = rx.await.unwrap().unwrap();
            assert_eq!(value["id"], id);
        }
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_removes_entry() {
        let pending = PendingRequests::new();
        let rx = pending.register(7, "threads");

        let err = pending
            .wait(7, "threads", rx, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { ref command, secs: 30 } if command == "threads"));

        // A late response finds nothing
        assert!(pending.resolve(7, Ok(Value::Null)).is_none());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_rejects_everything() {
        let pending = PendingRequests::new();
        let a = pending.register(1, "continue");
        let b = pending.register(2, "stackTrace");

        assert_eq!(pending.fail_all(|cmd| Error::SessionStopped(cmd.into())), 2);

        assert!(matches!(a.await.unwrap(), Err(Error::SessionStopped(c)) if c == "continue"));
        assert!(matches!(b.await.unwrap(), Err(Error::SessionStopped(c)) if c == "stackTrace"));
        assert_eq!(pending.fail_all(|cmd| Error::SessionStopped(cmd.into())), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_ignored() {
        let pending = PendingRequests::new();
        assert!(pending.resolve(99, Ok(Value::Null)).is_none());
        assert!(!pending.remove(99));
    }
}
