//! In-flight request table.
//!
//! Entries are inserted before the request frame is written and removed
//! exactly once: by the matching response, by the caller's timeout, or when
//! the connection that carried them closes. The completion handle is a
//! `oneshot::Sender`, consumed on removal, so an entry can never settle twice.

use std::{collections::HashMap, sync::Mutex, time::Instant};

use {serde_json::Value, tokio::sync::oneshot};

use crate::error::{Error, Result};

struct PendingRequest {
    method: String,
    /// Connection the request was written to.
    epoch: u64,
    sender: oneshot::Sender<Result<Value>>,
    created_at: Instant,
}

#[derive(Default)]
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<String, PendingRequest>>,
}

impl PendingRequests {
    /// Register `id` and return the receiver its outcome will arrive on.
    pub(crate) fn insert(
        &self,
        id: &str,
        method: &str,
        epoch: u64,
    ) -> oneshot::Receiver<Result<Value>> {
        let (sender, receiver) = oneshot::channel();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(id.to_string(), PendingRequest {
            method: method.to_string(),
            epoch,
            sender,
            created_at: Instant::now(),
        });
        receiver
    }

    /// Settle `id` with `outcome`. Returns `false` when no such entry is
    /// live (already timed out, or never sent by us).
    pub(crate) fn resolve(&self, id: &str, outcome: Result<Value>) -> bool {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.remove(id)
        };
        match entry {
            Some(entry) => {
                tracing::trace!(
                    id,
                    method = %entry.method,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "request settled"
                );
                let _ = entry.sender.send(outcome);
                true
            },
            None => false,
        }
    }

    pub(crate) fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(id).is_some()
    }

    /// Reject every entry written to connection `epoch`.
    pub(crate) fn reject_connection(&self, epoch: u64, make_err: impl Fn() -> Error) -> usize {
        self.drain(|entry| entry.epoch == epoch, make_err)
    }

    /// Reject every entry regardless of connection.
    pub(crate) fn reject_all(&self, make_err: impl Fn() -> Error) -> usize {
        self.drain(|_| true, make_err)
    }

    fn drain(
        &self,
        matches: impl Fn(&PendingRequest) -> bool,
        make_err: impl Fn() -> Error,
    ) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| matches(entry))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.sender.send(Err(make_err()));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
