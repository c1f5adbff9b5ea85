use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

use crate::callback::events::CallbackEvent;
use crate::error::{AppError, Result};
use crate::matrix::CorrelationKey;
use crate::results::RunResult;

/// A dispatched run waiting for its terminal callback.
struct PendingRun {
    rows: RunResult,
    resolver: oneshot::Sender<RunResult>,
}

/// What the registry did with an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No pending run has this key (stale, duplicate, or foreign traffic).
    UnknownKey,
    /// A row was appended; holds the run's buffered row count.
    Buffered(usize),
    /// The run was resolved and removed; holds its final row count.
    Finalized(usize),
    /// The key matched but the event carries nothing to act on.
    Ignored,
}

/// Routes inbound callbacks to the run that registered their correlation key.
///
/// Shared between the orchestrator (register/cancel) and the HTTP handler
/// (on_event). All mutation happens under one lock, so a finalized key is
/// gone before any later event for it is looked at.
#[derive(Default)]
pub struct ListenerRegistry {
    pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    runs: HashMap<CorrelationKey, PendingRun>,
    /// Set at teardown; no further runs may register.
    closed: bool,
}

/// Receiving side of a registered run.
pub struct RunListener {
    key: CorrelationKey,
    rx: oneshot::Receiver<RunResult>,
}

impl RunListener {
    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Wait for the run's terminal callback.
    ///
    /// Returns `None` if the run was cancelled or abandoned before finalizing.
    pub async fn wait(self) -> Option<RunResult> {
        self.rx.await.ok()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start listening for callbacks carrying `key`.
    pub async fn register(&self, key: CorrelationKey) -> Result<RunListener> {
        let mut pending = self.pending.lock().await;
        if pending.closed {
            return Err(AppError::Internal("listener registry is closed".to_string()));
        }
        if pending.runs.contains_key(&key) {
            return Err(AppError::DuplicateKey(key.to_string()));
        }

        let (resolver, rx) = oneshot::channel();
        pending.runs.insert(
            key.clone(),
            PendingRun {
                rows: Vec::new(),
                resolver,
            },
        );
        tracing::debug!(key = %key, "Registered listener");

        Ok(RunListener { key, rx })
    }

    /// Apply one inbound callback.
    pub async fn on_event(&self, key: &CorrelationKey, event: CallbackEvent) -> Disposition {
        let mut guard = self.pending.lock().await;
        let pending = &mut guard.runs;

        if !pending.contains_key(key) {
            return Disposition::UnknownKey;
        }

        match event {
            CallbackEvent::Batch(row) => match pending.get_mut(key) {
                Some(run) => {
                    run.rows.push(row);
                    Disposition::Buffered(run.rows.len())
                }
                None => Disposition::UnknownKey,
            },
            CallbackEvent::Finished => match pending.remove(key) {
                Some(run) => {
                    let count = run.rows.len();
                    // The waiter may have timed out already; the rows are dropped then.
                    let _ = run.resolver.send(run.rows);
                    Disposition::Finalized(count)
                }
                None => Disposition::UnknownKey,
            },
            CallbackEvent::Status(status) => {
                tracing::debug!(key = %key, status = %status, "Status update");
                Disposition::Ignored
            }
        }
    }

    /// Stop waiting for `key`. Its listener resolves to `None`.
    pub async fn cancel(&self, key: &CorrelationKey) -> bool {
        self.pending.lock().await.runs.remove(key).is_some()
    }

    /// Refuse new registrations and drop every pending run, returning how
    /// many there were.
    pub async fn close(&self) -> usize {
        let mut pending = self.pending.lock().await;
        pending.closed = true;
        let count = pending.runs.len();
        pending.runs.clear();
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.runs.len()
    }

    /// Rows buffered so far for a pending run.
    #[cfg(test)]
    pub(crate) async fn buffered_rows(&self, key: &CorrelationKey) -> Option<RunResult> {
        self.pending
            .lock()
            .await
            .runs
            .get(key)
            .map(|run| run.rows.clone())
    }

    pub async fn pending_keys(&self) -> Vec<CorrelationKey> {
        let mut keys: Vec<_> = self.pending.lock().await.runs.keys().cloned().collect();
        keys.sort();
        keys
    }
}
