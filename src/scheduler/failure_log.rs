//! Bounded, durable log of probe failures.
//!
//! Appends go through a channel to a writer task, so recording a failure
//! never waits on SQLite. The writer applies commands in the order they
//! were sent.

use crate::db::{DbError, FailureLogEntry, Store};

use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Default number of entries kept.
pub const DEFAULT_FAILURE_LOG_CAPACITY: usize = 100;

enum Command {
    Append(FailureLogEntry),
    Clear(oneshot::Sender<Result<(), DbError>>),
    Flush(oneshot::Sender<()>),
}

/// Append-only failure log holding at most `capacity` entries, oldest
/// evicted first.
pub struct FailureLog {
    store: Arc<Store>,
    capacity: usize,
    tx: mpsc::UnboundedSender<Command>,
}

impl FailureLog {
    /// Create the log and spawn its writer. Must be called inside a runtime.
    pub fn new(store: Arc<Store>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_log_writer(rx, store.clone(), capacity));

        Self {
            store,
            capacity,
            tx,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Queue a failure. Storage errors are logged by the writer and dropped
    /// so monitoring keeps running without a writable log.
    pub fn append(&self, entry: FailureLogEntry) {
        if self.tx.send(Command::Append(entry)).is_err() {
            tracing::error!("FailureLog: Writer stopped, dropping entry");
        }
    }

    /// Wait until every entry queued so far has been written.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// All retained entries, oldest first, including every queued append.
    pub async fn read(&self) -> Result<Vec<FailureLogEntry>, DbError> {
        self.flush().await;
        self.store.get_failures()
    }

    /// Delete every entry queued or written before this call.
    pub async fn clear(&self) -> Result<(), DbError> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Clear(done_tx)).is_err() {
            return self.store.clear_failures();
        }
        match done_rx.await {
            Ok(result) => result,
            Err(_) => self.store.clear_failures(),
        }
    }
}

/// Apply log commands one at a time until every sender is gone.
async fn run_log_writer(mut rx: mpsc::UnboundedReceiver<Command>, store: Arc<Store>, capacity: usize) {
    while let Some(command) = rx.recv().await {
        let store = store.clone();
        let done = match command {
            // Everything sent earlier has already been applied
            Command::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            Command::Append(entry) => tokio::task::spawn_blocking(move || {
                if let Err(e) = store.append_failure(&entry, capacity) {
                    tracing::error!(
                        "FailureLog: Failed to record failure for {}: {}",
                        entry.target_name,
                        e
                    );
                }
            }),
            Command::Clear(done) => tokio::task::spawn_blocking(move || {
                let _ = done.send(store.clear_failures());
            }),
        };

        if let Err(e) = done.await {
            tracing::error!("FailureLog: Writer task failed: {}", e);
        }
    }
}

/// Render entries one per line.
pub fn render_text(entries: &[FailureLogEntry]) -> String {
    if entries.is_empty() {
        return "No failures recorded.\n".to_string();
    }

    let mut out = String::new();
    for e in entries {
        let _ = writeln!(
            out,
            "{} {} ({}:{}) unreachable",
            e.time.to_rfc3339(),
            e.target_name,
            e.address,
            e.port
        );
    }
    out
}
