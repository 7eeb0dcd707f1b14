//! The set of live server connections.
//!
//! Each accepted connection registers its task's abort handle here and
//! unregisters on natural completion. `clear()` aborts whatever is left,
//! which cancels the task's outstanding I/O and timers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::AbortHandle;

#[derive(Default)]
pub(crate) struct ConnectionPool {
    connections: Mutex<HashMap<u64, AbortHandle>>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, handle: AbortHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut connections) = self.connections.lock() {
            connections.insert(id, handle);
        }
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.remove(&id);
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Close every remaining connection.
    pub(crate) async fn clear(&self) {
        let handles: Vec<AbortHandle> = match self.connections.lock() {
            Ok(mut connections) => connections.drain().map(|(_, h)| h).collect(),
            Err(_) => return,
        };
        if handles.is_empty() {
            return;
        }

        tracing::debug!(count = handles.len(), "closing all server connections");
        for handle in &handles {
            handle.abort();
        }

        // Give in-flight TLS handshake completions time to observe the
        // aborts before the handles are released.
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
