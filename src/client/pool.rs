//! Keep-alive connection cache for the client session.
//!
//! One idle connection per `(scheme, host, port)` group. Entries are
//! checked out for the whole duration of a send, so nothing mutates a
//! connection that is in use.

use crate::client::conn::Conn;
use crate::url::{Scheme, Url};
use dashmap::DashMap;
use std::time::Duration;

/// Identifies a connection group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl PoolKey {
    pub(crate) fn from_url(url: &Url) -> Self {
        Self {
            scheme: url.scheme(),
            host: url.host().to_owned(),
            port: url.port(),
        }
    }
}

#[derive(Default)]
pub(crate) struct ClientPool {
    idle: DashMap<PoolKey, Conn>,
}

impl ClientPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Take the idle connection for `key`, if it is still usable. A stale
    /// entry is dropped on the spot.
    pub(crate) fn checkout(&self, key: &PoolKey) -> Option<Conn> {
        let (_, conn) = self.idle.remove(key)?;
        if conn.is_reusable() {
            tracing::debug!(?key, "reusing pooled connection");
            Some(conn)
        } else {
            tracing::debug!(?key, "pooled connection went stale");
            None
        }
    }

    /// Return a connection to the pool after a keep-alive exchange.
    pub(crate) fn checkin(&self, key: PoolKey, conn: Conn) {
        self.idle.insert(key, conn);
    }

    pub(crate) fn size(&self) -> usize {
        self.idle.len()
    }

    /// Close every pooled connection.
    pub(crate) async fn clear(&self, ssl_shutdown_timeout: Duration) {
        let keys: Vec<PoolKey> = self.idle.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, conn)) = self.idle.remove(&key) {
                conn.close(ssl_shutdown_timeout).await;
            }
        }
        tracing::debug!("client pool cleared");
    }
}
