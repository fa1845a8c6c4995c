//! Subscription registry for rate stream connections.
//!
//! This module tracks which connection wants which currency pair. It exposes
//! the following operations:
//!
//! - `SubscriptionRegistry::register(outbound)`: record a new connection with
//!   the sending half of its bounded outbound queue and hand out its id.
//! - `SubscriptionRegistry::subscribe(conn, key)`: add a pair for a connection;
//!   a pair already present is rejected, not merged.
//! - `SubscriptionRegistry::unsubscribe(conn)`: drop the connection together
//!   with all its pairs.
//! - `SubscriptionRegistry::snapshot()`: copy of every live connection with
//!   its pairs, for the broadcaster to iterate without holding the lock.
//!
//! Design notes:
//! - Every operation goes through one `Mutex`; the raw map is never exposed.
//! - Pairs keep their subscription order, so a connection receives the updates
//!   of one tick in a stable order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;
use rates_common::{RateRequest, RatesError, Result, StreamMessage};

/// Subscription key: an ordered `(base, destination)` pair.
pub type SubscriptionKey = RateRequest;

/// Unique identity of one rate stream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Internal bookkeeping for a connection.
struct ConnectionEntry {
    outbound: Sender<StreamMessage>,
    keys: Vec<SubscriptionKey>,
}

/// Copy of one registry entry taken by [`SubscriptionRegistry::snapshot`].
#[derive(Debug, Clone)]
pub struct Subscriber {
    /// Connection the pairs belong to.
    pub connection: ConnectionId,
    /// Sending half of the connection's bounded outbound queue.
    pub outbound: Sender<StreamMessage>,
    /// Subscribed pairs in subscription order.
    pub keys: Vec<SubscriptionKey>,
}

/// Tracks live connections and the pairs each one subscribed to.
pub struct SubscriptionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
    next_id: AtomicU64,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a new connection and return its id.
    pub fn register(&self, outbound: Sender<StreamMessage>) -> Result<ConnectionId> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.connections.lock()?.insert(
            id,
            ConnectionEntry {
                outbound,
                keys: Vec::new(),
            },
        );
        Ok(id)
    }

    /// Add `key` for `conn`.
    ///
    /// Fails with `DuplicateSubscription` if the connection already has the
    /// pair and with `Transport` if the connection is no longer registered.
    pub fn subscribe(&self, conn: ConnectionId, key: SubscriptionKey) -> Result<()> {
        let mut connections = self.connections.lock()?;
        let entry = connections
            .get_mut(&conn)
            .ok_or_else(|| RatesError::Transport(format!("{} is closed", conn)))?;
        if entry.keys.contains(&key) {
            return Err(RatesError::DuplicateSubscription {
                base: key.base,
                destination: key.destination,
            });
        }
        entry.keys.push(key);
        Ok(())
    }

    /// Remove `conn` and all its pairs. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, conn: ConnectionId) -> Result<bool> {
        Ok(self.connections.lock()?.remove(&conn).is_some())
    }

    /// Stable copy of all connections and their pairs.
    pub fn snapshot(&self) -> Result<Vec<Subscriber>> {
        let connections = self.connections.lock()?;
        let mut subscribers: Vec<Subscriber> = connections
            .iter()
            .map(|(&connection, entry)| Subscriber {
                connection,
                outbound: entry.outbound.clone(),
                keys: entry.keys.clone(),
            })
            .collect();
        subscribers.sort_by_key(|s| s.connection);
        Ok(subscribers)
    }

    /// Pairs currently subscribed by `conn` (empty if unknown).
    pub fn subscriptions(&self, conn: ConnectionId) -> Result<Vec<SubscriptionKey>> {
        Ok(self
            .connections
            .lock()?
            .get(&conn)
            .map(|entry| entry.keys.clone())
            .unwrap_or_default())
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> Result<usize> {
        Ok(self.connections.lock()?.len())
    }
}
