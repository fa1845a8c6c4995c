//! Error types shared between client and server.
//!
//! The `RatesError` enum unifies common failure cases for I/O, serialization,
//! rate lookups, subscriptions, channel communication and lock poisoning,
//! allowing crates to propagate a single error type.
use std::io;
use std::sync::PoisonError;

use thiserror::Error;

use crate::currency::Currency;
use crate::protocol::RpcError;

/// Unified error type shared by client and server.
#[derive(Error, Debug)]
pub enum RatesError {
    /// I/O error originating from the standard library or sockets/files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure while encoding/decoding JSON via serde_json.
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The rate feed could not be loaded or contained invalid data.
    #[error("Rate feed load error: {0}")]
    FeedLoad(String),

    /// A currency is not present in the rate table.
    #[error("Rate not found for currency {0}")]
    CurrencyNotFound(Currency),

    /// A request is not acceptable as given.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The pair is already subscribed on the connection.
    #[error("Subscription already exists for {base}->{destination}")]
    DuplicateSubscription {
        /// Currency the rate is quoted from.
        base: Currency,
        /// Currency the rate is quoted into.
        destination: Currency,
    },

    /// Typed failure returned by the rate server, passed through untouched.
    #[error("Rate server error: {0}")]
    Rpc(RpcError),

    /// Stream or connection level failure; contains a short context string.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Crossbeam/channel send failed (e.g., receiver dropped); contains a short context string.
    #[error("Channel send failed: {0}")]
    ChannelSend(String),

    /// Crossbeam/channel receive failed (e.g., sender closed); contains a short context string.
    #[error("Channel receive failed: {0}")]
    ChannelRecv(String),

    /// Error indicating a poisoned mutex/lock was encountered.
    #[error("Mutex Lock Poisoned: {0}")]
    MutexLock(String),
}

impl RatesError {
    /// Returns `true` when a socket read or write gave up because its timeout
    /// elapsed, not because the peer failed.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RatesError::Io(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

impl<T> From<PoisonError<T>> for RatesError {
    fn from(err: PoisonError<T>) -> Self {
        RatesError::MutexLock(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_recognised() {
        let timed_out = RatesError::Io(io::Error::new(io::ErrorKind::WouldBlock, "idle"));
        assert!(timed_out.is_timeout());
        let reset = RatesError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(!reset.is_timeout());
        assert!(!RatesError::Transport("closed".into()).is_timeout());
    }

    #[test]
    fn duplicate_subscription_message_names_pair() {
        let err = RatesError::DuplicateSubscription {
            base: Currency::EUR,
            destination: Currency::USD,
        };
        assert_eq!(err.to_string(), "Subscription already exists for EUR->USD");
    }
}
