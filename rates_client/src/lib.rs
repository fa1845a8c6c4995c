//! Consumer side of the currency rate service.
//!
//! - `source::TcpRateSource`: unary `GetRate` calls over one reused connection.
//! - `stream::TcpConnector`: opens the `SubscribeRates` stream.
//! - `cache::RateCache`: local rate cache that subscribes lazily on the first
//!   miss for a currency and is kept current by a background receive loop.
//! - `backoff::Backoff`: reconnect delays for that loop.
#![warn(missing_docs)]
pub mod args;
pub mod backoff;
pub mod cache;
pub mod source;
pub mod stream;

pub use backoff::{Backoff, BackoffConfig};
pub use cache::{RateCache, SubscriptionState};
pub use source::{RateSource, TcpRateSource};
pub use stream::{Connector, Inbound, MessageReader, RequestWriter, TcpConnector};
