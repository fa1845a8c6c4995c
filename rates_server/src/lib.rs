//! Currency rate distribution server.
//!
//! The server keeps a fluctuating exchange-rate table and pushes live updates
//! to subscribed consumers. It is assembled from:
//!
//! - `model::rate_table::RateTable`: current rates, replaced as a whole on
//!   every tick so readers never see a half-updated table.
//! - `model::registry::SubscriptionRegistry`: which connection wants which
//!   currency pair, guarded by a single lock.
//! - `broadcaster`: the ticker thread and the per-tick fan-out into bounded
//!   per-connection queues (full queue drops the update, closed queue removes
//!   the connection).
//! - `service::RateService`: the `GetRate` and `SubscribeRates` protocol rules.
//! - `connection` / `receiver`: TCP transport: listeners, one reader and one
//!   single writer per stream connection.
#![warn(missing_docs)]
pub mod args;
pub mod broadcaster;
pub mod connection;
pub mod model;
pub mod receiver;
pub mod service;

pub use broadcaster::{RateTicker, TickReport, TickerHandle, UpdateBroadcaster};
pub use model::feed::{FileFeed, RateFeed, StaticFeed};
pub use model::rate_table::{Fluctuation, RateTable, Rates};
pub use model::registry::{ConnectionId, SubscriptionRegistry};
pub use receiver::RateServer;
pub use service::RateService;
