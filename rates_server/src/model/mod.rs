//! Domain models of the rate server.
//!
//! This module groups the state shared by the ticker, the broadcaster and the
//! connection handlers:
//! - `feed`: loaders for the initial rate table.
//! - `rate_table`: current rates with snapshot-swap fluctuation.
//! - `registry`: which connection is subscribed to which currency pair.

pub mod feed;
pub mod rate_table;
pub mod registry;
