//!
//! Common types and utilities shared by the rate server and its clients.
//!
//! This crate aggregates:
//! - `error`: unified error type `RatesError` used across the workspace.
//! - `result`: handy `Result<T, RatesError>` alias.
//! - `currency`: currency codes shared by both sides.
//! - `protocol`: request, reply and stream messages exchanged over the wire.
//! - `codec`: newline-delimited JSON framing for those messages.
//! - `net`: networking constants and small helpers.
#![warn(missing_docs)]
pub mod codec;
pub mod currency;
pub mod error;
pub mod net;
pub mod protocol;
pub mod result;

pub use currency::Currency;
pub use error::RatesError;
pub use protocol::{RateRequest, RateResponse, RpcError, RpcErrorKind, StreamError, StreamMessage, UnaryReply};
pub use result::Result;
