//! Shared protocol messages used by client and server.
//!
//! Two exchanges run over the wire:
//! - `GetRate` (unary): the client sends a [`RateRequest`] and receives a
//!   [`UnaryReply`], either a [`RateResponse`] or an [`RpcError`] carrying the
//!   original request.
//! - `SubscribeRates` (bidirectional stream): the client sends any number of
//!   [`RateRequest`]s as subscriptions and the server pushes
//!   [`StreamMessage`]s, either live rate updates or in-band [`StreamError`]s
//!   that leave the stream open.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::currency::Currency;

/// A currency pair. Used as the `GetRate` request, as the subscribe request on
/// a rate stream, and as the subscription key on the server.
///
/// `(base, destination)` and `(destination, base)` are distinct pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateRequest {
    /// Currency the rate is quoted from.
    pub base: Currency,
    /// Currency the rate is quoted into.
    pub destination: Currency,
}

impl RateRequest {
    /// Creates a request for the `base -> destination` rate.
    pub fn new(base: Currency, destination: Currency) -> Self {
        RateRequest { base, destination }
    }

    /// Creates a request quoted from the anchor currency.
    pub fn from_anchor(destination: Currency) -> Self {
        RateRequest::new(Currency::ANCHOR, destination)
    }
}

impl fmt::Display for RateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.base, self.destination)
    }
}

/// A computed rate for one currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateResponse {
    /// Currency the rate is quoted from.
    pub base: Currency,
    /// Currency the rate is quoted into.
    pub destination: Currency,
    /// Units of `destination` per one unit of `base`.
    pub rate: f64,
    /// UTC timestamp in milliseconds since Unix epoch.
    pub timestamp: u64,
}

impl RateResponse {
    /// The pair this rate was computed for.
    pub fn request(&self) -> RateRequest {
        RateRequest::new(self.base, self.destination)
    }
}

/// Failure category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcErrorKind {
    /// The request itself is not acceptable (e.g. `base == destination`).
    InvalidArgument,
    /// A currency in the request is not present in the rate table.
    NotFound,
    /// The server failed for a reason unrelated to the request.
    Internal,
}

impl fmt::Display for RpcErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcErrorKind::InvalidArgument => "InvalidArgument",
            RpcErrorKind::NotFound => "NotFound",
            RpcErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// Typed `GetRate` failure with the original request attached as detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Failure category.
    pub kind: RpcErrorKind,
    /// Human-readable description.
    pub message: String,
    /// The request that failed.
    pub detail: RateRequest,
}

impl RpcError {
    /// Base and destination are the same currency.
    pub fn invalid_argument(detail: RateRequest) -> Self {
        RpcError {
            kind: RpcErrorKind::InvalidArgument,
            message: format!(
                "Base currency {} can not be the same as destination currency {}",
                detail.base, detail.destination
            ),
            detail,
        }
    }

    /// `missing` is absent from the rate table.
    pub fn not_found(detail: RateRequest, missing: Currency) -> Self {
        RpcError {
            kind: RpcErrorKind::NotFound,
            message: format!("Rate not found for currency {}", missing),
            detail,
        }
    }

    /// Server-side failure unrelated to the request contents.
    pub fn internal(detail: RateRequest, message: impl Into<String>) -> Self {
        RpcError {
            kind: RpcErrorKind::Internal,
            message: message.into(),
            detail,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (request {})", self.kind, self.message, self.detail)
    }
}

/// Reply to a unary `GetRate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnaryReply {
    /// Successful lookup.
    Rate(RateResponse),
    /// Typed failure.
    Error(RpcError),
}

impl From<std::result::Result<RateResponse, RpcError>> for UnaryReply {
    fn from(outcome: std::result::Result<RateResponse, RpcError>) -> Self {
        match outcome {
            Ok(response) => UnaryReply::Rate(response),
            Err(err) => UnaryReply::Error(err),
        }
    }
}

/// Non-fatal error delivered on an open rate stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamError {
    /// Failure category.
    pub kind: RpcErrorKind,
    /// Human-readable description.
    pub message: String,
    /// The subscribe request that was rejected; `None` when the inbound frame
    /// could not be decoded at all.
    pub detail: Option<RateRequest>,
}

impl StreamError {
    /// The pair is already subscribed on this stream.
    pub fn duplicate(detail: RateRequest) -> Self {
        StreamError {
            kind: RpcErrorKind::InvalidArgument,
            message: format!("Subscription already exists for {}", detail),
            detail: Some(detail),
        }
    }

    /// The inbound frame was not a valid subscribe request.
    pub fn malformed(message: impl Into<String>) -> Self {
        StreamError {
            kind: RpcErrorKind::InvalidArgument,
            message: message.into(),
            detail: None,
        }
    }
}

impl From<RpcError> for StreamError {
    fn from(err: RpcError) -> Self {
        StreamError {
            kind: err.kind,
            message: err.message,
            detail: Some(err.detail),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {} (request {})", self.kind, self.message, detail),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Server to client message on a rate stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Live rate update for a subscribed pair.
    Rate(RateResponse),
    /// In-band error; the stream stays open.
    Error(StreamError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_ordered() {
        let forward = RateRequest::new(Currency::EUR, Currency::USD);
        let backward = RateRequest::new(Currency::USD, Currency::EUR);
        assert_ne!(forward, backward);
        assert_eq!(forward, RateRequest::from_anchor(Currency::USD));
    }

    #[test]
    fn invalid_argument_keeps_request_detail() {
        let request = RateRequest::new(Currency::GBP, Currency::GBP);
        let err = RpcError::invalid_argument(request);
        assert_eq!(err.kind, RpcErrorKind::InvalidArgument);
        assert_eq!(err.detail, request);
        assert!(err.message.contains("GBP"));
    }

    #[test]
    fn unary_error_reply_wire_shape() {
        let request = RateRequest::new(Currency::USD, Currency::USD);
        let reply = UnaryReply::Error(RpcError::invalid_argument(request));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "invalid_argument");
        assert_eq!(json["detail"]["base"], "USD");
        assert_eq!(json["detail"]["destination"], "USD");
    }

    #[test]
    fn stream_messages_are_tagged() {
        let update = StreamMessage::Rate(RateResponse {
            base: Currency::EUR,
            destination: Currency::GBP,
            rate: 0.85,
            timestamp: 1,
        });
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"type\":\"rate\""));
        let decoded: StreamMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, update);

        let malformed = StreamMessage::Error(StreamError::malformed("bad frame"));
        let json = serde_json::to_value(&malformed).unwrap();
        assert_eq!(json["type"], "error");
        assert!(json["detail"].is_null());
    }
}
