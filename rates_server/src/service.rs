//! Protocol layer of the rate server.
//!
//! `RateService` implements the two exposed operations on top of the rate
//! table and the subscription registry, independent of the transport:
//! - `get_rate`: unary lookup with typed errors that carry the request.
//! - `subscribe`: registration of one pair on an open rate stream; every
//!   failure is returned as an in-band `StreamError`.
//!
//! Rejecting `base == destination` is a protocol rule. The table itself quotes
//! such a pair as `1.0`.

use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info};
use rates_common::{
    RateRequest, RateResponse, RatesError, Result, RpcError, StreamError, StreamMessage,
};

use crate::model::rate_table::RateTable;
use crate::model::registry::{ConnectionId, SubscriptionRegistry};

/// Rate server operations shared by all connections.
pub struct RateService {
    table: Arc<RateTable>,
    registry: Arc<SubscriptionRegistry>,
}

impl RateService {
    /// Creates the service over an explicitly constructed table and registry.
    pub fn new(table: Arc<RateTable>, registry: Arc<SubscriptionRegistry>) -> Self {
        RateService { table, registry }
    }

    /// The rate table served by this instance.
    pub fn table(&self) -> &Arc<RateTable> {
        &self.table
    }

    /// The subscription registry served by this instance.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Unary `GetRate`.
    ///
    /// Fails with `InvalidArgument` when base and destination are equal and
    /// with `NotFound` when either code is absent from the table. The original
    /// request is attached to every error.
    pub fn get_rate(&self, request: &RateRequest) -> std::result::Result<RateResponse, RpcError> {
        info!("Handle GetRate {}", request);
        if request.base == request.destination {
            return Err(RpcError::invalid_argument(*request));
        }

        match self.table.get_rate(request.base, request.destination) {
            Ok(rate) => Ok(RateResponse {
                base: request.base,
                destination: request.destination,
                rate,
                timestamp: Utc::now().timestamp_millis() as u64,
            }),
            Err(RatesError::CurrencyNotFound(missing)) => Err(RpcError::not_found(*request, missing)),
            Err(e) => Err(RpcError::internal(*request, e.to_string())),
        }
    }

    /// Opens a rate stream connection with an outbound queue of `capacity`.
    ///
    /// Returns the connection id, a sender for in-band replies and the
    /// receiving end that the connection's single writer drains.
    pub fn open_connection(
        &self,
        capacity: usize,
    ) -> Result<(ConnectionId, Sender<StreamMessage>, Receiver<StreamMessage>)> {
        let (outbound_tx, outbound_rx) = bounded(capacity.max(1));
        let conn = self.registry.register(outbound_tx.clone())?;
        debug!("Opened {} with outbound capacity {}", conn, capacity);
        Ok((conn, outbound_tx, outbound_rx))
    }

    /// Registers `request` as a subscription of `conn`.
    ///
    /// Validation mirrors `get_rate`; a pair already subscribed on the same
    /// connection is reported as a duplicate and leaves the existing
    /// subscription untouched.
    pub fn subscribe(
        &self,
        conn: ConnectionId,
        request: &RateRequest,
    ) -> std::result::Result<(), StreamError> {
        info!("Handle subscribe request {} on {}", request, conn);
        if request.base == request.destination {
            return Err(RpcError::invalid_argument(*request).into());
        }
        for code in [request.base, request.destination] {
            match self.table.contains(code) {
                Ok(true) => {}
                Ok(false) => return Err(RpcError::not_found(*request, code).into()),
                Err(e) => return Err(RpcError::internal(*request, e.to_string()).into()),
            }
        }

        match self.registry.subscribe(conn, *request) {
            Ok(()) => Ok(()),
            Err(RatesError::DuplicateSubscription { .. }) => Err(StreamError::duplicate(*request)),
            Err(e) => Err(RpcError::internal(*request, e.to_string()).into()),
        }
    }

    /// Removes `conn` and all of its subscriptions.
    pub fn close_connection(&self, conn: ConnectionId) -> Result<()> {
        if self.registry.unsubscribe(conn)? {
            debug!("Removed subscriptions of {}", conn);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::UpdateBroadcaster;
    use crate::model::feed::StaticFeed;
    use crate::model::rate_table::Fluctuation;
    use approx::assert_relative_eq;
    use rates_common::{Currency, RpcErrorKind};

    fn service() -> RateService {
        let feed = StaticFeed::new([(Currency::USD, 1.1), (Currency::GBP, 0.85)]);
        let table = RateTable::load(&feed, Fluctuation::seeded(1)).unwrap();
        RateService::new(Arc::new(table), Arc::new(SubscriptionRegistry::new()))
    }

    #[test]
    fn get_rate_returns_quoted_pair() {
        let service = service();
        let response = service
            .get_rate(&RateRequest::new(Currency::EUR, Currency::USD))
            .unwrap();
        assert_eq!(response.base, Currency::EUR);
        assert_eq!(response.destination, Currency::USD);
        assert_relative_eq!(response.rate, 1.1);

        let cross = service
            .get_rate(&RateRequest::new(Currency::USD, Currency::GBP))
            .unwrap();
        assert_relative_eq!(cross.rate, 0.7727, epsilon = 1e-4);
    }

    #[test]
    fn same_currency_is_invalid_argument_for_every_code() {
        let service = service();
        for code in [Currency::EUR, Currency::USD, Currency::JPY] {
            let request = RateRequest::new(code, code);
            let err = service.get_rate(&request).unwrap_err();
            assert_eq!(err.kind, RpcErrorKind::InvalidArgument);
            assert_eq!(err.detail, request);
        }
    }

    #[test]
    fn unknown_code_is_not_found() {
        let service = service();
        let request = RateRequest::new(Currency::EUR, Currency::JPY);
        let err = service.get_rate(&request).unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::NotFound);
        assert_eq!(err.detail, request);
        assert!(err.message.contains("JPY"));
    }

    #[test]
    fn duplicate_subscription_is_in_band_and_keeps_the_first() {
        let service = service();
        let (conn, _tx, rx) = service.open_connection(8).unwrap();
        let request = RateRequest::from_anchor(Currency::USD);

        service.subscribe(conn, &request).unwrap();
        let err = service.subscribe(conn, &request).unwrap_err();
        assert_eq!(err.detail, Some(request));
        assert!(err.message.contains("already exists"));

        let broadcaster = UpdateBroadcaster::new(Arc::clone(service.registry()));
        let rates = service.table().fluctuate().unwrap();
        let report = broadcaster.on_tick(&rates).unwrap();
        assert_eq!(report.delivered, 1);
        match rx.try_recv().unwrap() {
            StreamMessage::Rate(update) => assert_eq!(update.request(), request),
            other => panic!("expected rate update, got {:?}", other),
        }
    }

    #[test]
    fn subscribe_validates_pair() {
        let service = service();
        let (conn, _tx, _rx) = service.open_connection(8).unwrap();

        let same = service
            .subscribe(conn, &RateRequest::new(Currency::GBP, Currency::GBP))
            .unwrap_err();
        assert_eq!(same.kind, RpcErrorKind::InvalidArgument);

        let unknown = service
            .subscribe(conn, &RateRequest::new(Currency::EUR, Currency::ZAR))
            .unwrap_err();
        assert_eq!(unknown.kind, RpcErrorKind::NotFound);
        assert!(service.registry().subscriptions(conn).unwrap().is_empty());
    }

    #[test]
    fn closing_removes_subscriptions() {
        let service = service();
        let (conn, _tx, _rx) = service.open_connection(8).unwrap();
        service
            .subscribe(conn, &RateRequest::from_anchor(Currency::GBP))
            .unwrap();
        service.close_connection(conn).unwrap();
        assert_eq!(service.registry().connection_count().unwrap(), 0);
        assert_eq!(
            service
                .subscribe(conn, &RateRequest::from_anchor(Currency::USD))
                .unwrap_err()
                .kind,
            RpcErrorKind::Internal
        );
    }
}
