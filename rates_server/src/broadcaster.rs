//! Rate update fan-out and the periodic ticker.
//!
//! The `RateTicker` runs a background thread that, on every tick, fluctuates the
//! `RateTable` and hands the new snapshot to the `UpdateBroadcaster`. The
//! broadcaster takes a stable copy of the subscription registry and pushes one
//! update per subscribed pair into each connection's bounded outbound queue.
//!
//! Delivery policy:
//! - A full queue means a slow consumer: that single update is dropped and
//!   logged; other connections are unaffected and the tick never blocks.
//! - A disconnected queue means the connection is gone: it is marked dead and
//!   its subscriptions are removed once the whole tick has been delivered.
//! - Each connection has one FIFO queue, so its updates arrive in tick order.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Sender, TrySendError, bounded, select, tick};
use log::{debug, error, info, warn};
use rates_common::{RateResponse, Result, StreamMessage};

use crate::model::rate_table::{RateTable, Rates};
use crate::model::registry::{ConnectionId, SubscriptionRegistry};

/// Outcome of delivering one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Updates accepted by outbound queues.
    pub delivered: usize,
    /// Updates dropped because a queue was full.
    pub dropped: usize,
    /// Connections found closed and removed from the registry.
    pub dead: Vec<ConnectionId>,
}

/// Pushes rate updates to every subscribed connection.
#[derive(Clone)]
pub struct UpdateBroadcaster {
    registry: Arc<SubscriptionRegistry>,
}

impl UpdateBroadcaster {
    /// Creates a broadcaster over `registry`.
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        UpdateBroadcaster { registry }
    }

    /// Delivers the rates of `rates` for every subscribed pair.
    pub fn on_tick(&self, rates: &Rates) -> Result<TickReport> {
        let subscribers = self.registry.snapshot()?;
        let timestamp = Utc::now().timestamp_millis() as u64;
        let mut report = TickReport::default();

        for subscriber in subscribers {
            for key in &subscriber.keys {
                let rate = match rates.rate(key.base, key.destination) {
                    Ok(rate) => rate,
                    Err(e) => {
                        error!("Unable to compute updated rate {} for {}: {}", key, subscriber.connection, e);
                        continue;
                    }
                };
                let update = StreamMessage::Rate(RateResponse {
                    base: key.base,
                    destination: key.destination,
                    rate,
                    timestamp,
                });

                match subscriber.outbound.try_send(update) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Outbound buffer full for {}: dropping update {}",
                            subscriber.connection, key
                        );
                        report.dropped += 1;
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        info!("{} is closed; removing its subscriptions", subscriber.connection);
                        report.dead.push(subscriber.connection);
                        break;
                    }
                }
            }
        }

        for conn in &report.dead {
            self.registry.unsubscribe(*conn)?;
        }
        Ok(report)
    }
}

/// Periodic fluctuate-and-broadcast driver.
pub struct RateTicker;

impl RateTicker {
    /// Start the ticker thread.
    ///
    /// Every `interval` the table is fluctuated and the new snapshot is
    /// broadcast. The thread stops when [`TickerHandle::stop`] is called or the
    /// handle is dropped.
    pub fn start(
        table: Arc<RateTable>,
        broadcaster: UpdateBroadcaster,
        interval: Duration,
    ) -> Result<TickerHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("rate-ticker".to_string())
            .spawn(move || {
                let ticks = tick(interval);
                let mut count: u64 = 0;
                info!("Rate ticker started, interval {:?}", interval);

                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticks) -> _ => {
                            count += 1;
                            let rates = match table.fluctuate() {
                                Ok(rates) => rates,
                                Err(e) => {
                                    error!("Tick {}: unable to fluctuate rates: {}", count, e);
                                    continue;
                                }
                            };
                            match broadcaster.on_tick(&rates) {
                                Ok(report) => debug!(
                                    "Tick {}: delivered={} dropped={} dead={}",
                                    count,
                                    report.delivered,
                                    report.dropped,
                                    report.dead.len()
                                ),
                                Err(e) => error!("Tick {}: broadcast failed: {}", count, e),
                            }
                        }
                    }
                }
                info!("Rate ticker stopped after {} ticks", count);
            })?;

        Ok(TickerHandle {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

/// Handle owning the ticker thread.
pub struct TickerHandle {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TickerHandle {
    /// Stop the ticker and wait for the current tick to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Rate ticker thread panicked");
            }
        }
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
