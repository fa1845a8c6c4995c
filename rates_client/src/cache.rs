//! Consumer-side rate cache with lazy subscription.
//!
//! `RateCache` serves conversions from a local table of rates quoted from the
//! anchor currency. A miss fetches the rate once through the unary
//! `RateSource`, stores it, and subscribes the currency on the single
//! persistent rate stream owned by the cache. From then on the background
//! receive loop keeps the cached value current.
//!
//! Per currency the cache moves through `unsubscribed -> Fetching ->
//! Subscribed` (unsubscribed being the absence of an entry). Callers that miss
//! while a fetch is in flight wait for it instead of issuing their own, so a
//! currency is fetched and subscribed exactly once. A failed fetch returns the
//! currency to unsubscribed and leaves the cached rates untouched; callers
//! that waited on it get the same error, and only later misses fetch again.
//!
//! When the stream drops, the receive loop reconnects with backoff and
//! re-subscribes every `Subscribed` currency; meanwhile callers keep getting
//! the last known rates.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, select};
use log::{debug, error, info, warn};
use rates_common::{Currency, RateRequest, RatesError, Result, StreamMessage};

use crate::backoff::Backoff;
use crate::source::RateSource;
use crate::stream::{Connector, Inbound, MessageReader, RequestWriter};

/// Subscription progress of one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// The initial rate is being fetched.
    Fetching,
    /// The rate is cached and subscribed on the stream.
    Subscribed,
}

/// Per-currency fetch and subscription bookkeeping, guarded by one lock.
#[derive(Default)]
struct Flights {
    states: HashMap<Currency, SubscriptionState>,
    /// Id of the fetch currently running for a currency.
    in_flight: HashMap<Currency, u64>,
    /// Last failed fetch of a currency, kept for the callers that waited on it.
    failed: HashMap<Currency, (u64, RatesError)>,
    next_fetch: u64,
}

impl Flights {
    fn begin(&mut self, currency: Currency) -> u64 {
        self.next_fetch += 1;
        self.states.insert(currency, SubscriptionState::Fetching);
        self.in_flight.insert(currency, self.next_fetch);
        self.next_fetch
    }

    fn failure_of(&self, currency: Currency, fetch: u64) -> Option<RatesError> {
        self.failed
            .get(&currency)
            .filter(|(id, _)| *id == fetch)
            .map(|(_, err)| replicate(err))
    }
}

/// Copy of a fetch failure handed to every caller that waited on that fetch.
/// Typed server errors are kept as they are.
fn replicate(err: &RatesError) -> RatesError {
    match err {
        RatesError::Rpc(rpc) => RatesError::Rpc(rpc.clone()),
        RatesError::CurrencyNotFound(currency) => RatesError::CurrencyNotFound(*currency),
        other => RatesError::Transport(other.to_string()),
    }
}

struct Shared {
    source: Arc<dyn RateSource>,
    rates: RwLock<HashMap<Currency, f64>>,
    flights: Mutex<Flights>,
    settled: Condvar,
    writer: Mutex<Option<Box<dyn RequestWriter>>>,
}

impl Shared {
    fn cached(&self, currency: Currency) -> Result<Option<f64>> {
        Ok(self.rates.read()?.get(&currency).copied())
    }

    fn store(&self, currency: Currency, rate: f64) -> Result<()> {
        self.rates.write()?.insert(currency, rate);
        Ok(())
    }

    /// Ends a successful fetch. The currency becomes `Subscribed` and is
    /// subscribed on the stream under the same lock, so a concurrent
    /// reconnect never subscribes it twice.
    fn complete_fetch(&self, currency: Currency) -> Result<()> {
        let mut flights = self.flights.lock()?;
        flights.in_flight.remove(&currency);
        flights.failed.remove(&currency);
        flights.states.insert(currency, SubscriptionState::Subscribed);
        self.send_subscribe(currency);
        drop(flights);
        self.settled.notify_all();
        Ok(())
    }

    /// Ends a failed fetch. The currency goes back to unsubscribed and the
    /// failure is published to the callers waiting on `fetch`.
    fn fail_fetch(&self, currency: Currency, fetch: u64, err: &RatesError) -> Result<()> {
        let mut flights = self.flights.lock()?;
        flights.in_flight.remove(&currency);
        flights.states.remove(&currency);
        flights.failed.insert(currency, (fetch, replicate(err)));
        drop(flights);
        self.settled.notify_all();
        Ok(())
    }

    /// Sends `Subscribe(anchor, currency)` if the stream is up. Callers hold
    /// the `flights` lock.
    fn send_subscribe(&self, currency: Currency) {
        let mut writer = match self.writer.lock() {
            Ok(writer) => writer,
            Err(e) => {
                error!("Rate stream writer unavailable: {}", e);
                return;
            }
        };
        let Some(stream) = writer.as_mut() else {
            debug!("Rate stream down; {} will be subscribed on reconnect", currency);
            return;
        };
        match stream.send(&RateRequest::from_anchor(currency)) {
            Ok(()) => debug!("Subscribed {} on rate stream", currency),
            Err(e) => {
                warn!("Unable to subscribe {}: {}", currency, e);
                *writer = None;
            }
        }
    }

    /// Installs a freshly opened stream and re-subscribes every subscribed
    /// currency on it.
    fn attach(&self, writer: Box<dyn RequestWriter>) -> Result<usize> {
        let flights = self.flights.lock()?;
        *self.writer.lock()? = Some(writer);

        let mut subscribed: Vec<Currency> = flights
            .states
            .iter()
            .filter(|(_, state)| **state == SubscriptionState::Subscribed)
            .map(|(currency, _)| *currency)
            .collect();
        subscribed.sort();
        for currency in &subscribed {
            self.send_subscribe(*currency);
        }
        Ok(subscribed.len())
    }

    fn detach(&self) {
        match self.writer.lock() {
            Ok(mut writer) => *writer = None,
            Err(e) => error!("Rate stream writer unavailable: {}", e),
        }
    }

    fn apply(&self, message: StreamMessage) {
        match message {
            StreamMessage::Rate(update) if update.base.is_anchor() => {
                debug!("Received updated rate {} = {}", update.request(), update.rate);
                if let Err(e) = self.store(update.destination, update.rate) {
                    error!("Unable to cache rate for {}: {}", update.destination, e);
                }
            }
            StreamMessage::Rate(update) => {
                debug!("Ignoring update for unrequested pair {}", update.request());
            }
            StreamMessage::Error(err) => warn!("Error subscribing for rates: {}", err),
        }
    }

    /// Applies stream messages until the stream ends or `stop` fires.
    fn pump(&self, reader: &mut dyn MessageReader, stop: &Receiver<()>) {
        while !stopped(stop) {
            match reader.recv() {
                Ok(Inbound::Message(message)) => self.apply(message),
                Ok(Inbound::Idle) => {}
                Ok(Inbound::Closed) => {
                    warn!("Rate server closed the stream");
                    return;
                }
                Err(RatesError::Json(e)) => warn!("Undecodable message on rate stream: {}", e),
                Err(e) => {
                    error!("Error receiving rate updates: {}", e);
                    return;
                }
            }
        }
    }
}

/// Rate cache used by the pricing API.
pub struct RateCache {
    shared: Arc<Shared>,
    stop_tx: Mutex<Option<Sender<()>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl RateCache {
    /// Creates the cache and starts its background receive loop.
    pub fn start(
        source: Arc<dyn RateSource>,
        connector: Box<dyn Connector>,
        backoff: Backoff,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            source,
            rates: RwLock::new(HashMap::new()),
            flights: Mutex::new(Flights::default()),
            settled: Condvar::new(),
            writer: Mutex::new(None),
        });

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let loop_shared = Arc::clone(&shared);
        let receiver = thread::Builder::new()
            .name("rate-stream".to_string())
            .spawn(move || receive_loop(loop_shared, connector, backoff, stop_rx))?;

        Ok(RateCache {
            shared,
            stop_tx: Mutex::new(Some(stop_tx)),
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Converts `amount` from the anchor currency into `destination`.
    ///
    /// Served from the cache when possible. On a miss the rate is fetched
    /// once, cached and subscribed; a fetch failure is returned untouched.
    pub fn get_converted_price(&self, amount: f64, destination: Currency) -> Result<f64> {
        Ok(amount * self.rate_for(destination)?)
    }

    /// Converts `amount` when a currency is given and returns it unchanged
    /// otherwise.
    pub fn convert(&self, amount: f64, destination: Option<Currency>) -> Result<f64> {
        match destination {
            Some(currency) => self.get_converted_price(amount, currency),
            None => Ok(amount),
        }
    }

    /// Cached anchor-to-`currency` rate, if any.
    pub fn cached_rate(&self, currency: Currency) -> Result<Option<f64>> {
        self.shared.cached(currency)
    }

    /// Subscription progress of `currency`; `None` when unsubscribed.
    pub fn subscription_state(&self, currency: Currency) -> Result<Option<SubscriptionState>> {
        Ok(self.shared.flights.lock()?.states.get(&currency).copied())
    }

    /// Returns `true` while the rate stream is open.
    pub fn is_connected(&self) -> Result<bool> {
        Ok(self.shared.writer.lock()?.is_some())
    }

    /// Stops the receive loop and waits for it. Cached rates stay readable.
    pub fn shutdown(&self) {
        match self.stop_tx.lock() {
            Ok(mut stop_tx) => drop(stop_tx.take()),
            Err(e) => error!("Rate cache stop signal unavailable: {}", e),
        }
        let handle = match self.receiver.lock() {
            Ok(mut receiver) => receiver.take(),
            Err(e) => {
                error!("Rate cache receiver handle unavailable: {}", e);
                None
            }
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Rate stream thread panicked");
            }
        }
    }

    fn rate_for(&self, destination: Currency) -> Result<f64> {
        if let Some(rate) = self.shared.cached(destination)? {
            return Ok(rate);
        }

        let mut flights = self.shared.flights.lock()?;
        let mut awaited = None;
        let fetch = loop {
            if let Some(failure) = awaited.and_then(|id| flights.failure_of(destination, id)) {
                return Err(failure);
            }
            match flights.states.get(&destination).copied() {
                None => break flights.begin(destination),
                Some(SubscriptionState::Fetching) => {
                    awaited = flights.in_flight.get(&destination).copied();
                    flights = self.shared.settled.wait(flights)?;
                }
                Some(SubscriptionState::Subscribed) => {
                    if let Some(rate) = self.shared.cached(destination)? {
                        return Ok(rate);
                    }
                    // Subscribed without a cached value; refresh it, the
                    // stream subscription already exists.
                    drop(flights);
                    let response = self
                        .shared
                        .source
                        .get_rate(&RateRequest::from_anchor(destination))?;
                    self.shared.store(destination, response.rate)?;
                    return Ok(response.rate);
                }
            }
        };
        drop(flights);

        debug!("Rate cache miss for {}, fetching", destination);
        let response = match self
            .shared
            .source
            .get_rate(&RateRequest::from_anchor(destination))
        {
            Ok(response) => response,
            Err(e) => {
                self.shared.fail_fetch(destination, fetch, &e)?;
                return Err(e);
            }
        };
        self.shared.store(destination, response.rate)?;
        self.shared.complete_fetch(destination)?;
        Ok(response.rate)
    }
}

impl Drop for RateCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn stopped(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

/// Background loop: keeps one rate stream open and applies its pushes.
fn receive_loop(
    shared: Arc<Shared>,
    connector: Box<dyn Connector>,
    mut backoff: Backoff,
    stop: Receiver<()>,
) {
    info!("Rate stream receiver started");
    loop {
        if stopped(&stop) {
            break;
        }
        match connector.connect() {
            Ok((writer, mut reader)) => {
                backoff.reset();
                match shared.attach(writer) {
                    Ok(resubscribed) => {
                        info!("Rate stream connected, {} currencies subscribed", resubscribed);
                        shared.pump(reader.as_mut(), &stop);
                    }
                    Err(e) => error!("Unable to attach rate stream: {}", e),
                }
                shared.detach();
                if stopped(&stop) {
                    break;
                }
                warn!("Rate stream lost; serving cached rates until reconnected");
            }
            Err(e) => warn!("Unable to open rate stream: {}", e),
        }

        let delay = backoff.next_delay();
        debug!("Reconnecting rate stream in {:?} (attempt {})", delay, backoff.attempts());
        select! {
            recv(stop) -> _ => break,
            default(delay) => {}
        }
    }
    info!("Rate stream receiver stopped");
}
