//! Currency rate server.
//!
//! This binary serves live exchange rates over TCP. Internally, it wires together
//! the building blocks of the `rates_server` library:
//!
//! - `RateTable`: loaded once from the rate feed (`--feed` file or the built-in
//!   ECB snapshot). A feed failure is fatal: the server never starts with an
//!   empty or partial table.
//! - `RateTicker` + `UpdateBroadcaster`: every `--tick-ms` the table is
//!   fluctuated by up to ±10% per currency and the new rates are pushed to every
//!   subscribed connection through its bounded outbound queue.
//! - `RateServer`: accepts unary `GetRate` calls and `SubscribeRates` streams on
//!   two ports and serves each connection on its own thread.
//!
//! Network protocol (high‑level):
//! - Frames are JSON documents, one per line.
//! - `GetRate`: client sends `{"base":"EUR","destination":"USD"}` and receives a
//!   `rate` or `error` reply.
//! - `SubscribeRates`: client sends the same request shape to subscribe; the
//!   server pushes `rate` updates on every tick and in-band `error` messages for
//!   rejected subscriptions.
#![warn(missing_docs)]
use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info};
use rates_common::Result;
use rates_server::args::Args;
use rates_server::{
    FileFeed, Fluctuation, RateFeed, RateServer, RateService, RateTable, RateTicker, StaticFeed,
    SubscriptionRegistry, UpdateBroadcaster,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let feed: Box<dyn RateFeed> = match &args.feed {
        Some(path) => Box::new(FileFeed::new(path)),
        None => Box::new(StaticFeed::default()),
    };
    let fluctuation = match args.seed {
        Some(seed) => Fluctuation::seeded(seed),
        None => Fluctuation::from_os_rng(),
    };
    let table = match RateTable::load(feed.as_ref(), fluctuation) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            error!("Unable to load rates: {}", e);
            return Err(e);
        }
    };
    info!("Rate table loaded with {} currencies", table.snapshot()?.len());

    let registry = Arc::new(SubscriptionRegistry::new());
    let service = Arc::new(RateService::new(Arc::clone(&table), Arc::clone(&registry)));
    let ticker = RateTicker::start(
        Arc::clone(&table),
        UpdateBroadcaster::new(Arc::clone(&registry)),
        Duration::from_millis(args.tick_ms),
    )?;

    let server = RateServer::bind(service, &args.unary_addr, &args.stream_addr, args.buffer)?;
    let _accept_threads = server.spawn()?;

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| io::Error::other(format!("Unable to install Ctrl+C handler: {}", e)))?;

    info!("Rate server is running. Press Ctrl+C to exit.");
    let _ = shutdown_rx.recv();
    info!("Ctrl+C received. Shutting down rate server...");
    ticker.stop();
    Ok(())
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
