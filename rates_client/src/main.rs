//! Pricing client: converts EUR prices with live rates from the rate server.
//!
//! The client prices every `--amount` in `--currency` through a `RateCache`.
//! The first conversion fetches the rate and subscribes to its updates; later
//! conversions are served locally and follow the server's pushes. Prices are
//! printed once per second for `--watch-secs`.
//!
//! Usage example (CLI):
//! ```bash
//! rates_client --server-ip 192.168.0.10 --currency USD --amount 10 --amount 24.99
//! ```
#![warn(missing_docs)]
use clap::Parser;
use crossbeam_channel::{bounded, select, tick};
use log::{error, info};
use rates_client::args::Args;
use rates_client::{Backoff, RateCache, TcpConnector, TcpRateSource};
use rates_common::net::{STREAM_PORT, UNARY_PORT, addr};
use rates_common::{Currency, Result};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    init_logger();
    let args = Args::parse();

    let server_ip = args.server_ip.trim().replace('"', "");
    let source = Arc::new(TcpRateSource::new(addr(&server_ip, UNARY_PORT)));
    let connector = TcpConnector::new(addr(&server_ip, STREAM_PORT), STREAM_READ_TIMEOUT);
    let cache = RateCache::start(source, Box::new(connector), Backoff::default())?;

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| io::Error::other(format!("Unable to install Ctrl+C handler: {}", e)))?;

    info!("Client is running. Press Ctrl+C to exit.");
    let deadline = Instant::now() + Duration::from_secs(args.watch_secs);
    let ticker = tick(Duration::from_secs(1));
    loop {
        print_prices(&cache, &args.amounts, args.currency);
        if Instant::now() >= deadline {
            break;
        }
        select! {
            recv(shutdown_rx) -> _ => {
                info!("Ctrl+C received. Shutting down client...");
                break;
            }
            recv(ticker) -> _ => {}
        }
    }

    cache.shutdown();
    Ok(())
}

fn print_prices(cache: &RateCache, amounts: &[f64], currency: Option<Currency>) {
    let code = currency.unwrap_or(Currency::ANCHOR);
    for amount in amounts {
        match cache.convert(*amount, currency) {
            Ok(price) => info!("PRICE: {:.2} {} = {:.4} {}", amount, Currency::ANCHOR, price, code),
            Err(e) => error!("Unable to price {:.2} {} in {}: {}", amount, Currency::ANCHOR, code, e),
        }
    }
}

fn init_logger() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
