//! Command-line arguments for the rate server.
//!
//! This module defines the CLI interface using `clap`. See `main` for end-to-end usage.
use clap::Parser;
use rates_common::net::{STREAM_PORT, UNARY_PORT, addr};

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address for unary `GetRate` calls.
    #[clap(long, default_value_t = addr("0.0.0.0", UNARY_PORT))]
    pub unary_addr: String,

    /// Address for `SubscribeRates` streams.
    #[clap(long, default_value_t = addr("0.0.0.0", STREAM_PORT))]
    pub stream_addr: String,

    /// Interval between rate fluctuations, in milliseconds.
    #[clap(long, default_value_t = 5000)]
    pub tick_ms: u64,

    /// Outbound buffer capacity per stream connection; updates beyond it are dropped.
    #[clap(long, default_value_t = 64)]
    pub buffer: usize,

    /// Rates file with one `CODE RATE` pair per line.
    /// The built-in ECB reference snapshot is used when absent.
    #[clap(long)]
    pub feed: Option<String>,

    /// Seed for the fluctuation generator, for reproducible runs.
    #[clap(long)]
    pub seed: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_well_known_ports() {
        let args = Args::parse_from(["rates_server"]);
        assert_eq!(args.unary_addr, "0.0.0.0:9092");
        assert_eq!(args.stream_addr, "0.0.0.0:9093");
        assert_eq!(args.tick_ms, 5000);
        assert_eq!(args.buffer, 64);
        assert!(args.feed.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let args = Args::parse_from([
            "rates_server",
            "--tick-ms",
            "250",
            "--buffer",
            "8",
            "--feed",
            "rates.txt",
            "--seed",
            "42",
        ]);
        assert_eq!(args.tick_ms, 250);
        assert_eq!(args.buffer, 8);
        assert_eq!(args.feed.as_deref(), Some("rates.txt"));
        assert_eq!(args.seed, Some(42));
    }
}
