//! Command-line arguments for the pricing client.
use clap::Parser;
use rates_common::Currency;

/// Parsed command-line arguments.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Host of the rate server.
    #[clap(long, default_value = "127.0.0.1")]
    pub server_ip: String,

    /// Currency to price in. Prices stay in EUR when absent.
    #[clap(long, value_enum, ignore_case = true)]
    pub currency: Option<Currency>,

    /// EUR amount to convert; repeat for several prices.
    #[clap(long = "amount", default_values_t = [10.0])]
    pub amounts: Vec<f64>,

    /// How long to keep printing live conversions, in seconds.
    #[clap(long, default_value_t = 30)]
    pub watch_secs: u64,
}
