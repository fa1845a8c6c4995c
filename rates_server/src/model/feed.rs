//! Rate feed loaders used to bootstrap the rate table.
//!
//! A feed yields every known currency with its value against the anchor. It is
//! consulted once at startup; any failure is fatal because the server must not
//! serve from an empty or partial table.
//!
//! - `StaticFeed`: in-memory rates; `Default` is a reference snapshot of the
//!   ECB daily table.
//! - `FileFeed`: text file with one `CODE RATE` pair per line, `#` comments.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use log::info;
use rates_common::{Currency, RatesError, Result};

/// Source of the initial rate table.
pub trait RateFeed {
    /// Loads every known currency with its value relative to the anchor.
    fn load(&self) -> Result<HashMap<Currency, f64>>;
}

/// Feed backed by a fixed set of rates.
#[derive(Debug, Clone)]
pub struct StaticFeed {
    rates: HashMap<Currency, f64>,
}

impl StaticFeed {
    /// Creates a feed that always yields `rates`.
    pub fn new(rates: impl IntoIterator<Item = (Currency, f64)>) -> Self {
        StaticFeed {
            rates: rates.into_iter().collect(),
        }
    }
}

impl Default for StaticFeed {
    fn default() -> Self {
        StaticFeed::new([
            (Currency::USD, 1.1),
            (Currency::JPY, 117.5),
            (Currency::BGN, 1.9558),
            (Currency::CZK, 26.5),
            (Currency::DKK, 7.4435),
            (Currency::GBP, 0.85),
            (Currency::HUF, 360.2),
            (Currency::PLN, 4.52),
            (Currency::RON, 4.87),
            (Currency::SEK, 10.21),
            (Currency::CHF, 1.07),
            (Currency::ISK, 155.3),
            (Currency::NOK, 10.48),
            (Currency::TRY, 9.23),
            (Currency::AUD, 1.61),
            (Currency::BRL, 6.32),
            (Currency::CAD, 1.55),
            (Currency::CNY, 7.72),
            (Currency::HKD, 9.21),
            (Currency::IDR, 17012.0),
            (Currency::ILS, 3.91),
            (Currency::INR, 87.4),
            (Currency::KRW, 1352.0),
            (Currency::MXN, 24.1),
            (Currency::MYR, 4.93),
            (Currency::NZD, 1.71),
            (Currency::PHP, 57.3),
            (Currency::SGD, 1.59),
            (Currency::THB, 36.4),
            (Currency::ZAR, 18.2),
        ])
    }
}

impl RateFeed for StaticFeed {
    fn load(&self) -> Result<HashMap<Currency, f64>> {
        if self.rates.is_empty() {
            return Err(RatesError::FeedLoad("feed contains no rates".to_string()));
        }
        Ok(self.rates.clone())
    }
}

/// Feed read from a rates file on disk.
#[derive(Debug, Clone)]
pub struct FileFeed {
    path: PathBuf,
}

impl FileFeed {
    /// Creates a feed reading `path` on every load.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileFeed { path: path.into() }
    }
}

impl RateFeed for FileFeed {
    fn load(&self) -> Result<HashMap<Currency, f64>> {
        let file = File::open(&self.path).map_err(|e| {
            RatesError::FeedLoad(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        let rates = parse_rates(BufReader::new(file))?;
        info!("Loaded {} rates from {}", rates.len(), self.path.display());
        Ok(rates)
    }
}

/// Parses `CODE RATE` lines from a buffered reader.
///
/// Empty lines and lines starting with `#` are skipped. Every rate must be a
/// finite positive number and every code a known `Currency`; the first bad
/// line fails the whole parse.
pub fn parse_rates<R: BufRead>(reader: R) -> Result<HashMap<Currency, f64>> {
    let mut rates = HashMap::new();

    for (index, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let trimmed_line = line.trim();
        if trimmed_line.is_empty() || trimmed_line.starts_with('#') {
            continue;
        }

        let line_no = index + 1;
        let mut fields = trimmed_line.split_whitespace();
        let (Some(code), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(RatesError::FeedLoad(format!(
                "line {}: expected `CODE RATE`, got `{}`",
                line_no, trimmed_line
            )));
        };
        let currency: Currency = code
            .parse()
            .map_err(|_| RatesError::FeedLoad(format!("line {}: unknown currency {}", line_no, code)))?;
        let rate: f64 = value
            .parse()
            .map_err(|e| RatesError::FeedLoad(format!("line {}: bad rate {}: {}", line_no, value, e)))?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(RatesError::FeedLoad(format!(
                "line {}: rate for {} must be positive, got {}",
                line_no, currency, rate
            )));
        }
        rates.insert(currency, rate);
    }

    if rates.is_empty() {
        return Err(RatesError::FeedLoad("feed contains no rates".to_string()));
    }
    Ok(rates)
}
