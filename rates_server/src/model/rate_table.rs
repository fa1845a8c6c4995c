//! Exchange-rate table with snapshot-swap updates.
//!
//! A `RateTable` holds the current [`Rates`] behind an `Arc`. Readers clone the
//! `Arc` and work on an immutable snapshot, so they see either the table before
//! a fluctuation or the one after it, never a mix. `fluctuate` computes a
//! complete new snapshot off to the side and publishes it with one swap.
//!
//! Every value is expressed against the anchor currency, which is pinned to
//! exactly `1.0` on load and never fluctuates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rates_common::{Currency, RatesError, Result};

use crate::model::feed::RateFeed;

/// Maximum relative change applied to a rate on one tick.
pub const MAX_SWING: f64 = 0.1;

/// Immutable snapshot of the rate table.
#[derive(Debug, Clone, PartialEq)]
pub struct Rates {
    values: HashMap<Currency, f64>,
}

impl Rates {
    /// Builds a snapshot from feed values; the anchor is forced to `1.0`
    /// whatever the feed said about it.
    pub fn new(mut values: HashMap<Currency, f64>) -> Self {
        values.insert(Currency::ANCHOR, 1.0);
        Rates { values }
    }

    /// Value of `code` against the anchor.
    pub fn get(&self, code: Currency) -> Option<f64> {
        self.values.get(&code).copied()
    }

    /// Returns `true` if `code` is present in the table.
    pub fn contains(&self, code: Currency) -> bool {
        self.values.contains_key(&code)
    }

    /// Units of `destination` per one unit of `base`.
    ///
    /// Equal codes yield `1.0`; rejecting such requests is left to callers.
    pub fn rate(&self, base: Currency, destination: Currency) -> Result<f64> {
        let base_rate = self.get(base).ok_or(RatesError::CurrencyNotFound(base))?;
        let destination_rate = self
            .get(destination)
            .ok_or(RatesError::CurrencyNotFound(destination))?;
        Ok(destination_rate / base_rate)
    }

    /// All codes in the table, sorted.
    pub fn codes(&self) -> Vec<Currency> {
        let mut codes: Vec<Currency> = self.values.keys().copied().collect();
        codes.sort();
        codes
    }

    /// Number of currencies in the table.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the table holds no currencies.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn fluctuated(&self, fluctuation: &mut Fluctuation) -> Rates {
        let values = self
            .values
            .iter()
            .map(|(&code, &value)| {
                if code.is_anchor() {
                    (code, 1.0)
                } else {
                    (code, value * fluctuation.factor())
                }
            })
            .collect();
        Rates { values }
    }
}

/// Randomness source for rate fluctuations.
pub struct Fluctuation {
    rng: Box<dyn RngCore + Send>,
}

impl Fluctuation {
    /// Deterministic fluctuation for reproducible runs and tests.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    /// Fluctuation seeded from the operating system.
    pub fn from_os_rng() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Wraps any random number generator.
    pub fn from_rng(rng: impl RngCore + Send + 'static) -> Self {
        Fluctuation { rng: Box::new(rng) }
    }

    /// Multiplier for the next value: a change of up to `MAX_SWING`, up or
    /// down with equal probability, so the result lies in `[0.9, 1.1]`.
    pub fn factor(&mut self) -> f64 {
        let change = self.rng.random::<f64>() * MAX_SWING;
        if self.rng.random_bool(0.5) {
            1.0 - change
        } else {
            1.0 + change
        }
    }
}

/// Shared, periodically mutated exchange-rate table.
pub struct RateTable {
    current: RwLock<Arc<Rates>>,
    fluctuation: Mutex<Fluctuation>,
}

impl RateTable {
    /// Creates a table from an already loaded snapshot.
    pub fn new(rates: Rates, fluctuation: Fluctuation) -> Self {
        RateTable {
            current: RwLock::new(Arc::new(rates)),
            fluctuation: Mutex::new(fluctuation),
        }
    }

    /// Loads the table from `feed` and pins the anchor to `1.0`.
    ///
    /// Any feed failure is returned as `RatesError::FeedLoad`; the caller must
    /// not start serving without a table.
    pub fn load(feed: &dyn RateFeed, fluctuation: Fluctuation) -> Result<Self> {
        let values = feed.load().map_err(|e| match e {
            RatesError::FeedLoad(msg) => RatesError::FeedLoad(msg),
            other => RatesError::FeedLoad(other.to_string()),
        })?;
        if values.is_empty() {
            return Err(RatesError::FeedLoad("feed contains no rates".to_string()));
        }
        Ok(Self::new(Rates::new(values), fluctuation))
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Result<Arc<Rates>> {
        Ok(Arc::clone(&*self.current.read()?))
    }

    /// Units of `destination` per one unit of `base` in the current snapshot.
    pub fn get_rate(&self, base: Currency, destination: Currency) -> Result<f64> {
        self.snapshot()?.rate(base, destination)
    }

    /// Returns `true` if `code` is present in the table.
    pub fn contains(&self, code: Currency) -> Result<bool> {
        Ok(self.snapshot()?.contains(code))
    }

    /// Moves every non-anchor rate by a random factor in `[0.9, 1.1]` and
    /// publishes the result as the new snapshot.
    pub fn fluctuate(&self) -> Result<Arc<Rates>> {
        let mut fluctuation = self.fluctuation.lock()?;
        let next = Arc::new(self.snapshot()?.fluctuated(&mut fluctuation));
        *self.current.write()? = Arc::clone(&next);
        debug!("Published fluctuated rates for {} currencies", next.len());
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::feed::StaticFeed;
    use approx::assert_relative_eq;

    fn sample_table(seed: u64) -> RateTable {
        let feed = StaticFeed::new([
            (Currency::EUR, 3.0),
            (Currency::USD, 1.1),
            (Currency::GBP, 0.85),
        ]);
        RateTable::load(&feed, Fluctuation::seeded(seed)).unwrap()
    }

    #[test]
    fn anchor_is_pinned_on_load() {
        let table = sample_table(1);
        assert_eq!(table.get_rate(Currency::EUR, Currency::EUR).unwrap(), 1.0);
        assert_eq!(table.snapshot().unwrap().get(Currency::EUR), Some(1.0));
    }

    #[test]
    fn rates_are_quoted_against_base() {
        let table = sample_table(1);
        assert_relative_eq!(table.get_rate(Currency::EUR, Currency::USD).unwrap(), 1.1);
        assert_relative_eq!(
            table.get_rate(Currency::USD, Currency::GBP).unwrap(),
            0.85 / 1.1,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            table.get_rate(Currency::USD, Currency::GBP).unwrap(),
            0.7727,
            epsilon = 1e-4
        );
    }

    #[test]
    fn same_currency_is_one_at_table_layer() {
        let table = sample_table(1);
        assert_eq!(table.get_rate(Currency::USD, Currency::USD).unwrap(), 1.0);
    }

    #[test]
    fn inverse_pairs_multiply_to_one() {
        let table = RateTable::load(&StaticFeed::default(), Fluctuation::seeded(7)).unwrap();
        let rates = table.snapshot().unwrap();
        for a in rates.codes() {
            for b in rates.codes() {
                let forward = rates.rate(a, b).unwrap();
                let backward = rates.rate(b, a).unwrap();
                assert_relative_eq!(forward * backward, 1.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn unknown_code_is_not_found() {
        let table = sample_table(1);
        let err = table.get_rate(Currency::EUR, Currency::JPY).unwrap_err();
        assert!(matches!(err, RatesError::CurrencyNotFound(Currency::JPY)));
        let err = table.get_rate(Currency::JPY, Currency::EUR).unwrap_err();
        assert!(matches!(err, RatesError::CurrencyNotFound(Currency::JPY)));
    }

    #[test]
    fn failing_feed_is_fatal() {
        let err = RateTable::load(&StaticFeed::new([]), Fluctuation::seeded(1))
            .err()
            .unwrap();
        assert!(matches!(err, RatesError::FeedLoad(_)));
    }

    #[test]
    fn fluctuation_stays_within_ten_percent() {
        let table = RateTable::load(&StaticFeed::default(), Fluctuation::seeded(42)).unwrap();
        for _ in 0..200 {
            let before = table.snapshot().unwrap();
            let after = table.fluctuate().unwrap();
            assert_eq!(after.get(Currency::EUR), Some(1.0));
            for code in before.codes() {
                let old = before.get(code).unwrap();
                let new = after.get(code).unwrap();
                assert!(new >= 0.9 * old && new <= 1.1 * old, "{code}: {old} -> {new}");
            }
        }
    }

    #[test]
    fn fluctuation_moves_both_directions() {
        let mut fluctuation = Fluctuation::seeded(3);
        let factors: Vec<f64> = (0..500).map(|_| fluctuation.factor()).collect();
        assert!(factors.iter().any(|&f| f < 1.0));
        assert!(factors.iter().any(|&f| f > 1.0));
        assert!(factors.iter().all(|&f| (0.9..=1.1).contains(&f)));
    }

    #[test]
    fn seeded_fluctuation_is_reproducible() {
        let first = sample_table(99);
        let second = sample_table(99);
        assert_eq!(*first.fluctuate().unwrap(), *second.fluctuate().unwrap());
    }

    #[test]
    fn old_snapshot_is_untouched_by_fluctuate() {
        let table = sample_table(5);
        let before = table.snapshot().unwrap();
        let copy = (*before).clone();
        table.fluctuate().unwrap();
        assert_eq!(*before, copy);
        assert_ne!(*table.snapshot().unwrap(), copy);
    }
}
