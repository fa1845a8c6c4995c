//! Currency codes and helpers shared between client and server.
//!
//! The `Currency` enum covers the reference currencies published by the
//! European Central Bank. Codes parse case-insensitively from strings, print in
//! upper case, travel over the wire as their upper-case code, and can be used
//! directly as `clap` values.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

/// Set of supported currency codes (ISO 4217).
#[allow(missing_docs)]
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    ValueEnum,
    Display,
    EnumString,
    EnumIter,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
)]
#[value(rename_all = "UPPER")]
#[strum(ascii_case_insensitive)]
pub enum Currency {
    EUR,
    USD,
    JPY,
    BGN,
    CZK,
    DKK,
    GBP,
    HUF,
    PLN,
    RON,
    SEK,
    CHF,
    ISK,
    NOK,
    TRY,
    AUD,
    BRL,
    CAD,
    CNY,
    HKD,
    IDR,
    ILS,
    INR,
    KRW,
    MXN,
    MYR,
    NZD,
    PHP,
    SGD,
    THB,
    ZAR,
}

impl Currency {
    /// Anchor currency: every rate in the table is expressed against it and
    /// its own value is pinned to exactly `1.0`.
    pub const ANCHOR: Currency = Currency::EUR;

    /// Returns `true` for the anchor currency.
    pub fn is_anchor(self) -> bool {
        self == Self::ANCHOR
    }
}
