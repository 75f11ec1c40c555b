//! Symbol Classification
//!
//! Maps raw instrument identifiers from clients onto a feed class and a
//! canonical form. Classification is a pure, deterministic heuristic and is
//! pluggable via the [`SymbolClassifier`] trait so new feed classes can be
//! added without touching the router.
//!
//! # Canonical forms
//!
//! - Forex pairs are uppercased (`eur/usd` -> `EUR/USD`).
//! - Crypto instruments are lowercased (`BTCUSDT` -> `btcusdt`), matching
//!   the stream names the crypto feed subscribes with.
//!
//! Inbound feed messages are canonicalized through the same classifier
//! before fan-out lookup, so subscribe-time and dispatch-time keys agree.

use serde::{Deserialize, Serialize};

/// Which upstream feed serves an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedClass {
    /// Currency pairs served by the Forex price feed.
    Forex,
    /// Everything else, served by the Crypto kline feed.
    Crypto,
}

impl FeedClass {
    /// Stable lowercase name, used in logs and status events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Forex => "forex",
            Self::Crypto => "crypto",
        }
    }
}

impl std::fmt::Display for FeedClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw identifier after classification: canonical symbol plus feed class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedSymbol {
    /// Canonical instrument identifier.
    pub canonical: String,
    /// Owning feed class.
    pub feed: FeedClass,
}

/// Error returned when an identifier cannot be classified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    /// The identifier was empty after trimming.
    #[error("invalid symbol: identifier is empty")]
    EmptySymbol,
}

/// Strategy for mapping raw identifiers to feed classes.
pub trait SymbolClassifier: Send + Sync {
    /// Classify a raw identifier, producing its canonical form and feed.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::EmptySymbol`] if the identifier is empty
    /// after trimming.
    fn classify(&self, raw: &str) -> Result<ClassifiedSymbol, ClassifyError>;
}

/// ISO-4217 codes recognized when classifying slash-less pairs like `EURUSD`.
const CURRENCY_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CHF", "AUD", "CAD", "NZD", "SEK", "NOK", "DKK", "SGD", "HKD",
    "MXN", "ZAR", "TRY", "PLN", "CZK", "HUF", "CNY", "INR", "BRL", "KRW",
];

/// Default heuristic classifier.
///
/// An identifier containing a `/` separator is Forex; a 6-character
/// identifier made of two recognized currency codes back-to-back is also
/// Forex; everything else is Crypto.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl DefaultClassifier {
    fn is_currency_code(code: &str) -> bool {
        CURRENCY_CODES.iter().any(|c| c.eq_ignore_ascii_case(code))
    }
}

impl SymbolClassifier for DefaultClassifier {
    fn classify(&self, raw: &str) -> Result<ClassifiedSymbol, ClassifyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ClassifyError::EmptySymbol);
        }

        if trimmed.contains('/') {
            return Ok(ClassifiedSymbol {
                canonical: trimmed.to_uppercase(),
                feed: FeedClass::Forex,
            });
        }

        if trimmed.len() == 6
            && trimmed.is_ascii()
            && Self::is_currency_code(&trimmed[..3])
            && Self::is_currency_code(&trimmed[3..])
        {
            return Ok(ClassifiedSymbol {
                canonical: trimmed.to_uppercase(),
                feed: FeedClass::Forex,
            });
        }

        Ok(ClassifiedSymbol {
            canonical: trimmed.to_lowercase(),
            feed: FeedClass::Crypto,
        })
    }
}
