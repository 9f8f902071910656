//! Core data types for market inputs
//!
//! These types match the JSON message format produced by the upstream tick
//! collaborator (24h ticker stream + futures mark price stream).

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Exchange symbol, eg/ "BTCUSDT"
pub type Symbol = SmolStr;

/// Milliseconds in the 24h window that `cumulative_quote_volume` covers
pub const DAY_MS: f64 = 86_400_000.0;

/// 24h rolling ticker update for a spot symbol
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    pub symbol: Symbol,
    /// Last traded price
    pub last_price: f64,
    /// 24h price change in percent (eg/ 5.2 = +5.2%)
    pub price_change_percent: f64,
    /// Running total of quote volume over the session (not a delta)
    pub cumulative_quote_volume: f64,
    /// Exchange event time
    pub timestamp_ms: i64,
}

impl Tick {
    /// Check that every numeric field is usable for flow computation
    pub fn is_finite(&self) -> bool {
        self.last_price.is_finite()
            && self.price_change_percent.is_finite()
            && self.cumulative_quote_volume.is_finite()
    }
}

/// Perpetual futures mark price / funding update
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FuturesUpdate {
    pub symbol: Symbol,
    pub mark_price: f64,
    /// Funding rate per 8h as a fraction (eg/ -0.0005 = -0.05%)
    pub funding_rate: f64,
    pub next_funding_time_ms: i64,
}

impl FuturesUpdate {
    /// Funding rate expressed in percent
    pub fn funding_rate_pct(&self) -> f64 {
        self.funding_rate * 100.0
    }
}

/// Unit of ingestion for the scanner runtime
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketInput {
    Tick(Tick),
    Futures(FuturesUpdate),
}

impl MarketInput {
    pub fn symbol(&self) -> &Symbol {
        match self {
            MarketInput::Tick(tick) => &tick.symbol,
            MarketInput::Futures(update) => &update.symbol,
        }
    }
}

/// One recorded aggregation cycle, used for deterministic replay
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayFrame {
    pub now_ms: i64,
    #[serde(default)]
    pub ticks: Vec<Tick>,
    #[serde(default)]
    pub futures: Vec<FuturesUpdate>,
}

/// Stablecoin bases excluded from scanning
pub const DEFAULT_STABLE_BASES: &[&str] = &[
    "USDC", "FDUSD", "TUSD", "USDP", "DAI", "BUSD", "EUR", "AEUR", "USDD", "PYUSD",
];

/// Quote-asset suffix + stablecoin base denylist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolFilter {
    quote_asset: String,
    stable_bases: Vec<String>,
}

impl SymbolFilter {
    pub fn new(quote_asset: impl Into<String>, stable_bases: Vec<String>) -> Self {
        Self {
            quote_asset: quote_asset.into().to_uppercase(),
            stable_bases: stable_bases.into_iter().map(|s| s.to_uppercase()).collect(),
        }
    }

    /// Base asset of `symbol` if it is quoted in the configured asset
    pub fn base<'a>(&self, symbol: &'a str) -> Option<&'a str> {
        symbol
            .strip_suffix(self.quote_asset.as_str())
            .filter(|base| !base.is_empty())
    }

    /// Whether `symbol` should be scanned at all
    pub fn allows(&self, symbol: &str) -> bool {
        match self.base(symbol) {
            Some(base) => !self.stable_bases.iter().any(|stable| stable == base),
            None => false,
        }
    }
}

impl Default for SymbolFilter {
    fn default() -> Self {
        Self::new(
            "USDT",
            DEFAULT_STABLE_BASES.iter().map(|s| s.to_string()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_filter() {
        struct TestCase {
            input: &'static str,
            expected: bool,
        }

        let filter = SymbolFilter::default();

        let tests = vec![
            TestCase {
                // TC0: regular USDT pair
                input: "BTCUSDT",
                expected: true,
            },
            TestCase {
                // TC1: wrong quote asset
                input: "ETHBTC",
                expected: false,
            },
            TestCase {
                // TC2: stablecoin base
                input: "USDCUSDT",
                expected: false,
            },
            TestCase {
                // TC3: bare quote asset
                input: "USDT",
                expected: false,
            },
            TestCase {
                // TC4: stablecoin base on the denylist tail
                input: "FDUSDUSDT",
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(filter.allows(test.input), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_market_input_json() {
        let raw = r#"{"type":"tick","symbol":"BTCUSDT","lastPrice":65000.5,"priceChangePercent":2.1,"cumulativeQuoteVolume":1000000000.0,"timestampMs":1700000000000}"#;
        let input: MarketInput = serde_json::from_str(raw).unwrap();

        match input {
            MarketInput::Tick(tick) => {
                assert_eq!(tick.symbol, "BTCUSDT");
                assert_eq!(tick.last_price, 65000.5);
                assert_eq!(tick.timestamp_ms, 1_700_000_000_000);
            }
            other => panic!("expected tick, got {:?}", other),
        }

        let raw = r#"{"type":"futures","symbol":"ETHUSDT","markPrice":3000.0,"fundingRate":-0.0006,"nextFundingTimeMs":1700000000000}"#;
        let input: MarketInput = serde_json::from_str(raw).unwrap();
        assert_eq!(input.symbol(), "ETHUSDT");
        if let MarketInput::Futures(update) = input {
            assert!((update.funding_rate_pct() + 0.06).abs() < 1e-9);
        }
    }

    #[test]
    fn test_non_finite_tick() {
        let tick = Tick {
            symbol: Symbol::new("BTCUSDT"),
            last_price: f64::NAN,
            price_change_percent: 0.0,
            cumulative_quote_volume: 1.0,
            timestamp_ms: 0,
        };
        assert!(!tick.is_finite());
    }
}
