//! Decayed buy/sell flow estimation from 24h ticker snapshots
//!
//! Tickers only carry a running quote-volume total, so flow is recovered from
//! the delta between consecutive observations. Each positive delta is assigned
//! to the buy or sell side with a tick rule (price up or unchanged => buy).
//! The tick rule is an approximation of trade-side classification, not ground
//! truth: no trade-side or order book feed is consulted.
//!
//! Both accumulators decay geometrically on every recomputation, which gives
//! an effective memory of a few dozen updates without storing history.

use crate::types::{Symbol, Tick, DAY_MS};
use fnv::FnvHashMap;
use serde::Serialize;
use tracing::warn;

/// Minimum spacing between two recomputations for the same symbol
pub const DEFAULT_DEBOUNCE_MS: i64 = 500;

/// Per-recomputation decay applied to both accumulators
pub const DEFAULT_DECAY: f64 = 0.90;

/// Neutral pressure when no flow has been observed
pub const NEUTRAL_PRESSURE: f64 = 50.0;

/// Parameters of the flow estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowParams {
    pub debounce_ms: i64,
    pub decay: f64,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            decay: DEFAULT_DECAY,
        }
    }
}

/// Decayed flow estimate for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    /// Decayed buy-side quote volume (>= 0)
    pub buy_volume: f64,
    /// Decayed sell-side quote volume (>= 0)
    pub sell_volume: f64,
    pub last_observed_volume: f64,
    pub last_observed_price: f64,
    pub last_observed_at: i64,
    /// buy / (buy + sell) * 100, 50 when both are zero
    pub pressure: f64,
    /// Instantaneous flow rate over the implied 24h average rate
    pub relative_volume: f64,
    /// buy - sell
    pub net_flow: f64,
}

impl FlowState {
    /// Seed a fresh state from the first observation of a symbol.
    ///
    /// Returns `None` if the tick carries no usable baseline volume or price.
    pub fn seed(tick: &Tick, now: i64) -> Option<Self> {
        if !tick.cumulative_quote_volume.is_finite() || !tick.last_price.is_finite() {
            return None;
        }
        Some(Self {
            buy_volume: 0.0,
            sell_volume: 0.0,
            last_observed_volume: tick.cumulative_quote_volume,
            last_observed_price: tick.last_price,
            last_observed_at: now,
            pressure: NEUTRAL_PRESSURE,
            relative_volume: 0.0,
            net_flow: 0.0,
        })
    }

    /// Compute the next state from a new observation.
    ///
    /// Returns `self` unchanged inside the debounce interval. A non-positive
    /// or unusable volume delta only moves the baseline.
    pub fn advance(&self, tick: &Tick, now: i64, params: &FlowParams) -> Self {
        let elapsed = now - self.last_observed_at;
        if elapsed <= params.debounce_ms {
            return *self;
        }

        let volume = tick.cumulative_quote_volume;
        let price = tick.last_price;
        let volume_delta = volume - self.last_observed_volume;

        if !volume.is_finite() || !price.is_finite() || volume_delta <= 0.0 {
            return self.rebase(tick, now);
        }

        let price_delta = price - self.last_observed_price;
        let is_buy = classify_buy(price_delta, price, self.last_observed_price);

        let buy_volume = params.decay * self.buy_volume + if is_buy { volume_delta } else { 0.0 };
        let sell_volume = params.decay * self.sell_volume + if is_buy { 0.0 } else { volume_delta };

        Self {
            buy_volume,
            sell_volume,
            last_observed_volume: volume,
            last_observed_price: price,
            last_observed_at: now,
            pressure: pressure(buy_volume, sell_volume),
            relative_volume: relative_volume(volume_delta, elapsed, volume),
            net_flow: buy_volume - sell_volume,
        }
    }

    /// Move the baseline to `tick` without touching the derived metrics.
    /// Non-finite fields keep their previous baseline value.
    fn rebase(&self, tick: &Tick, now: i64) -> Self {
        Self {
            last_observed_volume: finite_or(tick.cumulative_quote_volume, self.last_observed_volume),
            last_observed_price: finite_or(tick.last_price, self.last_observed_price),
            last_observed_at: now,
            ..*self
        }
    }
}

/// Flow aggregator contract: `None` seeds, `Some` advances.
///
/// An unseeded symbol stays unseeded until a tick with a finite volume and
/// price arrives.
pub fn update(
    state: Option<&FlowState>,
    tick: &Tick,
    now: i64,
    params: &FlowParams,
) -> Option<FlowState> {
    match state {
        None => FlowState::seed(tick, now),
        Some(state) => Some(state.advance(tick, now, params)),
    }
}

/// Tick rule: up-tick, or zero-tick at or above the previous price => buy
fn classify_buy(price_delta: f64, price: f64, last_price: f64) -> bool {
    price_delta > 0.0 || (price_delta == 0.0 && price >= last_price)
}

/// Buy share of decayed flow as a percentage (0-100)
///
/// 100% = all buying, 0% = all selling, 50% = neutral
pub fn pressure(buy_volume: f64, sell_volume: f64) -> f64 {
    let total = buy_volume + sell_volume;
    if total > 0.0 {
        (buy_volume / total * 100.0).clamp(0.0, 100.0)
    } else {
        NEUTRAL_PRESSURE
    }
}

/// (delta / elapsed) / (cumulative / 24h), 0 when the average rate is 0
pub fn relative_volume(volume_delta: f64, elapsed_ms: i64, cumulative_volume: f64) -> f64 {
    let avg_rate = cumulative_volume / DAY_MS;
    if elapsed_ms <= 0 || avg_rate <= 0.0 {
        return 0.0;
    }
    let rate = volume_delta / elapsed_ms as f64;
    rate / avg_rate
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Latest derived view for one symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedSymbol {
    pub flow: FlowState,
    pub price_change_percent: f64,
    pub last_price: f64,
}

/// Owner of every symbol's FlowState
#[derive(Debug, Clone, Default)]
pub struct FlowBook {
    params: FlowParams,
    symbols: FnvHashMap<Symbol, TrackedSymbol>,
}

impl FlowBook {
    pub fn new(params: FlowParams) -> Self {
        Self {
            params,
            symbols: FnvHashMap::default(),
        }
    }

    /// Apply one tick. Returns true if anything stored for the symbol changed.
    pub fn apply(&mut self, tick: &Tick, now: i64) -> bool {
        let previous = self.symbols.get(&tick.symbol).copied();
        let Some(flow) = update(previous.as_ref().map(|t| &t.flow), tick, now, &self.params)
        else {
            warn!(symbol = %tick.symbol, "cannot seed flow from non-finite tick");
            return false;
        };

        let next = match previous {
            // Debounced: keep the last accepted ticker fields with the flow snapshot
            Some(prev) if flow == prev.flow => prev,
            _ => TrackedSymbol {
                flow,
                price_change_percent: finite_or(
                    tick.price_change_percent,
                    previous.map(|p| p.price_change_percent).unwrap_or(0.0),
                ),
                last_price: finite_or(tick.last_price, flow.last_observed_price),
            },
        };

        if previous == Some(next) {
            return false;
        }
        self.symbols.insert(tick.symbol.clone(), next);
        true
    }

    pub fn get(&self, symbol: &str) -> Option<&TrackedSymbol> {
        self.symbols.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &TrackedSymbol)> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(price: f64, volume: f64) -> Tick {
        Tick {
            symbol: Symbol::new("BTCUSDT"),
            last_price: price,
            price_change_percent: 1.0,
            cumulative_quote_volume: volume,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_seed_has_no_delta() {
        let state = update(None, &tick(100.0, 1_000_000.0), 0, &FlowParams::default()).unwrap();

        assert_eq!(state.buy_volume, 0.0);
        assert_eq!(state.sell_volume, 0.0);
        assert_eq!(state.pressure, 50.0);
        assert_eq!(state.relative_volume, 0.0);
        assert_eq!(state.last_observed_volume, 1_000_000.0);
        assert_eq!(state.last_observed_price, 100.0);
    }

    #[test]
    fn test_debounce_returns_state_unchanged() {
        let params = FlowParams::default();
        let seed = FlowState::seed(&tick(100.0, 1_000.0), 0).unwrap();

        let next = seed.advance(&tick(101.0, 5_000.0), 500, &params);
        assert_eq!(next, seed);

        let next = seed.advance(&tick(101.0, 5_000.0), 501, &params);
        assert_ne!(next, seed);
    }

    #[test]
    fn test_buy_classification_and_rvol() {
        let params = FlowParams::default();
        let seed = FlowState::seed(&tick(100.0, 1_000_000_000.0), 0).unwrap();

        let next = seed.advance(&tick(100.0, 1_000_020_000.0), 1_000, &params);

        // Zero-tick at the same price counts as buy
        assert_eq!(next.buy_volume, 20_000.0);
        assert_eq!(next.sell_volume, 0.0);
        assert_eq!(next.pressure, 100.0);
        assert_eq!(next.net_flow, 20_000.0);

        let expected = (20_000.0 / 1_000.0) / (1_000_020_000.0 / DAY_MS);
        assert!((next.relative_volume - expected).abs() < 1e-9);
    }

    #[test]
    fn test_sell_classification_and_decay() {
        let params = FlowParams::default();
        let seed = FlowState::seed(&tick(100.0, 1_000.0), 0).unwrap();

        let first = seed.advance(&tick(101.0, 2_000.0), 1_000, &params);
        let second = first.advance(&tick(99.0, 2_500.0), 2_000, &params);

        assert!((second.buy_volume - 900.0).abs() < 1e-9);
        assert!((second.sell_volume - 500.0).abs() < 1e-9);
        assert!((second.net_flow - 400.0).abs() < 1e-9);
        assert!((second.pressure - 900.0 / 1_400.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_positive_delta_only_rebases() {
        let params = FlowParams::default();
        let seed = FlowState::seed(&tick(100.0, 1_000.0), 0).unwrap();
        let first = seed.advance(&tick(101.0, 2_000.0), 1_000, &params);

        // Session rollover: cumulative total resets
        let rolled = first.advance(&tick(102.0, 10.0), 2_000, &params);
        assert_eq!(rolled.buy_volume, first.buy_volume);
        assert_eq!(rolled.pressure, first.pressure);
        assert_eq!(rolled.last_observed_volume, 10.0);
        assert_eq!(rolled.last_observed_price, 102.0);
        assert_eq!(rolled.last_observed_at, 2_000);

        // Next delta is measured from the fresh baseline
        let next = rolled.advance(&tick(103.0, 110.0), 3_000, &params);
        assert!((next.buy_volume - (first.buy_volume * 0.9 + 100.0)).abs() < 1e-9);
    }

    #[test]
    fn test_non_finite_tick_keeps_baseline_fields() {
        let params = FlowParams::default();
        let seed = FlowState::seed(&tick(100.0, 1_000.0), 0).unwrap();

        let next = seed.advance(&tick(f64::NAN, 2_000.0), 1_000, &params);
        assert_eq!(next.buy_volume, 0.0);
        assert_eq!(next.last_observed_price, 100.0);
        assert_eq!(next.last_observed_volume, 2_000.0);
        assert_eq!(next.last_observed_at, 1_000);
    }

    #[test]
    fn test_non_finite_first_tick_does_not_seed() {
        let params = FlowParams::default();
        assert_eq!(update(None, &tick(100.0, f64::NAN), 0, &params), None);
        assert_eq!(update(None, &tick(f64::INFINITY, 1_000.0), 0, &params), None);

        let mut book = FlowBook::new(params);
        assert!(!book.apply(&tick(100.0, f64::NAN), 0));
        assert!(book.is_empty());

        // First usable tick seeds the baseline, it is not counted as flow
        assert!(book.apply(&tick(100.0, 1_000_000_000.0), 1_000));
        let flow = book.get("BTCUSDT").unwrap().flow;
        assert_eq!(flow.buy_volume, 0.0);
        assert_eq!(flow.net_flow, 0.0);
        assert_eq!(flow.relative_volume, 0.0);
        assert_eq!(flow.last_observed_volume, 1_000_000_000.0);
    }

    #[test]
    fn test_pressure_bounds() {
        assert_eq!(pressure(0.0, 0.0), 50.0);
        assert_eq!(pressure(10.0, 0.0), 100.0);
        assert_eq!(pressure(0.0, 10.0), 0.0);
        assert!((pressure(10.0, 10.0) - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_relative_volume_zero_average() {
        assert_eq!(relative_volume(100.0, 1_000, 0.0), 0.0);
        assert_eq!(relative_volume(100.0, 0, 1_000.0), 0.0);
    }

    #[test]
    fn test_decay_monotonic_and_pressure_bounded_over_walk() {
        let params = FlowParams::default();
        let mut state = FlowState::seed(&tick(100.0, 1_000.0), 0).unwrap();
        let mut volume = 1_000.0;
        let mut price = 100.0;

        for step in 1..200i64 {
            // Alternate volume bursts and quiet periods, price zig-zags
            if step % 3 != 0 {
                volume += (step % 7) as f64 * 250.0;
            }
            price += if step % 2 == 0 { 0.5 } else { -0.7 };

            let previous = state;
            state = state.advance(&tick(price, volume), step * 1_000, &params);

            assert!(state.buy_volume >= 0.0 && state.sell_volume >= 0.0);
            assert!((0.0..=100.0).contains(&state.pressure));
            if state.last_observed_volume == previous.last_observed_volume {
                assert!(state.buy_volume <= previous.buy_volume);
                assert!(state.sell_volume <= previous.sell_volume);
            }
        }
    }

    #[test]
    fn test_flow_book_apply() {
        let mut book = FlowBook::new(FlowParams::default());

        assert!(book.apply(&tick(100.0, 1_000.0), 0));
        // Debounced duplicate leaves the book untouched
        assert!(!book.apply(&tick(100.0, 1_000.0), 100));
        assert!(book.apply(&tick(101.0, 3_000.0), 1_000));

        let tracked = book.get("BTCUSDT").unwrap();
        assert_eq!(tracked.flow.buy_volume, 2_000.0);
        assert_eq!(tracked.last_price, 101.0);
        assert_eq!(book.len(), 1);
    }
}
