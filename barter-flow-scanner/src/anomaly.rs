//! Anomaly radar: one-shot events from simple per-symbol predicates
//!
//! Detectors are stateless predicates over a [`MarketView`]. The only state is
//! held by the [`AnomalyBoard`]: the latest spot change and funding per symbol,
//! volume samples for spike detection, and the retained event set keyed by
//! `(symbol, kind)`.

use crate::flow::relative_volume;
use crate::rules::{Predicate, Severity};
use crate::types::{FuturesUpdate, Symbol, Tick};
use chrono::{DateTime, Utc};
use fnv::{FnvHashMap, FnvHashSet};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

pub const DEFAULT_ANOMALY_RETENTION_MS: i64 = 5 * 60 * 1_000;
pub const DEFAULT_VOLUME_SPIKE_COOLDOWN_MS: i64 = 5 * 60 * 1_000;
pub const DEFAULT_VOLUME_SAMPLE_MS: i64 = 1_000;
pub const DEFAULT_ANOMALY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    PriceSurge,
    PriceDump,
    NegativeFunding,
    /// Deeply negative funding while spot rallies
    ShortSqueezeSetup,
    /// Elevated funding while spot sells off
    LongTrapSetup,
    VolumeSpike,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::PriceSurge => "price_surge",
            AnomalyKind::PriceDump => "price_dump",
            AnomalyKind::NegativeFunding => "negative_funding",
            AnomalyKind::ShortSqueezeSetup => "short_squeeze_setup",
            AnomalyKind::LongTrapSetup => "long_trap_setup",
            AnomalyKind::VolumeSpike => "volume_spike",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable detected anomaly
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyEvent {
    pub id: u64,
    pub symbol: Symbol,
    pub kind: AnomalyKind,
    /// Triggering metric (percent change, funding percent, or volume ratio)
    pub value: f64,
    pub severity: Severity,
    pub detected_at: i64,
}

impl AnomalyEvent {
    pub fn detected_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.detected_at)
    }
}

/// Latest known metrics for one symbol, as seen by detectors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketView {
    pub symbol: Symbol,
    /// Spot 24h change in percent
    pub price_change_percent: Option<f64>,
    /// Funding rate per 8h in percent
    pub funding_rate_pct: Option<f64>,
    /// Flow rate over implied 24h average rate, only when sampled this cycle
    pub volume_ratio: Option<f64>,
}

/// Predicate plug-in producing one kind of anomaly
pub trait Detector: Predicate<MarketView> + Send + Sync {
    fn kind(&self) -> AnomalyKind;

    /// Metric reported on the event
    fn value(&self, view: &MarketView) -> f64;
}

/// 24h change above `threshold_pct`
#[derive(Debug, Clone, Copy)]
pub struct PriceSurge {
    pub threshold_pct: f64,
}

impl Default for PriceSurge {
    fn default() -> Self {
        Self { threshold_pct: 5.0 }
    }
}

impl Predicate<MarketView> for PriceSurge {
    fn evaluate(&self, view: &MarketView) -> bool {
        view.price_change_percent
            .is_some_and(|change| change > self.threshold_pct)
    }
}

impl Detector for PriceSurge {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::PriceSurge
    }

    fn value(&self, view: &MarketView) -> f64 {
        view.price_change_percent.unwrap_or_default()
    }
}

/// 24h change below `threshold_pct`
#[derive(Debug, Clone, Copy)]
pub struct PriceDump {
    pub threshold_pct: f64,
}

impl Default for PriceDump {
    fn default() -> Self {
        Self { threshold_pct: -5.0 }
    }
}

impl Predicate<MarketView> for PriceDump {
    fn evaluate(&self, view: &MarketView) -> bool {
        view.price_change_percent
            .is_some_and(|change| change < self.threshold_pct)
    }
}

impl Detector for PriceDump {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::PriceDump
    }

    fn value(&self, view: &MarketView) -> f64 {
        view.price_change_percent.unwrap_or_default()
    }
}

/// Funding below `threshold_pct` per 8h
#[derive(Debug, Clone, Copy)]
pub struct NegativeFunding {
    pub threshold_pct: f64,
}

impl Default for NegativeFunding {
    fn default() -> Self {
        Self {
            threshold_pct: -0.05,
        }
    }
}

impl Predicate<MarketView> for NegativeFunding {
    fn evaluate(&self, view: &MarketView) -> bool {
        view.funding_rate_pct
            .is_some_and(|funding| funding < self.threshold_pct)
    }
}

impl Detector for NegativeFunding {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::NegativeFunding
    }

    fn value(&self, view: &MarketView) -> f64 {
        view.funding_rate_pct.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceDirection {
    /// funding <= -f and change > +c
    Bullish,
    /// funding >= +f and change < -c
    Bearish,
}

/// Funding positioned against the spot move
#[derive(Debug, Clone, Copy)]
pub struct FundingDivergence {
    pub direction: DivergenceDirection,
    pub funding_pct: f64,
    pub change_pct: f64,
}

impl FundingDivergence {
    pub fn bullish() -> Self {
        Self {
            direction: DivergenceDirection::Bullish,
            funding_pct: 0.03,
            change_pct: 1.0,
        }
    }

    pub fn bearish() -> Self {
        Self {
            direction: DivergenceDirection::Bearish,
            ..Self::bullish()
        }
    }
}

impl Predicate<MarketView> for FundingDivergence {
    fn evaluate(&self, view: &MarketView) -> bool {
        let (Some(funding), Some(change)) = (view.funding_rate_pct, view.price_change_percent)
        else {
            return false;
        };
        match self.direction {
            DivergenceDirection::Bullish => {
                funding <= -self.funding_pct && change > self.change_pct
            }
            DivergenceDirection::Bearish => {
                funding >= self.funding_pct && change < -self.change_pct
            }
        }
    }

    fn severity(&self, _view: &MarketView) -> Severity {
        Severity::High
    }
}

impl Detector for FundingDivergence {
    fn kind(&self) -> AnomalyKind {
        match self.direction {
            DivergenceDirection::Bullish => AnomalyKind::ShortSqueezeSetup,
            DivergenceDirection::Bearish => AnomalyKind::LongTrapSetup,
        }
    }

    fn value(&self, view: &MarketView) -> f64 {
        view.funding_rate_pct.unwrap_or_default()
    }
}

/// Flow rate at least `min_ratio` x the implied 24h average
#[derive(Debug, Clone, Copy)]
pub struct VolumeSpike {
    pub min_ratio: f64,
    pub high_ratio: f64,
}

impl Default for VolumeSpike {
    fn default() -> Self {
        Self {
            min_ratio: 10.0,
            high_ratio: 50.0,
        }
    }
}

impl Predicate<MarketView> for VolumeSpike {
    fn evaluate(&self, view: &MarketView) -> bool {
        view.volume_ratio.is_some_and(|ratio| ratio >= self.min_ratio)
    }

    fn severity(&self, view: &MarketView) -> Severity {
        match view.volume_ratio {
            Some(ratio) if ratio > self.high_ratio => Severity::High,
            _ => Severity::Medium,
        }
    }
}

impl Detector for VolumeSpike {
    fn kind(&self) -> AnomalyKind {
        AnomalyKind::VolumeSpike
    }

    fn value(&self, view: &MarketView) -> f64 {
        view.volume_ratio.unwrap_or_default()
    }
}

/// Canonical detector set
pub fn default_detectors() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(PriceSurge::default()),
        Box::new(PriceDump::default()),
        Box::new(NegativeFunding::default()),
        Box::new(FundingDivergence::bullish()),
        Box::new(FundingDivergence::bearish()),
        Box::new(VolumeSpike::default()),
    ]
}

/// Retention and sampling parameters of the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnomalyParams {
    /// Events older than this are dropped every cycle
    pub retention_ms: i64,
    /// Minimum spacing between two volume spike events for one symbol
    pub volume_spike_cooldown_ms: i64,
    /// Minimum spacing between volume samples
    pub volume_sample_ms: i64,
    /// Maximum number of retained events
    pub capacity: usize,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            retention_ms: DEFAULT_ANOMALY_RETENTION_MS,
            volume_spike_cooldown_ms: DEFAULT_VOLUME_SPIKE_COOLDOWN_MS,
            volume_sample_ms: DEFAULT_VOLUME_SAMPLE_MS,
            capacity: DEFAULT_ANOMALY_CAPACITY,
        }
    }
}

impl AnomalyParams {
    /// Window during which a repeat of `kind` for the same symbol is suppressed.
    /// Level conditions stay suppressed for as long as their event is retained.
    pub fn dedupe_window(&self, kind: AnomalyKind) -> i64 {
        match kind {
            AnomalyKind::VolumeSpike => self.volume_spike_cooldown_ms,
            _ => self.retention_ms,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct VolumeSample {
    volume: f64,
    at: i64,
}

/// Outcome of one board pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalyReport {
    pub emitted: usize,
    pub expired: usize,
    pub changed: bool,
}

/// Retained, deduplicated anomaly events
pub struct AnomalyBoard {
    params: AnomalyParams,
    detectors: Vec<Box<dyn Detector>>,
    price_changes: FnvHashMap<Symbol, f64>,
    funding: FnvHashMap<Symbol, f64>,
    samples: FnvHashMap<Symbol, VolumeSample>,
    events: VecDeque<AnomalyEvent>,
    next_id: u64,
}

impl AnomalyBoard {
    pub fn new(params: AnomalyParams) -> Self {
        Self::with_detectors(params, default_detectors())
    }

    pub fn with_detectors(params: AnomalyParams, detectors: Vec<Box<dyn Detector>>) -> Self {
        Self {
            params,
            detectors,
            price_changes: FnvHashMap::default(),
            funding: FnvHashMap::default(),
            samples: FnvHashMap::default(),
            events: VecDeque::with_capacity(params.capacity),
            next_id: 1,
        }
    }

    /// Run every detector over the symbols touched by this cycle's inputs.
    pub fn observe(&mut self, ticks: &[Tick], futures: &[FuturesUpdate], now: i64) -> AnomalyReport {
        let mut report = AnomalyReport {
            expired: self.expire(now),
            ..AnomalyReport::default()
        };

        let mut ratios: FnvHashMap<Symbol, f64> = FnvHashMap::default();
        let mut touched: Vec<Symbol> = Vec::new();
        let mut seen: FnvHashSet<Symbol> = FnvHashSet::default();

        for tick in ticks.iter().filter(|tick| tick.is_finite()) {
            self.price_changes
                .insert(tick.symbol.clone(), tick.price_change_percent);
            if let Some(ratio) = self.sample_volume(tick, now) {
                ratios.insert(tick.symbol.clone(), ratio);
            }
            if seen.insert(tick.symbol.clone()) {
                touched.push(tick.symbol.clone());
            }
        }

        for update in futures.iter().filter(|update| update.funding_rate.is_finite()) {
            self.funding
                .insert(update.symbol.clone(), update.funding_rate_pct());
            if seen.insert(update.symbol.clone()) {
                touched.push(update.symbol.clone());
            }
        }

        for symbol in touched {
            let view = MarketView {
                price_change_percent: self.price_changes.get(&symbol).copied(),
                funding_rate_pct: self.funding.get(&symbol).copied(),
                volume_ratio: ratios.get(&symbol).copied(),
                symbol,
            };

            let matches: Vec<(AnomalyKind, f64, Severity)> = self
                .detectors
                .iter()
                .filter(|detector| detector.evaluate(&view))
                .map(|detector| (detector.kind(), detector.value(&view), detector.severity(&view)))
                .collect();

            for (kind, value, severity) in matches {
                if self.emit(&view.symbol, kind, value, severity, now) {
                    report.emitted += 1;
                }
            }
        }

        report.changed = report.emitted > 0 || report.expired > 0;
        report
    }

    /// Sample flow rate at most once per `volume_sample_ms`
    fn sample_volume(&mut self, tick: &Tick, now: i64) -> Option<f64> {
        let volume = tick.cumulative_quote_volume;
        let Some(sample) = self.samples.get_mut(&tick.symbol) else {
            self.samples
                .insert(tick.symbol.clone(), VolumeSample { volume, at: now });
            return None;
        };

        let elapsed = now - sample.at;
        if elapsed < self.params.volume_sample_ms {
            return None;
        }

        let delta = volume - sample.volume;
        *sample = VolumeSample { volume, at: now };
        if delta <= 0.0 {
            return None;
        }
        Some(relative_volume(delta, elapsed, volume))
    }

    fn emit(&mut self, symbol: &Symbol, kind: AnomalyKind, value: f64, severity: Severity, now: i64) -> bool {
        let existing = self
            .events
            .iter()
            .position(|event| event.kind == kind && &event.symbol == symbol);

        if let Some(index) = existing {
            let window = self.params.dedupe_window(kind);
            if window > 0 && now - self.events[index].detected_at < window {
                return false;
            }
            self.events.remove(index);
        }

        let event = AnomalyEvent {
            id: self.next_id,
            symbol: symbol.clone(),
            kind,
            value,
            severity,
            detected_at: now,
        };
        self.next_id += 1;

        if existing.is_none() {
            info!(%symbol, %kind, value, %severity, "anomaly detected");
        } else {
            debug!(%symbol, %kind, value, "anomaly re-detected after dedupe window");
        }

        self.events.push_back(event);
        while self.events.len() > self.params.capacity {
            self.events.pop_front();
        }
        true
    }

    fn expire(&mut self, now: i64) -> usize {
        let before = self.events.len();
        let retention = self.params.retention_ms;
        self.events.retain(|event| now - event.detected_at < retention);
        before - self.events.len()
    }

    /// Retained events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &AnomalyEvent> {
        self.events.iter()
    }

    /// Display cap: highest severity first, then newest
    pub fn top(&self, n: usize) -> Vec<AnomalyEvent> {
        let mut events: Vec<AnomalyEvent> = self.events.iter().cloned().collect();
        events.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.detected_at.cmp(&a.detected_at))
                .then_with(|| b.id.cmp(&a.id))
        });
        events.truncate(n);
        events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl fmt::Debug for AnomalyBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnomalyBoard")
            .field("params", &self.params)
            .field("detectors", &self.detectors.len())
            .field("events", &self.events)
            .finish()
    }
}

impl Default for AnomalyBoard {
    fn default() -> Self {
        Self::new(AnomalyParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(symbol: &str, change: f64, volume: f64) -> Tick {
        Tick {
            symbol: Symbol::new(symbol),
            last_price: 1.0,
            price_change_percent: change,
            cumulative_quote_volume: volume,
            timestamp_ms: 0,
        }
    }

    fn futures(symbol: &str, funding_rate: f64) -> FuturesUpdate {
        FuturesUpdate {
            symbol: Symbol::new(symbol),
            mark_price: 1.0,
            funding_rate,
            next_funding_time_ms: 0,
        }
    }

    fn view(change: Option<f64>, funding: Option<f64>, ratio: Option<f64>) -> MarketView {
        MarketView {
            symbol: Symbol::new("SOLUSDT"),
            price_change_percent: change,
            funding_rate_pct: funding,
            volume_ratio: ratio,
        }
    }

    fn kinds(board: &AnomalyBoard) -> Vec<AnomalyKind> {
        board.events().map(|event| event.kind).collect()
    }

    #[test]
    fn test_detector_thresholds() {
        struct TestCase {
            detector: Box<dyn Detector>,
            view: MarketView,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: surge is strictly above 5%
                detector: Box::new(PriceSurge::default()),
                view: view(Some(5.0), None, None),
                expected: false,
            },
            TestCase {
                // TC1: surge
                detector: Box::new(PriceSurge::default()),
                view: view(Some(5.1), None, None),
                expected: true,
            },
            TestCase {
                // TC2: dump
                detector: Box::new(PriceDump::default()),
                view: view(Some(-7.0), None, None),
                expected: true,
            },
            TestCase {
                // TC3: funding just under -0.05%
                detector: Box::new(NegativeFunding::default()),
                view: view(None, Some(-0.051), None),
                expected: true,
            },
            TestCase {
                // TC4: short squeeze needs both legs
                detector: Box::new(FundingDivergence::bullish()),
                view: view(None, Some(-0.04), None),
                expected: false,
            },
            TestCase {
                // TC5: short squeeze, funding bound inclusive
                detector: Box::new(FundingDivergence::bullish()),
                view: view(Some(1.5), Some(-0.03), None),
                expected: true,
            },
            TestCase {
                // TC6: long trap
                detector: Box::new(FundingDivergence::bearish()),
                view: view(Some(-2.0), Some(0.03), None),
                expected: true,
            },
            TestCase {
                // TC7: spike at exactly 10x
                detector: Box::new(VolumeSpike::default()),
                view: view(None, None, Some(10.0)),
                expected: true,
            },
            TestCase {
                // TC8: no sample this cycle
                detector: Box::new(VolumeSpike::default()),
                view: view(None, None, None),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.detector.evaluate(&test.view), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_severity() {
        assert_eq!(
            FundingDivergence::bullish().severity(&view(Some(2.0), Some(-0.1), None)),
            Severity::High
        );
        assert_eq!(VolumeSpike::default().severity(&view(None, None, Some(20.0))), Severity::Medium);
        assert_eq!(VolumeSpike::default().severity(&view(None, None, Some(51.0))), Severity::High);
        assert_eq!(PriceSurge::default().severity(&view(Some(9.0), None, None)), Severity::Medium);
    }

    #[test]
    fn test_divergence_combines_spot_and_futures() {
        let mut board = AnomalyBoard::default();

        board.observe(&[tick("SOLUSDT", 2.0, 1_000.0)], &[], 0);
        assert!(board.is_empty());

        let report = board.observe(&[], &[futures("SOLUSDT", -0.0006)], 1_000);
        assert_eq!(report.emitted, 2);
        assert_eq!(
            kinds(&board),
            vec![AnomalyKind::NegativeFunding, AnomalyKind::ShortSqueezeSetup]
        );
    }

    #[test]
    fn test_volume_spike_sampling_and_cooldown() {
        let mut board = AnomalyBoard::default();
        let day_volume = 86_400_000.0;

        // Seed sample; average rate = 1 per ms
        board.observe(&[tick("BTCUSDT", 0.0, day_volume)], &[], 0);

        // Inside the 1s sampling interval nothing is computed
        let report = board.observe(&[tick("BTCUSDT", 0.0, day_volume + 50_000.0)], &[], 500);
        assert_eq!(report.emitted, 0);

        // 20_000 over 1s => ratio ~20
        let report = board.observe(&[tick("BTCUSDT", 0.0, day_volume + 20_000.0)], &[], 1_000);
        assert_eq!(report.emitted, 1);
        let event = board.events().next().unwrap().clone();
        assert_eq!(event.kind, AnomalyKind::VolumeSpike);
        assert_eq!(event.severity, Severity::Medium);
        assert!(event.value > 19.0 && event.value < 21.0);

        // Repeat spike inside the cooldown is suppressed
        let report = board.observe(&[tick("BTCUSDT", 0.0, day_volume + 80_000.0)], &[], 2_000);
        assert_eq!(report.emitted, 0);
        assert_eq!(board.len(), 1);
        assert_eq!(board.events().next().unwrap().id, event.id);
    }

    #[test]
    fn test_level_events_dedupe_until_expiry() {
        let mut board = AnomalyBoard::default();

        board.observe(&[tick("DOGEUSDT", 8.0, 1_000.0)], &[], 0);
        let first_id = board.events().next().unwrap().id;

        // Still surging next cycle: the retained event stands, nothing to publish
        let report = board.observe(&[tick("DOGEUSDT", 9.0, 1_000.0)], &[], 1_000);
        assert_eq!(report, AnomalyReport::default());
        assert_eq!(board.len(), 1);
        let retained = board.events().next().unwrap();
        assert_eq!(retained.id, first_id);
        assert_eq!(retained.value, 8.0);
        assert_eq!(retained.detected_at, 0);

        // Condition clears: event stays until the retention window passes
        board.observe(&[tick("DOGEUSDT", 1.0, 1_000.0)], &[], 2_000);
        assert_eq!(board.len(), 1);

        let report = board.observe(&[], &[], DEFAULT_ANOMALY_RETENTION_MS);
        assert_eq!(report.expired, 1);
        assert!(report.changed);
        assert!(board.is_empty());

        // A fresh occurrence after expiry is a new event
        let report = board.observe(&[tick("DOGEUSDT", 7.0, 1_000.0)], &[], DEFAULT_ANOMALY_RETENTION_MS + 1_000);
        assert_eq!(report.emitted, 1);
        assert_ne!(board.events().next().unwrap().id, first_id);
    }

    #[test]
    fn test_capacity_and_top() {
        let params = AnomalyParams {
            capacity: 3,
            ..AnomalyParams::default()
        };
        let mut board = AnomalyBoard::new(params);

        let ticks: Vec<Tick> = ["AUSDT", "BUSDT", "CUSDT", "DUSDT"]
            .iter()
            .map(|symbol| tick(symbol, 6.0, 1_000.0))
            .collect();
        board.observe(&ticks, &[], 0);
        assert_eq!(board.len(), 3);
        assert_eq!(board.events().next().unwrap().symbol, "BUSDT");

        board.observe(&[], &[futures("EUSDT", 0.0004)], 10);
        board.observe(&[tick("EUSDT", -3.0, 1_000.0)], &[], 20);

        let top = board.top(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].kind, AnomalyKind::LongTrapSetup);
        assert_eq!(top[0].severity, Severity::High);
        assert_eq!(top[1].symbol, "DUSDT");
    }

    #[test]
    fn test_detected_at_utc() {
        let mut board = AnomalyBoard::default();
        board.observe(&[tick("XRPUSDT", -9.0, 1.0)], &[], 1_700_000_000_000);

        let event = board.events().next().unwrap();
        assert_eq!(event.detected_at_utc().unwrap().timestamp(), 1_700_000_000);
    }
}
