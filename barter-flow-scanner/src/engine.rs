//! One aggregation cycle: filter -> flow -> rules -> lifecycle -> rank, plus the
//! anomaly radar over the same batch.
//!
//! [`ScannerEngine`] is plain synchronous state. The async runtime owns one
//! exclusively and calls [`ScannerEngine::run_cycle`] once per batch window;
//! replay drives it directly.

use crate::anomaly::{AnomalyBoard, AnomalyEvent};
use crate::config::ScannerConfig;
use crate::flow::{FlowBook, FlowState, TrackedSymbol};
use crate::rank::rank;
use crate::rules::{Predicate, RuleSet};
use crate::signals::{Observation, Signal, SignalBook, Transition};
use crate::types::{FuturesUpdate, Symbol, SymbolFilter, Tick};
use tracing::{debug, info};

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Ranked signals or anomaly set differ from before the cycle
    pub changed: bool,
    pub transitions: Vec<(Symbol, Transition)>,
    pub anomalies_emitted: usize,
}

#[derive(Debug)]
pub struct ScannerEngine {
    filter: SymbolFilter,
    flows: FlowBook,
    signals: SignalBook,
    anomalies: AnomalyBoard,
    rules: RuleSet,
    paused: bool,
    ranked: Vec<Signal>,
}

impl ScannerEngine {
    pub fn new(config: &ScannerConfig) -> Self {
        Self::with_anomaly_board(config, AnomalyBoard::new(config.anomaly_params()))
    }

    /// Construct with a custom detector set
    pub fn with_anomaly_board(config: &ScannerConfig, anomalies: AnomalyBoard) -> Self {
        Self {
            filter: config.symbol_filter(),
            flows: FlowBook::new(config.flow_params()),
            signals: SignalBook::new(config.retention_ms),
            anomalies,
            rules: RuleSet::Preset(config.rule_preset),
            paused: false,
            ranked: Vec::new(),
        }
    }

    /// Run one aggregation cycle over a batch of inputs observed by `now`.
    ///
    /// Paused engines do nothing. A batch without admissible ticks leaves flow
    /// state and signals untouched. Otherwise the ticked symbols are updated and
    /// every tracked symbol is re-evaluated, so rule swaps and expiries reach
    /// symbols that went quiet.
    pub fn run_cycle(&mut self, ticks: &[Tick], futures: &[FuturesUpdate], now: i64) -> CycleReport {
        if self.paused {
            debug!(ticks = ticks.len(), "scanner paused, skipping cycle");
            return CycleReport::default();
        }

        let ticks: Vec<Tick> = ticks
            .iter()
            .filter(|tick| self.filter.allows(&tick.symbol))
            .cloned()
            .collect();
        let futures: Vec<FuturesUpdate> = futures
            .iter()
            .filter(|update| self.filter.allows(&update.symbol))
            .cloned()
            .collect();

        let anomaly_report = self.anomalies.observe(&ticks, &futures, now);
        let mut report = CycleReport {
            changed: anomaly_report.changed,
            anomalies_emitted: anomaly_report.emitted,
            ..CycleReport::default()
        };

        if ticks.is_empty() {
            return report;
        }

        for tick in &ticks {
            self.flows.apply(tick, now);
        }

        let mut observations: Vec<(Symbol, Observation)> = self
            .flows
            .iter()
            .map(|(symbol, tracked)| (symbol.clone(), self.observe(tracked)))
            .collect();
        observations.sort_by(|(a, _), (b, _)| a.cmp(b));

        let lifecycle = self.signals.update(now, observations);
        if lifecycle.changed {
            self.ranked = rank(self.signals.iter().cloned());
            report.changed = true;
        }
        report.transitions = lifecycle.transitions;

        debug!(
            ticks = ticks.len(),
            futures = futures.len(),
            tracked = self.flows.len(),
            signals = self.signals.len(),
            anomalies = report.anomalies_emitted,
            changed = report.changed,
            "cycle complete"
        );
        report
    }

    fn observe(&self, tracked: &TrackedSymbol) -> Observation {
        Observation {
            flow: tracked.flow,
            price_change_percent: tracked.price_change_percent,
            matched: self.rules.evaluate(tracked),
        }
    }

    /// Swap the active rule set; takes effect on the next cycle
    pub fn set_rules(&mut self, rules: RuleSet) -> bool {
        if self.rules == rules {
            return false;
        }
        info!(from = %self.rules, to = %rules, "rule set changed");
        self.rules = rules;
        true
    }

    pub fn rules(&self) -> RuleSet {
        self.rules
    }

    pub fn set_paused(&mut self, paused: bool) -> bool {
        if self.paused == paused {
            return false;
        }
        info!(paused, "scanner pause toggled");
        self.paused = paused;
        true
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Drop every signal. Flow state is kept so new signals need no warm-up.
    pub fn clear_signals(&mut self) -> bool {
        if !self.signals.clear() {
            return false;
        }
        info!("signals cleared");
        self.ranked.clear();
        true
    }

    /// Ranked signals as of the last cycle that changed them
    pub fn ranked(&self) -> &[Signal] {
        &self.ranked
    }

    pub fn signal(&self, symbol: &str) -> Option<&Signal> {
        self.signals.get(symbol)
    }

    /// Retained anomaly events, oldest first
    pub fn anomalies(&self) -> Vec<AnomalyEvent> {
        self.anomalies.events().cloned().collect()
    }

    /// At most `n` anomalies, highest severity then newest first
    pub fn top_anomalies(&self, n: usize) -> Vec<AnomalyEvent> {
        self.anomalies.top(n)
    }

    pub fn flow(&self, symbol: &str) -> Option<&FlowState> {
        self.flows.get(symbol).map(|tracked| &tracked.flow)
    }

    pub fn tracked(&self, symbol: &str) -> Option<&TrackedSymbol> {
        self.flows.get(symbol)
    }

    pub fn tracked_len(&self) -> usize {
        self.flows.len()
    }
}

impl Default for ScannerEngine {
    fn default() -> Self {
        Self::new(&ScannerConfig::default())
    }
}
