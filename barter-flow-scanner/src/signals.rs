//! Signal lifecycle: Active -> Cooldown -> removed
//!
//! A signal is created the first time a symbol matches the active rule set.
//! When it stops matching it drops into Cooldown and stays visible until
//! `retention_ms` has passed since the last cycle it actually matched. That
//! timestamp (`last_active_at`) is frozen while in Cooldown; refreshing it
//! there would stop signals from ever expiring.

use crate::flow::FlowState;
use crate::types::Symbol;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// How long a non-matching signal stays visible
pub const DEFAULT_RETENTION_MS: i64 = 45_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Active,
    Cooldown,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Active => "ACTIVE",
            SignalStatus::Cooldown => "COOLDOWN",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SignalStatus::Active)
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Live detected signal for one symbol
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub symbol: Symbol,
    /// Copy of the owning FlowState at the last evaluation
    pub flow: FlowState,
    pub price_change_percent: f64,
    pub status: SignalStatus,
    pub first_detected_at: i64,
    pub last_active_at: i64,
}

impl Signal {
    /// Display ranking score: rvol * 2 + |net flow| / 10k
    pub fn score(&self) -> f64 {
        self.flow.relative_volume * 2.0 + self.flow.net_flow.abs() / 10_000.0
    }
}

/// Lifecycle step taken for one symbol during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Cooled,
    Requalified,
    Expired,
}

/// Evaluation result fed into the lifecycle for one symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub flow: FlowState,
    pub price_change_percent: f64,
    pub matched: bool,
}

/// Outcome of one lifecycle pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleReport {
    pub transitions: Vec<(Symbol, Transition)>,
    /// True if any stored signal differs from before the pass
    pub changed: bool,
}

/// Authoritative map of live signals, at most one per symbol
#[derive(Debug, Clone)]
pub struct SignalBook {
    retention_ms: i64,
    signals: BTreeMap<Symbol, Signal>,
}

impl SignalBook {
    pub fn new(retention_ms: i64) -> Self {
        Self {
            retention_ms,
            signals: BTreeMap::new(),
        }
    }

    /// Drive every observed symbol through one step of the state machine.
    ///
    /// Symbols without an existing signal that do not match are ignored.
    pub fn update<I>(&mut self, now: i64, observations: I) -> LifecycleReport
    where
        I: IntoIterator<Item = (Symbol, Observation)>,
    {
        let mut report = LifecycleReport::default();

        for (symbol, observation) in observations {
            let transition = self.step(&symbol, observation, now, &mut report.changed);
            if let Some(transition) = transition {
                match transition {
                    Transition::Expired => {
                        info!(%symbol, "signal expired after cooldown")
                    }
                    other => debug!(%symbol, ?other, "signal transition"),
                }
                report.transitions.push((symbol, transition));
            }
        }

        report
    }

    fn step(
        &mut self,
        symbol: &Symbol,
        observation: Observation,
        now: i64,
        changed: &mut bool,
    ) -> Option<Transition> {
        let Observation {
            flow,
            price_change_percent,
            matched,
        } = observation;

        let Some(signal) = self.signals.get_mut(symbol) else {
            if !matched {
                return None;
            }
            info!(%symbol, rvol = flow.relative_volume, net_flow = flow.net_flow, "signal detected");
            self.signals.insert(
                symbol.clone(),
                Signal {
                    symbol: symbol.clone(),
                    flow,
                    price_change_percent,
                    status: SignalStatus::Active,
                    first_detected_at: now,
                    last_active_at: now,
                },
            );
            *changed = true;
            return Some(Transition::Created);
        };

        let before = signal.clone();
        let transition = match (signal.status, matched) {
            (SignalStatus::Active, true) => {
                signal.last_active_at = now;
                None
            }
            (SignalStatus::Active, false) => {
                signal.status = SignalStatus::Cooldown;
                Some(Transition::Cooled)
            }
            (SignalStatus::Cooldown, true) => {
                signal.status = SignalStatus::Active;
                signal.last_active_at = now;
                Some(Transition::Requalified)
            }
            (SignalStatus::Cooldown, false) => {
                if now - signal.last_active_at >= self.retention_ms {
                    self.signals.remove(symbol);
                    *changed = true;
                    return Some(Transition::Expired);
                }
                None
            }
        };

        signal.flow = flow;
        signal.price_change_percent = price_change_percent;
        if *signal != before {
            *changed = true;
        }
        transition
    }

    /// Remove every signal; flow state is owned elsewhere and untouched
    pub fn clear(&mut self) -> bool {
        let had_signals = !self.signals.is_empty();
        self.signals.clear();
        had_signals
    }

    pub fn get(&self, symbol: &str) -> Option<&Signal> {
        self.signals.get(symbol)
    }

    /// Signals in symbol order
    pub fn iter(&self) -> impl Iterator<Item = &Signal> {
        self.signals.values()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl Default for SignalBook {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_MS)
    }
}
