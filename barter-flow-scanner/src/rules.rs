//! Threshold rule sets and the predicate capability shared by the rule engine
//! and the anomaly detectors.

use crate::error::ScannerError;
use crate::flow::{FlowState, TrackedSymbol};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Importance of a match, used for ordering and notification routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pluggable match condition over some metrics view `M`
pub trait Predicate<M: ?Sized> {
    fn evaluate(&self, metrics: &M) -> bool;

    fn severity(&self, _metrics: &M) -> Severity {
        Severity::Medium
    }
}

/// The six threshold bounds of a rule set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleBounds {
    pub min_rvol: f64,
    pub min_pressure: f64,
    pub max_pressure: f64,
    pub min_flow_usdt: f64,
    pub min_price_change: f64,
    pub max_price_change: f64,
}

impl RuleBounds {
    /// Pure conjunction of every threshold check.
    ///
    /// The flow check uses |net flow| so sell-side rule sets can match.
    pub fn matches(&self, flow: &FlowState, price_change_percent: f64) -> bool {
        let flow_ok = flow.net_flow.abs() >= self.min_flow_usdt;
        let rvol_ok = flow.relative_volume >= self.min_rvol;
        let pressure_ok = flow.pressure >= self.min_pressure && flow.pressure <= self.max_pressure;
        let change_ok = price_change_percent >= self.min_price_change
            && price_change_percent <= self.max_price_change;

        flow_ok && rvol_ok && pressure_ok && change_ok
    }

    /// Reject bounds that can never be satisfied or are not numbers
    pub fn validate(&self) -> Result<(), ScannerError> {
        let fields = [
            ("minRvol", self.min_rvol),
            ("minPressure", self.min_pressure),
            ("maxPressure", self.max_pressure),
            ("minFlowUsdt", self.min_flow_usdt),
            ("minPriceChange", self.min_price_change),
            ("maxPriceChange", self.max_price_change),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| !value.is_finite()) {
            return Err(ScannerError::InvalidRuleBounds(format!("{} is not finite", name)));
        }
        if self.min_pressure < 0.0 || self.max_pressure > 100.0 {
            return Err(ScannerError::InvalidRuleBounds(
                "pressure bounds must lie within 0..=100".to_string(),
            ));
        }
        if self.min_pressure > self.max_pressure {
            return Err(ScannerError::InvalidRuleBounds(format!(
                "minPressure {} exceeds maxPressure {}",
                self.min_pressure, self.max_pressure
            )));
        }
        if self.min_price_change > self.max_price_change {
            return Err(ScannerError::InvalidRuleBounds(format!(
                "minPriceChange {} exceeds maxPriceChange {}",
                self.min_price_change, self.max_price_change
            )));
        }
        Ok(())
    }
}

impl Default for RuleBounds {
    fn default() -> Self {
        RulePreset::Default.bounds()
    }
}

/// Canonical named rule sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulePreset {
    /// Wide-open bands, only RVOL and flow gate
    #[default]
    Default,
    /// Strong buy-side flow into a rising market
    Momentum,
    /// Sell-side flow into a falling market
    Reversal,
    /// Very large flow regardless of direction
    Whale,
}

impl RulePreset {
    pub const ALL: [RulePreset; 4] = [
        RulePreset::Default,
        RulePreset::Momentum,
        RulePreset::Reversal,
        RulePreset::Whale,
    ];

    pub const fn bounds(&self) -> RuleBounds {
        match self {
            RulePreset::Default => RuleBounds {
                min_rvol: 1.5,
                min_pressure: 0.0,
                max_pressure: 100.0,
                min_flow_usdt: 5_000.0,
                min_price_change: -100.0,
                max_price_change: 100.0,
            },
            RulePreset::Momentum => RuleBounds {
                min_rvol: 3.0,
                min_pressure: 60.0,
                max_pressure: 100.0,
                min_flow_usdt: 50_000.0,
                min_price_change: 2.0,
                max_price_change: 100.0,
            },
            RulePreset::Reversal => RuleBounds {
                min_rvol: 2.0,
                min_pressure: 0.0,
                max_pressure: 40.0,
                min_flow_usdt: 20_000.0,
                min_price_change: -100.0,
                max_price_change: -3.0,
            },
            RulePreset::Whale => RuleBounds {
                min_rvol: 5.0,
                min_pressure: 0.0,
                max_pressure: 100.0,
                min_flow_usdt: 250_000.0,
                min_price_change: -100.0,
                max_price_change: 100.0,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RulePreset::Default => "default",
            RulePreset::Momentum => "momentum",
            RulePreset::Reversal => "reversal",
            RulePreset::Whale => "whale",
        }
    }
}

impl fmt::Display for RulePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RulePreset {
    type Err = ScannerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        RulePreset::ALL
            .into_iter()
            .find(|preset| preset.as_str() == lower)
            .ok_or_else(|| ScannerError::UnknownPreset(s.to_string()))
    }
}

/// Active rule set: a named preset or user-edited bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSet {
    Preset(RulePreset),
    Custom(RuleBounds),
}

impl RuleSet {
    /// Build a validated custom rule set
    pub fn custom(bounds: RuleBounds) -> Result<Self, ScannerError> {
        bounds.validate()?;
        Ok(RuleSet::Custom(bounds))
    }

    pub fn bounds(&self) -> RuleBounds {
        match self {
            RuleSet::Preset(preset) => preset.bounds(),
            RuleSet::Custom(bounds) => *bounds,
        }
    }

    /// Preset name, `None` for custom bounds
    pub fn name(&self) -> Option<&'static str> {
        match self {
            RuleSet::Preset(preset) => Some(preset.as_str()),
            RuleSet::Custom(_) => None,
        }
    }

    /// Rule engine contract
    pub fn matches(&self, flow: &FlowState, price_change_percent: f64) -> bool {
        self.bounds().matches(flow, price_change_percent)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        RuleSet::Preset(RulePreset::Default)
    }
}

impl From<RulePreset> for RuleSet {
    fn from(preset: RulePreset) -> Self {
        RuleSet::Preset(preset)
    }
}

impl fmt::Display for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "custom"),
        }
    }
}

impl Predicate<TrackedSymbol> for RuleSet {
    fn evaluate(&self, metrics: &TrackedSymbol) -> bool {
        self.matches(&metrics.flow, metrics.price_change_percent)
    }
}
