//! Scanner tunables loaded from `SCANNER_*` environment variables
//!
//! Every key is optional and falls back to its default. A key that is present
//! but cannot be parsed is rejected rather than silently replaced.

use crate::anomaly::{
    AnomalyParams, DEFAULT_ANOMALY_CAPACITY, DEFAULT_ANOMALY_RETENTION_MS,
    DEFAULT_VOLUME_SAMPLE_MS, DEFAULT_VOLUME_SPIKE_COOLDOWN_MS,
};
use crate::error::ScannerError;
use crate::flow::{FlowParams, DEFAULT_DEBOUNCE_MS, DEFAULT_DECAY};
use crate::rules::RulePreset;
use crate::signals::DEFAULT_RETENTION_MS;
use crate::types::{SymbolFilter, DEFAULT_STABLE_BASES};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_QUOTE_ASSET: &str = "SCANNER_QUOTE_ASSET";
pub const ENV_DEBOUNCE_MS: &str = "SCANNER_DEBOUNCE_MS";
pub const ENV_DECAY: &str = "SCANNER_DECAY";
pub const ENV_RETENTION_MS: &str = "SCANNER_RETENTION_MS";
pub const ENV_ANOMALY_RETENTION_MS: &str = "SCANNER_ANOMALY_RETENTION_MS";
pub const ENV_VOLUME_SPIKE_COOLDOWN_MS: &str = "SCANNER_VOLUME_SPIKE_COOLDOWN_MS";
pub const ENV_ANOMALY_CAPACITY: &str = "SCANNER_ANOMALY_CAPACITY";
pub const ENV_RULE_PRESET: &str = "SCANNER_RULE_PRESET";
pub const ENV_CYCLE_INTERVAL_MS: &str = "SCANNER_CYCLE_INTERVAL_MS";
pub const ENV_CHANNEL_BUFFER: &str = "SCANNER_CHANNEL_BUFFER";

/// Engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ScannerConfig {
    pub quote_asset: String,
    pub stable_bases: Vec<String>,
    pub debounce_ms: i64,
    /// Per-update multiplier applied to decayed buy/sell volume
    pub decay: f64,
    /// How long a Cooldown signal stays visible after its last match
    pub retention_ms: i64,
    pub anomaly_retention_ms: i64,
    pub volume_spike_cooldown_ms: i64,
    pub volume_sample_ms: i64,
    pub anomaly_capacity: usize,
    pub rule_preset: RulePreset,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            quote_asset: "USDT".to_string(),
            stable_bases: DEFAULT_STABLE_BASES.iter().map(|s| s.to_string()).collect(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            decay: DEFAULT_DECAY,
            retention_ms: DEFAULT_RETENTION_MS,
            anomaly_retention_ms: DEFAULT_ANOMALY_RETENTION_MS,
            volume_spike_cooldown_ms: DEFAULT_VOLUME_SPIKE_COOLDOWN_MS,
            volume_sample_ms: DEFAULT_VOLUME_SAMPLE_MS,
            anomaly_capacity: DEFAULT_ANOMALY_CAPACITY,
            rule_preset: RulePreset::Default,
        }
    }
}

impl ScannerConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ScannerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScannerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let decay = parse_or(&lookup, ENV_DECAY, defaults.decay)?;
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(invalid(ENV_DECAY, decay));
        }

        Ok(Self {
            quote_asset: lookup(ENV_QUOTE_ASSET)
                .map(|v| v.trim().to_uppercase())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.quote_asset),
            stable_bases: defaults.stable_bases,
            debounce_ms: non_negative(&lookup, ENV_DEBOUNCE_MS, defaults.debounce_ms)?,
            decay,
            retention_ms: non_negative(&lookup, ENV_RETENTION_MS, defaults.retention_ms)?,
            anomaly_retention_ms: non_negative(
                &lookup,
                ENV_ANOMALY_RETENTION_MS,
                defaults.anomaly_retention_ms,
            )?,
            volume_spike_cooldown_ms: non_negative(
                &lookup,
                ENV_VOLUME_SPIKE_COOLDOWN_MS,
                defaults.volume_spike_cooldown_ms,
            )?,
            volume_sample_ms: defaults.volume_sample_ms,
            anomaly_capacity: parse_or(&lookup, ENV_ANOMALY_CAPACITY, defaults.anomaly_capacity)?,
            rule_preset: parse_or(&lookup, ENV_RULE_PRESET, defaults.rule_preset)?,
        })
    }

    pub fn with_quote_asset(mut self, quote_asset: impl Into<String>) -> Self {
        self.quote_asset = quote_asset.into().to_uppercase();
        self
    }

    pub fn with_stable_bases(mut self, stable_bases: Vec<String>) -> Self {
        self.stable_bases = stable_bases;
        self
    }

    pub fn with_debounce_ms(mut self, debounce_ms: i64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    pub fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_retention_ms(mut self, retention_ms: i64) -> Self {
        self.retention_ms = retention_ms;
        self
    }

    pub fn with_anomaly_retention_ms(mut self, retention_ms: i64) -> Self {
        self.anomaly_retention_ms = retention_ms;
        self
    }

    pub fn with_volume_spike_cooldown_ms(mut self, cooldown_ms: i64) -> Self {
        self.volume_spike_cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_anomaly_capacity(mut self, capacity: usize) -> Self {
        self.anomaly_capacity = capacity;
        self
    }

    pub fn with_rule_preset(mut self, preset: RulePreset) -> Self {
        self.rule_preset = preset;
        self
    }

    pub fn symbol_filter(&self) -> SymbolFilter {
        SymbolFilter::new(self.quote_asset.clone(), self.stable_bases.clone())
    }

    pub fn flow_params(&self) -> FlowParams {
        FlowParams {
            debounce_ms: self.debounce_ms,
            decay: self.decay,
        }
    }

    pub fn anomaly_params(&self) -> AnomalyParams {
        AnomalyParams {
            retention_ms: self.anomaly_retention_ms,
            volume_spike_cooldown_ms: self.volume_spike_cooldown_ms,
            volume_sample_ms: self.volume_sample_ms,
            capacity: self.anomaly_capacity,
        }
    }
}

/// Runtime cadence and channel sizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Batch window between aggregation cycles
    pub cycle_interval: Duration,
    /// Ingestion channel capacity
    pub channel_buffer_size: usize,
    /// Control channel capacity
    pub control_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_millis(1_000),
            channel_buffer_size: 10_000,
            control_buffer_size: 64,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ScannerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScannerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let interval_ms: u64 = parse_or(
            &lookup,
            ENV_CYCLE_INTERVAL_MS,
            defaults.cycle_interval.as_millis() as u64,
        )?;
        if interval_ms == 0 {
            return Err(invalid(ENV_CYCLE_INTERVAL_MS, interval_ms));
        }

        let channel_buffer_size: usize =
            parse_or(&lookup, ENV_CHANNEL_BUFFER, defaults.channel_buffer_size)?;
        if channel_buffer_size == 0 {
            return Err(invalid(ENV_CHANNEL_BUFFER, channel_buffer_size));
        }

        Ok(Self {
            cycle_interval: Duration::from_millis(interval_ms),
            channel_buffer_size,
            control_buffer_size: defaults.control_buffer_size,
        })
    }

    /// Set batch window
    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    /// Set ingestion channel buffer size
    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }

    pub fn with_control_buffer_size(mut self, size: usize) -> Self {
        self.control_buffer_size = size;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ScannerError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ScannerError::Config {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn non_negative<F>(lookup: &F, key: &str, default: i64) -> Result<i64, ScannerError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default)?;
    if value < 0 {
        return Err(invalid(key, value));
    }
    Ok(value)
}

fn invalid(key: &str, value: impl ToString) -> ScannerError {
    ScannerError::Config {
        key: key.to_string(),
        value: value.to_string(),
    }
}
