//! Barter Flow Scanner
//!
//! Turns a stream of 24h rolling ticker updates into live buy/sell pressure
//! signals:
//! - per-symbol decayed buy/sell flow, pressure and relative volume
//! - threshold rule sets (presets or custom bounds)
//! - hysteresis lifecycle (Active -> Cooldown -> removed) with stable ranking
//! - a side radar of one-shot anomalies (price moves, funding, volume spikes)
//!
//! [`ScannerEngine`] is the synchronous core; [`spawn_scanner`] drives it from
//! a tokio task with batched ingestion and `watch` publication.

pub mod anomaly;
pub mod config;
pub mod engine;
pub mod error;
pub mod flow;
pub mod logging;
pub mod rank;
pub mod rules;
pub mod runtime;
pub mod signals;
pub mod types;

// Re-export commonly used types for convenience
pub use types::{FuturesUpdate, MarketInput, ReplayFrame, Symbol, SymbolFilter, Tick};

pub use config::{RuntimeConfig, ScannerConfig};
pub use error::ScannerError;

pub use flow::{FlowBook, FlowParams, FlowState};
pub use rules::{Predicate, RuleBounds, RulePreset, RuleSet, Severity};
pub use signals::{Signal, SignalBook, SignalStatus, Transition};

pub use anomaly::{AnomalyBoard, AnomalyEvent, AnomalyKind, Detector, MarketView};

pub use engine::{CycleReport, ScannerEngine};
pub use runtime::{spawn_scanner, system_clock, Clock, Control, ScannerHandle};
