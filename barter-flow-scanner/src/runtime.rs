//! Async driver: one task exclusively owns the [`ScannerEngine`]
//!
//! Inputs arrive on a bounded mpsc channel and are coalesced latest-wins per
//! symbol into the pending batch. Every `cycle_interval` the batch is committed
//! as one engine cycle. Control commands share the same `select!` loop, so they
//! always land between cycles. Results are published on `watch` channels only
//! when something changed.

use crate::anomaly::AnomalyEvent;
use crate::config::RuntimeConfig;
use crate::engine::ScannerEngine;
use crate::error::ScannerError;
use crate::rules::RuleSet;
use crate::signals::Signal;
use crate::types::{FuturesUpdate, MarketInput, Symbol, Tick};
use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Millisecond timestamp source
pub type Clock = Box<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock in epoch milliseconds
pub fn system_clock() -> Clock {
    Box::new(|| Utc::now().timestamp_millis())
}

/// Commands applied between cycles
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    SetRules(RuleSet),
    SetPaused(bool),
    ClearSignals,
    Shutdown,
}

/// Latest input per symbol since the last committed cycle
#[derive(Debug, Default)]
struct PendingBatch {
    ticks: IndexMap<Symbol, Tick>,
    futures: IndexMap<Symbol, FuturesUpdate>,
}

impl PendingBatch {
    fn push(&mut self, input: MarketInput) {
        match input {
            MarketInput::Tick(tick) => {
                self.ticks.insert(tick.symbol.clone(), tick);
            }
            MarketInput::Futures(update) => {
                self.futures.insert(update.symbol.clone(), update);
            }
        }
    }

    fn take(&mut self) -> (Vec<Tick>, Vec<FuturesUpdate>) {
        let ticks = std::mem::take(&mut self.ticks).into_values().collect();
        let futures = std::mem::take(&mut self.futures).into_values().collect();
        (ticks, futures)
    }

    fn len(&self) -> usize {
        self.ticks.len() + self.futures.len()
    }
}

/// Client side of a running scanner task
#[derive(Debug)]
pub struct ScannerHandle {
    input_tx: mpsc::Sender<MarketInput>,
    control_tx: mpsc::Sender<Control>,
    signals_rx: watch::Receiver<Vec<Signal>>,
    anomalies_rx: watch::Receiver<Vec<AnomalyEvent>>,
    task: JoinHandle<ScannerEngine>,
}

impl ScannerHandle {
    /// Queue an input, waiting for buffer space
    pub async fn ingest(&self, input: MarketInput) -> Result<(), ScannerError> {
        self.input_tx
            .send(input)
            .await
            .map_err(|_| ScannerError::RuntimeStopped)
    }

    /// Queue an input without waiting. Returns `Ok(false)` if the buffer is
    /// full and the input was dropped.
    pub fn try_ingest(&self, input: MarketInput) -> Result<bool, ScannerError> {
        match self.input_tx.try_send(input) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(input)) => {
                warn!(symbol = %input.symbol(), "ingestion buffer full, dropping input");
                Ok(false)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ScannerError::RuntimeStopped),
        }
    }

    /// Extra producer for the ingestion channel
    pub fn input_sender(&self) -> mpsc::Sender<MarketInput> {
        self.input_tx.clone()
    }

    pub async fn set_rules(&self, rules: RuleSet) -> Result<(), ScannerError> {
        self.control(Control::SetRules(rules)).await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<(), ScannerError> {
        self.control(Control::SetPaused(paused)).await
    }

    pub async fn clear_signals(&self) -> Result<(), ScannerError> {
        self.control(Control::ClearSignals).await
    }

    async fn control(&self, command: Control) -> Result<(), ScannerError> {
        self.control_tx
            .send(command)
            .await
            .map_err(|_| ScannerError::RuntimeStopped)
    }

    /// Ranked signals, updated after every changing cycle
    pub fn signals(&self) -> watch::Receiver<Vec<Signal>> {
        self.signals_rx.clone()
    }

    /// Retained anomalies in display order
    pub fn anomalies(&self) -> watch::Receiver<Vec<AnomalyEvent>> {
        self.anomalies_rx.clone()
    }

    /// Stop the task and hand back the engine. Pending inputs are discarded.
    pub async fn shutdown(self) -> Result<ScannerEngine, ScannerError> {
        // Task may already be gone; the join below reports that
        let _ = self.control_tx.send(Control::Shutdown).await;
        self.task.await.map_err(|error| {
            warn!(%error, "scanner task did not exit cleanly");
            ScannerError::RuntimeStopped
        })
    }
}

/// Spawn the scanner task on the current tokio runtime.
pub fn spawn_scanner(engine: ScannerEngine, config: RuntimeConfig, clock: Clock) -> ScannerHandle {
    let (input_tx, input_rx) = mpsc::channel(config.channel_buffer_size);
    let (control_tx, control_rx) = mpsc::channel(config.control_buffer_size.max(1));
    let (signals_tx, signals_rx) = watch::channel(engine.ranked().to_vec());
    let (anomalies_tx, anomalies_rx) = watch::channel(engine.top_anomalies(usize::MAX));

    let task = tokio::spawn(run(
        engine,
        config,
        clock,
        input_rx,
        control_rx,
        Publisher {
            signals_tx,
            anomalies_tx,
        },
    ));

    ScannerHandle {
        input_tx,
        control_tx,
        signals_rx,
        anomalies_rx,
        task,
    }
}

struct Publisher {
    signals_tx: watch::Sender<Vec<Signal>>,
    anomalies_tx: watch::Sender<Vec<AnomalyEvent>>,
}

impl Publisher {
    fn publish(&self, engine: &ScannerEngine) {
        self.signals_tx.send_replace(engine.ranked().to_vec());
        self.anomalies_tx.send_replace(engine.top_anomalies(usize::MAX));
    }
}

async fn run(
    mut engine: ScannerEngine,
    config: RuntimeConfig,
    clock: Clock,
    mut input_rx: mpsc::Receiver<MarketInput>,
    mut control_rx: mpsc::Receiver<Control>,
    publisher: Publisher,
) -> ScannerEngine {
    let mut pending = PendingBatch::default();
    let mut inputs_open = true;

    let mut interval = tokio::time::interval(config.cycle_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    interval.tick().await;

    info!(interval_ms = config.cycle_interval.as_millis() as u64, "scanner started");

    // Order: control, then a due cycle, then input. A saturated input channel
    // must not starve the cycle branch.
    loop {
        tokio::select! {
            biased;

            command = control_rx.recv() => match command {
                Some(Control::Shutdown) | None => break,
                Some(command) => apply_control(&mut engine, command, &publisher),
            },

            _ = interval.tick() => {
                // Paused: keep coalescing, commit nothing
                if engine.is_paused() {
                    continue;
                }
                let batch_size = pending.len();
                let (ticks, futures) = pending.take();
                let report = engine.run_cycle(&ticks, &futures, clock());
                if report.changed {
                    debug!(batch_size, transitions = report.transitions.len(), "publishing cycle");
                    publisher.publish(&engine);
                }
            }

            input = input_rx.recv(), if inputs_open => match input {
                Some(input) => pending.push(input),
                None => {
                    debug!("all input senders dropped");
                    inputs_open = false;
                }
            },
        }
    }

    info!(discarded = pending.len(), "scanner stopped");
    engine
}

fn apply_control(engine: &mut ScannerEngine, command: Control, publisher: &Publisher) {
    match command {
        Control::SetRules(rules) => {
            engine.set_rules(rules);
        }
        Control::SetPaused(paused) => {
            engine.set_paused(paused);
        }
        Control::ClearSignals => {
            if engine.clear_signals() {
                publisher.publish(engine);
            }
        }
        Control::Shutdown => {}
    }
}
