/// Flow Scanner
///
/// Reads market inputs as newline-delimited JSON and logs ranked flow signals
/// and anomalies.
///
/// Usage:
///   flow-scanner [live]          inputs (`{"type":"tick",...}`) on stdin
///   flow-scanner replay <path>   one `ReplayFrame` per line, run synchronously
use std::error::Error;

use barter_flow_scanner::{
    logging::init_logging, spawn_scanner, system_clock, AnomalyEvent, MarketInput, ReplayFrame,
    RuntimeConfig, ScannerConfig, ScannerEngine, ScannerError, Signal,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Signals and anomalies logged per update
const DISPLAY_LIMIT: usize = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config = ScannerConfig::from_env()?;
    let mut args = std::env::args().skip(1);

    match args.next().as_deref() {
        None | Some("live") => live(config, RuntimeConfig::from_env()?).await?,
        Some("replay") => {
            let path = args.next().ok_or("usage: flow-scanner replay <path>")?;
            replay(config, &path).await?;
        }
        Some(other) => return Err(format!("unknown mode: {other}").into()),
    }

    Ok(())
}

async fn live(config: ScannerConfig, runtime: RuntimeConfig) -> Result<(), ScannerError> {
    info!(
        quote = %config.quote_asset,
        rules = %config.rule_preset,
        cycle_ms = runtime.cycle_interval.as_millis() as u64,
        "starting live scanner"
    );

    let handle = spawn_scanner(ScannerEngine::new(&config), runtime, system_clock());

    let mut signals = handle.signals();
    let mut anomalies = handle.anomalies();
    let reporter = tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = signals.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    log_signals(&signals.borrow_and_update());
                }
                changed = anomalies.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    log_anomalies(&anomalies.borrow_and_update());
                }
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => match serde_json::from_str::<MarketInput>(&line) {
                    Ok(input) => handle.ingest(input).await?,
                    Err(error) => warn!(%error, "skipping malformed input line"),
                },
                None => {
                    info!("input closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C, shutting down");
                break;
            }
        }
    }

    let engine = handle.shutdown().await?;
    let _ = reporter.await;
    log_signals(engine.ranked());
    Ok(())
}

async fn replay(config: ScannerConfig, path: &str) -> Result<(), ScannerError> {
    info!(%path, rules = %config.rule_preset, "replaying frames");

    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut engine = ScannerEngine::new(&config);
    let mut cycles = 0_u64;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let frame: ReplayFrame = serde_json::from_str(&line)?;
        let report = engine.run_cycle(&frame.ticks, &frame.futures, frame.now_ms);
        cycles += 1;

        if report.changed {
            info!(
                cycle = cycles,
                now_ms = frame.now_ms,
                transitions = report.transitions.len(),
                anomalies = report.anomalies_emitted,
                "cycle changed"
            );
            log_signals(engine.ranked());
            if report.anomalies_emitted > 0 {
                log_anomalies(&engine.top_anomalies(DISPLAY_LIMIT));
            }
        }
    }

    info!(cycles, signals = engine.ranked().len(), "replay complete");
    Ok(())
}

fn log_signals(ranked: &[Signal]) {
    for (rank, signal) in ranked.iter().take(DISPLAY_LIMIT).enumerate() {
        info!(
            rank = rank + 1,
            symbol = %signal.symbol,
            status = %signal.status,
            rvol = %format!("{:.2}", signal.flow.relative_volume),
            pressure = %format!("{:.1}", signal.flow.pressure),
            net_flow = %format!("{:.0}", signal.flow.net_flow),
            change = %format!("{:+.2}%", signal.price_change_percent),
            "signal"
        );
    }
}

fn log_anomalies(events: &[AnomalyEvent]) {
    for event in events.iter().take(DISPLAY_LIMIT) {
        info!(
            symbol = %event.symbol,
            kind = %event.kind,
            severity = %event.severity,
            value = %format!("{:.3}", event.value),
            detected_at = ?event.detected_at_utc(),
            "anomaly"
        );
    }
}
