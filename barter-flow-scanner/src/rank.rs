//! Display ordering of live signals

use crate::signals::Signal;
use std::cmp::Ordering;

/// Active before Cooldown, then descending score. Stable for equal keys.
pub fn rank(signals: impl IntoIterator<Item = Signal>) -> Vec<Signal> {
    let mut ranked: Vec<Signal> = signals.into_iter().collect();
    ranked.sort_by(compare);
    ranked
}

fn compare(a: &Signal, b: &Signal) -> Ordering {
    let status = b.status.is_active().cmp(&a.status.is_active());
    status.then_with(|| b.score().total_cmp(&a.score()))
}
