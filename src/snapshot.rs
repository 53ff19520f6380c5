use std::time::Duration;

/// Transfer statistics captured from a [`Counter`](crate::Counter).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Expected size supplied at construction. Advisory, 0 when unknown.
    pub total: u64,
    /// Units recorded when the snapshot was taken.
    pub transferred: u64,
    /// Units per second since the counter started.
    pub speed: f64,
}

impl Snapshot {
    /// Fraction of `total` transferred, in percent. `None` when the total is unknown.
    pub fn percent(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some(self.transferred as f64 / self.total as f64 * 100.0)
    }
}

/// Average throughput of `current` units over `elapsed`, measured from `start_value`.
///
/// Returns exactly 0.0 when nothing moved past the start value or when no time
/// has elapsed yet.
pub(crate) fn throughput(current: u64, start_value: u64, elapsed: Duration) -> f64 {
    let delta = current.saturating_sub(start_value);
    let seconds = elapsed.as_secs_f64();
    if delta == 0 || seconds <= 0.0 {
        return 0.0;
    }
    delta as f64 / seconds
}
