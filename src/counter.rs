use std::io::{self, Write};
use std::pin::Pin;
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU64, Ordering},
};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::snapshot::{Snapshot, throughput};

/// Cadence of the background refresh task unless configured otherwise.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(200);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

/// State shared between a [`Counter`] and its refresh task.
struct Meter {
    progress: AtomicU64,
    start_time: Instant,
    start_value: u64,
    /// `f64` bits of the speed computed by the latest refresh.
    live_speed: AtomicU64,
    ticks: AtomicU64,
}

impl Meter {
    fn speed_at(&self, current: u64) -> f64 {
        throughput(current, self.start_value, self.start_time.elapsed())
    }

    fn refresh(&self, last_observed: &mut Option<u64>) {
        let current = self.progress.load(Ordering::SeqCst);
        if *last_observed != Some(current) {
            let speed = self.speed_at(current);
            self.live_speed.store(speed.to_bits(), Ordering::SeqCst);
            *last_observed = Some(current);
        }
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Configures a [`Counter`] before its refresh task is spawned.
pub struct CounterBuilder {
    total: u64,
    refresh_interval: Duration,
    parent: Option<CancellationToken>,
}

impl CounterBuilder {
    /// Sets the refresh cadence. Zero is clamped to one millisecond.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval.max(MIN_REFRESH_INTERVAL);
        self
    }

    /// Ties the refresh task to `token`: cancelling it stops the task even if
    /// the counter is never finalized.
    pub fn cancel_on(mut self, token: &CancellationToken) -> Self {
        self.parent = Some(token.clone());
        self
    }

    /// Spawns the refresh task and returns the running counter.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn start(self) -> Counter {
        let stop = match &self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let meter = Arc::new(Meter {
            progress: AtomicU64::new(0),
            start_time: Instant::now(),
            start_value: 0,
            live_speed: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        });
        let refresh = tokio::spawn(refresh_loop(
            Arc::clone(&meter),
            self.refresh_interval,
            stop.clone(),
        ));
        debug!(
            total = self.total,
            interval_ms = self.refresh_interval.as_millis() as u64,
            "counter started"
        );

        Counter {
            total: self.total,
            refresh_interval: self.refresh_interval,
            meter,
            stop,
            refresh,
            snapshot: OnceLock::new(),
        }
    }
}

async fn refresh_loop(meter: Arc<Meter>, interval: Duration, stop: CancellationToken) {
    // The first tick completes immediately.
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_observed = None;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => meter.refresh(&mut last_observed),
        }
    }
    debug!("refresh task stopped");
}

/// Accounts units (usually bytes) of an ongoing transfer.
///
/// Writers call [`update`](Self::update) or [`set`](Self::set) from any number
/// of threads. A background task re-reads the progress every refresh interval
/// to keep [`live`](Self::live) current, and [`finalize`](Self::finalize)
/// stops that task and freezes the final [`Snapshot`] exactly once.
///
/// Dropping a counter that was never finalized also stops the task.
pub struct Counter {
    total: u64,
    refresh_interval: Duration,
    meter: Arc<Meter>,
    stop: CancellationToken,
    refresh: JoinHandle<()>,
    snapshot: OnceLock<Snapshot>,
}

impl Counter {
    /// Starts a counter with the default refresh interval.
    ///
    /// `total` is a hint only and is never checked against progress.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn new(total: u64) -> Self {
        Self::builder(total).start()
    }

    pub fn builder(total: u64) -> CounterBuilder {
        CounterBuilder {
            total,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            parent: None,
        }
    }

    /// Adds `n` units and returns the new progress.
    pub fn update(&self, n: u64) -> u64 {
        self.meter
            .progress
            .fetch_add(n, Ordering::SeqCst)
            .wrapping_add(n)
    }

    /// Overwrites progress with the absolute value `n`.
    pub fn set(&self, n: u64) -> &Self {
        self.meter.progress.store(n, Ordering::SeqCst);
        self
    }

    pub fn position(&self) -> u64 {
        self.meter.progress.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn elapsed(&self) -> Duration {
        self.meter.start_time.elapsed()
    }

    /// Current progress with the speed from the most recent refresh.
    ///
    /// The speed may lag by up to one refresh interval. Once the counter is
    /// finalized this returns the final snapshot.
    pub fn live(&self) -> Snapshot {
        if let Some(snapshot) = self.snapshot.get() {
            return *snapshot;
        }
        Snapshot {
            total: self.total,
            transferred: self.position(),
            speed: f64::from_bits(self.meter.live_speed.load(Ordering::SeqCst)),
        }
    }

    /// Stops the refresh task and returns the final statistics.
    ///
    /// Only the first call does any work; every caller, concurrent or later,
    /// receives the same snapshot. Updates made afterwards are not reported.
    ///
    /// The refresh task is signalled, not joined: it exits within one refresh
    /// interval, and a tick already in progress may still complete after this
    /// returns.
    pub fn finalize(&self) -> Snapshot {
        *self.snapshot.get_or_init(|| {
            self.stop.cancel();
            let transferred = self.meter.progress.load(Ordering::SeqCst);
            let snapshot = Snapshot {
                total: self.total,
                transferred,
                speed: self.meter.speed_at(transferred),
            };
            debug!(
                total = snapshot.total,
                transferred = snapshot.transferred,
                speed = snapshot.speed,
                "counter finalized"
            );
            snapshot
        })
    }

    pub fn is_finalized(&self) -> bool {
        self.snapshot.get().is_some()
    }

    /// Whether the refresh task is still running.
    ///
    /// May stay `true` for up to one refresh interval after [`finalize`](Self::finalize).
    pub fn is_refreshing(&self) -> bool {
        !self.refresh.is_finished()
    }

    /// Number of refresh iterations executed so far.
    pub fn refresh_ticks(&self) -> u64 {
        self.meter.ticks.load(Ordering::SeqCst)
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        if self.snapshot.get().is_none() {
            self.stop.cancel();
        }
    }
}

/// Consumes the buffer and records its length.
impl Write for &Counter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf.len() as u64);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for Counter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncWrite for Counter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.update(buf.len() as u64);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
