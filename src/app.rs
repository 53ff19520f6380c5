use crate::args::STDIO_PATH;
use acctcopy::{AccountedReader, Counter, Snapshot};
use anyhow::{Context, Result};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type Source = Box<dyn AsyncRead + Unpin + Send>;
type Sink = Box<dyn AsyncWrite + Unpin + Send>;

/// Main application structure
pub struct CopyApp {
    source: String,
    dest: String,
    refresh_interval: Duration,
    buffer_size: usize,
    pub quiet: bool,
}

impl CopyApp {
    pub fn new(
        source: String,
        dest: String,
        refresh_interval: Duration,
        buffer_size: usize,
        quiet: bool,
    ) -> Self {
        Self {
            source,
            dest,
            refresh_interval,
            buffer_size,
            quiet,
        }
    }

    /// Open the source along with its size hint (0 when unknown)
    async fn open_source(&self) -> Result<(Source, u64)> {
        if self.source == STDIO_PATH {
            return Ok((Box::new(io::stdin()), 0));
        }
        let file = File::open(&self.source)
            .await
            .with_context(|| format!("Failed to open source {}", self.source))?;
        let total = file
            .metadata()
            .await
            .with_context(|| format!("Failed to read metadata of {}", self.source))?
            .len();
        Ok((Box::new(file), total))
    }

    async fn open_dest(&self) -> Result<Sink> {
        if self.dest == STDIO_PATH {
            return Ok(Box::new(io::stdout()));
        }
        let file = File::create(&self.dest)
            .await
            .with_context(|| format!("Failed to create destination {}", self.dest))?;
        Ok(Box::new(file))
    }

    fn progress_bar(&self, total: u64) -> Result<ProgressBar> {
        if self.quiet {
            return Ok(ProgressBar::hidden());
        }
        // Without a known size only the running byte count is meaningful
        let pb = if total == 0 {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")?,
            );
            pb
        } else {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg} ETA: {eta}")?
                    .progress_chars("=>-"),
            );
            pb
        };
        Ok(pb)
    }

    /// Copy source to destination through an accounting counter.
    /// Returns the final snapshot of the transfer.
    pub async fn run(&self) -> Result<Snapshot> {
        let (source, total) = self.open_source().await?;
        let mut dest = self.open_dest().await?;
        info!(source = %self.source, dest = %self.dest, total, "starting copy");

        let shutdown = CancellationToken::new();
        let counter = Arc::new(
            Counter::builder(total)
                .refresh_interval(self.refresh_interval)
                .cancel_on(&shutdown)
                .start(),
        );
        let progress_bar = self.progress_bar(total)?;
        let render = spawn_render(
            progress_bar.clone(),
            Arc::clone(&counter),
            self.refresh_interval,
            shutdown.clone(),
        );

        let mut reader = BufReader::with_capacity(
            self.buffer_size,
            AccountedReader::new(source, Arc::clone(&counter)),
        );
        let copy = async {
            let copied = io::copy_buf(&mut reader, &mut dest)
                .await
                .context("Copy failed")?;
            dest.flush().await.context("Failed to flush destination")?;
            Ok::<_, anyhow::Error>(copied)
        };

        let outcome = tokio::select! {
            result = copy => result,
            _ = until_interrupted(tokio::signal::ctrl_c()) => {
                Err(anyhow::anyhow!("Transfer interrupted"))
            }
        };

        let snapshot = counter.finalize();
        shutdown.cancel();
        join_render(render).await;

        match outcome {
            Ok(copied) => {
                progress_bar.set_position(snapshot.transferred);
                progress_bar
                    .finish_with_message(format!("{}/s", HumanBytes(snapshot.speed as u64)));
                info!(copied, speed = snapshot.speed, "copy finished");
                Ok(snapshot)
            }
            Err(e) => {
                progress_bar.abandon_with_message("aborted");
                warn!(transferred = snapshot.transferred, error = %e, "copy aborted");
                Err(e)
            }
        }
    }
}

/// Resolve once `signal` reports an interrupt.
/// A handler that cannot be installed never resolves, so the copy keeps running.
async fn until_interrupted<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!(error = %e, "Failed to listen for Ctrl-C, transfer cannot be interrupted");
        future::pending::<()>().await;
    }
}

/// Wait for the renderer; its failure never masks the copy outcome
async fn join_render(render: JoinHandle<()>) {
    if let Err(e) = render.await {
        warn!(error = %e, "progress renderer failed");
    }
}

/// Redraw the bar from live counter reads until `stop` fires
fn spawn_render(
    progress_bar: ProgressBar,
    counter: Arc<Counter>,
    interval: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    task::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let live = counter.live();
                    progress_bar.set_position(live.transferred);
                    progress_bar.set_message(format!("{}/s", HumanBytes(live.speed as u64)));
                }
            }
        }
    })
}

/// One-line human readable summary of a finished transfer
pub fn format_summary(snapshot: &Snapshot) -> String {
    let total = match snapshot.percent() {
        Some(percent) => format!("of {} ({:.1}%)", HumanBytes(snapshot.total), percent),
        None => "(total unknown)".to_string(),
    };
    format!(
        "Transferred {} {} at {}/s",
        HumanBytes(snapshot.transferred),
        total,
        HumanBytes(snapshot.speed as u64)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("acctcopy-{}-{}", std::process::id(), name))
    }

    /// Copies a file end to end and reports the exact byte count.
    #[tokio::test]
    async fn copies_file_and_reports_snapshot() {
        let src = temp_path("copy-src.bin");
        let dst = temp_path("copy-dst.bin");
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&src, &data).unwrap();

        let app = CopyApp::new(
            src.display().to_string(),
            dst.display().to_string(),
            Duration::from_millis(10),
            4 * 1024,
            true,
        );
        let snapshot = app.run().await.unwrap();

        assert_eq!(snapshot.total, 300_000);
        assert_eq!(snapshot.transferred, 300_000);
        assert!(snapshot.speed > 0.0);
        assert_eq!(std::fs::read(&dst).unwrap(), data);

        std::fs::remove_file(&src).ok();
        std::fs::remove_file(&dst).ok();
    }

    /// An empty source finishes with zero transferred and zero speed.
    #[tokio::test]
    async fn empty_source_reports_zero_speed() {
        let src = temp_path("empty-src.bin");
        let dst = temp_path("empty-dst.bin");
        std::fs::write(&src, b"").unwrap();

        let app = CopyApp::new(
            src.display().to_string(),
            dst.display().to_string(),
            Duration::from_millis(10),
            4 * 1024,
            true,
        );
        let snapshot = app.run().await.unwrap();

        assert_eq!(snapshot.transferred, 0);
        assert_eq!(snapshot.speed, 0.0);

        std::fs::remove_file(&src).ok();
        std::fs::remove_file(&dst).ok();
    }

    /// A missing source is reported with its path.
    #[tokio::test]
    async fn missing_source_fails_with_context() {
        let src = temp_path("does-not-exist.bin");
        let app = CopyApp::new(
            src.display().to_string(),
            temp_path("unused-dst.bin").display().to_string(),
            Duration::from_millis(10),
            4 * 1024,
            true,
        );
        let err = app.run().await.unwrap_err();
        assert!(err.to_string().starts_with("Failed to open source"));
    }

    /// The stdio marker reads stdin with an unknown total.
    #[tokio::test]
    async fn stdin_source_has_unknown_total() {
        let app = CopyApp::new(
            STDIO_PATH.to_string(),
            STDIO_PATH.to_string(),
            Duration::from_millis(10),
            4 * 1024,
            true,
        );
        let (_, total) = app.open_source().await.unwrap();
        assert_eq!(total, 0);
        assert!(app.open_dest().await.is_ok());
    }

    /// A failing signal listener does not abort the copy; a delivered one does.
    #[tokio::test]
    async fn listener_failure_never_interrupts() {
        let failed = until_interrupted(async { Err(std::io::Error::other("no handler")) });
        assert!(
            tokio::time::timeout(Duration::from_millis(50), failed)
                .await
                .is_err()
        );

        let delivered = until_interrupted(async { Ok(()) });
        assert!(
            tokio::time::timeout(Duration::from_millis(50), delivered)
                .await
                .is_ok()
        );
    }

    /// A panicking renderer is logged instead of propagated.
    #[tokio::test]
    async fn render_failure_is_not_propagated() {
        let render = task::spawn(async { panic!("renderer crashed") });
        join_render(render).await;
    }

    /// Summary mentions the total only when it is known.
    #[test]
    fn summary_formats_known_and_unknown_totals() {
        let known = Snapshot {
            total: 800,
            transferred: 400,
            speed: 100.0,
        };
        assert_eq!(
            format_summary(&known),
            "Transferred 400 B of 800 B (50.0%) at 100 B/s"
        );

        let unknown = Snapshot {
            total: 0,
            transferred: 512,
            speed: 0.0,
        };
        assert_eq!(
            format_summary(&unknown),
            "Transferred 512 B (total unknown) at 0 B/s"
        );
    }
}
