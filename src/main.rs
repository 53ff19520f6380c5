use anyhow::Result;
use clap::Parser;
use std::time::Duration;

mod app;
mod args;

use app::{CopyApp, format_summary};
use args::{
    Args, DEFAULT_BUFFER_KB, DEFAULT_REFRESH_MS, MAX_BUFFER_KB, MAX_REFRESH_MS, MIN_BUFFER_KB,
    MIN_REFRESH_MS,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Logs go to stderr so stdout can carry copied data
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acctcopy=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let (refresh_interval, buffer_size) = validate(&args)?;

    let app = CopyApp::new(
        args.source,
        args.dest,
        refresh_interval,
        buffer_size,
        args.quiet,
    );

    match app.run().await {
        Ok(snapshot) => {
            if !app.quiet {
                eprintln!("{}", format_summary(&snapshot));
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            Err(e)
        }
    }
}

/// Apply defaults and range checks; returns the refresh interval and buffer size in bytes
fn validate(args: &Args) -> Result<(Duration, usize)> {
    let refresh_ms = args.refresh_ms.unwrap_or(DEFAULT_REFRESH_MS);
    let buffer_kb = args.buffer_kb.unwrap_or(DEFAULT_BUFFER_KB);

    if !(MIN_REFRESH_MS..=MAX_REFRESH_MS).contains(&refresh_ms) {
        return Err(anyhow::anyhow!(
            "Refresh interval must be between {} and {} ms",
            MIN_REFRESH_MS,
            MAX_REFRESH_MS
        ));
    }
    if !(MIN_BUFFER_KB..=MAX_BUFFER_KB).contains(&buffer_kb) {
        return Err(anyhow::anyhow!(
            "Buffer size must be between {} and {} KiB",
            MIN_BUFFER_KB,
            MAX_BUFFER_KB
        ));
    }

    Ok((Duration::from_millis(refresh_ms), buffer_kb * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["acctcopy", "in.bin", "out.bin"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    /// Defaults apply when no options are given.
    #[test]
    fn validate_applies_defaults() {
        let (interval, buffer) = validate(&parse(&[])).unwrap();
        assert_eq!(interval, Duration::from_millis(DEFAULT_REFRESH_MS));
        assert_eq!(buffer, DEFAULT_BUFFER_KB * 1024);
    }

    /// Out-of-range refresh intervals are rejected.
    #[test]
    fn validate_rejects_refresh_out_of_range() {
        assert!(validate(&parse(&["--refresh-ms", "5"])).is_err());
        assert!(validate(&parse(&["--refresh-ms", "10001"])).is_err());
        assert!(validate(&parse(&["--refresh-ms", "10"])).is_ok());
    }

    /// Out-of-range buffer sizes are rejected.
    #[test]
    fn validate_rejects_buffer_out_of_range() {
        assert!(validate(&parse(&["--buffer-kb", "1"])).is_err());
        assert!(validate(&parse(&["--buffer-kb", "65537"])).is_err());
        assert_eq!(
            validate(&parse(&["--buffer-kb", "4"])).unwrap().1,
            4 * 1024
        );
    }
}
