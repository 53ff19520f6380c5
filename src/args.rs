use clap::Parser;

pub const MIN_REFRESH_MS: u64 = 10;
pub const DEFAULT_REFRESH_MS: u64 = 200;
pub const MAX_REFRESH_MS: u64 = 10_000;
pub const MIN_BUFFER_KB: usize = 4;
pub const DEFAULT_BUFFER_KB: usize = 256;
pub const MAX_BUFFER_KB: usize = 64 * 1024;

/// Marks stdin as source or stdout as destination
pub const STDIO_PATH: &str = "-";

/// CLI arguments for the accounted copy tool
#[derive(Parser, Debug)]
#[command(name = "acctcopy")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Source file, or "-" for stdin
    pub source: String,

    /// Destination file, or "-" for stdout
    pub dest: String,

    /// Refresh interval of the throughput counter and progress bar in milliseconds (default: 200)
    #[arg(long)]
    pub refresh_ms: Option<u64>,

    /// Copy buffer size in KiB (default: 256, min: 4, max: 65536)
    #[arg(long)]
    pub buffer_kb: Option<usize>,

    /// Suppress the progress bar and the final summary
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}
