//! Transfer accounting: a concurrently updated progress counter with a
//! background refresh task and a one-shot final snapshot.

pub mod counter;
pub mod reader;
pub mod snapshot;

pub use counter::{Counter, CounterBuilder, DEFAULT_REFRESH_INTERVAL};
pub use reader::AccountedReader;
pub use snapshot::Snapshot;
