//! memstat: allocation attribution and statistics for a whole process.
//!
//! Every allocation that passes through a [`Tracker`] is recorded with its
//! size, call site, kind and creation time. The tracker keeps aggregate
//! counters next to the live table and produces reports with size and age
//! histograms on demand:
//! - [`Tracker`] wraps a raw allocator (`malloc` by default) with the four
//!   shim operations: allocate, zero-allocate, reallocate, release
//! - [`TrackingAllocator`] plugs a tracker in as the Rust global allocator
//! - [`Reporter`] emits reports from a dedicated thread, on request or on a
//!   signal
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: memstat::TrackingAllocator = memstat::TrackingAllocator::libc();
//!
//! fn main() -> memstat::Result<()> {
//!     let config = memstat::Config::load()?;
//!     let _reporter = memstat::Reporter::install_signal(&GLOBAL, config.report.signal, std::io::stderr())?;
//!     // ... `kill -QUIT <pid>` prints a report to stderr
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod counters;
pub mod error;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod global;
pub mod histogram;
pub mod logger;
mod macros;
pub mod platform;
pub mod raw;
pub mod record;
pub mod reporter;
pub mod sync;
pub mod table;
pub mod time;
pub mod tracker;

/// Granularity of the table's backing memory (4 KiB).
pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

pub use config::Config;
pub use counters::OverallCounters;
pub use error::{AllocError, Error, Result};
pub use global::TrackingAllocator;
pub use histogram::Report;
pub use logger::StderrLogger;
pub use raw::{LibcMalloc, RawAllocator};
pub use record::{AllocKind, AttributionRecord, SourceLocation};
pub use reporter::{ReportSignal, ReportSource, Reporter, ReporterHandle};
pub use time::{Clock, SystemClock, Timestamp};
pub use tracker::Tracker;
