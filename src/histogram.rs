//! Size and age distributions of live blocks, and the text report.
//!
//! Both histograms are fixed arrays filled from one shared-access scan of the
//! table (see [`Tracker::report`](crate::Tracker::report)). Rendering writes
//! straight to an [`io::Write`] without building intermediate strings.
//!
//! Size buckets (upper bound inclusive, first bucket starts at 0):
//!
//! ```text
//! 0 - 4 | 4 - 8 | 8 - 16 | ... | 2048 - 4096 | 4096 +
//! ```
//!
//! A size of exactly 4096 lands in the overflow bucket.
//!
//! Age buckets, in whole seconds since a block was first attributed:
//!
//! ```text
//! < 1 | < 10 | < 100 | < 1000 | > 1000
//! ```

use crate::counters::OverallCounters;
use crate::record::{AttributionRecord, SourceLocation};
use crate::time::{LocalTime, Timestamp};
use std::fmt;
use std::io;

/// Smallest bucket boundary in bytes.
pub const FIRST_SIZE_BOUND: usize = 4;
/// Sizes at or above this land in the overflow bucket.
pub const MAX_SIZE_BOUND: usize = 4096;
/// `0-4`, ten doubling buckets up to 4096, and the overflow bucket.
pub const NUM_SIZE_BUCKETS: usize = 12;
/// `<1s`, `<10s`, `<100s`, `<1000s`, and the overflow bucket.
pub const NUM_AGE_BUCKETS: usize = 5;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Bucket index for a block of `size` bytes: the smallest power-of-two bound
/// `>= size`, clamped into the first and last buckets.
#[inline]
pub fn size_bucket(size: usize) -> usize {
    if size <= FIRST_SIZE_BOUND {
        return 0;
    }
    if size >= MAX_SIZE_BOUND {
        return NUM_SIZE_BUCKETS - 1;
    }
    // ceil(log2(size)) - log2(FIRST_SIZE_BOUND)
    (usize::BITS - (size - 1).leading_zeros()) as usize - 2
}

/// Bucket index for a block that has been alive `secs` whole seconds.
#[inline]
pub fn age_bucket(secs: u64) -> usize {
    match secs {
        0 => 0,
        1..=9 => 1,
        10..=99 => 2,
        100..=999 => 3,
        _ => NUM_AGE_BUCKETS - 1,
    }
}

/// Live-block counts per size bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeHistogram {
    pub counts: [u64; NUM_SIZE_BUCKETS],
}

impl SizeHistogram {
    #[inline]
    pub fn record(&mut self, size: usize) {
        self.counts[size_bucket(size)] += 1;
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// `(lower, upper)` bounds of bucket `idx`; `upper` is `None` for overflow.
    pub fn bounds(idx: usize) -> (usize, Option<usize>) {
        match idx {
            0 => (0, Some(FIRST_SIZE_BOUND)),
            i if i == NUM_SIZE_BUCKETS - 1 => (MAX_SIZE_BOUND, None),
            i => (FIRST_SIZE_BOUND << (i - 1), Some(FIRST_SIZE_BOUND << i)),
        }
    }

    fn render(&self, w: &mut dyn io::Write) -> io::Result<()> {
        for (idx, count) in self.counts.iter().enumerate() {
            match Self::bounds(idx) {
                (lo, Some(hi)) => writeln!(w, "{lo} - {hi} bytes: {count}")?,
                (lo, None) => writeln!(w, "{lo} + bytes: {count}")?,
            }
        }
        Ok(())
    }
}

/// Live-block counts per age bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AgeHistogram {
    pub counts: [u64; NUM_AGE_BUCKETS],
}

impl AgeHistogram {
    #[inline]
    pub fn record(&mut self, age_secs: u64) {
        self.counts[age_bucket(age_secs)] += 1;
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    fn render(&self, w: &mut dyn io::Write) -> io::Result<()> {
        let mut bound = 1u64;
        for count in &self.counts[..NUM_AGE_BUCKETS - 1] {
            writeln!(w, "< {bound} sec: {count}")?;
            bound *= 10;
        }
        writeln!(w, "> {bound} sec: {}", self.counts[NUM_AGE_BUCKETS - 1])
    }
}

/// One consistent view of the counters and the live table.
#[derive(Clone, Copy, Debug)]
pub struct Report {
    /// When the scan ran; ages are measured against this.
    pub taken_at: Timestamp,
    /// When tracking began.
    pub epoch: Timestamp,
    pub counters: OverallCounters,
    pub live_records: u64,
    /// Sum of live record sizes.
    pub live_bytes: u64,
    pub by_size: SizeHistogram,
    pub by_age: AgeHistogram,
    /// Site of the latest release that had no record.
    pub last_untracked: Option<SourceLocation>,
}

impl Report {
    /// Start an empty report; feed it with [`Report::add`].
    pub fn new(taken_at: Timestamp, epoch: Timestamp, counters: OverallCounters) -> Self {
        Self {
            taken_at,
            epoch,
            counters,
            live_records: 0,
            live_bytes: 0,
            by_size: SizeHistogram::default(),
            by_age: AgeHistogram::default(),
            last_untracked: None,
        }
    }

    #[inline]
    pub fn add(&mut self, record: &AttributionRecord) {
        self.live_records += 1;
        self.live_bytes += record.size as u64;
        self.by_size.record(record.size);
        self.by_age.record(self.taken_at.secs_since(record.created_at));
    }

    /// Write the full text report.
    pub fn render(&self, w: &mut dyn io::Write) -> io::Result<()> {
        let c = &self.counters;
        writeln!(w, ">>>>>>>>>>>>> {} <<<<<<<<<<<", LocalTime::of(self.taken_at))?;
        writeln!(w, "Overall stats:")?;
        writeln!(
            w,
            "{} overall allocations({} MB) since start",
            c.alloc_count,
            c.alloc_bytes / BYTES_PER_MB
        )?;
        writeln!(w, "{} MB current total allocated size", self.live_bytes / BYTES_PER_MB)?;
        writeln!(
            w,
            "{} overall frees({} MB) since start",
            c.free_count,
            c.free_bytes / BYTES_PER_MB
        )?;
        match self.last_untracked {
            Some(site) => writeln!(
                w,
                "{} untracked releases (last at {site})",
                c.untracked_releases
            )?,
            None => writeln!(w, "{} untracked releases", c.untracked_releases)?,
        }
        if c.dropped_records > 0 {
            writeln!(w, "{} allocations not recorded", c.dropped_records)?;
        }

        writeln!(w, "\nCurrent allocations by size:")?;
        self.by_size.render(w)?;

        writeln!(w, "\nCurrent allocations by age:")?;
        self.by_age.render(w)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = Vec::new();
        self.render(&mut buf).map_err(|_| fmt::Error)?;
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AllocKind;

    fn rec(size: usize, created_secs: u64) -> AttributionRecord {
        AttributionRecord::new(
            size,
            Timestamp::from_secs(created_secs),
            SourceLocation::UNKNOWN,
            AllocKind::Allocate,
        )
    }

    #[test]
    fn test_size_bucket_boundaries() {
        assert_eq!(size_bucket(0), 0);
        assert_eq!(size_bucket(4), 0);
        assert_eq!(size_bucket(5), 1);
        assert_eq!(size_bucket(8), 1);
        assert_eq!(size_bucket(9), 2);
        assert_eq!(size_bucket(16), 2);
        assert_eq!(size_bucket(100), 5);
        assert_eq!(size_bucket(128), 5);
        assert_eq!(size_bucket(129), 6);
        assert_eq!(size_bucket(2049), 10);
        assert_eq!(size_bucket(4095), 10);
        assert_eq!(size_bucket(4096), 11);
        assert_eq!(size_bucket(usize::MAX), 11);
    }

    #[test]
    fn test_size_bucket_matches_bounds() {
        for size in 1..5000usize {
            let (lo, hi) = SizeHistogram::bounds(size_bucket(size));
            match hi {
                Some(hi) => assert!(lo < size && size <= hi, "{size}"),
                None => assert!(size >= lo, "{size}"),
            }
        }
    }

    #[test]
    fn test_age_bucket_boundaries() {
        assert_eq!(age_bucket(0), 0);
        assert_eq!(age_bucket(1), 1);
        assert_eq!(age_bucket(9), 1);
        assert_eq!(age_bucket(10), 2);
        assert_eq!(age_bucket(999), 3);
        assert_eq!(age_bucket(1000), 4);
        assert_eq!(age_bucket(u64::MAX), 4);
    }

    #[test]
    fn test_report_buckets_sum_to_records() {
        let mut report = Report::new(
            Timestamp::from_secs(5_000),
            Timestamp::from_secs(0),
            OverallCounters::default(),
        );
        for (size, created) in [(3, 5_000), (10, 4_995), (100, 4_950), (5000, 4_500), (1, 1)] {
            report.add(&rec(size, created));
        }
        assert_eq!(report.live_records, 5);
        assert_eq!(report.by_size.total(), 5);
        assert_eq!(report.by_age.total(), 5);
        assert_eq!(report.live_bytes, 5114);
        assert_eq!(report.by_age.counts, [1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_render_empty_report() {
        let report = Report::new(
            Timestamp::from_secs(1_700_000_000),
            Timestamp::from_secs(1_700_000_000),
            OverallCounters::default(),
        );
        let text = report.to_string();
        assert!(text.starts_with(">>>>>>>>>>>>> "));
        assert!(text.contains("0 overall allocations(0 MB) since start\n"));
        assert!(text.contains("0 MB current total allocated size\n"));
        assert!(text.contains("0 - 4 bytes: 0\n"));
        assert!(text.contains("2048 - 4096 bytes: 0\n"));
        assert!(text.contains("4096 + bytes: 0\n"));
        assert!(text.contains("< 1 sec: 0\n"));
        assert!(text.contains("< 1000 sec: 0\n"));
        assert!(text.ends_with("> 1000 sec: 0\n"));
    }

    #[test]
    fn test_render_line_order() {
        let mut report = Report::new(
            Timestamp::from_secs(100),
            Timestamp::from_secs(0),
            OverallCounters {
                alloc_count: 3,
                alloc_bytes: 3 * BYTES_PER_MB,
                ..OverallCounters::default()
            },
        );
        report.add(&rec(2 * BYTES_PER_MB as usize, 100));
        let text = report.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "Overall stats:");
        assert_eq!(lines[2], "3 overall allocations(3 MB) since start");
        assert_eq!(lines[3], "2 MB current total allocated size");
        let size_header = lines.iter().position(|l| *l == "Current allocations by size:").unwrap();
        assert_eq!(lines[size_header + 1], "0 - 4 bytes: 0");
        assert_eq!(lines[size_header + 2], "4 - 8 bytes: 0");
        assert_eq!(lines[size_header + 12], "4096 + bytes: 1");
        let age_header = lines.iter().position(|l| *l == "Current allocations by age:").unwrap();
        assert_eq!(lines[age_header + 1], "< 1 sec: 1");
        assert_eq!(lines.len(), age_header + 6);
    }
}
