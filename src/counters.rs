//! Process-wide aggregate allocation counters.
//!
//! Unlike relaxed observational atomics, these counters live next to the
//! allocation table behind the same lock, so a copy taken under shared access
//! is consistent with a scan of the table made under that same access.
//!
//! At every quiescent point, with no unknown-pointer releases:
//! - `alloc_count - free_count` equals the number of live records
//! - `alloc_bytes - free_bytes` equals the sum of live record sizes
//!
//! Reallocations bump `alloc_count` without a matching free, so the count
//! relation only holds for allocate/release traffic.

/// Aggregate counters. Plain integers; callers hold the tracker lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OverallCounters {
    /// Successful allocate, zero-allocate and reallocate calls.
    pub alloc_count: u64,
    /// Bytes attributed by allocations, adjusted by reallocation deltas.
    pub alloc_bytes: u64,
    /// Releases of tracked blocks.
    pub free_count: u64,
    /// Bytes of tracked blocks at release.
    pub free_bytes: u64,
    /// Successful reallocations (also counted in `alloc_count`).
    pub realloc_count: u64,
    /// Releases of pointers with no record: never allocated here, or
    /// released twice. The raw release still happens.
    pub untracked_releases: u64,
    /// Blocks handed out without a record because the table could not grow.
    pub dropped_records: u64,
}

impl OverallCounters {
    pub const fn new() -> Self {
        Self {
            alloc_count: 0,
            alloc_bytes: 0,
            free_count: 0,
            free_bytes: 0,
            realloc_count: 0,
            untracked_releases: 0,
            dropped_records: 0,
        }
    }

    #[inline]
    pub fn on_allocate(&mut self, size: usize) {
        self.alloc_count += 1;
        self.alloc_bytes += size as u64;
    }

    /// A block attributed `prior` bytes now holds `new` bytes.
    #[inline]
    pub fn on_reallocate(&mut self, prior: usize, new: usize) {
        self.alloc_count += 1;
        self.realloc_count += 1;
        if new >= prior {
            self.alloc_bytes += (new - prior) as u64;
        } else {
            self.alloc_bytes = self.alloc_bytes.saturating_sub((prior - new) as u64);
        }
    }

    #[inline]
    pub fn on_release(&mut self, size: usize) {
        self.free_count += 1;
        self.free_bytes += size as u64;
    }

    /// Bytes currently attributed to live blocks.
    #[inline]
    pub fn live_bytes(&self) -> u64 {
        self.alloc_bytes.saturating_sub(self.free_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_then_release() {
        let mut c = OverallCounters::new();
        c.on_allocate(100);
        c.on_allocate(28);
        c.on_release(100);
        assert_eq!(c.alloc_count, 2);
        assert_eq!(c.free_count, 1);
        assert_eq!(c.live_bytes(), 28);
    }

    #[test]
    fn test_reallocate_grow_and_shrink() {
        let mut c = OverallCounters::new();
        c.on_allocate(64);
        c.on_reallocate(64, 256);
        assert_eq!(c.alloc_bytes, 256);
        c.on_reallocate(256, 32);
        assert_eq!(c.alloc_bytes, 32);
        assert_eq!(c.free_bytes, 0);
        assert_eq!(c.alloc_count, 3);
        assert_eq!(c.realloc_count, 2);
    }

    #[test]
    fn test_reallocate_unknown_counts_prior_as_zero() {
        let mut c = OverallCounters::new();
        c.on_reallocate(0, 40);
        assert_eq!(c.alloc_bytes, 40);
        assert_eq!(c.live_bytes(), 40);
    }
}
