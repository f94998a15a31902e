//! The tracking context: raw allocator, clock, and the guarded table.
//!
//! A [`Tracker`] is constructed once (usually in a `static`) and shared by
//! reference with every call site. Its four shim operations wrap the raw
//! primitives and keep the table and counters in step:
//!
//! | operation       | lock      | raw call           | bookkeeping                       |
//! |-----------------|-----------|--------------------|-----------------------------------|
//! | `allocate`      | exclusive | `allocate` (before)| insert record, `alloc_*` += size  |
//! | `zero_allocate` | exclusive | via `allocate`     | as `allocate`, then zero-fill     |
//! | `reallocate`    | exclusive | `reallocate`       | move record, `alloc_bytes` += Δ   |
//! | `reallocate_aligned` | exclusive | `allocate`, copy, `release` | as `reallocate`  |
//! | `release`       | exclusive | `release` (after)  | remove record, `free_*` += size   |
//!
//! Readers ([`Tracker::report`], [`Tracker::counters`],
//! [`Tracker::for_each_record`]) take shared access and see the table and
//! counters as of one linearization point.
//!
//! Raw release and reallocation run while the exclusive lock is held so that
//! an address handed back to the raw allocator cannot be reissued and
//! re-attributed before its old record is gone.

use crate::config::Config;
use crate::counters::OverallCounters;
use crate::error::{AllocError, Result};
use crate::histogram::Report;
use crate::raw::{LibcMalloc, RawAllocator};
use crate::record::{AllocKind, AttributionRecord, SourceLocation};
use crate::sync::RwSpinLock;
use crate::table::AllocationTable;
use crate::time::{Clock, SystemClock, Timestamp};
use core::ptr::{self, NonNull};
use std::sync::OnceLock;

struct State {
    table: AllocationTable,
    counters: OverallCounters,
    last_untracked: Option<SourceLocation>,
}

impl State {
    const fn new(table: AllocationTable) -> Self {
        Self {
            table,
            counters: OverallCounters::new(),
            last_untracked: None,
        }
    }

    /// Store the record for a block fresh from the raw allocator.
    /// Returns false if the table could not hold it.
    fn attribute(&mut self, key: usize, record: AttributionRecord) -> bool {
        match self.table.insert(key, record) {
            Ok(stale) => {
                // The raw allocator reissued an address we still had on file,
                // so that block was released behind our back.
                if let Some(stale) = stale {
                    self.counters.on_release(stale.size);
                }
                true
            }
            Err(_) => {
                self.counters.dropped_records += 1;
                false
            }
        }
    }

    /// Move the record at `old_key` to the block a reallocation produced.
    /// The creation time carries over; an unknown `old_key` counts as a
    /// zero-byte block created `now`.
    fn rebind(
        &mut self,
        old_key: usize,
        new_key: usize,
        new_size: usize,
        now: Timestamp,
        site: SourceLocation,
        kind: AllocKind,
    ) {
        let prior = self.table.remove(old_key);
        let prior_size = prior.map_or(0, |r| r.size);
        let created_at = prior.map_or(now, |r| r.created_at);
        let record = AttributionRecord::new(new_size, created_at, site, kind);
        if self.attribute(new_key, record) {
            self.counters.on_reallocate(prior_size, new_size);
        } else if prior.is_some() {
            self.counters.on_release(prior_size);
        }
    }
}

/// Process-wide allocation tracking context.
pub struct Tracker<R = LibcMalloc, C = SystemClock> {
    state: RwSpinLock<State>,
    epoch: OnceLock<Timestamp>,
    raw: R,
    clock: C,
}

impl Tracker<LibcMalloc, SystemClock> {
    /// Tracker over the C library allocator and the wall clock.
    pub const fn libc() -> Self {
        Self::new(LibcMalloc, SystemClock)
    }
}

impl<R: RawAllocator, C: Clock> Tracker<R, C> {
    /// Create a tracker with no reserved table memory. Usable in a `static`;
    /// the epoch is fixed on first use.
    pub const fn new(raw: R, clock: C) -> Self {
        Self {
            state: RwSpinLock::new(State::new(AllocationTable::new())),
            epoch: OnceLock::new(),
            raw,
            clock,
        }
    }

    /// Create a tracker with room for `capacity` live records up front.
    pub fn with_capacity(raw: R, clock: C, capacity: usize) -> Result<Self> {
        let table = AllocationTable::with_capacity(capacity)?;
        let tracker = Self {
            state: RwSpinLock::new(State::new(table)),
            epoch: OnceLock::new(),
            raw,
            clock,
        };
        tracker.epoch();
        Ok(tracker)
    }

    /// Create a tracker sized by `config.table.initial_capacity`.
    pub fn from_config(raw: R, clock: C, config: &Config) -> Result<Self> {
        Self::with_capacity(raw, clock, config.table.initial_capacity)
    }

    /// When tracking began.
    pub fn epoch(&self) -> Timestamp {
        *self.epoch.get_or_init(|| self.clock.now())
    }

    #[inline]
    fn now(&self) -> Timestamp {
        let now = self.clock.now();
        self.epoch.get_or_init(|| now);
        now
    }

    /// The raw allocator behind this tracker.
    pub fn raw(&self) -> &R {
        &self.raw
    }

    /// Grow the table to hold at least `capacity` slots. Never shrinks.
    pub fn reserve(&self, capacity: usize) -> Result<()> {
        self.state.write().table.reserve(capacity)?;
        Ok(())
    }

    /// Slots currently reserved in the table.
    pub fn capacity(&self) -> usize {
        self.state.read().table.capacity()
    }

    /// Allocate `size` bytes and attribute them to `site`.
    ///
    /// On raw failure nothing is recorded.
    #[inline]
    pub fn allocate(
        &self,
        size: usize,
        site: SourceLocation,
        kind: AllocKind,
    ) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(size, 1, site, kind)
    }

    /// As [`allocate`](Self::allocate), with an explicit power-of-two alignment.
    pub fn allocate_aligned(
        &self,
        size: usize,
        align: usize,
        site: SourceLocation,
        kind: AllocKind,
    ) -> Result<NonNull<u8>, AllocError> {
        let ptr = NonNull::new(self.raw.allocate(size, align)).ok_or(AllocError { size })?;
        let record = AttributionRecord::new(size, self.now(), site, kind);

        let mut state = self.state.write();
        if state.attribute(ptr.as_ptr() as usize, record) {
            state.counters.on_allocate(size);
        }
        Ok(ptr)
    }

    /// Allocate `count * size` zeroed bytes.
    ///
    /// A product that overflows `usize` fails without touching the raw
    /// allocator.
    pub fn zero_allocate(
        &self,
        count: usize,
        size: usize,
        site: SourceLocation,
        kind: AllocKind,
    ) -> Result<NonNull<u8>, AllocError> {
        let total = count.checked_mul(size).ok_or(AllocError {
            size: count.saturating_mul(size),
        })?;
        let ptr = self.allocate(total, site, kind)?;
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Ok(ptr)
    }

    /// Resize `existing` to `new_size` bytes, preserving contents.
    ///
    /// An unknown `existing` is tolerated and treated as a zero-byte block.
    /// A null `existing` behaves like [`allocate`](Self::allocate). On raw
    /// failure the old block and its record are left as they were.
    /// The record keeps its creation time; site and kind are updated.
    ///
    /// # Safety
    /// `existing` must be null or a live block from this tracker's raw
    /// allocator.
    pub unsafe fn reallocate(
        &self,
        existing: *mut u8,
        new_size: usize,
        site: SourceLocation,
        kind: AllocKind,
    ) -> Result<NonNull<u8>, AllocError> {
        if existing.is_null() {
            return self.allocate(new_size, site, kind);
        }
        let now = self.now();

        let mut state = self.state.write();
        let fresh = unsafe { self.raw.reallocate(existing, new_size) };
        let fresh = NonNull::new(fresh).ok_or(AllocError { size: new_size })?;
        state.rebind(existing as usize, fresh.as_ptr() as usize, new_size, now, site, kind);
        Ok(fresh)
    }

    /// As [`reallocate`](Self::reallocate), for blocks whose alignment the
    /// raw `reallocate` would not keep: a fresh `align`-aligned block is
    /// allocated, `old_size.min(new_size)` bytes are copied and `existing`
    /// is released, all in one exclusive section.
    ///
    /// # Safety
    /// `existing` must be null or a live block of at least `old_size` bytes
    /// from this tracker's raw allocator.
    pub unsafe fn reallocate_aligned(
        &self,
        existing: *mut u8,
        old_size: usize,
        new_size: usize,
        align: usize,
        site: SourceLocation,
        kind: AllocKind,
    ) -> Result<NonNull<u8>, AllocError> {
        if existing.is_null() {
            return self.allocate_aligned(new_size, align, site, kind);
        }
        let now = self.now();

        let mut state = self.state.write();
        let fresh = NonNull::new(self.raw.allocate(new_size, align)).ok_or(AllocError { size: new_size })?;
        unsafe {
            ptr::copy_nonoverlapping(existing, fresh.as_ptr(), old_size.min(new_size));
            self.raw.release(existing);
        }
        state.rebind(existing as usize, fresh.as_ptr() as usize, new_size, now, site, kind);
        Ok(fresh)
    }

    /// Release `ptr` back to the raw allocator.
    ///
    /// A pointer with no record is still passed to the raw allocator; it
    /// bumps `untracked_releases` instead of the free counters. Releasing
    /// null does nothing.
    ///
    /// # Safety
    /// `ptr` must be null or a live block from this tracker's raw allocator.
    /// Double release is not detected here and is undefined behavior in the
    /// raw allocator.
    pub unsafe fn release(&self, ptr: *mut u8, site: SourceLocation, _kind: AllocKind) {
        if ptr.is_null() {
            return;
        }
        let mut state = self.state.write();
        match state.table.remove(ptr as usize) {
            Some(record) => state.counters.on_release(record.size),
            None => {
                state.counters.untracked_releases += 1;
                state.last_untracked = Some(site);
            }
        }
        unsafe { self.raw.release(ptr) };
    }

    /// Copy of the counters under shared access.
    pub fn counters(&self) -> OverallCounters {
        self.state.read().counters
    }

    /// Number of live records.
    pub fn live_records(&self) -> usize {
        self.state.read().table.len()
    }

    /// The record for `ptr`, if it is live.
    pub fn record(&self, ptr: *const u8) -> Option<AttributionRecord> {
        self.state.read().table.get(ptr as usize).copied()
    }

    /// Site of the most recent release that had no record.
    pub fn last_untracked_release(&self) -> Option<SourceLocation> {
        self.state.read().last_untracked
    }

    /// Visit every live record under shared access.
    ///
    /// `f` must not allocate or release through this tracker: the shared
    /// lock is held and the exclusive request would spin forever.
    pub fn for_each_record(&self, mut f: impl FnMut(usize, &AttributionRecord)) {
        let state = self.state.read();
        for (addr, record) in state.table.iter() {
            f(addr, record);
        }
    }

    /// Build a report from one shared-access pass: a copy of the counters
    /// plus size and age histograms of the live table. Does not allocate.
    pub fn report(&self) -> Report {
        let epoch = self.epoch();
        let state = self.state.read();
        let mut report = Report::new(self.clock.now(), epoch, state.counters);
        report.last_untracked = state.last_untracked;
        for (_, record) in state.table.iter() {
            report.add(record);
        }
        report
    }

    /// Check the quiescent invariant: `alloc_bytes - free_bytes` equals the
    /// sum of live record sizes. Only meaningful while no mutation is in
    /// flight on other threads.
    pub fn is_consistent(&self) -> bool {
        let state = self.state.read();
        let table_bytes: u64 = state.table.iter().map(|(_, r)| r.size as u64).sum();
        state.counters.alloc_bytes.checked_sub(state.counters.free_bytes) == Some(table_bytes)
    }
}
