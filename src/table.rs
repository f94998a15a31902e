//! Open-addressing hash table from block address to [`AttributionRecord`].
//!
//! Slots live in page-granular memory from [`platform::page_alloc`], never on
//! the heap, so inserting a record cannot re-enter a tracked allocator.
//! Linear probing with backward-shift deletion (no tombstones). Address 0 is
//! the empty marker; the null pointer is never tracked.
//!
//! The table is not synchronized; the tracker keeps it behind an
//! [`RwSpinLock`](crate::sync::RwSpinLock).

use crate::error::Error;
use crate::platform;
use crate::record::AttributionRecord;
use core::mem::{MaybeUninit, size_of};
use core::ptr;

/// Capacity used on first insert when none was reserved.
pub const DEFAULT_CAPACITY: usize = 4096;

const EMPTY: usize = 0;

#[repr(C)]
struct Slot {
    key: usize,
    // Initialized iff key != EMPTY. Zeroed pages are valid for MaybeUninit.
    record: MaybeUninit<AttributionRecord>,
}

/// Insertion failed because the table could not grow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TableFull {
    pub capacity: usize,
}

impl From<TableFull> for Error {
    fn from(e: TableFull) -> Self {
        Error::TableFull {
            capacity: e.capacity,
        }
    }
}

pub struct AllocationTable {
    slots: *mut Slot,
    capacity: usize,
    len: usize,
}

// The table owns its slot pages; sharing is mediated by the tracker's lock.
unsafe impl Send for AllocationTable {}
unsafe impl Sync for AllocationTable {}

impl Default for AllocationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocationTable {
    /// Create an empty table. No memory is reserved until the first insert.
    pub const fn new() -> Self {
        Self {
            slots: ptr::null_mut(),
            capacity: 0,
            len: 0,
        }
    }

    /// Create a table with room for at least `capacity` slots.
    /// `capacity` is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Result<Self, TableFull> {
        let mut table = Self::new();
        table.resize(capacity.max(1).next_power_of_two())?;
        Ok(table)
    }

    /// Grow to at least `capacity` slots (rounded up to a power of two).
    /// A smaller request leaves the table as it is.
    pub fn reserve(&mut self, capacity: usize) -> Result<(), TableFull> {
        let target = capacity.max(1).next_power_of_two();
        if target <= self.capacity {
            return Ok(());
        }
        self.resize(target)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn mask(&self) -> usize {
        self.capacity - 1
    }

    #[inline]
    fn home(&self, key: usize) -> usize {
        // Fibonacci hashing; the low bits of an address carry alignment only.
        let h = ((key >> 4) as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (h >> 32) as usize & self.mask()
    }

    #[inline]
    fn slot(&self, idx: usize) -> *mut Slot {
        debug_assert!(idx < self.capacity);
        unsafe { self.slots.add(idx) }
    }

    fn find(&self, key: usize) -> Option<usize> {
        if key == EMPTY || self.capacity == 0 {
            return None;
        }
        let mut idx = self.home(key);
        loop {
            let k = unsafe { (*self.slot(idx)).key };
            if k == key {
                return Some(idx);
            }
            if k == EMPTY {
                return None;
            }
            idx = (idx + 1) & self.mask();
        }
    }

    pub fn get(&self, key: usize) -> Option<&AttributionRecord> {
        self.find(key)
            .map(|idx| unsafe { (*self.slot(idx)).record.assume_init_ref() })
    }

    pub fn contains(&self, key: usize) -> bool {
        self.find(key).is_some()
    }

    /// Insert or replace the record for `key`, returning the previous record.
    ///
    /// # Panics
    /// Debug builds assert that `key` is non-null.
    pub fn insert(
        &mut self,
        key: usize,
        record: AttributionRecord,
    ) -> Result<Option<AttributionRecord>, TableFull> {
        debug_assert_ne!(key, EMPTY, "null address cannot be tracked");
        if let Some(idx) = self.find(key) {
            let slot = self.slot(idx);
            let old = unsafe { (*slot).record.assume_init() };
            unsafe { (*slot).record = MaybeUninit::new(record) };
            return Ok(Some(old));
        }

        // Grow at 3/4 load.
        if (self.len + 1) * 4 > self.capacity * 3 {
            let target = if self.capacity == 0 {
                DEFAULT_CAPACITY
            } else {
                self.capacity * 2
            };
            self.resize(target)?;
        }

        unsafe { self.place(key, record) };
        self.len += 1;
        Ok(None)
    }

    /// Remove the record for `key`, if present.
    pub fn remove(&mut self, key: usize) -> Option<AttributionRecord> {
        let mut hole = self.find(key)?;
        let removed = unsafe { (*self.slot(hole)).record.assume_init() };

        // Backward-shift: pull later members of the probe run into the hole.
        let mut idx = hole;
        loop {
            idx = (idx + 1) & self.mask();
            let k = unsafe { (*self.slot(idx)).key };
            if k == EMPTY {
                break;
            }
            let home = self.home(k);
            // Move k if its home is not cyclically in (hole, idx].
            let stays = if hole <= idx {
                hole < home && home <= idx
            } else {
                hole < home || home <= idx
            };
            if !stays {
                unsafe { ptr::copy_nonoverlapping(self.slot(idx), self.slot(hole), 1) };
                hole = idx;
            }
        }
        unsafe {
            (*self.slot(hole)).key = EMPTY;
        }
        self.len -= 1;
        Some(removed)
    }

    /// Iterate over `(address, record)` pairs in unspecified order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            table: self,
            idx: 0,
        }
    }

    /// Place a key known to be absent. Capacity must already allow it.
    unsafe fn place(&mut self, key: usize, record: AttributionRecord) {
        let mut idx = self.home(key);
        loop {
            let slot = self.slot(idx);
            if unsafe { (*slot).key } == EMPTY {
                unsafe {
                    (*slot).key = key;
                    (*slot).record = MaybeUninit::new(record);
                }
                return;
            }
            idx = (idx + 1) & self.mask();
        }
    }

    fn bytes_for(capacity: usize) -> usize {
        platform::round_to_pages(capacity * size_of::<Slot>())
    }

    fn resize(&mut self, new_capacity: usize) -> Result<(), TableFull> {
        debug_assert!(new_capacity.is_power_of_two());
        let bytes = Self::bytes_for(new_capacity);
        let fresh = unsafe { platform::page_alloc(bytes) }.cast::<Slot>();
        if fresh.is_null() {
            return Err(TableFull {
                capacity: self.capacity,
            });
        }

        let old_slots = self.slots;
        let old_capacity = self.capacity;
        self.slots = fresh;
        self.capacity = new_capacity;

        for i in 0..old_capacity {
            let slot = unsafe { &*old_slots.add(i) };
            if slot.key != EMPTY {
                unsafe { self.place(slot.key, slot.record.assume_init()) };
            }
        }

        if !old_slots.is_null() {
            unsafe { platform::page_dealloc(old_slots.cast::<u8>(), Self::bytes_for(old_capacity)) };
        }
        Ok(())
    }
}

impl Drop for AllocationTable {
    fn drop(&mut self) {
        if !self.slots.is_null() {
            unsafe { platform::page_dealloc(self.slots.cast::<u8>(), Self::bytes_for(self.capacity)) };
        }
    }
}

pub struct Iter<'a> {
    table: &'a AllocationTable,
    idx: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (usize, &'a AttributionRecord);

    fn next(&mut self) -> Option<Self::Item> {
        while self.idx < self.table.capacity {
            let slot = unsafe { &*self.table.slot(self.idx) };
            self.idx += 1;
            if slot.key != EMPTY {
                return Some((slot.key, unsafe { slot.record.assume_init_ref() }));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AllocKind, SourceLocation};
    use crate::time::Timestamp;
    use std::collections::HashMap;

    fn rec(size: usize) -> AttributionRecord {
        AttributionRecord::new(
            size,
            Timestamp::from_secs(1),
            SourceLocation::new("table.rs", 1),
            AllocKind::Allocate,
        )
    }

    #[test]
    fn test_empty_table_reserves_nothing() {
        let table = AllocationTable::new();
        assert_eq!(table.capacity(), 0);
        assert!(table.get(0x1000).is_none());
        assert_eq!(table.iter().count(), 0);
    }

    #[test]
    fn test_reserve_grows_but_never_shrinks() {
        let mut table = AllocationTable::new();
        table.reserve(5000).unwrap();
        assert_eq!(table.capacity(), 8192);
        table.insert(0x1000, rec(8)).unwrap();
        table.reserve(16).unwrap();
        assert_eq!(table.capacity(), 8192);
        table.reserve(10_000).unwrap();
        assert_eq!(table.capacity(), 16384);
        assert_eq!(table.get(0x1000).map(|r| r.size), Some(8));
    }

    #[test]
    fn test_insert_fails_when_pages_are_unavailable() {
        let mut table = AllocationTable::new();
        platform::set_page_alloc_failure(true);
        let result = table.insert(0x1000, rec(8));
        platform::set_page_alloc_failure(false);
        assert_eq!(result, Err(TableFull { capacity: 0 }));
        assert!(table.is_empty());
        assert!(table.get(0x1000).is_none());
    }

    #[test]
    fn test_insert_get_remove() {
        let mut table = AllocationTable::new();
        assert_eq!(table.insert(0x1000, rec(8)), Ok(None));
        assert_eq!(table.insert(0x2000, rec(16)), Ok(None));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0x1000).map(|r| r.size), Some(8));

        let old = table.insert(0x1000, rec(32)).unwrap();
        assert_eq!(old.map(|r| r.size), Some(8));
        assert_eq!(table.len(), 2);

        assert_eq!(table.remove(0x1000).map(|r| r.size), Some(32));
        assert!(table.remove(0x1000).is_none());
        assert!(!table.contains(0x1000));
        assert!(table.contains(0x2000));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_with_capacity_rounds_up() {
        let table = AllocationTable::with_capacity(1000).unwrap();
        assert_eq!(table.capacity(), 1024);
    }

    #[test]
    fn test_grows_and_keeps_entries() {
        let mut table = AllocationTable::with_capacity(16).unwrap();
        for i in 1..=10_000usize {
            table.insert(i * 16, rec(i)).unwrap();
        }
        assert_eq!(table.len(), 10_000);
        assert!(table.capacity() >= 10_000 * 4 / 3);
        for i in 1..=10_000usize {
            assert_eq!(table.get(i * 16).map(|r| r.size), Some(i));
        }
    }

    #[test]
    fn test_removal_preserves_probe_runs() {
        // Small table and clustered keys force long probe sequences that
        // wrap around the end of the slot array.
        let mut table = AllocationTable::with_capacity(64).unwrap();
        let mut model = HashMap::new();
        let mut x: u64 = 0x2545_F491_4F6C_DD1D;
        for step in 0..20_000usize {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let key = ((x % 40) as usize + 1) * 16;
            if step % 3 == 0 {
                assert_eq!(
                    table.remove(key).map(|r| r.size),
                    model.remove(&key),
                    "step {step}"
                );
            } else {
                let old = table.insert(key, rec(step)).unwrap().map(|r| r.size);
                assert_eq!(old, model.insert(key, step), "step {step}");
            }
            assert_eq!(table.len(), model.len());
        }
        for (key, size) in &model {
            assert_eq!(table.get(*key).map(|r| r.size), Some(*size));
        }
        assert_eq!(table.iter().count(), model.len());
    }

    #[test]
    fn test_iter_sums_sizes() {
        let mut table = AllocationTable::new();
        for (i, size) in [3usize, 10, 100, 5000].into_iter().enumerate() {
            table.insert(0x10_0000 + i * 64, rec(size)).unwrap();
        }
        let total: usize = table.iter().map(|(_, r)| r.size).sum();
        assert_eq!(total, 5113);
    }
}
