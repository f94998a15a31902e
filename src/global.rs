//! `GlobalAlloc` adapter: tracks every heap allocation of a Rust program.
//!
//! Allocations made through the global allocator carry no call site, so their
//! records use [`SourceLocation::UNKNOWN`]. The table itself lives in
//! page-mapped memory, so tracking never recurses into this allocator.

use crate::raw::{LibcMalloc, MIN_ALIGN, RawAllocator};
use crate::record::{AllocKind, SourceLocation};
use crate::time::{Clock, SystemClock};
use crate::tracker::Tracker;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

/// Tracking global allocator.
///
/// Register as the global allocator with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: memstat::TrackingAllocator = memstat::TrackingAllocator::libc();
/// ```
pub struct TrackingAllocator<R = LibcMalloc, C = SystemClock> {
    tracker: Tracker<R, C>,
}

impl TrackingAllocator<LibcMalloc, SystemClock> {
    pub const fn libc() -> Self {
        Self::new(LibcMalloc, SystemClock)
    }
}

impl<R: RawAllocator, C: Clock> TrackingAllocator<R, C> {
    pub const fn new(raw: R, clock: C) -> Self {
        Self {
            tracker: Tracker::new(raw, clock),
        }
    }

    /// The tracker behind this allocator, for counters and reports.
    pub fn tracker(&self) -> &Tracker<R, C> {
        &self.tracker
    }
}

unsafe impl<R: RawAllocator, C: Clock> GlobalAlloc for TrackingAllocator<R, C> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.tracker
            .allocate_aligned(
                layout.size(),
                layout.align(),
                SourceLocation::UNKNOWN,
                AllocKind::Allocate,
            )
            .map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe {
            self.tracker
                .release(ptr, SourceLocation::UNKNOWN, AllocKind::Release)
        };
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        match self.tracker.allocate_aligned(
            layout.size(),
            layout.align(),
            SourceLocation::UNKNOWN,
            AllocKind::ZeroAllocate,
        ) {
            Ok(p) => {
                unsafe { ptr::write_bytes(p.as_ptr(), 0, layout.size()) };
                p.as_ptr()
            }
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let align = layout.align();
        if align <= MIN_ALIGN && align <= new_size {
            return unsafe {
                self.tracker
                    .reallocate(ptr, new_size, SourceLocation::UNKNOWN, AllocKind::Reallocate)
            }
            .map_or(ptr::null_mut(), |p| p.as_ptr());
        }

        // realloc(3) does not keep over-alignment: move the block by hand.
        unsafe {
            self.tracker.reallocate_aligned(
                ptr,
                layout.size(),
                new_size,
                align,
                SourceLocation::UNKNOWN,
                AllocKind::Reallocate,
            )
        }
        .map_or(ptr::null_mut(), |p| p.as_ptr())
    }
}
