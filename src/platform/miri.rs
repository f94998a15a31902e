//! Miri-compatible platform shim using std::alloc as backing store.
//!
//! Miri can't execute mmap, so page-aligned zeroed memory comes from the
//! system allocator instead.

use std::alloc::{Layout, alloc_zeroed, dealloc};

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    match Layout::from_size_align(size, crate::PAGE_SIZE) {
        Ok(layout) => unsafe { alloc_zeroed(layout) },
        Err(_) => core::ptr::null_mut(),
    }
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    if let Ok(layout) = Layout::from_size_align(size, crate::PAGE_SIZE) {
        unsafe { dealloc(ptr, layout) };
    }
}
