//! OS platform abstraction for the table's backing storage.
//!
//! Provides `page_alloc` and `page_dealloc` over anonymous mappings. The
//! allocation table lives in this memory rather than on the heap, so the
//! tracker never calls back into the allocator it instruments.
//! Under Miri, uses std::alloc as a backing store instead.

cfg_if::cfg_if! {
    if #[cfg(miri)] {
        mod miri;
    } else if #[cfg(unix)] {
        mod unix;
    } else {
        compile_error!("memstat supports unix targets only");
    }
}

#[cfg(test)]
std::thread_local! {
    static FAIL_PAGE_ALLOC: core::cell::Cell<bool> = const { core::cell::Cell::new(false) };
}

/// Make `page_alloc` on the calling thread return null until reset.
#[cfg(test)]
pub(crate) fn set_page_alloc_failure(fail: bool) {
    FAIL_PAGE_ALLOC.with(|f| f.set(fail));
}

/// Round `size` up to a whole number of pages.
#[inline]
pub const fn round_to_pages(size: usize) -> usize {
    (size + crate::PAGE_SIZE - 1) & !(crate::PAGE_SIZE - 1)
}

/// Allocate `size` bytes of virtual memory, page-aligned.
/// Returns null on failure. Memory is zero-initialized by the OS.
///
/// # Safety
/// Caller must eventually call `page_dealloc` with the returned pointer and the
/// same `size`.
#[inline]
pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    #[cfg(test)]
    if FAIL_PAGE_ALLOC.with(core::cell::Cell::get) {
        return core::ptr::null_mut();
    }
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            unsafe { miri::page_alloc(size) }
        } else {
            unsafe { unix::page_alloc(size) }
        }
    }
}

/// Free virtual memory previously allocated by `page_alloc`.
///
/// # Safety
/// `ptr` must have been returned by `page_alloc`, and `size` must match
/// the size passed to `page_alloc`.
#[inline]
pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            unsafe { miri::page_dealloc(ptr, size) }
        } else {
            unsafe { unix::page_dealloc(ptr, size) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PAGE_SIZE;

    #[test]
    fn test_alloc_and_dealloc() {
        unsafe {
            let ptr = page_alloc(PAGE_SIZE);
            assert!(!ptr.is_null());
            for i in 0..PAGE_SIZE {
                assert_eq!(*ptr.add(i), 0);
            }
            for i in 0..PAGE_SIZE {
                *ptr.add(i) = (i & 0xFF) as u8;
            }
            for i in 0..PAGE_SIZE {
                assert_eq!(*ptr.add(i), (i & 0xFF) as u8);
            }
            page_dealloc(ptr, PAGE_SIZE);
        }
    }

    #[test]
    fn test_failure_switch() {
        set_page_alloc_failure(true);
        assert!(unsafe { page_alloc(PAGE_SIZE) }.is_null());
        set_page_alloc_failure(false);
        let ptr = unsafe { page_alloc(PAGE_SIZE) };
        assert!(!ptr.is_null());
        unsafe { page_dealloc(ptr, PAGE_SIZE) };
    }

    #[test]
    fn test_round_to_pages() {
        assert_eq!(round_to_pages(1), PAGE_SIZE);
        assert_eq!(round_to_pages(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(round_to_pages(PAGE_SIZE + 1), 2 * PAGE_SIZE);
    }

    #[test]
    fn test_alloc_multiple_pages() {
        unsafe {
            let size = PAGE_SIZE * 8;
            let ptr = page_alloc(size);
            assert!(!ptr.is_null());
            *ptr = 0xAA;
            *ptr.add(size - 1) = 0xBB;
            assert_eq!(*ptr, 0xAA);
            assert_eq!(*ptr.add(size - 1), 0xBB);
            page_dealloc(ptr, size);
        }
    }
}
