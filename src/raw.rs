//! The raw allocation primitives the tracker wraps.

use core::ffi::c_void;
use core::ptr;

/// Largest alignment `malloc` guarantees on the supported targets.
pub const MIN_ALIGN: usize = 16;

/// Underlying memory source. The tracker interposes before and after these
/// calls but never inspects the memory itself.
///
/// # Safety
/// Implementations must return either null or a pointer to at least `size`
/// writable bytes aligned to `align`, valid until passed to `release` or
/// `reallocate`. Implementations are called while the tracker's exclusive
/// lock may be held and must not allocate through a tracked allocator.
pub unsafe trait RawAllocator {
    /// Returns null on failure.
    fn allocate(&self, size: usize, align: usize) -> *mut u8;

    /// Resize a block from this allocator, preserving its contents up to the
    /// smaller size. On failure returns null and leaves `ptr` untouched.
    /// Alignment beyond [`MIN_ALIGN`] is not preserved.
    ///
    /// # Safety
    /// `ptr` must be null or a live block from this allocator.
    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8;

    /// # Safety
    /// `ptr` must be null or a live block from this allocator.
    unsafe fn release(&self, ptr: *mut u8);
}

/// The C library's `malloc` family.
///
/// Zero-byte requests are rounded up to one byte so every success yields a
/// distinct, trackable address.
#[derive(Clone, Copy, Debug, Default)]
pub struct LibcMalloc;

unsafe impl RawAllocator for LibcMalloc {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        let size = size.max(1);
        if align <= MIN_ALIGN && align <= size {
            return unsafe { libc::malloc(size) }.cast::<u8>();
        }
        let align = align.max(core::mem::size_of::<usize>());
        let mut out: *mut c_void = ptr::null_mut();
        if unsafe { libc::posix_memalign(&mut out, align, size) } != 0 {
            return ptr::null_mut();
        }
        out.cast::<u8>()
    }

    #[inline]
    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        unsafe { libc::realloc(ptr.cast::<c_void>(), new_size.max(1)) }.cast::<u8>()
    }

    #[inline]
    unsafe fn release(&self, ptr: *mut u8) {
        unsafe { libc::free(ptr.cast::<c_void>()) }
    }
}

unsafe impl<R: RawAllocator + ?Sized> RawAllocator for &R {
    fn allocate(&self, size: usize, align: usize) -> *mut u8 {
        (**self).allocate(size, align)
    }

    unsafe fn reallocate(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        unsafe { (**self).reallocate(ptr, new_size) }
    }

    unsafe fn release(&self, ptr: *mut u8) {
        unsafe { (**self).release(ptr) }
    }
}
