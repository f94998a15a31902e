//! C-ABI exports for instrumenting C and C++ programs.
//!
//! Gated behind `features = ["ffi"]`. A header can route the usual entry
//! points through these with the call site attached:
//!
//! ```c
//! #define malloc(n)     memstat_malloc(__FILE__, __LINE__, (n), 0)
//! #define calloc(n, s)  memstat_calloc(__FILE__, __LINE__, (n), (s), 1)
//! #define realloc(p, n) memstat_realloc(__FILE__, __LINE__, (p), (n), 2)
//! #define free(p)       memstat_free(__FILE__, __LINE__, (p), 3)
//! ```
//!
//! The `kind` argument takes [`AllocKind`] discriminants; unknown values fall
//! back to the entry point's own kind.

use crate::raw::LibcMalloc;
use crate::record::{AllocKind, SourceLocation};
use crate::reporter::{ReportSignal, Reporter};
use crate::time::SystemClock;
use crate::tracker::Tracker;
use core::ffi::{CStr, c_char, c_int, c_void};
use core::ptr;
use std::io;

static TRACKER: Tracker<LibcMalloc, SystemClock> = Tracker::libc();

/// The process-wide tracker behind the C entry points.
pub fn tracker() -> &'static Tracker<LibcMalloc, SystemClock> {
    &TRACKER
}

/// `file` must be null or a NUL-terminated string that outlives the process,
/// which `__FILE__` literals do.
unsafe fn site(file: *const c_char, line: c_int) -> SourceLocation {
    if file.is_null() {
        return SourceLocation::UNKNOWN;
    }
    match unsafe { CStr::from_ptr(file) }.to_str() {
        Ok(name) => {
            let name: &'static str = unsafe { &*(name as *const str) };
            SourceLocation::new(name, u32::try_from(line).unwrap_or(0))
        }
        Err(_) => SourceLocation::UNKNOWN,
    }
}

fn kind(raw: u32, fallback: AllocKind) -> AllocKind {
    AllocKind::from_raw(raw).unwrap_or(fallback)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memstat_malloc(
    file: *const c_char,
    line: c_int,
    size: usize,
    kind_raw: u32,
) -> *mut c_void {
    let site = unsafe { site(file, line) };
    TRACKER
        .allocate(size, site, kind(kind_raw, AllocKind::Allocate))
        .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memstat_calloc(
    file: *const c_char,
    line: c_int,
    count: usize,
    size: usize,
    kind_raw: u32,
) -> *mut c_void {
    let site = unsafe { site(file, line) };
    TRACKER
        .zero_allocate(count, size, site, kind(kind_raw, AllocKind::ZeroAllocate))
        .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memstat_realloc(
    file: *const c_char,
    line: c_int,
    ptr: *mut c_void,
    size: usize,
    kind_raw: u32,
) -> *mut c_void {
    let site = unsafe { site(file, line) };
    unsafe { TRACKER.reallocate(ptr.cast(), size, site, kind(kind_raw, AllocKind::Reallocate)) }
        .map_or(ptr::null_mut(), |p| p.as_ptr().cast())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memstat_free(
    file: *const c_char,
    line: c_int,
    ptr: *mut c_void,
    kind_raw: u32,
) {
    let site = unsafe { site(file, line) };
    unsafe { TRACKER.release(ptr.cast(), site, kind(kind_raw, AllocKind::Release)) };
}

/// Write a report to stderr now. Must not be called from a signal handler;
/// use [`memstat_install_signal`] for that.
#[unsafe(no_mangle)]
pub extern "C" fn memstat_dump_stats() -> c_int {
    match TRACKER.report().render(&mut io::stderr().lock()) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Report to stderr whenever `signo` (SIGQUIT, SIGUSR1 or SIGUSR2) arrives.
/// Returns 0 on success and -1 if the signal is unsupported or a reporter is
/// already installed.
#[unsafe(no_mangle)]
pub extern "C" fn memstat_install_signal(signo: c_int) -> c_int {
    let Some(signal) = ReportSignal::from_signo(signo) else {
        log::warn!("cannot report on signal {signo}");
        return -1;
    };
    match Reporter::install_signal(&TRACKER, signal, io::stderr()) {
        Ok(handle) => {
            // Reports for the rest of the process.
            core::mem::forget(handle);
            0
        }
        Err(e) => {
            log::warn!("{e}");
            -1
        }
    }
}
