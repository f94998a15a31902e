/// The current source location as a [`SourceLocation`](crate::SourceLocation).
#[macro_export]
macro_rules! site {
    () => {
        $crate::SourceLocation::new(::core::file!(), ::core::line!())
    };
}

/// Allocate through a tracker, attributed to the calling line.
///
/// ```ignore
/// let p = memstat::tracked_alloc!(TRACKER, 64)?;
/// ```
#[macro_export]
macro_rules! tracked_alloc {
    ($tracker:expr, $size:expr) => {
        $tracker.allocate($size, $crate::site!(), $crate::AllocKind::Allocate)
    };
}

/// Zero-allocate `count * size` bytes through a tracker.
#[macro_export]
macro_rules! tracked_zalloc {
    ($tracker:expr, $count:expr, $size:expr) => {
        $tracker.zero_allocate($count, $size, $crate::site!(), $crate::AllocKind::ZeroAllocate)
    };
}

/// Reallocate through a tracker. Expands to an `unsafe` call; the caller
/// upholds [`Tracker::reallocate`](crate::Tracker::reallocate)'s contract.
#[macro_export]
macro_rules! tracked_realloc {
    ($tracker:expr, $ptr:expr, $size:expr) => {
        $tracker.reallocate($ptr, $size, $crate::site!(), $crate::AllocKind::Reallocate)
    };
}

/// Release through a tracker. Expands to an `unsafe` call; the caller
/// upholds [`Tracker::release`](crate::Tracker::release)'s contract.
#[macro_export]
macro_rules! tracked_free {
    ($tracker:expr, $ptr:expr) => {
        $tracker.release($ptr, $crate::site!(), $crate::AllocKind::Release)
    };
}
