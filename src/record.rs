//! Per-block attribution: what was allocated, where, how, and when.

use crate::time::Timestamp;
use core::fmt;
use core::panic::Location;

/// Which entry point produced (or last touched) a block.
///
/// `#[repr(C)]` so C callers can pass it through the `ffi` exports.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AllocKind {
    #[default]
    Allocate = 0,
    ZeroAllocate = 1,
    Reallocate = 2,
    Release = 3,
}

impl AllocKind {
    /// Decode the C enum value; out-of-range values are `None`.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(AllocKind::Allocate),
            1 => Some(AllocKind::ZeroAllocate),
            2 => Some(AllocKind::Reallocate),
            3 => Some(AllocKind::Release),
            _ => None,
        }
    }
}

/// Originating call site. `UNKNOWN` for allocations that arrive through the
/// global allocator hook, where no caller information is available.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl SourceLocation {
    pub const UNKNOWN: SourceLocation = SourceLocation { file: "?", line: 0 };

    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// Location of the caller of a `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        Location::caller().into()
    }

    pub fn is_known(&self) -> bool {
        self.line != 0
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

impl From<&'static Location<'static>> for SourceLocation {
    fn from(loc: &'static Location<'static>) -> Self {
        Self {
            file: loc.file(),
            line: loc.line(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

impl fmt::Debug for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Attribution of one live block.
///
/// Exists exactly while the block is live from the tracker's point of view.
/// `created_at` is set when the block is first attributed and survives
/// reallocation; `site` and `kind` follow the latest operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributionRecord {
    pub size: usize,
    pub created_at: Timestamp,
    pub site: SourceLocation,
    pub kind: AllocKind,
}

impl AttributionRecord {
    pub const fn new(size: usize, created_at: Timestamp, site: SourceLocation, kind: AllocKind) -> Self {
        Self {
            size,
            created_at,
            site,
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_raw() {
        for kind in [
            AllocKind::Allocate,
            AllocKind::ZeroAllocate,
            AllocKind::Reallocate,
            AllocKind::Release,
        ] {
            assert_eq!(AllocKind::from_raw(kind as u32), Some(kind));
        }
        assert_eq!(AllocKind::from_raw(4), None);
    }

    #[test]
    fn test_caller_location() {
        let here = SourceLocation::caller();
        assert!(here.file.ends_with("record.rs"));
        assert!(here.is_known());
        assert!(!SourceLocation::UNKNOWN.is_known());
    }

    #[test]
    fn test_display() {
        let site = SourceLocation::new("main.c", 42);
        assert_eq!(format!("{site}"), "main.c:42");
    }
}
