//! Timestamps and the clock seam used for record ages.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1000)
    }

    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Whole seconds elapsed from `earlier` to `self`; zero if `earlier` is later.
    #[inline]
    pub const fn secs_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0) / 1000
    }
}

/// Source of the current time.
///
/// Implementations are called from inside the tracked allocation path and
/// must not allocate.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Wall clock backed by [`SystemTime`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64);
        Timestamp(millis)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Length of an `asctime`-style header such as `Mon Oct 19 14:03:07 2026`.
pub const LOCAL_TIME_LEN: usize = 24;

/// Fixed-size rendering of a local time, formatted without heap allocation.
#[derive(Clone, Copy)]
pub struct LocalTime {
    buf: [u8; 64],
    len: usize,
}

impl LocalTime {
    /// Format `ts` in the process's local time zone as `%a %b %e %H:%M:%S %Y`.
    pub fn of(ts: Timestamp) -> Self {
        let mut out = Self {
            buf: [0; 64],
            len: 0,
        };
        let secs = (ts.as_millis() / 1000) as libc::time_t;
        let mut tm: libc::tm = unsafe { core::mem::zeroed() };
        if unsafe { libc::localtime_r(&secs, &mut tm) }.is_null() {
            return out;
        }
        let written = unsafe {
            libc::strftime(
                out.buf.as_mut_ptr().cast::<libc::c_char>(),
                out.buf.len(),
                c"%a %b %e %H:%M:%S %Y".as_ptr(),
                &tm,
            )
        };
        out.len = written;
        out
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.buf[..self.len]).unwrap_or("")
    }
}

impl core::fmt::Display for LocalTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::fmt::Debug for LocalTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("LocalTime").field(&self.as_str()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secs_since_truncates() {
        let start = Timestamp::from_millis(10_000);
        assert_eq!(Timestamp::from_millis(10_999).secs_since(start), 0);
        assert_eq!(Timestamp::from_millis(11_000).secs_since(start), 1);
        assert_eq!(Timestamp::from_secs(1_010).secs_since(start), 1_000);
    }

    #[test]
    fn test_secs_since_never_negative() {
        let later = Timestamp::from_secs(50);
        assert_eq!(Timestamp::from_secs(10).secs_since(later), 0);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let a = SystemClock.now();
        let b = SystemClock.now();
        assert!(b >= a);
        assert!(a.as_millis() > 0);
    }

    #[test]
    fn test_local_time_shape() {
        let text = LocalTime::of(SystemClock.now());
        assert_eq!(text.as_str().len(), LOCAL_TIME_LEN, "got {:?}", text);
        assert_eq!(text.as_str().matches(':').count(), 2);
    }
}
