//! Report emission on a dedicated thread.
//!
//! The reporting thread blocks on the read end of a pipe. Every byte written
//! to the pipe is one report request, so a request can come from ordinary code
//! ([`ReporterHandle::trigger`]) or from a signal handler, whose only work is
//! one `write(2)`. The thread, not the interrupted code, takes the tracker's
//! shared lock, so a signal landing on a thread that holds the exclusive lock
//! cannot deadlock it.
//!
//! Wire bytes: [`MSG_STOP`] ends the thread, [`MSG_MANUAL`] asks for a report,
//! anything else is the number of the signal that asked for one.

use crate::error::{Error, Result};
use crate::global::TrackingAllocator;
use crate::histogram::Report;
use crate::raw::RawAllocator;
use crate::time::Clock;
use crate::tracker::Tracker;
use core::ffi::{c_int, c_void};
use core::fmt;
use core::str::FromStr;
use core::sync::atomic::{AtomicI32, Ordering};
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub const MSG_STOP: u8 = 0;
pub const MSG_MANUAL: u8 = u8::MAX;

/// Write end of the pipe owned by the signal-driven reporter, or -1.
static SIGNAL_FD: AtomicI32 = AtomicI32::new(-1);

/// Anything that can produce a [`Report`] on demand.
pub trait ReportSource {
    fn report(&self) -> Report;
}

impl<R: RawAllocator, C: Clock> ReportSource for Tracker<R, C> {
    fn report(&self) -> Report {
        Tracker::report(self)
    }
}

impl<R: RawAllocator, C: Clock> ReportSource for TrackingAllocator<R, C> {
    fn report(&self) -> Report {
        self.tracker().report()
    }
}

impl<T: ReportSource + ?Sized> ReportSource for &T {
    fn report(&self) -> Report {
        (**self).report()
    }
}

impl<T: ReportSource + ?Sized> ReportSource for Arc<T> {
    fn report(&self) -> Report {
        (**self).report()
    }
}

/// Signals that may request a report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportSignal {
    #[default]
    Quit,
    User1,
    User2,
}

impl ReportSignal {
    pub fn signo(self) -> c_int {
        match self {
            ReportSignal::Quit => libc::SIGQUIT,
            ReportSignal::User1 => libc::SIGUSR1,
            ReportSignal::User2 => libc::SIGUSR2,
        }
    }

    pub fn from_signo(signo: c_int) -> Option<Self> {
        match signo {
            libc::SIGQUIT => Some(ReportSignal::Quit),
            libc::SIGUSR1 => Some(ReportSignal::User1),
            libc::SIGUSR2 => Some(ReportSignal::User2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReportSignal::Quit => "SIGQUIT",
            ReportSignal::User1 => "SIGUSR1",
            ReportSignal::User2 => "SIGUSR2",
        }
    }
}

impl fmt::Display for ReportSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReportSignal {
    type Err = Error;

    /// Accepts `SIGQUIT`, `QUIT` or `quit` style names.
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        match upper.strip_prefix("SIG").unwrap_or(&upper) {
            "QUIT" => Ok(ReportSignal::Quit),
            "USR1" => Ok(ReportSignal::User1),
            "USR2" => Ok(ReportSignal::User2),
            _ => Err(Error::UnknownSignal(s.to_owned())),
        }
    }
}

struct SignalRegistration {
    signo: c_int,
    previous: libc::sigaction,
}

/// Starts reporting threads.
pub struct Reporter;

impl Reporter {
    /// Spawn a reporting thread that writes to `sink` on every
    /// [`ReporterHandle::trigger`].
    pub fn spawn<S, W>(source: S, sink: W) -> Result<ReporterHandle>
    where
        S: ReportSource + Send + 'static,
        W: Write + Send + 'static,
    {
        let (reader, writer) = pipe()?;
        let thread = spawn_thread(source, sink, reader)?;
        log::debug!("reporter thread started");
        Ok(ReporterHandle {
            writer: Some(writer),
            thread: Some(thread),
            signal: None,
        })
    }

    /// As [`spawn`](Self::spawn), and also emit a report whenever the
    /// process receives `signal`. Only one signal-driven reporter may exist.
    pub fn install_signal<S, W>(source: S, signal: ReportSignal, sink: W) -> Result<ReporterHandle>
    where
        S: ReportSource + Send + 'static,
        W: Write + Send + 'static,
    {
        let (reader, writer) = pipe()?;
        let fd = writer.as_raw_fd();
        set_nonblocking(fd)?;
        // The write end outlives the thread (see `stop`). A second read end,
        // never closed, keeps late handler writes from hitting a broken pipe.
        if unsafe { libc::fcntl(reader.as_raw_fd(), libc::F_DUPFD_CLOEXEC, 0) } == -1 {
            return Err(Error::Trigger(io::Error::last_os_error()));
        }
        if SIGNAL_FD.compare_exchange(-1, fd, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(Error::ReporterInstalled);
        }

        let previous = match unsafe { register_handler(signal.signo()) } {
            Ok(previous) => previous,
            Err(e) => {
                SIGNAL_FD.store(-1, Ordering::Release);
                return Err(Error::Trigger(e));
            }
        };
        let registration = SignalRegistration {
            signo: signal.signo(),
            previous,
        };

        let thread = match spawn_thread(source, sink, reader) {
            Ok(thread) => thread,
            Err(e) => {
                unsafe { restore_handler(&registration) };
                SIGNAL_FD.store(-1, Ordering::Release);
                return Err(e);
            }
        };
        log::info!("reporting on {signal}");
        Ok(ReporterHandle {
            writer: Some(writer),
            thread: Some(thread),
            signal: Some(registration),
        })
    }
}

/// Controls a running reporting thread. Dropping it shuts the thread down.
pub struct ReporterHandle {
    writer: Option<File>,
    thread: Option<JoinHandle<u64>>,
    signal: Option<SignalRegistration>,
}

impl ReporterHandle {
    /// Request one report. Returns once the request is queued, not once the
    /// report is written.
    pub fn trigger(&self) -> io::Result<()> {
        match &self.writer {
            Some(writer) => send(writer, MSG_MANUAL),
            None => Err(io::Error::from(io::ErrorKind::BrokenPipe)),
        }
    }

    /// Stop listening for the signal, let the thread finish every queued
    /// request, and join it. Returns the number of reports written.
    pub fn shutdown(mut self) -> u64 {
        self.stop()
    }

    fn stop(&mut self) -> u64 {
        let registration = self.signal.take();
        if let Some(registration) = &registration {
            unsafe { restore_handler(registration) };
            SIGNAL_FD.store(-1, Ordering::Release);
            log::info!("stopped reporting on signal {}", registration.signo);
        }
        if let Some(writer) = self.writer.take() {
            stop_thread(&writer);
            // A handler that loaded the descriptor just before the swap may
            // still write to it, so it stays open for the rest of the process.
            if registration.is_some() {
                let _ = writer.into_raw_fd();
            }
        }

        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(reports)) => {
                log::debug!("reporter thread stopped after {reports} reports");
                reports
            }
            Some(Err(_)) => {
                log::error!("reporter thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for ReporterHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

fn stop_thread(writer: &File) {
    loop {
        match send(writer, MSG_STOP) {
            Ok(()) => return,
            // Pipe full of pending requests: the thread is draining it.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::yield_now(),
            Err(e) => {
                log::warn!("failed to stop reporter thread: {e}");
                return;
            }
        }
    }
}

fn send(mut writer: &File, msg: u8) -> io::Result<()> {
    writer.write_all(&[msg])
}

fn spawn_thread<S, W>(source: S, sink: W, reader: File) -> Result<JoinHandle<u64>>
where
    S: ReportSource + Send + 'static,
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name("memstat-reporter".into())
        .spawn(move || run(source, sink, reader))
        .map_err(Error::Trigger)
}

fn run<S: ReportSource, W: Write>(source: S, mut sink: W, mut reader: File) -> u64 {
    let mut reports = 0;
    let mut msg = [0u8; 1];
    loop {
        match reader.read(&mut msg) {
            // Every writer is gone.
            Ok(0) => break,
            Ok(_) if msg[0] == MSG_STOP => break,
            Ok(_) => {
                if let Err(e) = emit(&source, &mut sink, msg[0]) {
                    log::warn!("failed to write report: {e}");
                }
                reports += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::error!("report trigger pipe failed: {e}");
                break;
            }
        }
    }
    reports
}

fn emit<S: ReportSource, W: Write>(source: &S, sink: &mut W, cause: u8) -> io::Result<()> {
    if cause != MSG_MANUAL {
        writeln!(sink, "Received signal {cause}")?;
    }
    let report = source.report();
    log::debug!("emitting report of {} live blocks", report.live_records);
    report.render(sink)?;
    sink.flush()
}

fn pipe() -> Result<(File, File)> {
    let mut fds = [0 as c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(Error::Trigger(io::Error::last_os_error()));
    }
    for fd in fds {
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    }
    let reader = unsafe { File::from_raw_fd(fds[0]) };
    let writer = unsafe { File::from_raw_fd(fds[1]) };
    Ok((reader, writer))
}

fn set_nonblocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(Error::Trigger(io::Error::last_os_error()));
    }
    Ok(())
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        unsafe fn errno_location() -> *mut c_int {
            unsafe { libc::__errno_location() }
        }
    } else if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))] {
        unsafe fn errno_location() -> *mut c_int {
            unsafe { libc::__error() }
        }
    } else {
        compile_error!("unsupported target: no errno accessor");
    }
}

/// Async-signal-safe: one `write(2)`, errno preserved.
extern "C" fn on_signal(signo: c_int) {
    let fd = SIGNAL_FD.load(Ordering::Acquire);
    if fd < 0 {
        return;
    }
    unsafe {
        let errno = errno_location();
        let saved = *errno;
        let msg = signo as u8;
        libc::write(fd, (&msg as *const u8).cast::<c_void>(), 1);
        *errno = saved;
    }
}

unsafe fn register_handler(signo: c_int) -> io::Result<libc::sigaction> {
    unsafe {
        let mut action: libc::sigaction = core::mem::zeroed();
        action.sa_sigaction = on_signal as extern "C" fn(c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);

        let mut previous: libc::sigaction = core::mem::zeroed();
        if libc::sigaction(signo, &action, &mut previous) == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(previous)
    }
}

unsafe fn restore_handler(registration: &SignalRegistration) {
    unsafe {
        libc::sigaction(registration.signo, &registration.previous, core::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_names() {
        assert_eq!("SIGQUIT".parse::<ReportSignal>().unwrap(), ReportSignal::Quit);
        assert_eq!("usr1".parse::<ReportSignal>().unwrap(), ReportSignal::User1);
        assert_eq!(" SIGUSR2 ".parse::<ReportSignal>().unwrap(), ReportSignal::User2);
        assert!(matches!(
            "SIGKILL".parse::<ReportSignal>(),
            Err(Error::UnknownSignal(name)) if name == "SIGKILL"
        ));
    }

    #[test]
    fn test_signo_round_trip() {
        for signal in [ReportSignal::Quit, ReportSignal::User1, ReportSignal::User2] {
            assert_eq!(ReportSignal::from_signo(signal.signo()), Some(signal));
        }
        assert_eq!(ReportSignal::from_signo(libc::SIGTERM), None);
    }

    #[test]
    fn test_late_handler_write_after_shutdown_succeeds() {
        let tracker = Arc::new(Tracker::libc());
        let handle = Reporter::install_signal(tracker, ReportSignal::User2, io::sink()).unwrap();
        let fd = SIGNAL_FD.load(Ordering::Acquire);
        assert!(fd >= 0);
        assert_eq!(handle.shutdown(), 0);
        assert_eq!(SIGNAL_FD.load(Ordering::Acquire), -1);

        // A handler that read the descriptor before shutdown writes now.
        let msg = libc::SIGUSR2 as u8;
        let written = unsafe { libc::write(fd, (&msg as *const u8).cast::<c_void>(), 1) };
        assert_eq!(written, 1, "{}", io::Error::last_os_error());
    }
}
