//! Allocation traffic generator for memstat.
//!
//! Runs allocator threads that push fresh blocks onto a shared queue and as
//! many freer threads that pop them, resizing some before release. Every heap
//! allocation in the process, including the queue's own, goes through the
//! tracking global allocator. Send the configured signal (SIGQUIT by default)
//! for a report while it runs; a final report is printed on exit.

use clap::Parser;
use memstat::{Config, Reporter, StderrLogger, TrackingAllocator};
use std::collections::VecDeque;
use std::io;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator::libc();

/// Blocks held in the queue before allocator threads back off.
const MAX_QUEUED: usize = 100_000;

/// Multi-threaded allocation traffic generator.
#[derive(Debug, Parser)]
#[command(name = "memstat-driver")]
#[command(about = "Generate allocation traffic under memstat tracking")]
struct Cli {
    /// Allocator threads; as many freer threads are started.
    #[arg(long, default_value_t = 3)]
    threads: usize,
    /// Largest block size in bytes.
    #[arg(long, default_value_t = 5000)]
    max_size: usize,
    /// How long to generate traffic, in seconds.
    #[arg(long, default_value_t = 10)]
    duration_secs: u64,
    /// Signal that requests a report (SIGQUIT, SIGUSR1 or SIGUSR2).
    #[arg(long)]
    signal: Option<String>,
    /// Also request a report every N seconds (0 disables).
    #[arg(long, default_value_t = 0)]
    report_every: u64,
}

/// xorshift64*: enough to spread sizes, no dependencies.
struct XorShift(u64);

impl XorShift {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform-ish in `1..=max`.
    fn size(&mut self, max: usize) -> usize {
        1 + (self.next() % max as u64) as usize
    }
}

type Queue = Mutex<VecDeque<usize>>;

fn allocate_loop(queue: &Queue, stop: &AtomicBool, max_size: usize, seed: u64) -> u64 {
    let tracker = GLOBAL.tracker();
    let mut rng = XorShift::new(seed);
    let mut allocated = 0;
    while !stop.load(Ordering::Relaxed) {
        if queue.lock().unwrap_or_else(PoisonError::into_inner).len() >= MAX_QUEUED {
            thread::yield_now();
            continue;
        }
        match memstat::tracked_alloc!(tracker, rng.size(max_size)) {
            Ok(block) => {
                queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back(block.as_ptr() as usize);
                allocated += 1;
            }
            Err(e) => log::warn!("{e}"),
        }
    }
    allocated
}

fn free_loop(queue: &Queue, stop: &AtomicBool, max_size: usize, seed: u64) -> u64 {
    let tracker = GLOBAL.tracker();
    let mut rng = XorShift::new(seed);
    let mut freed = 0;
    while !stop.load(Ordering::Relaxed) {
        let Some(addr) = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front() else {
            thread::yield_now();
            continue;
        };
        let block = addr as *mut u8;
        if rng.next() % 4 == 0 {
            match unsafe { memstat::tracked_realloc!(tracker, block, rng.size(max_size)) } {
                Ok(moved) => queue
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back(moved.as_ptr() as usize),
                Err(e) => {
                    log::warn!("{e}");
                    unsafe { memstat::tracked_free!(tracker, block) };
                    freed += 1;
                }
            }
        } else {
            unsafe { memstat::tracked_free!(tracker, block) };
            freed += 1;
        }
    }
    freed
}

fn run(cli: Cli) -> memstat::Result<()> {
    let mut config = Config::load()?;
    if let Some(name) = &cli.signal {
        config.report.signal = name.parse()?;
    }
    // Another logger may already be installed; keep going with it.
    let _ = StderrLogger::new(config.log.level).init();

    GLOBAL.tracker().reserve(config.table.initial_capacity)?;
    log::debug!("table reserved for {} records", GLOBAL.tracker().capacity());

    if cli.max_size == 0 {
        return Err(memstat::Error::InvalidConfig("--max-size must be at least 1".into()));
    }

    let reporter = if config.report.enabled {
        let handle = Reporter::install_signal(&GLOBAL, config.report.signal, io::stderr())?;
        log::info!(
            "pid {}: send {} for a report",
            std::process::id(),
            config.report.signal
        );
        Some(handle)
    } else {
        None
    };

    let queue: Queue = Mutex::new(VecDeque::new());
    let stop = AtomicBool::new(false);
    let deadline = Instant::now() + Duration::from_secs(cli.duration_secs);
    let max_size = cli.max_size;

    let (allocated, freed) = thread::scope(|s| {
        let allocators: Vec<_> = (0..cli.threads)
            .map(|i| {
                let (queue, stop) = (&queue, &stop);
                s.spawn(move || allocate_loop(queue, stop, max_size, 2 * i as u64 + 1))
            })
            .collect();
        let freers: Vec<_> = (0..cli.threads)
            .map(|i| {
                let (queue, stop) = (&queue, &stop);
                s.spawn(move || free_loop(queue, stop, max_size, 2 * i as u64 + 2))
            })
            .collect();

        let mut next_report = Instant::now() + Duration::from_secs(cli.report_every);
        while Instant::now() < deadline {
            thread::sleep(Duration::from_millis(100));
            if cli.report_every > 0 && Instant::now() >= next_report {
                if let Some(reporter) = &reporter {
                    if let Err(e) = reporter.trigger() {
                        log::warn!("report request dropped: {e}");
                    }
                }
                next_report += Duration::from_secs(cli.report_every);
            }
        }
        stop.store(true, Ordering::Relaxed);

        let allocated: u64 = allocators.into_iter().filter_map(|h| h.join().ok()).sum();
        let freed: u64 = freers.into_iter().filter_map(|h| h.join().ok()).sum();
        (allocated, freed)
    });
    log::info!("{allocated} blocks allocated, {freed} freed by worker threads");

    if let Some(reporter) = reporter {
        reporter.shutdown();
    }

    let leftover = std::mem::take(&mut *queue.lock().unwrap_or_else(PoisonError::into_inner));
    log::info!("releasing {} queued blocks", leftover.len());
    for addr in leftover {
        unsafe { memstat::tracked_free!(GLOBAL.tracker(), addr as *mut u8) };
    }

    if let Err(e) = GLOBAL.tracker().report().render(&mut io::stderr().lock()) {
        log::warn!("failed to write final report: {e}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("memstat-driver: {e}");
            ExitCode::FAILURE
        }
    }
}
