//! Background durability (C6): a periodic flush timer plus the synchronous
//! `ensure_durability` primitive write paths call at their write-concern
//! boundary.
//!
//! The teacher has no background worker of its own (`BufferPool` is flushed
//! only on shutdown), so this is grounded on the general "owned worker
//! thread with an atomic stop flag" shape used by the teacher's
//! `ConcurrentStatus` for its own internal bookkeeping, generalized into a
//! standalone periodic ticker.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;

use crate::config::WriteConcern;
use crate::error::TinyResult;
use crate::wal::Wal;

/// Exceptions from the background flusher are swallowed (§7 "Background
/// flusher exceptions are swallowed after a bounded number of consecutive
/// failures") but every one increments these counters, which `Engine::
/// statistics` surfaces to the caller.
#[derive(Debug, Default)]
pub struct FlushSchedulerStats {
    pub ticks: AtomicU64,
    pub swallowed_failures: AtomicU64,
    pub consecutive_failures: AtomicU32,
}

impl FlushSchedulerStats {
    pub fn snapshot(&self) -> (u64, u64, u32) {
        (
            self.ticks.load(Ordering::Relaxed),
            self.swallowed_failures.load(Ordering::Relaxed),
            self.consecutive_failures.load(Ordering::Relaxed),
        )
    }
}

/// After this many consecutive tick failures, the scheduler stops logging
/// at `warn` level (still counts, still keeps trying) to avoid flooding the
/// log when disk is persistently unavailable.
const LOUD_FAILURE_THRESHOLD: u32 = 5;

/// Owns the periodic flush thread. `flush_fn` is the engine's "flush every
/// dirty page, best-effort" closure; it is generic rather than holding a
/// `PageCache` directly so the scheduler does not need to know the engine's
/// lock ordering.
pub struct FlushScheduler {
    interval: Duration,
    stop: Arc<AtomicBool>,
    stats: Arc<FlushSchedulerStats>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    /// `interval` of zero disables the background timer entirely, per
    /// §6's "backgroundFlushInterval (duration; 0 = disabled)".
    pub fn start<F>(interval: Duration, flush_fn: F) -> Self
    where
        F: Fn() -> TinyResult<()> + Send + Sync + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(FlushSchedulerStats::default());
        let handle = if interval.is_zero() {
            None
        } else {
            let stop = stop.clone();
            let stats = stats.clone();
            Some(std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    stats.ticks.fetch_add(1, Ordering::Relaxed);
                    match flush_fn() {
                        Ok(()) => {
                            stats.consecutive_failures.store(0, Ordering::Relaxed);
                        }
                        Err(e) => {
                            stats.swallowed_failures.fetch_add(1, Ordering::Relaxed);
                            let consecutive =
                                stats.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                            if consecutive <= LOUD_FAILURE_THRESHOLD {
                                warn!("background flush tick failed: {}", e);
                            }
                        }
                    }
                }
            }))
        };

        Self {
            interval,
            stop,
            stats,
            handle: Mutex::new(handle),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> Arc<FlushSchedulerStats> {
        self.stats.clone()
    }

    /// Signal the background thread to stop and join it. Idempotent.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The synchronous write-boundary primitive (§4.3): for `None` this is a
/// no-op, for `Journaled` it forces the WAL's in-process buffer to disk,
/// and for `Synced` it additionally flushes every dirty page and fsyncs
/// the data file.
pub fn ensure_durability(
    level: WriteConcern,
    wal: &Wal,
    flush_dirty_pages: impl FnOnce() -> TinyResult<()>,
    fsync_disk: impl FnOnce() -> TinyResult<()>,
) -> TinyResult<()> {
    match level {
        WriteConcern::None => Ok(()),
        WriteConcern::Journaled => wal.flush_buffer(),
        WriteConcern::Synced => {
            wal.fsync()?;
            flush_dirty_pages()?;
            fsync_disk()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn disabled_interval_spawns_no_thread() {
        let scheduler = FlushScheduler::start(Duration::ZERO, || Ok(()));
        assert!(scheduler.handle.lock().unwrap().is_none());
    }

    #[test]
    fn ticks_invoke_flush_fn_and_count_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let scheduler = FlushScheduler::start(Duration::from_millis(5), move || {
            calls2.fetch_add(1, Ordering::SeqCst);
            Err(crate::error::TinyDbError::io("disk unavailable"))
        });
        std::thread::sleep(Duration::from_millis(40));
        scheduler.shutdown();
        assert!(calls.load(Ordering::SeqCst) > 0);
        let (ticks, failures, _) = scheduler.stats().snapshot();
        assert_eq!(ticks, failures);
        assert!(ticks > 0);
    }

    #[test]
    fn ensure_durability_none_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let wal = Wal::open(dir.path().join("t.wal")).unwrap();
        let mut flushed = false;
        ensure_durability(WriteConcern::None, &wal, || {
            flushed = true;
            Ok(())
        }, || Ok(()))
        .unwrap();
        assert!(!flushed);
    }
}
