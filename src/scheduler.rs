//! The two long-lived execution contexts: a sync thread driving
//! [`SyncEngine`] and a display thread driving [`DisplayEngine`].
//!
//! They share nothing but the lock-protected
//! [`ClockState`](crate::state::ClockState) the engines already hold.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::display::DisplayEngine;
use crate::hal::{Link, Rtc, SegmentDisplay, TimeSource};
use crate::sync::SyncEngine;

/// Scheduler yield granularity of the display thread.
pub const DISPLAY_TICK_MS: u64 = 10;
/// Sleep between sync polls; also bounds how fast a timezone change is
/// picked up.
pub const SYNC_POLL_MS: u64 = 250;
const DISPLAY_STACK: usize = 8192;
const SYNC_STACK: usize = 16384;
const FAILURE_WARN_EVERY: u32 = 10;

/// Monotonic milliseconds since boot, shared by both threads.
#[derive(Clone, Copy)]
pub struct Uptime(Instant);

impl Uptime {
    pub fn start() -> Self {
        Uptime(Instant::now())
    }

    pub fn ms(&self) -> u64 {
        self.0.elapsed().as_millis() as u64
    }
}

/// Handles of the spawned contexts. On the device they run forever;
/// [`Scheduler::shutdown`] exists for orderly teardown in tests and tools.
pub struct Scheduler {
    uptime: Uptime,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(uptime: Uptime) -> Self {
        Scheduler {
            uptime,
            running: Arc::new(AtomicBool::new(true)),
            handles: Vec::new(),
        }
    }

    pub fn spawn_display<R, D>(&mut self, mut engine: DisplayEngine<R, D>) -> io::Result<()>
    where
        R: Rtc + 'static,
        D: SegmentDisplay + 'static,
    {
        let uptime = self.uptime;
        let running = Arc::clone(&self.running);
        let handle = std::thread::Builder::new()
            .name("display".into())
            .stack_size(DISPLAY_STACK)
            .spawn(move || {
                info!("display: started");
                let mut consecutive_failures: u32 = 0;
                while running.load(Ordering::Relaxed) {
                    match engine.tick(uptime.ms()) {
                        Ok(()) => consecutive_failures = 0,
                        Err(e) => {
                            consecutive_failures = consecutive_failures.saturating_add(1);
                            if consecutive_failures == 1
                                || consecutive_failures.is_multiple_of(FAILURE_WARN_EVERY)
                            {
                                warn!(
                                    "display: frame dropped ({} consecutive): {}",
                                    consecutive_failures, e
                                );
                            }
                        }
                    }
                    std::thread::sleep(Duration::from_millis(DISPLAY_TICK_MS));
                }
            })?;
        self.handles.push(handle);
        Ok(())
    }

    /// `on_link_up` runs on the sync thread each time the link comes up
    /// (the board starts its HTTP server there).
    pub fn spawn_sync<R, D, T, L, F>(
        &mut self,
        mut engine: SyncEngine<R, D, T, L>,
        mut on_link_up: F,
    ) -> io::Result<()>
    where
        R: Rtc + 'static,
        D: SegmentDisplay + 'static,
        T: TimeSource + 'static,
        L: Link + 'static,
        F: FnMut() + Send + 'static,
    {
        let uptime = self.uptime;
        let running = Arc::clone(&self.running);
        let handle = std::thread::Builder::new()
            .name("sync".into())
            .stack_size(SYNC_STACK)
            .spawn(move || {
                info!("sync: started");
                while running.load(Ordering::Relaxed) {
                    let outcome = engine.poll(uptime.ms());
                    if outcome.link_came_up {
                        on_link_up();
                    }
                    std::thread::sleep(Duration::from_millis(SYNC_POLL_MS));
                }
            })?;
        self.handles.push(handle);
        Ok(())
    }

    /// Block the calling thread on the spawned contexts.
    pub fn join(self) {
        for handle in self.handles {
            let name = handle.thread().name().unwrap_or("?").to_string();
            if handle.join().is_err() {
                warn!("{}: thread panicked", name);
            }
        }
    }

    pub fn shutdown(self) {
        self.running.store(false, Ordering::Relaxed);
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{TimezoneOffset, WallClock};
    use crate::display::{clock_glyphs, DIGITS};
    use crate::hal::fakes::{FakeLink, FakeRtc, RecordingDisplay, ScriptedTimeSource};
    use crate::state::{ClockState, DisplayPhase};
    use std::sync::atomic::AtomicUsize;

    fn wait_for(timeout_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    #[test]
    fn boot_to_running_with_network_time() {
        // 2024-06-01 10:00:00 UTC
        let source = ScriptedTimeSource::new([Some(1_717_236_000)]);
        let link = FakeLink::default();
        link.set(true);
        let rtc = FakeRtc::at(WallClock::FACTORY_DEFAULT);
        let display = RecordingDisplay::default();
        let state = Arc::new(ClockState::new(rtc.clone(), display.clone()));
        state.with_time(|t| t.timezone = TimezoneOffset::new(2).unwrap());

        let link_ups = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&link_ups);

        let mut sched = Scheduler::new(Uptime::start());
        sched.spawn_display(DisplayEngine::new(Arc::clone(&state))).unwrap();
        sched
            .spawn_sync(SyncEngine::new(Arc::clone(&state), source, link), move || {
                counter.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        let noon = [DIGITS[1], DIGITS[2], DIGITS[0], DIGITS[0]];
        let running = wait_for(3_000, || {
            state.phase() == DisplayPhase::Running
                && display.frames().last().is_some_and(|f| f.0 == noon)
        });
        sched.shutdown();

        assert!(running);
        assert_eq!(link_ups.load(Ordering::Relaxed), 1);
        let synced = rtc.state().writes[0];
        assert_eq!((synced.hour, synced.minute), (12, 0));
        assert_eq!(clock_glyphs(&synced), noon);
    }
}
