//! Shared clock state, split into two independent lock domains.
//!
//! The *time* domain owns the RTC handle and every flag the sync side
//! writes. The *display* domain owns the display handle and the blink and
//! animation state. Access only goes through [`ClockState::with_time`] and
//! [`ClockState::with_display`]; a guard never escapes its closure, and no
//! caller takes one domain from inside the other.

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::clock::{TimezoneOffset, WallClock};
use crate::hal::{Rtc, SegmentDisplay};

pub struct TimeDomain<R> {
    pub rtc: R,
    pub connected: bool,
    pub time_ready: bool,
    pub sync_requested: bool,
    pub timezone: TimezoneOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayPhase {
    /// Boot animation; no usable time yet.
    Loading,
    /// Display blanked after the handoff, until the given tick time (ms).
    Settling { until_ms: u64 },
    /// Live clock. Never left once entered.
    Running,
}

pub struct DisplayDomain<D> {
    pub display: D,
    pub colon_on: bool,
    pub frame: u8,
    pub phase: DisplayPhase,
}

/// Consistent copy of both domains for status reporting. Each half is read
/// under its own lock, one after the other.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub connected: bool,
    pub time_ready: bool,
    pub sync_requested: bool,
    pub timezone: TimezoneOffset,
    pub phase: DisplayPhase,
    pub colon_on: bool,
}

pub struct ClockState<R, D> {
    time: Mutex<TimeDomain<R>>,
    display: Mutex<DisplayDomain<D>>,
}

// Both domains hold plain values that stay coherent after a panicking
// writer, so a poisoned lock is taken over rather than propagated.
fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<R: Rtc, D: SegmentDisplay> ClockState<R, D> {
    pub fn new(rtc: R, display: D) -> Self {
        ClockState {
            time: Mutex::new(TimeDomain {
                rtc,
                connected: false,
                time_ready: false,
                sync_requested: false,
                timezone: TimezoneOffset::UTC,
            }),
            display: Mutex::new(DisplayDomain {
                display,
                colon_on: true,
                frame: 0,
                phase: DisplayPhase::Loading,
            }),
        }
    }

    /// Run `f` under the time lock.
    pub fn with_time<T>(&self, f: impl FnOnce(&mut TimeDomain<R>) -> T) -> T {
        f(&mut relock(&self.time))
    }

    /// Run `f` under the display lock.
    pub fn with_display<T>(&self, f: impl FnOnce(&mut DisplayDomain<D>) -> T) -> T {
        f(&mut relock(&self.display))
    }

    /// RTC snapshot for readers outside the engines (HTTP, console).
    pub fn current_wall_clock(&self) -> Result<WallClock> {
        self.with_time(|t| t.rtc.read())
    }

    pub fn is_time_ready(&self) -> bool {
        self.with_time(|t| t.time_ready)
    }

    pub fn is_connected(&self) -> bool {
        self.with_time(|t| t.connected)
    }

    pub fn timezone(&self) -> TimezoneOffset {
        self.with_time(|t| t.timezone)
    }

    /// Ask the sync loop for a resync on its next poll.
    pub fn request_sync(&self) {
        self.with_time(|t| t.sync_requested = true);
    }

    /// Consume a pending resync request. Returns whether one was pending.
    pub fn take_sync_request(&self) -> bool {
        self.with_time(|t| std::mem::take(&mut t.sync_requested))
    }

    pub fn phase(&self) -> DisplayPhase {
        self.with_display(|d| d.phase)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let (connected, time_ready, sync_requested, timezone) = self.with_time(|t| {
            (t.connected, t.time_ready, t.sync_requested, t.timezone)
        });
        let (phase, colon_on) = self.with_display(|d| (d.phase, d.colon_on));
        StatusSnapshot {
            connected,
            time_ready,
            sync_requested,
            timezone,
            phase,
            colon_on,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::fakes::{FakeRtc, RecordingDisplay};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn boots_with_conservative_defaults() {
        let state = ClockState::new(FakeRtc::default(), RecordingDisplay::default());
        let s = state.snapshot();
        assert!(!s.connected);
        assert!(!s.time_ready);
        assert!(!s.sync_requested);
        assert!(s.colon_on);
        assert_eq!(s.timezone, TimezoneOffset::UTC);
        assert_eq!(s.phase, DisplayPhase::Loading);
    }

    #[test]
    fn sync_request_is_consumed_once() {
        let state = ClockState::new(FakeRtc::default(), RecordingDisplay::default());
        assert!(!state.take_sync_request());
        state.request_sync();
        state.request_sync();
        assert!(state.take_sync_request());
        assert!(!state.take_sync_request());
    }

    #[test]
    fn wall_clock_snapshot_reads_rtc() {
        let rtc = FakeRtc::at(WallClock::FACTORY_DEFAULT);
        let state = ClockState::new(rtc.clone(), RecordingDisplay::default());
        assert_eq!(state.current_wall_clock().unwrap(), WallClock::FACTORY_DEFAULT);
        rtc.state().fail_reads = true;
        assert!(state.current_wall_clock().is_err());
    }

    #[test]
    fn domains_lock_independently() {
        let state = Arc::new(ClockState::new(
            FakeRtc::at(WallClock::FACTORY_DEFAULT),
            RecordingDisplay::default(),
        ));
        // Holding the time lock must not stop another thread from using
        // the display domain.
        state.with_time(|t| {
            t.time_ready = true;
            let other = Arc::clone(&state);
            let colon = thread::spawn(move || other.with_display(|d| {
                d.colon_on = !d.colon_on;
                d.colon_on
            }))
            .join()
            .unwrap();
            assert!(!colon);
        });
        assert!(state.is_time_ready());
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let state = Arc::new(ClockState::new(
            FakeRtc::default(),
            RecordingDisplay::default(),
        ));
        let other = Arc::clone(&state);
        let _ = thread::spawn(move || {
            other.with_time(|t| {
                t.connected = true;
                panic!("writer died mid-update");
            })
        })
        .join();
        assert!(state.is_connected());
    }
}
