//! Network time synchronization: resolve, shift into local time, write the
//! RTC, and decide when to do it again.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::clock::{TimezoneOffset, WallClock};
use crate::debug_flags::{self, DEBUG_SYNC};
use crate::error::{BootError, SyncError};
use crate::hal::{Link, Rtc, SegmentDisplay, TimeSource};
use crate::state::ClockState;

/// Drift correction cadence while connected.
pub const RESYNC_INTERVAL_MS: u64 = 3_600_000;
/// Link recheck cadence while disconnected.
pub const RECONNECT_INTERVAL_MS: u64 = 3_600_000;
/// How long boot waits for network time before showing RTC time anyway.
pub const PROVISIONING_WINDOW_MS: u64 = 180_000;
const FAILURE_WARN_EVERY: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    ConnectionEstablished,
    TimezoneChanged,
    Periodic,
}

/// What one [`SyncEngine::poll`] did.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// The link went from down to up on this poll.
    pub link_came_up: bool,
    pub attempt: Option<(SyncTrigger, Result<WallClock, SyncError>)>,
    /// `time_ready` was forced on without network time.
    pub fell_back_to_rtc: bool,
}

pub struct SyncEngine<R, D, T, L> {
    state: Arc<ClockState<R, D>>,
    source: T,
    link: L,
    next_resync_ms: u64,
    next_reconnect_ms: u64,
    consecutive_failures: u32,
}

impl<R, D, T, L> SyncEngine<R, D, T, L>
where
    R: Rtc,
    D: SegmentDisplay,
    T: TimeSource,
    L: Link,
{
    pub fn new(state: Arc<ClockState<R, D>>, source: T, link: L) -> Self {
        SyncEngine {
            state,
            source,
            link,
            next_resync_ms: RESYNC_INTERVAL_MS,
            next_reconnect_ms: 0,
            consecutive_failures: 0,
        }
    }

    /// One synchronization attempt with the given offset.
    ///
    /// The resolve runs with no lock held; only the RTC write and the
    /// `time_ready` flip happen under the time lock.
    pub fn attempt_sync(&mut self, offset: TimezoneOffset) -> Result<WallClock, SyncError> {
        if !self.state.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let utc = self.source.resolve().ok_or(SyncError::ResolutionFailed)?;
        let local = WallClock::from_unix_with_offset(utc, offset);

        self.state.with_time(|t| {
            t.rtc.write(&local).map_err(SyncError::RtcWrite)?;
            t.time_ready = true;
            Ok(local)
        })
    }

    /// Advance the trigger state machine to `now_ms` (monotonic, from boot).
    pub fn poll(&mut self, now_ms: u64) -> PollOutcome {
        let mut outcome = PollOutcome::default();

        let mut up = self.link.is_connected();
        if !up && now_ms >= self.next_reconnect_ms {
            self.next_reconnect_ms = now_ms + RECONNECT_INTERVAL_MS;
            info!("Network down; attempting to connect");
            up = self.link.reconnect();
        }

        let was_up = self.state.with_time(|t| std::mem::replace(&mut t.connected, up));
        if up && !was_up {
            info!("Network connected");
            outcome.link_came_up = true;
        } else if !up && was_up {
            warn!("Network connection lost; RTC keeps time until it returns");
            self.next_reconnect_ms = now_ms + RECONNECT_INTERVAL_MS;
        }

        let trigger = if !up {
            None
        } else if outcome.link_came_up {
            Some(SyncTrigger::ConnectionEstablished)
        } else if self.state.take_sync_request() {
            Some(SyncTrigger::TimezoneChanged)
        } else if now_ms >= self.next_resync_ms {
            Some(SyncTrigger::Periodic)
        } else {
            None
        };

        if let Some(trigger) = trigger {
            // Whatever fired, this attempt also serves a pending request.
            self.state.take_sync_request();
            self.next_resync_ms = now_ms + RESYNC_INTERVAL_MS;
            let result = self.run_attempt(trigger);
            outcome.attempt = Some((trigger, result));
        }

        if now_ms >= PROVISIONING_WINDOW_MS {
            let forced = self.state.with_time(|t| !std::mem::replace(&mut t.time_ready, true));
            if forced {
                warn!(
                    "No network time within {}s; showing RTC time",
                    PROVISIONING_WINDOW_MS / 1000
                );
                outcome.fell_back_to_rtc = true;
            }
        }

        outcome
    }

    fn run_attempt(&mut self, trigger: SyncTrigger) -> Result<WallClock, SyncError> {
        let offset = self.state.timezone();
        if debug_flags::is_on(&DEBUG_SYNC) {
            info!("Sync ({:?}) with offset {}", trigger, offset);
        }
        let result = self.attempt_sync(offset);
        match &result {
            Ok(local) => {
                self.consecutive_failures = 0;
                info!("Time synced ({:?}): {} {}", trigger, local, offset);
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures == 1
                    || self.consecutive_failures.is_multiple_of(FAILURE_WARN_EVERY)
                {
                    warn!(
                        "Time sync failed ({} consecutive): {}",
                        self.consecutive_failures, e
                    );
                } else {
                    info!("Time sync failed ({} consecutive)", self.consecutive_failures);
                }
            }
        }
        result
    }
}

/// Boot check of the RTC chip. A silent chip is fatal; a stopped one is
/// started at [`WallClock::FACTORY_DEFAULT`].
pub fn init_rtc<R: Rtc>(rtc: &mut R) -> Result<(), BootError> {
    let running = rtc.is_running().map_err(BootError::HardwareNotFound)?;
    if running {
        info!("RTC is running");
        return Ok(());
    }
    warn!("RTC is NOT running, setting default time");
    if let Err(e) = rtc.write(&WallClock::FACTORY_DEFAULT) {
        // The chip answered the register read, so keep booting; network time may
        // still fix it.
        warn!("Failed to set RTC default time: {}", e);
    } else {
        debug!("RTC set to {}", WallClock::FACTORY_DEFAULT);
    }
    Ok(())
}
