//! Persisted timezone offset and the change-request protocol.
//!
//! Ordering is always store first, then cache: the offset in
//! [`ClockState`] only changes after the store confirmed the write. The
//! store mutex is held across the cache update so concurrent `set` calls
//! (HTTP and console) cannot leave store and cache disagreeing. Lock order
//! is store → time, never the reverse.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{info, warn};

use crate::clock::TimezoneOffset;
use crate::error::ConfigError;
use crate::hal::{KvStore, Rtc, SegmentDisplay};
use crate::state::ClockState;

pub const KEY_TIMEZONE: &str = "timezone";

pub struct TimezoneConfig<S, R, D> {
    /// `None` once the store has proven unusable: in-memory only from then on.
    store: Mutex<Option<S>>,
    state: Arc<ClockState<R, D>>,
}

impl<S, R, D> TimezoneConfig<S, R, D>
where
    S: KvStore,
    R: Rtc,
    D: SegmentDisplay,
{
    /// `store` is `None` when the board could not open persistent storage.
    pub fn new(store: Option<S>, state: Arc<ClockState<R, D>>) -> Self {
        TimezoneConfig {
            store: Mutex::new(store),
            state,
        }
    }

    fn store(&self) -> MutexGuard<'_, Option<S>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read the persisted offset into the shared state and return it.
    ///
    /// Never fails: a missing or corrupt key is replaced by UTC, and an
    /// unreadable store switches to in-memory operation.
    pub fn load(&self) -> TimezoneOffset {
        let mut slot = self.store();
        let offset = match slot.as_mut() {
            None => {
                warn!(
                    "{}",
                    ConfigError::PersistenceUnavailable(anyhow::anyhow!("no store at boot"))
                );
                TimezoneOffset::UTC
            }
            Some(store) => match store.get_i8(KEY_TIMEZONE) {
                Ok(Some(raw)) => match TimezoneOffset::new(raw as i32) {
                    Ok(offset) => {
                        info!("Loaded timezone offset: {}", offset);
                        offset
                    }
                    Err(e) => {
                        warn!("Stored timezone invalid ({}); resetting to UTC", e);
                        persist_default(store);
                        TimezoneOffset::UTC
                    }
                },
                Ok(None) => {
                    info!("No stored timezone; defaulting to UTC");
                    persist_default(store);
                    TimezoneOffset::UTC
                }
                Err(e) => {
                    warn!("{}", ConfigError::PersistenceUnavailable(e));
                    *slot = None;
                    TimezoneOffset::UTC
                }
            },
        };
        self.state.with_time(|t| t.timezone = offset);
        offset
    }

    /// Validate, persist, then apply `hours` and request a resync.
    ///
    /// On any error the active offset and the resync flag are unchanged.
    pub fn set(&self, hours: i32) -> Result<(), ConfigError> {
        let offset = TimezoneOffset::new(hours)?;
        let mut slot = self.store();
        match slot.as_mut() {
            Some(store) => {
                store
                    .set_i8(KEY_TIMEZONE, offset.hours())
                    .map_err(ConfigError::PersistError)?;
                info!("NVS saved timezone={}", offset.hours());
            }
            None => warn!("Timezone {} applied in memory only; lost on reboot", offset),
        }
        self.state.with_time(|t| {
            t.timezone = offset;
            t.sync_requested = true;
        });
        info!("New timezone set: {}", offset);
        Ok(())
    }

    /// Offset currently applied to network time.
    pub fn current(&self) -> TimezoneOffset {
        self.state.timezone()
    }

    /// Whether changes survive a reboot.
    pub fn is_persistent(&self) -> bool {
        self.store().is_some()
    }

    pub fn state(&self) -> &ClockState<R, D> {
        &self.state
    }
}

fn persist_default<S: KvStore>(store: &mut S) {
    match store.set_i8(KEY_TIMEZONE, TimezoneOffset::UTC.hours()) {
        Ok(()) => info!("NVS saved timezone=0"),
        Err(e) => warn!("Failed to persist default timezone: {}", e),
    }
}
