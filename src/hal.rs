//! Narrow contracts for the hardware and network collaborators.
//!
//! The board layer implements these over ESP-IDF drivers; tests implement
//! them in memory. Everything in the engine is generic over them, so no
//! global hardware handle is ever needed.

use anyhow::Result;

use crate::clock::WallClock;

/// Battery-backed real-time clock.
pub trait Rtc: Send {
    fn read(&mut self) -> Result<WallClock>;
    fn write(&mut self, time: &WallClock) -> Result<()>;
    /// `Err` means the chip did not answer at all.
    fn is_running(&mut self) -> Result<bool>;
}

/// Four seven-segment digits plus a colon between digits 1 and 2.
///
/// Glyph bytes use the usual segment order: bit 0 = a ... bit 6 = g.
pub trait SegmentDisplay: Send {
    fn render(&mut self, glyphs: &[u8; 4], colon_on: bool) -> Result<()>;

    fn clear(&mut self) -> Result<()> {
        self.render(&[0; 4], false)
    }
}

/// One-shot network time lookup returning seconds since the Unix epoch.
pub trait TimeSource: Send {
    fn resolve(&mut self) -> Option<u64>;
}

/// Network link as seen by the sync loop.
pub trait Link: Send {
    fn is_connected(&self) -> bool;

    /// Try to (re)establish the link. Called at boot and on the hourly
    /// recheck while disconnected; may block for the driver's own timeout.
    fn reconnect(&mut self) -> bool;
}

/// Small typed key-value store (NVS on the device).
pub trait KvStore: Send {
    fn get_i8(&self, key: &str) -> Result<Option<i8>>;
    fn set_i8(&mut self, key: &str, value: i8) -> Result<()>;
}
