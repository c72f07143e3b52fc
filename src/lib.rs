//! NTP-corrected real-time clock on a four-digit seven-segment display.
//!
//! The engine is platform independent: everything is generic over the
//! collaborator traits in [`hal`], and the ESP-IDF board layer in the
//! binary wires in the real drivers.

pub mod clock;
pub mod console;
pub mod debug_flags;
pub mod display;
pub mod error;
pub mod hal;
pub mod http;
pub mod scheduler;
pub mod state;
pub mod sync;
pub mod tz_config;
