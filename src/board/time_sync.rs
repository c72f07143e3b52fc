use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use esp_idf_svc::sntp::{EspSntp, OperatingMode, SntpConf, SyncMode, SyncStatus};
use log::{info, warn};

use segclock::debug_flags::{self, DEBUG_SYNC};
use segclock::hal::TimeSource;

const SNTP_SERVER: &str = "pool.ntp.org";
const SNTP_FALLBACK: &str = "time.nist.gov";
const SYNC_TIMEOUT_MS: u32 = 20_000;
const POLL_INTERVAL_MS: u32 = 250;
// Anything before 2024-01-01 means the system clock was never set.
const MIN_PLAUSIBLE_UNIX: u64 = 1_704_067_200;

/// One-shot SNTP lookup.
///
/// Each resolve starts a fresh client so the result always comes from a
/// new exchange, waits for it, reads the system clock and shuts the client
/// down again. The RTC is the clock of record between lookups.
#[derive(Default)]
pub struct SntpSource;

impl TimeSource for SntpSource {
    fn resolve(&mut self) -> Option<u64> {
        let conf = SntpConf {
            servers: [SNTP_SERVER, SNTP_FALLBACK],
            sync_mode: SyncMode::Immediate,
            operating_mode: OperatingMode::Poll,
        };

        info!("Starting SNTP sync with {}", SNTP_SERVER);
        let sntp = match EspSntp::new(&conf) {
            Ok(sntp) => sntp,
            Err(e) => {
                warn!("SNTP start failed: {}", e);
                return None;
            }
        };

        let mut elapsed_ms = 0u32;
        while elapsed_ms < SYNC_TIMEOUT_MS {
            if sntp.get_sync_status() == SyncStatus::Completed {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                if now < MIN_PLAUSIBLE_UNIX {
                    warn!("SNTP completed but clock reads {}", now);
                    return None;
                }
                info!("SNTP time synchronized after {}ms", elapsed_ms);
                if debug_flags::is_on(&DEBUG_SYNC) {
                    info!("SNTP unix time {}", now);
                }
                return Some(now);
            }
            thread::sleep(Duration::from_millis(POLL_INTERVAL_MS as u64));
            elapsed_ms += POLL_INTERVAL_MS;
        }

        warn!("SNTP sync not completed within {}s", SYNC_TIMEOUT_MS / 1000);
        None
    }
}
