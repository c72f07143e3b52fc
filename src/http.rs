//! HTTP control surface: the configuration page, the live time readout and
//! the timezone form.
//!
//! Handlers here are plain functions from request data to a [`Reply`]; the
//! board's server only moves bytes in and out.

use std::fmt::Write as _;

use log::{info, warn};

use crate::clock::TimezoneOffset;
use crate::debug_flags::{self, DEBUG_HTTP};
use crate::error::ConfigError;
use crate::hal::{KvStore, Rtc, SegmentDisplay};
use crate::state::ClockState;
use crate::tz_config::TimezoneConfig;

const INDEX_HTML: &str = include_str!("index.html");
const OPTIONS_MARKER: &str = "%OPTIONS%";

pub const MAX_FORM_BODY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Reply {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Reply {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    pub fn page(status: u16, message: &str) -> Self {
        Reply {
            status,
            content_type: "text/html; charset=utf-8",
            body: format!(
                "<html><body><h1>{}</h1><a href='/'>Back</a></body></html>",
                message
            ),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "",
        }
    }
}

/// `GET /`
pub fn index<R: Rtc, D: SegmentDisplay>(state: &ClockState<R, D>) -> Reply {
    let current = state.timezone();
    let mut options = String::new();
    for offset in TimezoneOffset::all() {
        let selected = if offset == current { " selected" } else { "" };
        let _ = writeln!(
            options,
            "      <option value=\"{}\"{}>{}</option>",
            offset.hours(),
            selected,
            offset
        );
    }
    Reply {
        status: 200,
        content_type: "text/html; charset=utf-8",
        body: INDEX_HTML.replacen(OPTIONS_MARKER, options.trim_end(), 1),
    }
}

/// `GET /getTime`: RTC local time as `HH:MM:SS`.
pub fn get_time<R: Rtc, D: SegmentDisplay>(state: &ClockState<R, D>) -> Reply {
    match state.current_wall_clock() {
        Ok(now) => {
            if debug_flags::is_on(&DEBUG_HTTP) {
                info!("http: getTime -> {}", now);
            }
            Reply::text(200, now.hms().as_str())
        }
        Err(e) => {
            warn!("http: getTime RTC read failed: {}", e);
            Reply::text(503, "RTC unavailable")
        }
    }
}

/// `POST /setTimezone` with a url-encoded `timezone=<hours>` body.
///
/// Only validates and records the change; the resync happens on the sync
/// thread afterwards.
pub fn set_timezone<S, R, D>(config: &TimezoneConfig<S, R, D>, body: &[u8]) -> Reply
where
    S: KvStore,
    R: Rtc,
    D: SegmentDisplay,
{
    let body = String::from_utf8_lossy(body);
    if debug_flags::is_on(&DEBUG_HTTP) {
        info!("http: setTimezone body={:?}", body);
    }
    let Some(raw) = form_value(&body, "timezone") else {
        return Reply::page(400, "Missing timezone parameter");
    };
    let Ok(hours) = raw.trim().parse::<i32>() else {
        warn!("http: unparsable timezone {:?}", raw);
        return Reply::page(400, "Invalid timezone");
    };
    match config.set(hours) {
        Ok(()) => Reply::page(200, "Timezone updated, resyncing time"),
        Err(e @ ConfigError::InvalidOffset(_)) => {
            warn!("http: {}", e);
            Reply::page(400, "Invalid timezone")
        }
        Err(e) => {
            warn!("http: {}", e);
            Reply::page(500, "Could not save timezone")
        }
    }
}

/// Value of `key` in an `application/x-www-form-urlencoded` body.
pub fn form_value(body: &str, key: &str) -> Option<String> {
    body.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        (percent_decode(name) == key).then(|| percent_decode(value))
    })
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::WallClock;
    use crate::hal::fakes::{FakeRtc, MemStore, RecordingDisplay};
    use std::sync::Arc;

    type Config = TimezoneConfig<MemStore, FakeRtc, RecordingDisplay>;

    fn rig(rtc: FakeRtc) -> (MemStore, Config) {
        let store = MemStore::default();
        let state = Arc::new(ClockState::new(rtc, RecordingDisplay::default()));
        let config = TimezoneConfig::new(Some(store.clone()), state);
        config.load();
        (store, config)
    }

    #[test]
    fn get_time_formats_rtc() {
        let rtc = FakeRtc::at(WallClock { year: 2024, month: 6, day: 1, hour: 9, minute: 4, second: 7 });
        let (_, config) = rig(rtc);
        let reply = get_time(config.state());
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, "09:04:07");
    }

    #[test]
    fn get_time_reports_rtc_failure() {
        let rtc = FakeRtc::at(WallClock::FACTORY_DEFAULT);
        rtc.state().fail_reads = true;
        let (_, config) = rig(rtc);
        assert_eq!(get_time(config.state()).status, 503);
    }

    #[test]
    fn set_timezone_applies_and_requests_resync() {
        let (store, config) = rig(FakeRtc::at(WallClock::FACTORY_DEFAULT));
        let reply = set_timezone(&config, b"timezone=-5");
        assert_eq!(reply.status, 200);
        assert_eq!(config.current().hours(), -5);
        assert!(config.state().snapshot().sync_requested);
        assert_eq!(store.value("timezone"), Some(-5));
    }

    #[test]
    fn out_of_range_timezone_is_rejected() {
        let (store, config) = rig(FakeRtc::at(WallClock::FACTORY_DEFAULT));
        config.set(1).unwrap();
        config.state().take_sync_request();

        let reply = set_timezone(&config, b"timezone=99");
        assert_eq!(reply.status, 400);
        assert_eq!(config.current().hours(), 1);
        assert!(!config.state().snapshot().sync_requested);
        assert_eq!(store.value("timezone"), Some(1));
    }

    #[test]
    fn malformed_forms_are_bad_requests() {
        let (_, config) = rig(FakeRtc::at(WallClock::FACTORY_DEFAULT));
        let bodies: [&[u8]; 5] = [b"", b"tz=3", b"timezone=", b"timezone=abc", b"timezone=2.5"];
        for body in bodies {
            assert_eq!(set_timezone(&config, body).status, 400, "{:?}", body);
        }
        assert_eq!(config.current(), TimezoneOffset::UTC);
        assert!(!config.state().snapshot().sync_requested);
    }

    #[test]
    fn persist_failure_is_server_error() {
        let (store, config) = rig(FakeRtc::at(WallClock::FACTORY_DEFAULT));
        store.set_fail_writes(true);
        assert_eq!(set_timezone(&config, b"timezone=4").status, 500);
        assert_eq!(config.current(), TimezoneOffset::UTC);
    }

    #[test]
    fn index_marks_current_offset() {
        let (_, config) = rig(FakeRtc::at(WallClock::FACTORY_DEFAULT));
        config.set(3).unwrap();
        let page = index(config.state());
        assert_eq!(page.status, 200);
        assert!(!page.body.contains(OPTIONS_MARKER));
        assert!(page.body.contains("<option value=\"3\" selected>UTC+03:00</option>"));
        assert_eq!(page.body.matches("<option ").count(), 27);
        assert_eq!(page.body.matches(" selected").count(), 1);
    }

    #[test]
    fn form_values_are_decoded() {
        assert_eq!(form_value("a=1&timezone=%2D7", "timezone").as_deref(), Some("-7"));
        assert_eq!(form_value("timezone=%2B3", "timezone").as_deref(), Some("+3"));
        assert_eq!(form_value("x=a+b", "x").as_deref(), Some("a b"));
        assert_eq!(form_value("x=100%", "x").as_deref(), Some("100%"));
        assert_eq!(form_value("x=1", "timezone"), None);
    }
}
