//! Serial console on stdin.
//!
//! Commands are parsed and the clock-facing ones executed here; anything
//! that needs the radio, NVS strings or a reboot goes through
//! [`DeviceControl`], which the board implements.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::{info, warn};

use crate::debug_flags::{self, DEBUG_DISPLAY, DEBUG_HTTP, DEBUG_SYNC};
use crate::hal::{KvStore, Rtc, SegmentDisplay};
use crate::tz_config::TimezoneConfig;

const CONSOLE_STACK: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugTarget {
    Show,
    Sync,
    Display,
    Http,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    TzShow,
    TzSet(i32),
    Time,
    Sync,
    WifiShow,
    WifiSet { ssid: String, pass: String },
    WifiClear,
    Debug(DebugTarget),
    Reboot,
    /// Known command, bad arguments.
    Usage(&'static str),
    Unknown(String),
}

/// Parse one console line. `None` for blank input.
pub fn parse(line: &str) -> Option<Command> {
    let clean = line.trim().trim_end_matches('\\');
    if clean.is_empty() {
        return None;
    }
    let mut parts = clean.splitn(3, char::is_whitespace);
    let cmd = parts.next().unwrap_or("");
    let sub = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    let command = match cmd {
        "help" | "?" => Command::Help,
        "status" => Command::Status,
        "time" => Command::Time,
        "sync" => Command::Sync,
        "reboot" => Command::Reboot,
        "tz" => match sub {
            "" | "show" => Command::TzShow,
            "set" => match rest.parse::<i32>() {
                Ok(hours) => Command::TzSet(hours),
                Err(_) => Command::Usage("tz set <offset>   (whole hours, -12..14)"),
            },
            _ => Command::Usage("tz show | tz set <offset>"),
        },
        "wifi" => match sub {
            "" | "show" => Command::WifiShow,
            "clear" => Command::WifiClear,
            "set" => {
                let (ssid, pass) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let ssid = unquote(ssid);
                if ssid.is_empty() {
                    Command::Usage("wifi set <ssid> <password>")
                } else {
                    Command::WifiSet {
                        ssid: ssid.to_string(),
                        pass: unquote(pass.trim()).to_string(),
                    }
                }
            }
            _ => Command::Usage("wifi show | wifi set <ssid> <pass> | wifi clear"),
        },
        "debug" => match sub {
            "" | "show" => Command::Debug(DebugTarget::Show),
            "sync" | "ntp" => Command::Debug(DebugTarget::Sync),
            "display" | "tm1637" => Command::Debug(DebugTarget::Display),
            "http" | "web" => Command::Debug(DebugTarget::Http),
            "all" => Command::Debug(DebugTarget::All),
            _ => Command::Usage("debug sync|display|http|all|show"),
        },
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

fn unquote(s: &str) -> &str {
    s.trim_matches('"').trim_matches('\'')
}

/// Device-side operations the console can trigger.
pub trait DeviceControl: Send {
    fn wifi_show(&self);
    fn wifi_set(&mut self, ssid: &str, pass: &str) -> Result<()>;
    fn wifi_clear(&mut self) -> Result<()>;
    fn free_heap_kb(&self) -> Option<u32>;
    fn reboot(&mut self);
}

pub fn print_help() {
    info!("commands:");
    info!("  status                     - show clock and link status");
    info!("  time                       - read the RTC");
    info!("  tz show                    - show timezone offset");
    info!("  tz set <offset>            - set offset in hours (-12..14) and resync");
    info!("  sync                       - resync from network time now");
    info!("  wifi show                  - show Wi-Fi config");
    info!("  wifi set <ssid> <pass>     - set Wi-Fi credentials");
    info!("  wifi clear                 - clear Wi-Fi override");
    info!("  debug <module>             - toggle debug for module");
    info!("    modules: sync, display, http, all");
    info!("  debug show                 - show debug flag status");
    info!("  reboot                     - reboot device");
}

pub fn execute<S, R, D, B>(
    command: Command,
    config: &TimezoneConfig<S, R, D>,
    device: &mut B,
) -> Result<()>
where
    S: KvStore,
    R: Rtc,
    D: SegmentDisplay,
    B: DeviceControl,
{
    let state = config.state();
    match command {
        Command::Help => print_help(),
        Command::Status => {
            let s = state.snapshot();
            info!("wifi: {}", if s.connected { "connected" } else { "down" });
            info!("time ready: {}", s.time_ready);
            info!("display: {:?}", s.phase);
            info!(
                "timezone: {}{}",
                s.timezone,
                if config.is_persistent() { "" } else { " (not persisted)" }
            );
            info!("resync pending: {}", s.sync_requested);
            match state.current_wall_clock() {
                Ok(now) => info!("rtc: {}", now),
                Err(e) => warn!("rtc: read failed: {}", e),
            }
            if let Some(kb) = device.free_heap_kb() {
                info!("free heap: {} KB", kb);
            }
            info!("debug: {}", debug_flags::status_line());
        }
        Command::Time => {
            let now = state.current_wall_clock()?;
            info!("rtc: {} ({})", now, state.timezone());
        }
        Command::TzShow => info!("timezone: {}", config.current()),
        Command::TzSet(hours) => {
            config.set(hours)?;
            info!("timezone set to {}; resync requested", config.current());
        }
        Command::Sync => {
            state.request_sync();
            info!("resync requested");
        }
        Command::WifiShow => device.wifi_show(),
        Command::WifiSet { ssid, pass } => {
            device.wifi_set(&ssid, &pass)?;
            info!("saved: SSID='{}' pass=******** ({} chars)", ssid, pass.len());
            info!("type 'reboot' to apply");
        }
        Command::WifiClear => {
            device.wifi_clear()?;
            info!("Wi-Fi override cleared");
        }
        Command::Debug(target) => handle_debug(target),
        Command::Reboot => {
            info!("console: rebooting now");
            std::thread::sleep(Duration::from_millis(100));
            device.reboot();
        }
        Command::Usage(usage) => warn!("usage: {}", usage),
        Command::Unknown(cmd) => warn!("console: unknown command '{}' (type 'help')", cmd),
    }
    Ok(())
}

fn handle_debug(target: DebugTarget) {
    let on_off = |on: bool| if on { "ON" } else { "OFF" };
    match target {
        DebugTarget::Show => info!("debug: {}", debug_flags::status_line()),
        DebugTarget::Sync => info!("debug sync: {}", on_off(debug_flags::toggle(&DEBUG_SYNC))),
        DebugTarget::Display => {
            info!("debug display: {}", on_off(debug_flags::toggle(&DEBUG_DISPLAY)))
        }
        DebugTarget::Http => info!("debug http: {}", on_off(debug_flags::toggle(&DEBUG_HTTP))),
        DebugTarget::All => {
            // If any flag is off, turn all on; if all on, turn all off
            let any_off = [&DEBUG_SYNC, &DEBUG_DISPLAY, &DEBUG_HTTP]
                .iter()
                .any(|f| !debug_flags::is_on(f));
            for flag in [&DEBUG_SYNC, &DEBUG_DISPLAY, &DEBUG_HTTP] {
                debug_flags::set(flag, any_off);
            }
            info!("debug all: {}", on_off(any_off));
        }
    }
}

/// Byte-at-a-time line assembly for a raw serial terminal: swallows ANSI
/// escape sequences and handles backspace.
#[derive(Default)]
pub struct LineEditor {
    line: String,
    in_escape: bool,
}

impl LineEditor {
    /// Returns a completed, non-empty line on CR or LF.
    pub fn feed(&mut self, ch: u8) -> Option<String> {
        if self.in_escape {
            if ch.is_ascii_alphabetic() || ch == b'~' {
                self.in_escape = false;
            }
            return None;
        }
        match ch {
            0x1b => self.in_escape = true,
            b'\n' | b'\r' if !self.line.is_empty() => return Some(std::mem::take(&mut self.line)),
            0x7f | 0x08 => {
                self.line.pop();
            }
            c if (0x20..0x7f).contains(&c) => self.line.push(c as char),
            _ => {}
        }
        None
    }
}

pub fn spawn_console<S, R, D, B>(config: Arc<TimezoneConfig<S, R, D>>, mut device: B) -> io::Result<()>
where
    S: KvStore + 'static,
    R: Rtc + 'static,
    D: SegmentDisplay + 'static,
    B: DeviceControl + 'static,
{
    std::thread::Builder::new()
        .name("console".into())
        .stack_size(CONSOLE_STACK)
        .spawn(move || {
            info!("console: ready (type 'help'); use minicom Ctrl+A E for local echo");
            let stdin = io::stdin();
            let mut reader = stdin.lock();
            let mut editor = LineEditor::default();
            let mut buf = [0u8; 1];
            loop {
                match reader.read(&mut buf) {
                    Ok(1) => {
                        let Some(line) = editor.feed(buf[0]) else {
                            continue;
                        };
                        info!("> {}", line);
                        if let Some(command) = parse(&line) {
                            if let Err(e) = execute(command, &config, &mut device) {
                                warn!("console: error: {}", e);
                            }
                        }
                    }
                    Ok(_) => std::thread::sleep(Duration::from_millis(50)),
                    Err(_) => std::thread::sleep(Duration::from_millis(100)),
                }
            }
        })?;
    Ok(())
}
