mod config;
mod ds1307;
mod time_sync;
mod tm1637;
mod web;
mod wifi;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use esp_idf_hal::gpio::{IOPin, OutputPin};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::Hertz;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::http::server::EspHttpServer;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use log::{error, info, warn};

use segclock::console::{self, DeviceControl};
use segclock::display::DisplayEngine;
use segclock::hal::SegmentDisplay;
use segclock::scheduler::{Scheduler, Uptime};
use segclock::state::ClockState;
use segclock::sync::{init_rtc, SyncEngine};
use segclock::tz_config::TimezoneConfig;

use config::{NvsStore, SharedNvs, WifiCredentials};
use ds1307::Ds1307;
use time_sync::SntpSource;
use tm1637::Tm1637;
use wifi::WifiLink;

pub type Clock = ClockState<Ds1307, Tm1637>;
pub type TzConfig = TimezoneConfig<NvsStore, Ds1307, Tm1637>;

// ── Pins (ESP32 DevKit, wired in run()) ─────────────────────────────
// TM1637 CLK=gpio18 DIO=gpio19, DS1307 SDA=gpio21 SCL=gpio22

// ── I2C ──────────────────────────────────────────────────────────────
const I2C_FREQ_HZ: u32 = 100_000;

// ── Display ─────────────────────────────────────────────────────────
const DISPLAY_BRIGHTNESS: u8 = tm1637::MAX_BRIGHTNESS;

/// Console hooks that need NVS strings or the chip itself.
struct Board {
    nvs: Option<SharedNvs>,
}

impl Board {
    fn with_nvs(&self, f: impl FnOnce(&mut EspNvs<NvsDefault>) -> Result<()>) -> Result<()> {
        let Some(nvs) = &self.nvs else {
            anyhow::bail!("NVS unavailable; Wi-Fi settings cannot be saved");
        };
        f(&mut nvs.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl DeviceControl for Board {
    fn wifi_show(&self) {
        let creds = match &self.nvs {
            Some(nvs) => WifiCredentials::load(&nvs.lock().unwrap_or_else(PoisonError::into_inner)),
            None => WifiCredentials::defaults(),
        };
        info!("wifi ssid: {}", creds.ssid);
        let pass_len = creds.pass.len();
        info!(
            "wifi pass: {} ({} chars)",
            if pass_len == 0 { "<empty>" } else { "********" },
            pass_len
        );
    }

    fn wifi_set(&mut self, ssid: &str, pass: &str) -> Result<()> {
        self.with_nvs(|nvs| WifiCredentials::save(nvs, ssid, pass))
    }

    fn wifi_clear(&mut self) -> Result<()> {
        self.with_nvs(|nvs| WifiCredentials::save(nvs, "", ""))
    }

    fn free_heap_kb(&self) -> Option<u32> {
        Some(unsafe { esp_idf_sys::esp_get_free_heap_size() } / 1024)
    }

    fn reboot(&mut self) {
        unsafe { esp_idf_sys::esp_restart() };
    }
}

pub fn run() -> Result<()> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    info!("BOOT: segclock v{}", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    // ── 1. NVS ──
    let nvs_partition = match EspDefaultNvsPartition::take() {
        Ok(p) => Some(p),
        Err(e) => {
            warn!("NVS partition unavailable: {}", e);
            None
        }
    };
    let nvs: Option<SharedNvs> = nvs_partition.clone().and_then(|p| {
        match EspNvs::new(p, config::NS, true) {
            Ok(nvs) => Some(Arc::new(Mutex::new(nvs))),
            Err(e) => {
                warn!("NVS namespace '{}' unavailable: {}", config::NS, e);
                None
            }
        }
    });
    let creds = match &nvs {
        Some(nvs) => WifiCredentials::load(&nvs.lock().unwrap_or_else(PoisonError::into_inner)),
        None => WifiCredentials::defaults(),
    };

    // ── 2. Display ──
    let mut display = Tm1637::new(
        peripherals.pins.gpio18.downgrade_output(),
        peripherals.pins.gpio19.downgrade(),
    )?;
    display.set_brightness(DISPLAY_BRIGHTNESS);
    if let Err(e) = display.clear() {
        warn!("TM1637 clear failed: {}", e);
    }

    // ── 3. RTC ──
    let i2c_config = I2cConfig::new().baudrate(Hertz(I2C_FREQ_HZ));
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21,
        peripherals.pins.gpio22,
        &i2c_config,
    )?;
    let mut rtc = Ds1307::new(i2c);
    if let Err(e) = init_rtc(&mut rtc) {
        error!("{}", e);
        return Err(e.into());
    }

    // ── 4. Shared state + timezone ──
    let state: Arc<Clock> = Arc::new(ClockState::new(rtc, display));
    let tz_config: Arc<TzConfig> = Arc::new(TimezoneConfig::new(
        nvs.clone().map(NvsStore::new),
        Arc::clone(&state),
    ));
    tz_config.load();

    // ── 5. Console (serial interactive) ──
    console::spawn_console(Arc::clone(&tz_config), Board { nvs })?;

    // ── 6. WiFi ──
    let link = WifiLink::new(peripherals.modem, sysloop, nvs_partition, &creds.ssid, &creds.pass)?;

    // ── 7. Display + sync threads ──
    let mut scheduler = Scheduler::new(Uptime::start());
    scheduler.spawn_display(DisplayEngine::new(Arc::clone(&state)))?;

    let mut server: Option<EspHttpServer<'static>> = None;
    scheduler.spawn_sync(
        SyncEngine::new(state, SntpSource, link),
        move || {
            if server.is_some() {
                return;
            }
            match web::start(Arc::clone(&tz_config)) {
                Ok(s) => server = Some(s),
                Err(e) => warn!("HTTP server failed to start: {}", e),
            }
        },
    )?;

    scheduler.join();
    Ok(())
}
