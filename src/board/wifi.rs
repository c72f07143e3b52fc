use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use log::{info, warn};

use segclock::debug_flags::{self, DEBUG_SYNC};
use segclock::hal::Link;

const CONNECT_ATTEMPTS: u32 = 5;

/// Log WiFi/AP state from ESP-IDF internals.
fn log_wifi_diag(label: &str) {
    unsafe {
        let mut mode: esp_idf_sys::wifi_mode_t = 0;
        let mode_str = if esp_idf_sys::esp_wifi_get_mode(&mut mode) == esp_idf_sys::ESP_OK {
            match mode {
                x if x == esp_idf_sys::wifi_mode_t_WIFI_MODE_STA => "STA",
                x if x == esp_idf_sys::wifi_mode_t_WIFI_MODE_AP => "AP",
                x if x == esp_idf_sys::wifi_mode_t_WIFI_MODE_APSTA => "AP+STA",
                _ => "?",
            }
        } else {
            "err"
        };

        let mut ap_info: esp_idf_sys::wifi_ap_record_t = core::mem::zeroed();
        let ap_rc = esp_idf_sys::esp_wifi_sta_get_ap_info(&mut ap_info);
        if ap_rc == esp_idf_sys::ESP_OK {
            info!(
                "WiFi [{}]: mode={} assoc=YES rssi={} ch={}",
                label, mode_str, ap_info.rssi, ap_info.primary
            );
        } else {
            info!("WiFi [{}]: mode={} assoc=NO (ap_info err={})", label, mode_str, ap_rc);
        }
    }
}

/// Station-mode Wi-Fi as the sync loop's [`Link`].
///
/// Construction only configures the radio; the first
/// [`Link::reconnect`] from the sync thread does the actual association.
pub struct WifiLink {
    wifi: Box<EspWifi<'static>>,
    sysloop: EspSystemEventLoop,
    ssid: String,
}

impl WifiLink {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
        ssid: &str,
        password: &str,
    ) -> Result<Self> {
        let mut esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;

        let auth = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };

        let mut wifi_ssid = heapless::String::<32>::new();
        let mut wifi_pass = heapless::String::<64>::new();
        if wifi_ssid.push_str(ssid).is_err() || wifi_pass.push_str(password).is_err() {
            warn!("WiFi credentials too long; SSID max 32, password max 64 bytes");
        }

        esp_wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: wifi_ssid,
            password: wifi_pass,
            auth_method: auth,
            ..Default::default()
        }))?;

        Ok(WifiLink {
            wifi: Box::new(esp_wifi),
            sysloop,
            ssid: ssid.to_string(),
        })
    }

    fn connect_with_retries(&mut self) -> Result<bool> {
        let mut blocking_wifi = BlockingWifi::wrap(self.wifi.as_mut(), self.sysloop.clone())?;
        let _ = blocking_wifi.start();
        info!("WiFi connecting to '{}'...", self.ssid);

        let mut connected = false;
        for attempt in 1..=CONNECT_ATTEMPTS {
            let t0 = unsafe { esp_idf_sys::esp_timer_get_time() };
            match blocking_wifi.connect() {
                Ok(_) => {
                    let elapsed_ms = (unsafe { esp_idf_sys::esp_timer_get_time() } - t0) / 1000;
                    info!("WiFi connect OK on attempt {} ({}ms)", attempt, elapsed_ms);
                    if debug_flags::is_on(&DEBUG_SYNC) {
                        log_wifi_diag(&format!("attempt {} OK", attempt));
                    }
                    connected = true;
                    break;
                }
                Err(e) => {
                    let elapsed_ms = (unsafe { esp_idf_sys::esp_timer_get_time() } - t0) / 1000;
                    warn!(
                        "WiFi connect attempt {}/{} failed after {}ms: {}",
                        attempt, CONNECT_ATTEMPTS, elapsed_ms, e
                    );
                    log_wifi_diag(&format!("attempt {} FAIL", attempt));

                    if attempt < CONNECT_ATTEMPTS {
                        // Full stop/start cycle to reset radio state
                        let _ = blocking_wifi.disconnect();
                        blocking_wifi.stop().ok();
                        std::thread::sleep(std::time::Duration::from_millis(500));
                        blocking_wifi.start().ok();
                        std::thread::sleep(std::time::Duration::from_millis(300));
                    }
                }
            }
        }

        if !connected {
            return Ok(false);
        }

        info!("WiFi associated, waiting for IP address...");
        blocking_wifi.wait_netif_up()?;
        let ip_info = blocking_wifi.wifi().sta_netif().get_ip_info()?;
        info!("WiFi connected, IP: {}", ip_info.ip);
        Ok(true)
    }
}

impl Link for WifiLink {
    fn is_connected(&self) -> bool {
        self.wifi.is_connected().unwrap_or(false)
    }

    fn reconnect(&mut self) -> bool {
        if self.ssid.is_empty() {
            warn!("No WiFi SSID configured (use console: wifi set <ssid> <pass>)");
            return false;
        }
        match self.connect_with_retries() {
            Ok(true) => true,
            Ok(false) => {
                warn!("WiFi failed after {} attempts; will retry later", CONNECT_ATTEMPTS);
                false
            }
            Err(e) => {
                warn!("WiFi error: {}", e);
                false
            }
        }
    }
}
