use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use esp_idf_svc::nvs::{EspNvs, NvsDefault};
use log::info;

use segclock::hal::KvStore;

pub const NS: &str = "clock_cfg";

const KEY_WIFI_SSID: &str = "wifi_ssid";
const KEY_WIFI_PASS: &str = "wifi_pass";

// Filled from wifi.local.rs by build.rs when present.
const DEFAULT_WIFI_SSID: &str = match option_env!("LOCAL_WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const DEFAULT_WIFI_PASS: &str = match option_env!("LOCAL_WIFI_PASS") {
    Some(pass) => pass,
    None => "",
};

pub type SharedNvs = Arc<Mutex<EspNvs<NvsDefault>>>;

/// Read a string from NVS, returning None if the key is absent or on error.
fn nvs_get_str(nvs: &EspNvs<NvsDefault>, key: &str) -> Option<String> {
    let len = match nvs.str_len(key) {
        Ok(Some(len)) => len,
        _ => return None,
    };

    let mut buf = vec![0u8; len];
    match nvs.get_str(key, &mut buf) {
        Ok(Some(val)) => {
            let s = val.trim_end_matches('\0').to_string();
            if s.is_empty() { None } else { Some(s) }
        }
        _ => None,
    }
}

pub struct WifiCredentials {
    pub ssid: String,
    pub pass: String,
}

impl WifiCredentials {
    pub fn defaults() -> Self {
        WifiCredentials {
            ssid: DEFAULT_WIFI_SSID.to_string(),
            pass: DEFAULT_WIFI_PASS.to_string(),
        }
    }

    /// NVS override if one is saved, build-time defaults otherwise.
    pub fn load(nvs: &EspNvs<NvsDefault>) -> Self {
        let ssid = nvs_get_str(nvs, KEY_WIFI_SSID);
        let creds = match ssid {
            Some(ssid) => WifiCredentials {
                ssid,
                pass: nvs_get_str(nvs, KEY_WIFI_PASS).unwrap_or_default(),
            },
            None => Self::defaults(),
        };
        info!("NVS wifi_ssid = {:?}", creds.ssid);
        info!("NVS wifi_pass = <{} chars>", creds.pass.len());
        creds
    }

    pub fn save(nvs: &mut EspNvs<NvsDefault>, ssid: &str, pass: &str) -> Result<()> {
        nvs.set_str(KEY_WIFI_SSID, ssid)?;
        nvs.set_str(KEY_WIFI_PASS, pass)?;
        info!("NVS saved wifi_ssid={:?}", ssid);
        Ok(())
    }
}

/// Small-integer settings in the shared NVS namespace.
pub struct NvsStore(SharedNvs);

impl NvsStore {
    pub fn new(nvs: SharedNvs) -> Self {
        NvsStore(nvs)
    }
}

impl KvStore for NvsStore {
    fn get_i8(&self, key: &str) -> Result<Option<i8>> {
        let nvs = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(nvs.get_i8(key)?)
    }

    fn set_i8(&mut self, key: &str, value: i8) -> Result<()> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_i8(key, value)?;
        Ok(())
    }
}
