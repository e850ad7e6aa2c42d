// Bridge from the ESP-IDF event loop into the core Wi-Fi machine. One
// registration per boot; the handler owns no state beyond the manager
// handle.

use core::ffi::{c_void, CStr};
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use anyhow::{bail, Result};

use crate::esp::wifi::EspWifiDriver;
use crate::wifi::{AuthMode, ScanResult, WifiEvent, WifiManager, MAX_SCAN_RESULTS};

static WIFI_MANAGER: OnceLock<WifiManager<EspWifiDriver>> = OnceLock::new();

pub fn register(manager: WifiManager<EspWifiDriver>) -> Result<()> {
    if WIFI_MANAGER.set(manager).is_err() {
        bail!("wifi event bridge already registered");
    }

    unsafe {
        use esp_idf_sys::*;
        let err = esp_event_handler_register(
            WIFI_EVENT,
            ESP_EVENT_ANY_ID,
            Some(event_handler),
            core::ptr::null_mut(),
        );
        if err != ESP_OK {
            bail!("failed to register WIFI_EVENT handler: {err}");
        }
        let err = esp_event_handler_register(
            IP_EVENT,
            ip_event_t_IP_EVENT_STA_GOT_IP as i32,
            Some(event_handler),
            core::ptr::null_mut(),
        );
        if err != ESP_OK {
            bail!("failed to register IP_EVENT handler: {err}");
        }
    }
    Ok(())
}

unsafe extern "C" fn event_handler(
    _handler_arg: *mut c_void,
    event_base: esp_idf_sys::esp_event_base_t,
    event_id: i32,
    event_data: *mut c_void,
) {
    use esp_idf_sys::*;

    let Some(manager) = WIFI_MANAGER.get() else {
        return;
    };

    if event_base == WIFI_EVENT {
        match event_id as u32 {
            wifi_event_t_WIFI_EVENT_STA_START => manager.handle_event(WifiEvent::StaStarted),
            wifi_event_t_WIFI_EVENT_STA_CONNECTED => manager.handle_event(WifiEvent::StaConnected),
            wifi_event_t_WIFI_EVENT_STA_DISCONNECTED => {
                let reason = if event_data.is_null() {
                    0
                } else {
                    (*(event_data as *const wifi_event_sta_disconnected_t)).reason as u16
                };
                manager.handle_event(WifiEvent::StaDisconnected { reason });
            }
            wifi_event_t_WIFI_EVENT_SCAN_DONE => {
                manager.handle_event(WifiEvent::ScanDone(collect_scan_results()));
            }
            wifi_event_t_WIFI_EVENT_AP_START => manager.handle_event(WifiEvent::ApStarted),
            wifi_event_t_WIFI_EVENT_AP_STOP => manager.handle_event(WifiEvent::ApStopped),
            _ => {}
        }
    } else if event_base == IP_EVENT && event_id as u32 == ip_event_t_IP_EVENT_STA_GOT_IP {
        if !event_data.is_null() {
            let event = &*(event_data as *const ip_event_got_ip_t);
            // addr is stored in network byte order
            let ip = Ipv4Addr::from(event.ip_info.ip.addr.to_ne_bytes());
            manager.handle_event(WifiEvent::GotIp(ip));
        }
    }
}

fn auth_mode_from(raw: u32) -> AuthMode {
    use esp_idf_sys::*;
    match raw {
        wifi_auth_mode_t_WIFI_AUTH_OPEN => AuthMode::Open,
        wifi_auth_mode_t_WIFI_AUTH_WEP => AuthMode::Wep,
        wifi_auth_mode_t_WIFI_AUTH_WPA_PSK => AuthMode::Wpa,
        wifi_auth_mode_t_WIFI_AUTH_WPA2_PSK => AuthMode::Wpa2,
        wifi_auth_mode_t_WIFI_AUTH_WPA_WPA2_PSK => AuthMode::WpaWpa2,
        wifi_auth_mode_t_WIFI_AUTH_WPA3_PSK => AuthMode::Wpa3,
        _ => AuthMode::Unknown,
    }
}

fn collect_scan_results() -> Vec<ScanResult> {
    use esp_idf_sys::*;

    unsafe {
        let mut count: u16 = 0;
        if esp_wifi_scan_get_ap_num(&mut count) != ESP_OK || count == 0 {
            return Vec::new();
        }
        count = count.min(MAX_SCAN_RESULTS as u16);

        let mut records: Vec<wifi_ap_record_t> =
            vec![core::mem::zeroed(); count as usize];
        if esp_wifi_scan_get_ap_records(&mut count, records.as_mut_ptr()) != ESP_OK {
            return Vec::new();
        }
        records.truncate(count as usize);

        records
            .iter()
            .map(|r| ScanResult {
                ssid: CStr::from_ptr(r.ssid.as_ptr() as *const _)
                    .to_string_lossy()
                    .into_owned(),
                rssi: r.rssi,
                auth_mode: auth_mode_from(r.authmode),
                channel: r.primary,
            })
            .collect()
    }
}
