// Radio requests via raw esp_wifi calls. State transitions happen in the
// core machine when the matching events come back through esp::events.

use std::net::Ipv4Addr;

use esp_idf_sys::{
    esp_netif_get_handle_from_ifkey, esp_netif_get_ip_info, esp_netif_ip_info_t,
    esp_wifi_connect, esp_wifi_disconnect, esp_wifi_scan_start, esp_wifi_set_config,
    esp_wifi_set_mode, wifi_config_t, wifi_interface_t_WIFI_IF_AP, wifi_interface_t_WIFI_IF_STA,
    wifi_mode_t_WIFI_MODE_APSTA, wifi_mode_t_WIFI_MODE_STA, ESP_OK,
};
use log::info;

use crate::error::{Error, Result};
use crate::wifi::{ApConfig, StaCredentials, WifiDriver};

fn esp_check(err: i32, what: &'static str) -> Result<()> {
    if err == ESP_OK {
        Ok(())
    } else {
        Err(Error::IoFault(format!("{what}: {err}")))
    }
}

fn copy_into(dst: &mut [u8], src: &str) {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
}

pub struct EspWifiDriver {
    _private: (),
}

impl EspWifiDriver {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl WifiDriver for EspWifiDriver {
    fn apply_sta_config(&mut self, creds: &StaCredentials) -> Result<()> {
        let mut config: wifi_config_t = unsafe { core::mem::zeroed() };
        unsafe {
            copy_into(&mut config.sta.ssid, &creds.ssid);
            copy_into(&mut config.sta.password, &creds.password);
            config.sta.threshold.authmode = if creds.password.is_empty() {
                esp_idf_sys::wifi_auth_mode_t_WIFI_AUTH_OPEN
            } else {
                esp_idf_sys::wifi_auth_mode_t_WIFI_AUTH_WPA2_PSK
            };
            config.sta.pmf_cfg.capable = true;
            config.sta.pmf_cfg.required = false;
            esp_check(
                esp_wifi_set_config(wifi_interface_t_WIFI_IF_STA, &mut config),
                "esp_wifi_set_config(sta)",
            )
        }
    }

    fn apply_ap_config(&mut self, ap: &ApConfig) -> Result<()> {
        let mut config: wifi_config_t = unsafe { core::mem::zeroed() };
        unsafe {
            copy_into(&mut config.ap.ssid, &ap.ssid);
            config.ap.ssid_len = ap.ssid.len() as u8;
            config.ap.channel = ap.channel;
            config.ap.max_connection = ap.max_connections;
            if ap.password.is_empty() {
                config.ap.authmode = esp_idf_sys::wifi_auth_mode_t_WIFI_AUTH_OPEN;
            } else {
                copy_into(&mut config.ap.password, &ap.password);
                config.ap.authmode = esp_idf_sys::wifi_auth_mode_t_WIFI_AUTH_WPA_WPA2_PSK;
            }
            esp_check(
                esp_wifi_set_config(wifi_interface_t_WIFI_IF_AP, &mut config),
                "esp_wifi_set_config(ap)",
            )
        }
    }

    fn connect(&mut self) -> Result<()> {
        esp_check(unsafe { esp_wifi_connect() }, "esp_wifi_connect")
    }

    fn disconnect(&mut self) -> Result<()> {
        esp_check(unsafe { esp_wifi_disconnect() }, "esp_wifi_disconnect")
    }

    fn start_scan(&mut self) -> Result<()> {
        // Default active scan, results collected on the SCAN_DONE event
        esp_check(
            unsafe { esp_wifi_scan_start(core::ptr::null(), false) },
            "esp_wifi_scan_start",
        )
    }

    fn start_ap(&mut self) -> Result<()> {
        info!("enabling SoftAP interface");
        esp_check(
            unsafe { esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_APSTA) },
            "esp_wifi_set_mode(apsta)",
        )
    }

    fn stop_ap(&mut self) -> Result<()> {
        info!("disabling SoftAP interface");
        esp_check(
            unsafe { esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_STA) },
            "esp_wifi_set_mode(sta)",
        )
    }

    fn ap_ip(&self) -> Option<Ipv4Addr> {
        unsafe {
            let netif = esp_netif_get_handle_from_ifkey(b"WIFI_AP_DEF\0".as_ptr() as *const _);
            if netif.is_null() {
                return None;
            }
            let mut info: esp_netif_ip_info_t = core::mem::zeroed();
            if esp_netif_get_ip_info(netif, &mut info) != ESP_OK {
                return None;
            }
            Some(Ipv4Addr::from(info.ip.addr.to_ne_bytes()))
        }
    }
}
