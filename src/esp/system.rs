// Device-level side effects: hard reset and boot diagnostics.

use std::time::Duration;

use esp_idf_hal::delay::FreeRtos;
use log::warn;

use crate::ota::Restarter;

/// Hard reset via esp_restart. True point of no return: the call never
/// comes back.
pub struct EspRestarter;

impl Restarter for EspRestarter {
    fn restart(&self, delay: Duration) {
        warn!("device restarting in {} ms", delay.as_millis());
        FreeRtos::delay_ms(delay.as_millis() as u32);
        unsafe {
            esp_idf_sys::esp_restart();
        }
    }
}

pub fn reset_reason() -> &'static str {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };
    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => "power-on",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => "software reset (likely OTA)",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => "panic",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT => "interrupt watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT => "task watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => "deep sleep wake",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => "brownout",
        _ => "other",
    }
}

/// Version string baked into the running image's app descriptor.
pub fn app_version() -> String {
    unsafe {
        let desc = esp_idf_sys::esp_app_get_description();
        if desc.is_null() {
            return crate::version::full_version();
        }
        core::ffi::CStr::from_ptr((*desc).version.as_ptr())
            .to_string_lossy()
            .into_owned()
    }
}
