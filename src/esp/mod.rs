// ESP-IDF backends for the provisioning core plus the on-target entry
// point. Everything in here assumes the ESP-IDF runtime is up.

pub mod events;
pub mod flash;
pub mod nvs;
pub mod partition;
pub mod system;
pub mod wifi;

use std::sync::Arc;

use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::prelude::Peripherals;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::EspWifi;
use log::{info, warn};

use crate::error::Error;
use crate::ota::{NullOtaEvents, OtaManager};
use crate::wifi::{NullWifiNotifications, WifiManager};

// Generate ESP-IDF app descriptor
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

pub fn run() -> Result<()> {
    esp_idf_svc::sys::link_patches();
    crate::logging::init_logger().expect("Failed to initialize logger");

    info!("esp32-c6-provision {}", crate::version::full_version());
    info!("boot reason: {}", system::reset_reason());
    info!("free heap: {} bytes", unsafe {
        esp_idf_sys::esp_get_free_heap_size()
    });

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    // Brings up the wifi driver and both netifs; kept alive for the whole
    // process lifetime
    let _wifi_hw = EspWifi::new(peripherals.modem, sysloop.clone(), Some(nvs_partition.clone()))?;
    unsafe {
        use esp_idf_sys::*;
        esp_wifi_set_mode(wifi_mode_t_WIFI_MODE_APSTA);
        // Power save causes disconnects under web traffic
        esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE);
    }

    let manager = WifiManager::new(wifi::EspWifiDriver::new(), Arc::new(NullWifiNotifications));

    let mut store = nvs::EspNvsStore::new(nvs_partition)?;
    match manager.load_config(&store) {
        Ok(()) => info!("wifi config restored from NVS"),
        Err(Error::NotFound(_)) => info!("no saved wifi config (first boot)"),
        Err(Error::Corrupt(what)) => {
            warn!("saved wifi config corrupt ({what}), clearing");
            manager.clear_saved_config(&mut store)?;
        }
        Err(e) => return Err(e.into()),
    }

    // Bridge must be in place before the radio starts so STA_START kicks
    // off the join
    events::register(manager.clone())?;
    unsafe {
        esp_idf_sys::esp_wifi_start();
    }

    // No station credentials yet: open the provisioning SoftAP so the
    // captive portal can reach us
    if manager.station_config().is_none() {
        manager.start_ap()?;
    }

    let table = Arc::new(partition::EspPartitionTable);
    let ota = OtaManager::new(
        flash::EspOtaFlash::new(),
        table,
        Arc::new(NullOtaEvents),
        Arc::new(system::EspRestarter),
    );
    let _reporter = ota.spawn_progress_reporter();

    info!("provisioning core ready (firmware {})", system::app_version());

    // The HTTP/AT front-ends own the foreground from here; this task just
    // keeps the managers alive
    loop {
        FreeRtos::delay_ms(5_000);
        if ota.is_upgrading() {
            let p = ota.get_progress();
            info!("OTA {}% ({}/{})", p.percentage, p.bytes_written, p.total_bytes);
        }
    }
}
