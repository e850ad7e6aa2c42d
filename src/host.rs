// Host build: exercises the provisioning core against the in-memory
// backends. Useful as a smoke run during development; the real entry point
// is esp::run.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::info;

use crate::config::BlobStore;
use crate::ota::{self, verify, NullOtaEvents, OtaManager};
use crate::sim::{SimBlobStore, SimFlash, SimPartitionTable, SimRestarter, SimWifiDriver};
use crate::wifi::{AuthMode, NullWifiNotifications, ScanResult, WifiEvent, WifiManager};

pub fn run() -> Result<()> {
    crate::logging::init_logger().expect("Failed to initialize logger");
    info!("esp32-c6-provision {} (host sim)", crate::version::full_version());

    // Wi-Fi: provision, "connect", watch the machine latch on the IP event
    let driver = SimWifiDriver::default();
    let wifi = WifiManager::new(driver.clone(), Arc::new(NullWifiNotifications));
    wifi.set_station_config("sim-network", "sim-password")?;
    wifi.connect_station()?;
    wifi.handle_event(WifiEvent::StaConnected);
    wifi.handle_event(WifiEvent::GotIp(Ipv4Addr::new(192, 168, 1, 42)));
    info!(
        "station connected={} ip={:?}",
        wifi.is_connected(),
        wifi.sta_ip()
    );

    let mut store = SimBlobStore::default();
    wifi.save_config(&mut store)?;
    info!(
        "config persisted: sta blob {} bytes",
        store.get(crate::config::KEY_STA)?.map_or(0, |b| b.len())
    );

    let pump = wifi.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        pump.handle_event(WifiEvent::ScanDone(vec![ScanResult {
            ssid: "sim-network".to_string(),
            rssi: -48,
            auth_mode: AuthMode::Wpa2,
            channel: 11,
        }]));
    });
    for ap in wifi.scan(10)? {
        info!("scan: {} {} dBm ch{}", ap.ssid, ap.rssi, ap.channel);
    }

    // OTA: fake image through the full upgrade path
    let flash = SimFlash::default();
    let table = Arc::new(SimPartitionTable::dual_bank());
    let ota = OtaManager::new(
        flash.clone(),
        table.clone(),
        Arc::new(NullOtaEvents),
        Arc::new(SimRestarter::default()),
    );

    let mut image = vec![0u8; 8192];
    image[0] = verify::IMAGE_MAGIC;
    verify::verify_image(&image)?;

    ota.start_upgrade("ota_1", image.len())?;
    for chunk in image.chunks(1024) {
        ota.write_data(chunk)?;
    }
    let progress = ota.get_progress();
    info!(
        "upgrade: {}/{} bytes ({}%) - {}",
        progress.bytes_written, progress.total_bytes, progress.percentage, progress.status_message
    );
    info!("boot partition now {:?}", flash.boot_partition());
    info!(
        "running firmware hash {:02x?}...",
        &ota::firmware_hash(table.as_ref())?[..4]
    );

    Ok(())
}
