// In-memory backends for host builds and tests. Same traits the esp
// backends implement, minus the hardware.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::BlobStore;
use crate::error::{Error, Result};
use crate::ota::{OtaEvents, OtaFlash, OtaProgress, Restarter};
use crate::partition::{Partition, PartitionKind, PartitionTable};
use crate::wifi::{ApConfig, ScanResult, StaCredentials, WifiDriver, WifiNotifications};

fn label(name: &str) -> crate::partition::PartitionName {
    name.try_into().expect("partition label fits 16 bytes")
}

// ---------------------------------------------------------------------------
// Partition table

pub struct SimPartitionTable {
    partitions: Vec<Partition>,
    contents: HashMap<String, Vec<u8>>,
}

impl SimPartitionTable {
    /// The standard dual-bank OTA layout: NVS + two 1 MiB app slots, with
    /// ota_0 running.
    pub fn dual_bank() -> Self {
        Self {
            partitions: vec![
                Partition {
                    name: label("nvs"),
                    kind: PartitionKind::Data,
                    subtype: 0x02,
                    size: 0x6000,
                    address: 0x9000,
                    running: false,
                },
                Partition {
                    name: label("ota_0"),
                    kind: PartitionKind::App,
                    subtype: 0x10,
                    size: 1_048_576,
                    address: 0x10000,
                    running: true,
                },
                Partition {
                    name: label("ota_1"),
                    kind: PartitionKind::App,
                    subtype: 0x11,
                    size: 1_048_576,
                    address: 0x110000,
                    running: false,
                },
            ],
            contents: HashMap::new(),
        }
    }

    pub fn set_contents(&mut self, name: &str, data: Vec<u8>) {
        self.contents.insert(name.to_string(), data);
    }
}

impl PartitionTable for SimPartitionTable {
    fn list(&self) -> Result<Vec<Partition>> {
        Ok(self.partitions.clone())
    }

    fn read(&self, partition: &Partition, offset: u32, buf: &mut [u8]) -> Result<()> {
        if offset as usize + buf.len() > partition.size as usize {
            return Err(Error::IoFault("read past end of partition".into()));
        }
        buf.fill(0);
        if let Some(data) = self.contents.get(partition.name.as_str()) {
            let start = (offset as usize).min(data.len());
            let n = buf.len().min(data.len() - start);
            buf[..n].copy_from_slice(&data[start..start + n]);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OTA flash

#[derive(Default)]
struct FlashState {
    open: bool,
    target: Option<String>,
    written: Vec<u8>,
    boot_partition: Option<String>,
    aborted: bool,
    begin_count: usize,
    fail_next_write: bool,
    fail_next_end: bool,
    fail_next_set_boot: bool,
}

/// Fake flash transaction. Clones share state so a test can keep a handle
/// after handing the flash to the OTA machine.
#[derive(Clone, Default)]
pub struct SimFlash {
    state: Arc<Mutex<FlashState>>,
}

impl SimFlash {
    pub fn begin_count(&self) -> usize {
        self.state.lock().unwrap().begin_count
    }

    pub fn written_len(&self) -> usize {
        self.state.lock().unwrap().written.len()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn boot_partition(&self) -> Option<String> {
        self.state.lock().unwrap().boot_partition.clone()
    }

    pub fn aborted(&self) -> bool {
        self.state.lock().unwrap().aborted
    }

    pub fn fail_next_write(&self) {
        self.state.lock().unwrap().fail_next_write = true;
    }

    pub fn fail_next_end(&self) {
        self.state.lock().unwrap().fail_next_end = true;
    }

    pub fn fail_next_set_boot(&self) {
        self.state.lock().unwrap().fail_next_set_boot = true;
    }
}

impl OtaFlash for SimFlash {
    fn begin(&mut self, target: &Partition, _expected_size: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.open = true;
        state.target = Some(target.name.to_string());
        state.written.clear();
        state.aborted = false;
        state.begin_count += 1;
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(Error::IoFault("no open transaction".into()));
        }
        if std::mem::take(&mut state.fail_next_write) {
            return Err(Error::IoFault("simulated write fault".into()));
        }
        state.written.extend_from_slice(chunk);
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(Error::IoFault("no open transaction".into()));
        }
        state.open = false;
        if std::mem::take(&mut state.fail_next_end) {
            return Err(Error::IoFault("simulated checksum mismatch".into()));
        }
        Ok(())
    }

    fn abort(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.open = false;
        state.aborted = true;
    }

    fn set_boot_partition(&mut self, target: &Partition) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if std::mem::take(&mut state.fail_next_set_boot) {
            return Err(Error::IoFault("simulated otadata fault".into()));
        }
        state.boot_partition = Some(target.name.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Restarter + event sinks

#[derive(Clone, Default)]
pub struct SimRestarter {
    requested: Arc<Mutex<Option<Duration>>>,
}

impl SimRestarter {
    pub fn requested(&self) -> Option<Duration> {
        *self.requested.lock().unwrap()
    }
}

impl Restarter for SimRestarter {
    fn restart(&self, delay: Duration) {
        *self.requested.lock().unwrap() = Some(delay);
    }
}

#[derive(Default)]
pub struct RecordingOtaEvents {
    progress: Mutex<Vec<OtaProgress>>,
    completions: Mutex<usize>,
    errors: Mutex<Vec<Error>>,
}

impl RecordingOtaEvents {
    pub fn progress_reports(&self) -> Vec<OtaProgress> {
        self.progress.lock().unwrap().clone()
    }

    pub fn completions(&self) -> usize {
        *self.completions.lock().unwrap()
    }

    pub fn errors(&self) -> Vec<Error> {
        self.errors.lock().unwrap().clone()
    }
}

impl OtaEvents for RecordingOtaEvents {
    fn on_progress(&self, progress: &OtaProgress) {
        self.progress.lock().unwrap().push(progress.clone());
    }

    fn on_complete(&self) {
        *self.completions.lock().unwrap() += 1;
    }

    fn on_error(&self, error: &Error, _message: &str) {
        self.errors.lock().unwrap().push(error.clone());
    }
}

// ---------------------------------------------------------------------------
// Wi-Fi driver + notifications

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverRequest {
    ApplySta(StaCredentials),
    ApplyAp(ApConfig),
    Connect,
    Disconnect,
    StartScan,
    StartAp,
    StopAp,
}

#[derive(Clone, Default)]
pub struct SimWifiDriver {
    requests: Arc<Mutex<Vec<DriverRequest>>>,
    fail_next_disconnect: Arc<Mutex<bool>>,
}

impl SimWifiDriver {
    pub fn requests(&self) -> Vec<DriverRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fail_next_disconnect(&self) {
        *self.fail_next_disconnect.lock().unwrap() = true;
    }

    pub fn connect_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| **r == DriverRequest::Connect)
            .count()
    }

    fn push(&self, request: DriverRequest) {
        self.requests.lock().unwrap().push(request);
    }
}

impl WifiDriver for SimWifiDriver {
    fn apply_sta_config(&mut self, creds: &StaCredentials) -> Result<()> {
        self.push(DriverRequest::ApplySta(creds.clone()));
        Ok(())
    }

    fn apply_ap_config(&mut self, config: &ApConfig) -> Result<()> {
        self.push(DriverRequest::ApplyAp(config.clone()));
        Ok(())
    }

    fn connect(&mut self) -> Result<()> {
        self.push(DriverRequest::Connect);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if std::mem::take(&mut *self.fail_next_disconnect.lock().unwrap()) {
            return Err(Error::IoFault("simulated radio fault".into()));
        }
        self.push(DriverRequest::Disconnect);
        Ok(())
    }

    fn start_scan(&mut self) -> Result<()> {
        self.push(DriverRequest::StartScan);
        Ok(())
    }

    fn start_ap(&mut self) -> Result<()> {
        self.push(DriverRequest::StartAp);
        Ok(())
    }

    fn stop_ap(&mut self) -> Result<()> {
        self.push(DriverRequest::StopAp);
        Ok(())
    }

    fn ap_ip(&self) -> Option<Ipv4Addr> {
        // Default ESP-IDF SoftAP gateway
        Some(Ipv4Addr::new(192, 168, 4, 1))
    }
}

#[derive(Default)]
pub struct RecordingWifiNotifications {
    connected: Mutex<Vec<Ipv4Addr>>,
    disconnects: Mutex<usize>,
    scans: Mutex<Vec<Vec<ScanResult>>>,
}

impl RecordingWifiNotifications {
    pub fn connected(&self) -> Vec<Ipv4Addr> {
        self.connected.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> usize {
        *self.disconnects.lock().unwrap()
    }

    pub fn scan_batches(&self) -> Vec<Vec<ScanResult>> {
        self.scans.lock().unwrap().clone()
    }
}

impl WifiNotifications for RecordingWifiNotifications {
    fn on_connected(&self, ip: Ipv4Addr) {
        self.connected.lock().unwrap().push(ip);
    }

    fn on_disconnected(&self) {
        *self.disconnects.lock().unwrap() += 1;
    }

    fn on_scan_done(&self, results: &[ScanResult]) {
        self.scans.lock().unwrap().push(results.to_vec());
    }
}

// ---------------------------------------------------------------------------
// Blob store

#[derive(Default)]
pub struct SimBlobStore {
    map: HashMap<String, Vec<u8>>,
    fail_next: bool,
}

impl SimBlobStore {
    pub fn fail_next(&mut self) {
        self.fail_next = true;
    }
}

impl BlobStore for SimBlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(Error::IoFault("simulated nvs fault".into()));
        }
        self.map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn erase_all(&mut self) -> Result<()> {
        self.map.clear();
        Ok(())
    }
}
