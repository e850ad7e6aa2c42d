// OTA (Over-The-Air) update module
//
// Upgrade flow:
// 1. Caller verifies the image header (verify::verify_image)
// 2. start_upgrade opens a flash transaction against the inactive slot
// 3. write_data streams the image; the transaction checksums as it goes
// 4. finish_upgrade closes the transaction and repoints the boot selector
// 5. restart_device boots into the new slot

pub mod manager;
pub mod verify;

pub use manager::{OtaManager, OtaState};

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::partition::{Partition, PartitionTable};

/// How often the background reporter feeds the progress sink.
pub const PROGRESS_PERIOD: Duration = Duration::from_millis(100);

/// Snapshot handed to callers and to the progress sink. Plain data; the
/// HTTP/AT layer does its own serialization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OtaProgress {
    pub bytes_written: usize,
    pub total_bytes: usize,
    pub percentage: u8,
    pub in_progress: bool,
    pub status_message: String,
}

/// Flash-write transaction plus boot selector, mirroring the ESP-IDF
/// esp_ota_* handle API. One transaction open at a time; `begin` erases the
/// target slot, `end` finalizes and checks the streamed checksum.
pub trait OtaFlash: Send {
    fn begin(&mut self, target: &Partition, expected_size: usize) -> Result<()>;
    fn write(&mut self, chunk: &[u8]) -> Result<()>;
    fn end(&mut self) -> Result<()>;
    /// Discard the open transaction. Target slot contents are invalid after
    /// this and must not be marked bootable.
    fn abort(&mut self);
    /// Atomically repoint the boot selector. Either fully succeeds or leaves
    /// the previous selection intact.
    fn set_boot_partition(&mut self, target: &Partition) -> Result<()>;
}

/// Event sink injected into the OTA machine. Callbacks fire synchronously
/// from the machine's own call/task context and must not block or call back
/// into the machine.
pub trait OtaEvents: Send + Sync {
    fn on_progress(&self, _progress: &OtaProgress) {}
    fn on_complete(&self) {}
    fn on_error(&self, _error: &crate::error::Error, _message: &str) {}
}

/// Default sink that drops everything.
pub struct NullOtaEvents;

impl OtaEvents for NullOtaEvents {}

/// Device reset capability. On hardware `restart` schedules a hard reset and
/// does not return; test doubles just record the request.
pub trait Restarter: Send + Sync {
    fn restart(&self, delay: Duration);
}

/// SHA-256 over the first 4 KiB of the running firmware. Cheap identity
/// fingerprint for status reporting, not an integrity check.
pub fn firmware_hash(table: &dyn PartitionTable) -> Result<[u8; 32]> {
    let running = table.running_partition()?;
    let mut buf = [0u8; 4096];
    table.read(&running, 0, &mut buf)?;

    let mut hasher = Sha256::new();
    hasher.update(buf);
    Ok(hasher.finalize().into())
}
