// Flash partition model and table accessor.
//
// Partitions are enumerated from static device configuration; the core never
// creates or destroys them at runtime. The standard dual-bank OTA layout has
// two application slots (ota_0 / ota_1) that alternate as upgrade targets.

use crate::error::{Error, Result};

/// Partition labels are at most 16 bytes in the ESP-IDF partition table.
pub const MAX_LABEL_LEN: usize = 16;

pub type PartitionName = heapless::String<MAX_LABEL_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    App,
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: PartitionName,
    pub kind: PartitionKind,
    pub subtype: u8,
    pub size: u32,
    pub address: u32,
    /// True for the application partition currently executing.
    pub running: bool,
}

impl Partition {
    pub fn is_app(&self) -> bool {
        self.kind == PartitionKind::App
    }
}

/// Access to the device partition table. Implemented against the ESP-IDF
/// partition API on target and against an in-memory table in tests/sim.
pub trait PartitionTable: Send {
    /// Enumerate all partitions. Fails only on a storage-driver fault.
    fn list(&self) -> Result<Vec<Partition>>;

    /// Read raw bytes out of a partition (used for firmware identity hashing).
    fn read(&self, partition: &Partition, offset: u32, buf: &mut [u8]) -> Result<()>;

    /// The application partition currently executing. `NotFound` here means
    /// the table violates the one-running-app invariant; unreachable on a
    /// correctly flashed device.
    fn running_partition(&self) -> Result<Partition> {
        self.list()?
            .into_iter()
            .find(|p| p.is_app() && p.running)
            .ok_or_else(|| Error::NotFound("running partition".into()))
    }

    fn find(&self, name: &str) -> Result<Partition> {
        self.list()?
            .into_iter()
            .find(|p| p.name.as_str() == name)
            .ok_or_else(|| Error::NotFound(format!("partition '{name}'")))
    }

    /// The "other" application slot relative to the running one.
    fn next_update_partition(&self) -> Result<Partition> {
        let running = self.running_partition()?;
        self.list()?
            .into_iter()
            .find(|p| p.is_app() && p.address != running.address)
            .ok_or_else(|| Error::NotFound("update partition".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimPartitionTable;

    #[test]
    fn next_update_partition_is_the_other_app_slot() {
        let table = SimPartitionTable::dual_bank();
        let running = table.running_partition().unwrap();
        let next = table.next_update_partition().unwrap();
        assert_eq!(running.name.as_str(), "ota_0");
        assert_eq!(next.name.as_str(), "ota_1");
        assert_ne!(next.address, running.address);
        assert!(next.is_app());
    }

    #[test]
    fn find_reports_missing_partition() {
        let table = SimPartitionTable::dual_bank();
        assert!(table.find("ota_1").is_ok());
        assert!(matches!(table.find("factory"), Err(Error::NotFound(_))));
    }

    #[test]
    fn exactly_one_running_app_partition() {
        let table = SimPartitionTable::dual_bank();
        let running: Vec<_> = table
            .list()
            .unwrap()
            .into_iter()
            .filter(|p| p.is_app() && p.running)
            .collect();
        assert_eq!(running.len(), 1);
    }
}
