// BlobStore over the default NVS partition, namespace "wifi_config".

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use crate::config::{BlobStore, KEY_AP, KEY_STA, NVS_NAMESPACE};
use crate::error::{Error, Result};

// Versioned config blobs are small; 512 bytes is plenty of headroom
const MAX_BLOB_LEN: usize = 512;

pub struct EspNvsStore {
    nvs: EspNvs<NvsDefault>,
}

impl EspNvsStore {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)
            .map_err(|e| Error::IoFault(format!("nvs open: {e}")))?;
        Ok(Self { nvs })
    }
}

impl BlobStore for EspNvsStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut buf = [0u8; MAX_BLOB_LEN];
        match self.nvs.get_blob(key, &mut buf) {
            Ok(Some(data)) => Ok(Some(data.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::IoFault(format!("nvs get {key}: {e}"))),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.nvs
            .set_blob(key, value)
            .map_err(|e| Error::IoFault(format!("nvs set {key}: {e}")))
    }

    fn erase_all(&mut self) -> Result<()> {
        for key in [KEY_AP, KEY_STA] {
            self.nvs
                .remove(key)
                .map_err(|e| Error::IoFault(format!("nvs remove {key}: {e}")))?;
        }
        Ok(())
    }
}
