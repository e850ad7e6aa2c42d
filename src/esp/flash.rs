// Flash-write transaction backed by the ESP-IDF OTA API. esp_ota_begin
// erases the slot, esp_ota_write streams with a running checksum, and
// esp_ota_end fails if that checksum does not hold together.

use core::ffi::c_void;

use esp_idf_sys::{
    esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_handle_t, esp_ota_set_boot_partition,
    esp_ota_write, ESP_OK,
};

use crate::error::{Error, Result};
use crate::esp::partition::find_raw;
use crate::ota::OtaFlash;
use crate::partition::Partition;

pub struct EspOtaFlash {
    handle: Option<esp_ota_handle_t>,
}

impl EspOtaFlash {
    pub fn new() -> Self {
        Self { handle: None }
    }
}

impl OtaFlash for EspOtaFlash {
    fn begin(&mut self, target: &Partition, expected_size: usize) -> Result<()> {
        let raw = find_raw(target.name.as_str())?;
        let mut handle: esp_ota_handle_t = Default::default();
        let err = unsafe { esp_ota_begin(raw, expected_size, &mut handle) };
        if err != ESP_OK {
            return Err(Error::IoFault(format!("esp_ota_begin: {err}")));
        }
        self.handle = Some(handle);
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let handle = self
            .handle
            .ok_or_else(|| Error::IoFault("no open ota handle".into()))?;
        let err =
            unsafe { esp_ota_write(handle, chunk.as_ptr() as *const c_void, chunk.len()) };
        if err != ESP_OK {
            return Err(Error::IoFault(format!("esp_ota_write: {err}")));
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::IoFault("no open ota handle".into()))?;
        let err = unsafe { esp_ota_end(handle) };
        if err != ESP_OK {
            return Err(Error::IoFault(format!("esp_ota_end: {err}")));
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe {
                esp_ota_abort(handle);
            }
        }
    }

    fn set_boot_partition(&mut self, target: &Partition) -> Result<()> {
        let raw = find_raw(target.name.as_str())?;
        // Either fully succeeds or leaves the previous selection intact;
        // the otadata entry is updated atomically by ESP-IDF
        let err = unsafe { esp_ota_set_boot_partition(raw) };
        if err != ESP_OK {
            return Err(Error::IoFault(format!("esp_ota_set_boot_partition: {err}")));
        }
        Ok(())
    }
}

impl Drop for EspOtaFlash {
    fn drop(&mut self) {
        // Leaving a handle open would leak the underlying transaction
        self.abort();
    }
}
