// Partition table access via the ESP-IDF partition API.

use core::ffi::{c_void, CStr};
use std::ffi::CString;

use esp_idf_sys::{
    esp_ota_get_running_partition, esp_partition_find, esp_partition_get,
    esp_partition_iterator_release, esp_partition_next, esp_partition_read, esp_partition_t,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY, esp_partition_type_t_ESP_PARTITION_TYPE_ANY,
    esp_partition_type_t_ESP_PARTITION_TYPE_APP,
};

use crate::error::{Error, Result};
use crate::partition::{Partition, PartitionKind, PartitionTable};

/// Raw partition pointer by label. Pointers stay valid for the process
/// lifetime; the table is static device configuration.
pub(crate) fn find_raw(name: &str) -> Result<*const esp_partition_t> {
    let label = CString::new(name).map_err(|_| Error::InvalidArgument("partition name"))?;
    let it = unsafe {
        esp_partition_find(
            esp_partition_type_t_ESP_PARTITION_TYPE_ANY,
            esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
            label.as_ptr(),
        )
    };
    if it.is_null() {
        return Err(Error::NotFound(format!("partition '{name}'")));
    }
    let partition = unsafe { esp_partition_get(it) };
    unsafe { esp_partition_iterator_release(it) };
    if partition.is_null() {
        return Err(Error::NotFound(format!("partition '{name}'")));
    }
    Ok(partition)
}

fn to_partition(raw: *const esp_partition_t, running: *const esp_partition_t) -> Result<Partition> {
    let p = unsafe { &*raw };
    let label = unsafe { CStr::from_ptr(p.label.as_ptr()) }
        .to_str()
        .map_err(|_| Error::IoFault("partition label not utf-8".into()))?;
    Ok(Partition {
        name: label
            .try_into()
            .map_err(|_| Error::IoFault("partition label too long".into()))?,
        kind: if p.type_ == esp_partition_type_t_ESP_PARTITION_TYPE_APP {
            PartitionKind::App
        } else {
            PartitionKind::Data
        },
        subtype: p.subtype as u8,
        size: p.size,
        address: p.address,
        running: !running.is_null() && p.address == unsafe { (*running).address },
    })
}

pub struct EspPartitionTable;

impl PartitionTable for EspPartitionTable {
    fn list(&self) -> Result<Vec<Partition>> {
        let running = unsafe { esp_ota_get_running_partition() };
        let mut partitions = Vec::new();

        let mut it = unsafe {
            esp_partition_find(
                esp_partition_type_t_ESP_PARTITION_TYPE_ANY,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                core::ptr::null(),
            )
        };
        if it.is_null() {
            return Err(Error::IoFault("partition enumeration failed".into()));
        }
        while !it.is_null() {
            let raw = unsafe { esp_partition_get(it) };
            if !raw.is_null() {
                partitions.push(to_partition(raw, running)?);
            }
            it = unsafe { esp_partition_next(it) };
        }
        unsafe { esp_partition_iterator_release(it) };

        Ok(partitions)
    }

    fn read(&self, partition: &Partition, offset: u32, buf: &mut [u8]) -> Result<()> {
        let raw = find_raw(partition.name.as_str())?;
        let err = unsafe {
            esp_partition_read(
                raw,
                offset as usize,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
            )
        };
        if err != esp_idf_sys::ESP_OK {
            return Err(Error::IoFault(format!("esp_partition_read: {err}")));
        }
        Ok(())
    }
}
