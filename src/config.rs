// Credential persistence: AP + station configs as two blobs under fixed
// keys in one NVS namespace. Each blob carries a magic + version prefix so
// a layout change reads back as Corrupt instead of as garbage credentials.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wifi::{ApConfig, StaCredentials};

pub const NVS_NAMESPACE: &str = "wifi_config";

pub const KEY_AP: &str = "ap_config";
pub const KEY_STA: &str = "sta_config";

const BLOB_MAGIC: u8 = 0xC6;
const BLOB_VERSION: u8 = 1;

/// Key-value blob storage, one namespace per store. NVS on target, a map in
/// tests and the host sim.
pub trait BlobStore: Send {
    /// Ok(None) when the key has never been written.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<()>;
    fn erase_all(&mut self) -> Result<()>;
}

/// The credential snapshot both state machines consume at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiSettings {
    pub sta: Option<StaCredentials>,
    pub ap: ApConfig,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut blob = vec![BLOB_MAGIC, BLOB_VERSION];
    let payload =
        serde_json::to_vec(value).map_err(|e| Error::IoFault(format!("encode: {e}")))?;
    blob.extend_from_slice(&payload);
    Ok(blob)
}

fn decode<T: DeserializeOwned>(blob: &[u8]) -> Result<T> {
    if blob.len() < 2 || blob[0] != BLOB_MAGIC {
        return Err(Error::Corrupt("bad config blob magic"));
    }
    if blob[1] != BLOB_VERSION {
        return Err(Error::Corrupt("unsupported config blob version"));
    }
    serde_json::from_slice(&blob[2..]).map_err(|_| Error::Corrupt("config blob payload"))
}

pub fn save_wifi_settings(store: &mut dyn BlobStore, settings: &WifiSettings) -> Result<()> {
    store.set(KEY_AP, &encode(&settings.ap)?)?;
    store.set(KEY_STA, &encode(&settings.sta)?)?;
    Ok(())
}

/// Load the persisted snapshot. `NotFound` means nothing was ever saved (a
/// normal first boot); a present-but-unreadable blob is `Corrupt`. A missing
/// station blob alongside a valid AP blob just means the station was never
/// provisioned.
pub fn load_wifi_settings(store: &dyn BlobStore) -> Result<WifiSettings> {
    let ap_blob = store
        .get(KEY_AP)?
        .ok_or_else(|| Error::NotFound("saved wifi config".into()))?;
    let ap: ApConfig = decode(&ap_blob)?;

    let sta = match store.get(KEY_STA)? {
        Some(blob) => decode(&blob)?,
        None => None,
    };

    Ok(WifiSettings { sta, ap })
}

pub fn clear_wifi_settings(store: &mut dyn BlobStore) -> Result<()> {
    store.erase_all()
}
