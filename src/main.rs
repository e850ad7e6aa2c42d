// ESP32-C6 provisioning firmware core: OTA upgrade machine, Wi-Fi
// connect/reconnect machine, partition accessor, firmware verifier and
// credential persistence. The captive-portal HTTP server and the AT console
// are external collaborators that drive these machines through their
// structured APIs.

mod config;
mod error;
mod logging;
mod ota;
mod partition;
mod version;
mod wifi;

#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;
#[cfg(any(test, not(feature = "esp32")))]
mod sim;

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}

#[cfg(not(feature = "esp32"))]
fn main() -> anyhow::Result<()> {
    host::run()
}
