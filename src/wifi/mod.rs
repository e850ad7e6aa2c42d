// Wi-Fi connection state machine: station join/reconnect plus SoftAP
// lifecycle, driven by network-stack events.

pub mod manager;

pub use manager::{StaState, WifiManager};

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Scan results are bounded regardless of what the caller asks for.
pub const MAX_SCAN_RESULTS: usize = 20;

/// A scan request blocks the calling task at most this long.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaCredentials {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApConfig {
    pub ssid: String,
    pub password: String,
    pub channel: u8,
    pub max_connections: u8,
}

impl Default for ApConfig {
    fn default() -> Self {
        Self {
            ssid: "esp32-c6-setup".to_string(),
            password: String::new(),
            channel: 1,
            max_connections: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMode {
    Open,
    Wep,
    Wpa,
    Wpa2,
    WpaWpa2,
    Wpa3,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    pub rssi: i8,
    pub auth_mode: AuthMode,
    pub channel: u8,
}

/// Events translated out of the network stack. The esp backend maps raw
/// WIFI_EVENT/IP_EVENT ids onto these; tests feed them directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiEvent {
    /// Station interface came up (radio started, no join yet).
    StaStarted,
    /// Radio-level association succeeded; address negotiation still pending.
    StaConnected,
    StaDisconnected { reason: u16 },
    GotIp(Ipv4Addr),
    ScanDone(Vec<ScanResult>),
    ApStarted,
    ApStopped,
}

/// What to do when a disconnect event follows an explicit
/// `disconnect_station` call. The source event stream does not distinguish a
/// deliberate disconnect from a dropped link, so the machine keeps a latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Reconnect on every disconnect event, deliberate or not (original
    /// firmware behavior).
    AlwaysReconnect,
    /// Consume the latch set by `disconnect_station` and skip exactly one
    /// reconnect attempt.
    #[default]
    HonorExplicitDisconnect,
}

/// Requests the machine issues toward the radio. The actual state
/// transitions happen later, on events; `connect` being accepted here does
/// not mean the device is connected.
pub trait WifiDriver: Send {
    fn apply_sta_config(&mut self, creds: &StaCredentials) -> Result<()>;
    fn apply_ap_config(&mut self, config: &ApConfig) -> Result<()>;
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self) -> Result<()>;
    fn start_scan(&mut self) -> Result<()>;
    fn start_ap(&mut self) -> Result<()>;
    fn stop_ap(&mut self) -> Result<()>;
    /// Address of the SoftAP interface, queried from the network stack.
    fn ap_ip(&self) -> Option<Ipv4Addr>;
}

/// Notification sink injected by the caller. Fires synchronously from the
/// event-pump context; must not block or call back into the machine.
pub trait WifiNotifications: Send + Sync {
    fn on_connected(&self, _ip: Ipv4Addr) {}
    fn on_disconnected(&self) {}
    fn on_scan_done(&self, _results: &[ScanResult]) {}
}

pub struct NullWifiNotifications;

impl WifiNotifications for NullWifiNotifications {}
