// Station/AP state machine. Connection state is latched by events only: a
// join request being accepted by the radio means nothing until an
// address-acquired event fires for that attempt.

use std::net::Ipv4Addr;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::config::{self, BlobStore, WifiSettings};
use crate::error::{Error, Result};
use crate::wifi::{
    ApConfig, ReconnectPolicy, ScanResult, StaCredentials, WifiDriver, WifiEvent,
    WifiNotifications, MAX_PASSWORD_LEN, MAX_SCAN_RESULTS, MAX_SSID_LEN, SCAN_TIMEOUT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaState {
    Disconnected,
    Connecting,
    Connected,
}

struct Link<D: WifiDriver> {
    driver: D,
    sta: Option<StaCredentials>,
    ap: ApConfig,
    sta_state: StaState,
    ap_started: bool,
    ip: Option<Ipv4Addr>,
    scan_results: Vec<ScanResult>,
    scan_pending: bool,
    /// Set by disconnect_station, consumed by the next disconnect event.
    suppress_reconnect: bool,
    policy: ReconnectPolicy,
}

pub struct WifiManager<D: WifiDriver> {
    link: Arc<Mutex<Link<D>>>,
    scan_cond: Arc<Condvar>,
    notifications: Arc<dyn WifiNotifications>,
    scan_timeout: Duration,
}

impl<D: WifiDriver> Clone for WifiManager<D> {
    fn clone(&self) -> Self {
        Self {
            link: self.link.clone(),
            scan_cond: self.scan_cond.clone(),
            notifications: self.notifications.clone(),
            scan_timeout: self.scan_timeout,
        }
    }
}

impl<D: WifiDriver> WifiManager<D> {
    pub fn new(driver: D, notifications: Arc<dyn WifiNotifications>) -> Self {
        Self::with_policy(driver, notifications, ReconnectPolicy::default())
    }

    pub fn with_policy(
        driver: D,
        notifications: Arc<dyn WifiNotifications>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            link: Arc::new(Mutex::new(Link {
                driver,
                sta: None,
                ap: ApConfig::default(),
                sta_state: StaState::Disconnected,
                ap_started: false,
                ip: None,
                scan_results: Vec::new(),
                scan_pending: false,
                suppress_reconnect: false,
                policy,
            })),
            scan_cond: Arc::new(Condvar::new()),
            notifications,
            scan_timeout: SCAN_TIMEOUT,
        }
    }

    #[cfg(any(test, not(feature = "esp32")))]
    pub fn set_scan_timeout(&mut self, timeout: Duration) {
        self.scan_timeout = timeout;
    }

    /// Store station credentials. Does not itself connect.
    pub fn set_station_config(&self, ssid: &str, password: &str) -> Result<()> {
        if ssid.is_empty() {
            return Err(Error::InvalidArgument("ssid is empty"));
        }
        if ssid.len() > MAX_SSID_LEN {
            return Err(Error::InvalidArgument("ssid too long"));
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(Error::InvalidArgument("password too long"));
        }

        let mut link = self.link.lock().unwrap();
        link.sta = Some(StaCredentials {
            ssid: ssid.to_string(),
            password: password.to_string(),
        });
        info!("station config set: ssid={ssid}");
        Ok(())
    }

    pub fn set_ap_config(&self, config: ApConfig) -> Result<()> {
        if config.ssid.is_empty() || config.ssid.len() > MAX_SSID_LEN {
            return Err(Error::InvalidArgument("ap ssid invalid"));
        }
        let mut link = self.link.lock().unwrap();
        info!("AP config set: ssid={}", config.ssid);
        link.ap = config;
        Ok(())
    }

    /// Issue a join request. The transition to Connected happens later,
    /// only when the address-acquired event arrives.
    pub fn connect_station(&self) -> Result<()> {
        let mut link = self.link.lock().unwrap();
        let creds = link
            .sta
            .clone()
            .ok_or(Error::InvalidState("no station SSID configured"))?;

        link.driver.apply_sta_config(&creds)?;
        link.driver.connect()?;
        link.suppress_reconnect = false;
        link.sta_state = StaState::Connecting;
        info!("connecting station to '{}'", creds.ssid);
        Ok(())
    }

    /// Request disconnect; does not wait for confirmation. Callers poll
    /// is_connected. Arms the reconnect-suppression latch for the resulting
    /// disconnect event. A rejected request leaves the latch unarmed: no
    /// disconnect event is coming for it, and the next link loss must still
    /// auto-reconnect.
    pub fn disconnect_station(&self) -> Result<()> {
        let mut link = self.link.lock().unwrap();
        link.driver.disconnect()?;
        link.suppress_reconnect = true;
        info!("station disconnect requested");
        Ok(())
    }

    pub fn start_ap(&self) -> Result<()> {
        let mut link = self.link.lock().unwrap();
        let config = link.ap.clone();
        link.driver.apply_ap_config(&config)?;
        link.driver.start_ap()?;
        info!("SoftAP start requested: ssid={}", config.ssid);
        Ok(())
    }

    pub fn stop_ap(&self) -> Result<()> {
        self.link.lock().unwrap().driver.stop_ap()
    }

    /// Issue a scan and block until the scan-done event or the timeout.
    /// The one caller-blocking wait in the core; bounded so an HTTP handler
    /// cannot hang on it.
    pub fn scan(&self, max_results: usize) -> Result<Vec<ScanResult>> {
        let mut link = self.link.lock().unwrap();
        if link.scan_pending {
            return Err(Error::InvalidState("scan already pending"));
        }
        link.driver.start_scan()?;
        link.scan_pending = true;

        let deadline = Instant::now() + self.scan_timeout;
        while link.scan_pending {
            let now = Instant::now();
            if now >= deadline {
                link.scan_pending = false;
                return Err(Error::Timeout);
            }
            let (guard, _) = self
                .scan_cond
                .wait_timeout(link, deadline - now)
                .unwrap();
            link = guard;
        }

        let n = max_results.min(MAX_SCAN_RESULTS).min(link.scan_results.len());
        Ok(link.scan_results[..n].to_vec())
    }

    /// Latched connection flag: set only by the address-acquired event,
    /// cleared only by the disconnect event.
    pub fn is_connected(&self) -> bool {
        self.link.lock().unwrap().sta_state == StaState::Connected
    }

    pub fn sta_state(&self) -> StaState {
        self.link.lock().unwrap().sta_state
    }

    pub fn sta_ip(&self) -> Option<Ipv4Addr> {
        self.link.lock().unwrap().ip
    }

    /// Address of the SoftAP interface, None until the AP is up.
    pub fn ap_ip(&self) -> Option<Ipv4Addr> {
        let link = self.link.lock().unwrap();
        if link.ap_started {
            link.driver.ap_ip()
        } else {
            None
        }
    }

    pub fn ap_started(&self) -> bool {
        self.link.lock().unwrap().ap_started
    }

    pub fn station_config(&self) -> Option<StaCredentials> {
        self.link.lock().unwrap().sta.clone()
    }

    /// Single event-pump entry, called from the network-stack callback
    /// context. Must not be called from within a driver request (the driver
    /// is invoked under the same lock).
    pub fn handle_event(&self, event: WifiEvent) {
        let mut link = self.link.lock().unwrap();
        match event {
            WifiEvent::StaStarted => {
                // Radio is up; kick off the join if we have credentials
                if let Some(creds) = link.sta.clone() {
                    if link.driver.apply_sta_config(&creds).is_ok()
                        && link.driver.connect().is_ok()
                    {
                        link.sta_state = StaState::Connecting;
                    }
                }
            }
            WifiEvent::StaConnected => {
                // Associated, but not connected until an address arrives
                info!("station associated, waiting for address");
            }
            WifiEvent::StaDisconnected { reason } => {
                link.sta_state = StaState::Disconnected;
                link.ip = None;
                self.notifications.on_disconnected();

                let deliberate = link.suppress_reconnect;
                link.suppress_reconnect = false;
                if deliberate && link.policy == ReconnectPolicy::HonorExplicitDisconnect {
                    info!("station disconnected (deliberate), staying down");
                } else {
                    // Unbounded retries, no backoff: availability over
                    // channel etiquette
                    warn!("station disconnected (reason {reason}), reconnecting");
                    if link.driver.connect().is_ok() {
                        link.sta_state = StaState::Connecting;
                    }
                }
            }
            WifiEvent::GotIp(ip) => {
                link.sta_state = StaState::Connected;
                link.ip = Some(ip);
                info!("station got address {ip}");
                self.notifications.on_connected(ip);
            }
            WifiEvent::ScanDone(mut results) => {
                results.truncate(MAX_SCAN_RESULTS);
                self.notifications.on_scan_done(&results);
                // Replaced wholesale, never partially updated
                link.scan_results = results;
                link.scan_pending = false;
                self.scan_cond.notify_all();
            }
            WifiEvent::ApStarted => {
                info!("SoftAP started");
                link.ap_started = true;
            }
            WifiEvent::ApStopped => {
                info!("SoftAP stopped");
                link.ap_started = false;
            }
        }
    }

    /// Persist the AP + station credential structs as versioned blobs.
    pub fn save_config(&self, store: &mut dyn BlobStore) -> Result<()> {
        let link = self.link.lock().unwrap();
        let settings = WifiSettings {
            sta: link.sta.clone(),
            ap: link.ap.clone(),
        };
        drop(link);
        config::save_wifi_settings(store, &settings)?;
        info!("wifi config saved");
        Ok(())
    }

    /// Restore credentials from storage. An absent config is a normal
    /// first-boot condition and surfaces as NotFound, distinct from Corrupt.
    pub fn load_config(&self, store: &dyn BlobStore) -> Result<()> {
        let settings = config::load_wifi_settings(store)?;
        let mut link = self.link.lock().unwrap();
        link.sta = settings.sta;
        link.ap = settings.ap;
        info!("wifi config loaded");
        Ok(())
    }

    pub fn clear_saved_config(&self, store: &mut dyn BlobStore) -> Result<()> {
        config::clear_wifi_settings(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{DriverRequest, RecordingWifiNotifications, SimWifiDriver};
    use crate::wifi::{AuthMode, NullWifiNotifications};

    fn manager(driver: &SimWifiDriver) -> WifiManager<SimWifiDriver> {
        WifiManager::new(driver.clone(), Arc::new(NullWifiNotifications))
    }

    fn scan_result(ssid: &str) -> ScanResult {
        ScanResult {
            ssid: ssid.to_string(),
            rssi: -52,
            auth_mode: AuthMode::Wpa2,
            channel: 6,
        }
    }

    #[test]
    fn connect_requires_configured_ssid() {
        let wifi = manager(&SimWifiDriver::default());
        assert!(matches!(
            wifi.connect_station(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn empty_ssid_is_rejected() {
        let wifi = manager(&SimWifiDriver::default());
        assert!(matches!(
            wifi.set_station_config("", "pw"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            wifi.set_station_config(&"x".repeat(33), "pw"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn connected_only_after_address_acquired() {
        let driver = SimWifiDriver::default();
        let wifi = manager(&driver);
        wifi.set_station_config("home", "secret").unwrap();
        wifi.connect_station().unwrap();

        // Join request issued, association confirmed: still not connected
        assert!(!wifi.is_connected());
        wifi.handle_event(WifiEvent::StaConnected);
        assert!(!wifi.is_connected());
        assert_eq!(wifi.sta_state(), StaState::Connecting);

        wifi.handle_event(WifiEvent::GotIp(Ipv4Addr::new(192, 168, 4, 17)));
        assert!(wifi.is_connected());
        assert_eq!(wifi.sta_ip(), Some(Ipv4Addr::new(192, 168, 4, 17)));
    }

    #[test]
    fn disconnect_before_address_reconnects_exactly_once() {
        let driver = SimWifiDriver::default();
        let wifi = manager(&driver);
        wifi.set_station_config("home", "secret").unwrap();
        wifi.connect_station().unwrap();
        assert_eq!(driver.connect_count(), 1);

        wifi.handle_event(WifiEvent::StaDisconnected { reason: 201 });
        assert!(!wifi.is_connected());
        // Exactly one reconnect request per disconnect event
        assert_eq!(driver.connect_count(), 2);

        wifi.handle_event(WifiEvent::StaDisconnected { reason: 201 });
        assert_eq!(driver.connect_count(), 3);
    }

    #[test]
    fn link_loss_clears_connection_and_notifies() {
        let driver = SimWifiDriver::default();
        let notifications = Arc::new(RecordingWifiNotifications::default());
        let wifi = WifiManager::new(driver.clone(), notifications.clone());
        wifi.set_station_config("home", "secret").unwrap();
        wifi.connect_station().unwrap();
        wifi.handle_event(WifiEvent::GotIp(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(notifications.connected(), vec![Ipv4Addr::new(10, 0, 0, 2)]);

        wifi.handle_event(WifiEvent::StaDisconnected { reason: 8 });
        assert!(!wifi.is_connected());
        assert_eq!(wifi.sta_ip(), None);
        assert_eq!(notifications.disconnects(), 1);
        // Auto-reconnect puts us back into Connecting
        assert_eq!(wifi.sta_state(), StaState::Connecting);
    }

    #[test]
    fn deliberate_disconnect_suppresses_one_reconnect() {
        let driver = SimWifiDriver::default();
        let wifi = manager(&driver);
        wifi.set_station_config("home", "secret").unwrap();
        wifi.connect_station().unwrap();
        wifi.handle_event(WifiEvent::GotIp(Ipv4Addr::new(10, 0, 0, 2)));

        wifi.disconnect_station().unwrap();
        wifi.handle_event(WifiEvent::StaDisconnected { reason: 8 });
        // Latch consumed: no reconnect, machine stays down
        assert_eq!(driver.connect_count(), 1);
        assert_eq!(wifi.sta_state(), StaState::Disconnected);

        // Next unexpected drop reconnects again
        wifi.connect_station().unwrap();
        wifi.handle_event(WifiEvent::StaDisconnected { reason: 8 });
        assert_eq!(driver.connect_count(), 3);
    }

    #[test]
    fn failed_disconnect_request_does_not_arm_the_latch() {
        let driver = SimWifiDriver::default();
        let wifi = manager(&driver);
        wifi.set_station_config("home", "secret").unwrap();
        wifi.connect_station().unwrap();
        wifi.handle_event(WifiEvent::GotIp(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(driver.connect_count(), 1);

        driver.fail_next_disconnect();
        assert!(matches!(
            wifi.disconnect_station(),
            Err(Error::IoFault(_))
        ));
        assert!(wifi.is_connected());

        // A later genuine link loss still auto-reconnects
        wifi.handle_event(WifiEvent::StaDisconnected { reason: 8 });
        assert_eq!(driver.connect_count(), 2);
        assert_eq!(wifi.sta_state(), StaState::Connecting);
    }

    #[test]
    fn always_reconnect_policy_ignores_the_latch() {
        let driver = SimWifiDriver::default();
        let wifi = WifiManager::with_policy(
            driver.clone(),
            Arc::new(NullWifiNotifications),
            ReconnectPolicy::AlwaysReconnect,
        );
        wifi.set_station_config("home", "secret").unwrap();
        wifi.connect_station().unwrap();

        wifi.disconnect_station().unwrap();
        wifi.handle_event(WifiEvent::StaDisconnected { reason: 8 });
        assert_eq!(driver.connect_count(), 2);
        assert_eq!(wifi.sta_state(), StaState::Connecting);
    }

    #[test]
    fn sta_start_event_autoconnects_when_configured() {
        let driver = SimWifiDriver::default();
        let wifi = manager(&driver);

        wifi.handle_event(WifiEvent::StaStarted);
        assert_eq!(driver.connect_count(), 0);

        wifi.set_station_config("home", "secret").unwrap();
        wifi.handle_event(WifiEvent::StaStarted);
        assert_eq!(driver.connect_count(), 1);
        assert_eq!(wifi.sta_state(), StaState::Connecting);
    }

    #[test]
    fn ap_flag_follows_hardware_events_not_requests() {
        let driver = SimWifiDriver::default();
        let wifi = manager(&driver);

        wifi.start_ap().unwrap();
        assert!(!wifi.ap_started());
        assert!(driver.requests().contains(&DriverRequest::StartAp));

        wifi.handle_event(WifiEvent::ApStarted);
        assert!(wifi.ap_started());

        wifi.stop_ap().unwrap();
        assert!(wifi.ap_started());
        wifi.handle_event(WifiEvent::ApStopped);
        assert!(!wifi.ap_started());
    }

    #[test]
    fn ap_ip_tracks_the_ap_lifecycle() {
        let driver = SimWifiDriver::default();
        let wifi = manager(&driver);
        assert_eq!(wifi.ap_ip(), None);

        wifi.start_ap().unwrap();
        // Request issued but the interface is not up yet
        assert_eq!(wifi.ap_ip(), None);

        wifi.handle_event(WifiEvent::ApStarted);
        assert_eq!(wifi.ap_ip(), Some(Ipv4Addr::new(192, 168, 4, 1)));

        wifi.handle_event(WifiEvent::ApStopped);
        assert_eq!(wifi.ap_ip(), None);
    }

    #[test]
    fn scan_blocks_until_event_and_truncates() {
        let driver = SimWifiDriver::default();
        let wifi = manager(&driver);

        let pump = wifi.clone();
        let feeder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let results = (0..25).map(|i| scan_result(&format!("net{i}"))).collect();
            pump.handle_event(WifiEvent::ScanDone(results));
        });

        let results = wifi.scan(10).unwrap();
        feeder.join().unwrap();
        assert_eq!(results.len(), 10);
        assert_eq!(results[0].ssid, "net0");

        // Internal cap applies even for greedy callers; list was replaced
        // wholesale and is served from the latched copy
        let pump = wifi.clone();
        let feeder = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let results = (0..25).map(|i| scan_result(&format!("ap{i}"))).collect();
            pump.handle_event(WifiEvent::ScanDone(results));
        });
        let results = wifi.scan(100).unwrap();
        feeder.join().unwrap();
        assert_eq!(results.len(), MAX_SCAN_RESULTS);
        assert!(results.iter().all(|r| r.ssid.starts_with("ap")));
    }

    #[test]
    fn scan_times_out_after_the_window_not_before() {
        let driver = SimWifiDriver::default();
        let mut wifi = manager(&driver);
        wifi.set_scan_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let err = wifi.scan(10).unwrap_err();
        assert_eq!(err, Error::Timeout);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
