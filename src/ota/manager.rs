// OTA upgrade state machine.
//
// Single-session discipline: flashing is a raw, non-transactional hardware
// operation, so at most one session may be InProgress system-wide. The
// machine owns the flash transaction; the HTTP/AT layer owns chunk ordering
// (concurrent writers to one session are the caller's bug to prevent).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::ota::{OtaEvents, OtaFlash, OtaProgress, Restarter, PROGRESS_PERIOD};
use crate::partition::{Partition, PartitionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    Idle,
    InProgress,
    /// Transaction close + boot selector switch underway.
    Finishing,
    Completed,
    Failed,
    Aborted,
}

impl OtaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }
}

struct Session<F: OtaFlash> {
    flash: F,
    state: OtaState,
    target: Option<Partition>,
    total_size: usize,
    bytes_written: usize,
    status_message: String,
}

impl<F: OtaFlash> Session<F> {
    fn snapshot(&self) -> OtaProgress {
        OtaProgress {
            bytes_written: self.bytes_written,
            total_bytes: self.total_size,
            percentage: if self.total_size > 0 {
                ((self.bytes_written * 100) / self.total_size) as u8
            } else {
                0
            },
            in_progress: matches!(self.state, OtaState::InProgress | OtaState::Finishing),
            status_message: self.status_message.clone(),
        }
    }

    fn fail(&mut self, message: &str) {
        self.state = OtaState::Failed;
        self.status_message = message.to_string();
    }
}

/// Handle for the background progress reporter thread.
pub struct ProgressReporter {
    active: Arc<AtomicBool>,
}

impl ProgressReporter {
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct OtaManager<F: OtaFlash, T: PartitionTable> {
    session: Arc<Mutex<Session<F>>>,
    table: Arc<T>,
    events: Arc<dyn OtaEvents>,
    restarter: Arc<dyn Restarter>,
}

impl<F: OtaFlash, T: PartitionTable> Clone for OtaManager<F, T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            table: self.table.clone(),
            events: self.events.clone(),
            restarter: self.restarter.clone(),
        }
    }
}

impl<F: OtaFlash + 'static, T: PartitionTable + 'static> OtaManager<F, T> {
    pub fn new(
        flash: F,
        table: Arc<T>,
        events: Arc<dyn OtaEvents>,
        restarter: Arc<dyn Restarter>,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session {
                flash,
                state: OtaState::Idle,
                target: None,
                total_size: 0,
                bytes_written: 0,
                status_message: String::new(),
            })),
            table,
            events,
            restarter,
        }
    }

    /// Open an upgrade session against the named partition. Starting from a
    /// terminal state implicitly resets the previous session; only an open
    /// session blocks with `AlreadyInProgress`.
    pub fn start_upgrade(&self, partition_name: &str, total_size: usize) -> Result<()> {
        if partition_name.is_empty() {
            return Err(Error::InvalidArgument("partition name is empty"));
        }
        if total_size == 0 {
            return Err(Error::InvalidArgument("total size is zero"));
        }

        let mut session = self.session.lock().unwrap();
        if matches!(session.state, OtaState::InProgress | OtaState::Finishing) {
            return Err(Error::AlreadyInProgress);
        }

        let target = self.table.find(partition_name)?;
        let running = self.table.running_partition()?;
        if !target.is_app() || target.address == running.address {
            return Err(Error::InvalidTarget);
        }
        if total_size > target.size as usize {
            return Err(Error::InsufficientSpace {
                size: total_size,
                capacity: target.size as usize,
            });
        }

        session.flash.begin(&target, total_size)?;

        info!(
            "OTA upgrade started: target={} size={}",
            target.name, total_size
        );
        session.state = OtaState::InProgress;
        session.target = Some(target);
        session.total_size = total_size;
        session.bytes_written = 0;
        session.status_message = "upgrade started".to_string();
        Ok(())
    }

    /// Append a chunk to the open session. A flash-level write failure is
    /// terminal: the session goes to Failed and the caller must start over.
    /// When the running total reaches the declared size, finalization runs
    /// as the last step of this same call.
    pub fn write_data(&self, chunk: &[u8]) -> Result<()> {
        let mut session = self.session.lock().unwrap();
        if session.state != OtaState::InProgress {
            return Err(Error::NotInProgress);
        }
        if chunk.is_empty() {
            return Err(Error::InvalidArgument("empty chunk"));
        }
        if session.bytes_written + chunk.len() > session.total_size {
            return Err(Error::InvalidArgument("chunk exceeds declared image size"));
        }

        if let Err(e) = session.flash.write(chunk) {
            error!("OTA write failed: {e}");
            session.fail("flash write failed");
            self.events.on_error(&e, &session.status_message);
            return Err(e);
        }

        session.bytes_written += chunk.len();
        session.status_message = "writing firmware".to_string();

        if session.bytes_written == session.total_size {
            return self.finish_locked(&mut session);
        }
        Ok(())
    }

    /// Close the transaction and atomically repoint the boot selector.
    /// Callable directly for callers that stream without a known total size.
    pub fn finish_upgrade(&self) -> Result<()> {
        let mut session = self.session.lock().unwrap();
        if session.state != OtaState::InProgress {
            return Err(Error::NotInProgress);
        }
        self.finish_locked(&mut session)
    }

    fn finish_locked(&self, session: &mut Session<F>) -> Result<()> {
        session.state = OtaState::Finishing;

        if let Err(e) = session.flash.end() {
            error!("OTA finalize failed: {e}");
            session.fail("flash finalize failed");
            self.events.on_error(&e, &session.status_message);
            return Err(e);
        }

        // Flash contents are valid from here on; only the boot pointer can
        // still fail, and a failed switch leaves the old selection intact.
        let target = session
            .target
            .clone()
            .ok_or(Error::InvalidState("no target partition recorded"))?;
        if let Err(e) = session.flash.set_boot_partition(&target) {
            error!("OTA boot partition switch failed: {e}");
            session.fail("boot partition switch failed");
            self.events.on_error(&e, &session.status_message);
            return Err(e);
        }

        session.state = OtaState::Completed;
        session.status_message = "upgrade complete".to_string();
        info!("OTA upgrade complete: boot partition now {}", target.name);
        self.events.on_complete();
        Ok(())
    }

    /// Cancel the open session, discarding partial writes. The target slot
    /// is left unbootable; a fresh start_upgrade to the same slot is fine.
    pub fn abort_upgrade(&self) -> Result<()> {
        let mut session = self.session.lock().unwrap();
        if session.state != OtaState::InProgress {
            return Err(Error::NotInProgress);
        }

        session.flash.abort();
        session.state = OtaState::Aborted;
        session.status_message = "upgrade aborted".to_string();
        warn!("OTA upgrade aborted at {} bytes", session.bytes_written);
        self.events.on_error(&Error::Aborted, &session.status_message);
        Ok(())
    }

    /// Acknowledge a terminal state and return to Idle.
    pub fn reset(&self) -> Result<()> {
        let mut session = self.session.lock().unwrap();
        match session.state {
            OtaState::Idle => Ok(()),
            OtaState::InProgress | OtaState::Finishing => {
                Err(Error::InvalidState("upgrade in progress"))
            }
            _ => {
                session.state = OtaState::Idle;
                session.target = None;
                session.total_size = 0;
                session.bytes_written = 0;
                session.status_message.clear();
                Ok(())
            }
        }
    }

    pub fn state(&self) -> OtaState {
        self.session.lock().unwrap().state
    }

    pub fn is_upgrading(&self) -> bool {
        self.session.lock().unwrap().state == OtaState::InProgress
    }

    /// Always-safe snapshot; returns an Idle snapshot when no session exists.
    pub fn get_progress(&self) -> OtaProgress {
        self.session.lock().unwrap().snapshot()
    }

    /// Schedule an unconditional reboot so the new boot partition takes
    /// effect. Point of no return on hardware: this call does not come back.
    pub fn restart_device(&self, delay: Duration) {
        warn!("restarting device in {delay:?}");
        self.restarter.restart(delay);
    }

    /// Spawn the periodic progress reporter. It only feeds the progress sink
    /// and is never on the write path; writers are never blocked by it.
    pub fn spawn_progress_reporter(&self) -> ProgressReporter {
        let active = Arc::new(AtomicBool::new(true));
        let flag = active.clone();
        let session = self.session.clone();
        let events = self.events.clone();

        std::thread::spawn(move || {
            while flag.load(Ordering::Relaxed) {
                let snapshot = {
                    let session = session.lock().unwrap();
                    session.snapshot()
                };
                if snapshot.in_progress {
                    events.on_progress(&snapshot);
                }
                std::thread::sleep(PROGRESS_PERIOD);
            }
        });

        ProgressReporter { active }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ota::NullOtaEvents;
    use crate::sim::{RecordingOtaEvents, SimFlash, SimPartitionTable, SimRestarter};

    fn manager(flash: &SimFlash) -> OtaManager<SimFlash, SimPartitionTable> {
        OtaManager::new(
            flash.clone(),
            Arc::new(SimPartitionTable::dual_bank()),
            Arc::new(NullOtaEvents),
            Arc::new(SimRestarter::default()),
        )
    }

    fn manager_with_events(
        flash: &SimFlash,
        events: Arc<RecordingOtaEvents>,
    ) -> OtaManager<SimFlash, SimPartitionTable> {
        OtaManager::new(
            flash.clone(),
            Arc::new(SimPartitionTable::dual_bank()),
            events,
            Arc::new(SimRestarter::default()),
        )
    }

    #[test]
    fn start_against_running_partition_is_rejected() {
        let flash = SimFlash::default();
        let ota = manager(&flash);
        assert_eq!(ota.start_upgrade("ota_0", 1024), Err(Error::InvalidTarget));
        // No transaction may have been opened
        assert_eq!(flash.begin_count(), 0);
        assert_eq!(ota.state(), OtaState::Idle);
    }

    #[test]
    fn start_against_data_partition_is_rejected() {
        let flash = SimFlash::default();
        let ota = manager(&flash);
        assert_eq!(ota.start_upgrade("nvs", 1024), Err(Error::InvalidTarget));
        assert_eq!(flash.begin_count(), 0);
    }

    #[test]
    fn start_with_unknown_partition_is_not_found() {
        let ota = manager(&SimFlash::default());
        assert!(matches!(
            ota.start_upgrade("ota_9", 1024),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn start_with_oversized_image_is_rejected() {
        let ota = manager(&SimFlash::default());
        // ota_1 capacity is 1 MiB in the sim table
        assert_eq!(
            ota.start_upgrade("ota_1", 2_000_000),
            Err(Error::InsufficientSpace {
                size: 2_000_000,
                capacity: 1_048_576,
            })
        );
    }

    #[test]
    fn second_start_without_terminal_state_is_rejected() {
        let ota = manager(&SimFlash::default());
        ota.start_upgrade("ota_1", 1024).unwrap();
        assert_eq!(
            ota.start_upgrade("ota_1", 1024),
            Err(Error::AlreadyInProgress)
        );
    }

    #[test]
    fn exact_sum_of_writes_completes_and_switches_boot() {
        let flash = SimFlash::default();
        let events = Arc::new(RecordingOtaEvents::default());
        let ota = manager_with_events(&flash, events.clone());

        ota.start_upgrade("ota_1", 300).unwrap();
        ota.write_data(&[0xE9; 100]).unwrap();
        ota.write_data(&[0x01; 100]).unwrap();
        assert_eq!(ota.state(), OtaState::InProgress);
        ota.write_data(&[0x02; 100]).unwrap();

        assert_eq!(ota.state(), OtaState::Completed);
        assert_eq!(flash.boot_partition().as_deref(), Some("ota_1"));
        assert_eq!(flash.written_len(), 300);
        assert_eq!(events.completions(), 1);
    }

    #[test]
    fn partial_writes_stay_in_progress_with_running_sum() {
        let ota = manager(&SimFlash::default());
        ota.start_upgrade("ota_1", 1000).unwrap();
        ota.write_data(&[0; 400]).unwrap();
        ota.write_data(&[0; 350]).unwrap();

        let progress = ota.get_progress();
        assert_eq!(ota.state(), OtaState::InProgress);
        assert_eq!(progress.bytes_written, 750);
        assert_eq!(progress.total_bytes, 1000);
        assert_eq!(progress.percentage, 75);
        assert!(progress.in_progress);
    }

    #[test]
    fn write_and_finish_require_open_session() {
        let flash = SimFlash::default();
        let ota = manager(&flash);

        // Idle
        assert_eq!(ota.write_data(&[0; 10]), Err(Error::NotInProgress));
        assert_eq!(ota.finish_upgrade(), Err(Error::NotInProgress));

        // Completed
        ota.start_upgrade("ota_1", 10).unwrap();
        ota.write_data(&[0; 10]).unwrap();
        assert_eq!(ota.state(), OtaState::Completed);
        assert_eq!(ota.write_data(&[0; 10]), Err(Error::NotInProgress));
        assert_eq!(ota.finish_upgrade(), Err(Error::NotInProgress));
        assert_eq!(ota.get_progress().bytes_written, 10);

        // Aborted
        ota.start_upgrade("ota_1", 10).unwrap();
        ota.write_data(&[0; 4]).unwrap();
        ota.abort_upgrade().unwrap();
        assert_eq!(ota.write_data(&[0; 4]), Err(Error::NotInProgress));
        assert_eq!(ota.finish_upgrade(), Err(Error::NotInProgress));
        assert_eq!(ota.get_progress().bytes_written, 4);

        // Failed
        ota.start_upgrade("ota_1", 10).unwrap();
        flash.fail_next_write();
        assert!(matches!(ota.write_data(&[0; 4]), Err(Error::IoFault(_))));
        assert_eq!(ota.state(), OtaState::Failed);
        assert_eq!(ota.write_data(&[0; 4]), Err(Error::NotInProgress));
        assert_eq!(ota.finish_upgrade(), Err(Error::NotInProgress));
        assert_eq!(ota.get_progress().bytes_written, 0);
    }

    #[test]
    fn abort_then_restart_same_partition() {
        let flash = SimFlash::default();
        let events = Arc::new(RecordingOtaEvents::default());
        let ota = manager_with_events(&flash, events.clone());

        ota.start_upgrade("ota_1", 100).unwrap();
        ota.write_data(&[0; 50]).unwrap();
        ota.abort_upgrade().unwrap();
        assert_eq!(ota.state(), OtaState::Aborted);
        assert!(flash.aborted());
        assert_eq!(flash.boot_partition(), None);
        assert_eq!(events.errors(), vec![Error::Aborted]);

        // No partition-level lockout after abort
        ota.start_upgrade("ota_1", 100).unwrap();
        assert_eq!(ota.state(), OtaState::InProgress);
        assert_eq!(ota.get_progress().bytes_written, 0);
    }

    #[test]
    fn write_failure_is_terminal_and_reported() {
        let flash = SimFlash::default();
        let events = Arc::new(RecordingOtaEvents::default());
        let ota = manager_with_events(&flash, events.clone());

        ota.start_upgrade("ota_1", 100).unwrap();
        flash.fail_next_write();
        assert!(ota.write_data(&[0; 10]).is_err());

        let progress = ota.get_progress();
        assert_eq!(ota.state(), OtaState::Failed);
        assert!(!progress.in_progress);
        assert_eq!(progress.status_message, "flash write failed");
        assert_eq!(events.errors().len(), 1);
    }

    #[test]
    fn finalize_failure_is_terminal() {
        let flash = SimFlash::default();
        let events = Arc::new(RecordingOtaEvents::default());
        let ota = manager_with_events(&flash, events.clone());

        ota.start_upgrade("ota_1", 20).unwrap();
        flash.fail_next_end();
        assert!(ota.write_data(&[0; 20]).is_err());
        assert_eq!(ota.state(), OtaState::Failed);
        assert_eq!(ota.get_progress().status_message, "flash finalize failed");
        assert_eq!(flash.boot_partition(), None);
        assert_eq!(events.completions(), 0);
    }

    #[test]
    fn progress_reporter_feeds_sink_only_while_in_progress() {
        let flash = SimFlash::default();
        let events = Arc::new(RecordingOtaEvents::default());
        let ota = manager_with_events(&flash, events.clone());

        let reporter = ota.spawn_progress_reporter();
        std::thread::sleep(Duration::from_millis(250));
        assert!(events.progress_reports().is_empty());

        ota.start_upgrade("ota_1", 100).unwrap();
        ota.write_data(&[0; 50]).unwrap();
        std::thread::sleep(Duration::from_millis(350));
        reporter.stop();

        let reports = events.progress_reports();
        assert!(!reports.is_empty());
        assert!(reports.iter().all(|p| p.in_progress && p.bytes_written == 50));
    }

    #[test]
    fn boot_switch_failure_fails_session_but_not_slot() {
        let flash = SimFlash::default();
        let ota = manager(&flash);

        ota.start_upgrade("ota_1", 20).unwrap();
        flash.fail_next_set_boot();
        assert!(ota.write_data(&[0; 20]).is_err());
        assert_eq!(ota.state(), OtaState::Failed);
        // Previous boot selection intact, written image untouched
        assert_eq!(flash.boot_partition(), None);
        assert_eq!(flash.written_len(), 20);
    }

    #[test]
    fn chunk_past_declared_size_is_rejected_before_writing() {
        let flash = SimFlash::default();
        let ota = manager(&flash);
        ota.start_upgrade("ota_1", 16).unwrap();
        ota.write_data(&[0; 12]).unwrap();
        assert!(matches!(
            ota.write_data(&[0; 8]),
            Err(Error::InvalidArgument(_))
        ));
        // Session survives; bytes_written is monotonic and <= total
        assert_eq!(ota.state(), OtaState::InProgress);
        assert_eq!(ota.get_progress().bytes_written, 12);
    }

    #[test]
    fn explicit_finish_without_known_total() {
        let flash = SimFlash::default();
        let ota = manager(&flash);
        // Declare the slot capacity, stream less, then finish explicitly
        ota.start_upgrade("ota_1", 1_048_576).unwrap();
        ota.write_data(&[0xE9; 1024]).unwrap();
        ota.finish_upgrade().unwrap();
        assert_eq!(ota.state(), OtaState::Completed);
        assert_eq!(flash.boot_partition().as_deref(), Some("ota_1"));
    }

    #[test]
    fn reset_returns_terminal_session_to_idle() {
        let ota = manager(&SimFlash::default());
        ota.start_upgrade("ota_1", 8).unwrap();
        assert!(matches!(ota.reset(), Err(Error::InvalidState(_))));
        ota.abort_upgrade().unwrap();
        ota.reset().unwrap();
        assert_eq!(ota.state(), OtaState::Idle);
        assert_eq!(ota.get_progress(), OtaProgress::default());
    }

    #[test]
    fn restart_device_reaches_the_restarter() {
        let flash = SimFlash::default();
        let restarter = Arc::new(SimRestarter::default());
        let ota = OtaManager::new(
            flash,
            Arc::new(SimPartitionTable::dual_bank()),
            Arc::new(NullOtaEvents),
            restarter.clone(),
        );
        ota.restart_device(Duration::from_millis(500));
        assert_eq!(restarter.requested(), Some(Duration::from_millis(500)));
    }
}
