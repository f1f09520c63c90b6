//! Session supervisor: owns the current epoch's Sender/Receiver pair (via
//! `dataplane::EpochSlot`), the lifetime counters, and the status snapshot
//! writer. It is the one place that understands how a `control::Command`
//! turns into an epoch swap or a shutdown.

pub mod config;
pub mod status;

use control::Command;
pub use config::{Config, ConfigError};
use dataplane::{Counters, EpochSlot};
use handshake::{HandshakeError, Role};
pub use status::SessionState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("handshake error: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("control channel error: {0}")]
    Control(#[from] control::ControlError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A rekey request forwarded from the control channel to whatever task is
/// driving fresh TCP handshakes (the `proxy` binary's rekey loop). The
/// worker reports back through `reply`, and the supervisor updates its
/// counters from that report via `record_rekey_result`.
pub struct RekeyRequest {
    pub suite: Option<String>,
    pub reply: oneshot::Sender<Result<(), String>>,
}

pub struct Supervisor {
    role: Role,
    epoch_slot: EpochSlot,
    counters: std::sync::Arc<Counters>,
    rekeys_ok: AtomicU64,
    rekeys_fail: AtomicU64,
    last_rekey_suite: Mutex<Option<String>>,
    status_path: String,
    rekey_requests: mpsc::Sender<RekeyRequest>,
    shutdown: Notify,
    state: Mutex<SessionState>,
    new_suite: Mutex<Option<String>>,
    error_reason: Mutex<Option<String>>,
    rekey_coord: Mutex<rekey::RekeyCoordinator>,
}

impl Supervisor {
    pub fn new(
        role: Role,
        epoch_slot: EpochSlot,
        counters: std::sync::Arc<Counters>,
        status_path: String,
        rekey_requests: mpsc::Sender<RekeyRequest>,
    ) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            role,
            epoch_slot,
            counters,
            rekeys_ok: AtomicU64::new(0),
            rekeys_fail: AtomicU64::new(0),
            last_rekey_suite: Mutex::new(None),
            status_path,
            rekey_requests,
            shutdown: Notify::new(),
            state: Mutex::new(SessionState::HandshakeOk),
            new_suite: Mutex::new(None),
            error_reason: Mutex::new(None),
            rekey_coord: Mutex::new(rekey::RekeyCoordinator::new()),
        })
    }

    pub fn role_str(&self) -> &'static str {
        match self.role {
            Role::Initiator => "drone",
            Role::Responder => "gcs",
        }
    }

    /// Move from `handshake_ok` to `running` once the dataplane workers are
    /// live. Idempotent: calling it again while already running is a no-op.
    pub fn mark_running(&self) {
        *self.state.lock().unwrap() = SessionState::Running;
        self.persist_status();
    }

    pub fn rekey_state(&self) -> rekey::RekeyState {
        self.rekey_coord.lock().unwrap().state()
    }

    /// Move the rekey state machine into `Negotiating`. Fails if a rekey is
    /// already in progress.
    pub fn begin_rekey(&self, suite: Option<String>) -> Result<(), rekey::RekeyError> {
        self.rekey_coord.lock().unwrap().begin_negotiation()?;
        *self.new_suite.lock().unwrap() = suite;
        Ok(())
    }

    pub fn status_snapshot(&self) -> status::Status {
        let epoch = self.epoch_slot.load();
        status::Status {
            role: self.role_str().to_string(),
            state: self.state.lock().unwrap().as_str().to_string(),
            session_id_hex: hex_encode(&epoch.session_id),
            active_epoch: epoch.epoch,
            suite_id: epoch.suite_id.clone(),
            new_suite: self.new_suite.lock().unwrap().clone(),
            enc_in: self.counters.enc_in.load(Ordering::Relaxed),
            enc_out: self.counters.enc_out.load(Ordering::Relaxed),
            drops: self.counters.drops.load(Ordering::Relaxed),
            rekeys_ok: self.rekeys_ok.load(Ordering::Relaxed),
            rekeys_fail: self.rekeys_fail.load(Ordering::Relaxed),
            last_rekey_suite: self.last_rekey_suite.lock().unwrap().clone(),
            error_reason: self.error_reason.lock().unwrap().clone(),
        }
    }

    pub fn persist_status(&self) {
        let snapshot = self.status_snapshot();
        if let Err(e) = status::write_atomic(&self.status_path, &snapshot) {
            error!(error = %e, "failed to persist status snapshot");
        }
    }

    /// Record the outcome of a rekey attempt (§4.F step 5): bumps the ok/fail
    /// counter, updates `last_rekey_suite` on success, sets `error_reason` on
    /// failure, and resets the rekey state machine back to `Active` either
    /// way. `state` becomes `rekey_ok`/`rekey_fail` until the next
    /// `mark_running` or rekey attempt.
    pub fn record_rekey_result(&self, ok: bool, suite_id: Option<String>, reason: Option<String>) {
        self.rekey_coord.lock().unwrap().abort();
        if ok {
            self.rekeys_ok.fetch_add(1, Ordering::Relaxed);
            *self.last_rekey_suite.lock().unwrap() = suite_id;
            *self.state.lock().unwrap() = SessionState::RekeyOk;
            *self.error_reason.lock().unwrap() = None;
        } else {
            self.rekeys_fail.fetch_add(1, Ordering::Relaxed);
            *self.state.lock().unwrap() = SessionState::RekeyFail;
            *self.error_reason.lock().unwrap() = reason;
        }
        self.persist_status();
    }

    pub fn shutdown_signal(&self) -> &Notify {
        &self.shutdown
    }

    /// Drive the control channel's command stream forever. Each `Rekey`
    /// command is forwarded to the rekey worker without blocking the
    /// command loop on the worker's (potentially slow) handshake.
    pub async fn run_control_loop(self: std::sync::Arc<Self>, mut commands: mpsc::Receiver<Command>) {
        while let Some(cmd) = commands.recv().await {
            match cmd {
                Command::Ping { reply } => {
                    let _ = reply.send(());
                }
                Command::Status { reply } => {
                    let snapshot = self.status_snapshot();
                    self.persist_status();
                    let _ = reply.send(serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null));
                }
                Command::Rekey { suite, reply } => {
                    if let Err(e) = self.begin_rekey(suite.clone()) {
                        let _ = reply.send(Err(e.to_string()));
                        continue;
                    }
                    let (tx, rx) = oneshot::channel();
                    if self.rekey_requests.send(RekeyRequest { suite, reply: tx }).await.is_err() {
                        self.record_rekey_result(false, None, Some("rekey worker is not running".to_string()));
                        let _ = reply.send(Err("rekey worker is not running".to_string()));
                        continue;
                    }
                    let supervisor = self.clone();
                    tokio::spawn(async move {
                        match rx.await {
                            Ok(result) => {
                                let _ = reply.send(result);
                            }
                            Err(_) => {
                                supervisor.record_rekey_result(
                                    false,
                                    None,
                                    Some("rekey worker dropped the request".to_string()),
                                );
                                let _ = reply.send(Err("rekey worker dropped the request".to_string()));
                            }
                        }
                    });
                }
                Command::Stop { reply } => {
                    *self.state.lock().unwrap() = SessionState::Stopping;
                    info!("stop requested over control channel");
                    self.shutdown.notify_waiters();
                    let _ = reply.send(());
                }
            }
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aead::{AeadAlgorithm, HeaderTemplate, Receiver as AeadReceiver, Sender as AeadSender};
    use dataplane::{new_epoch_slot, EpochHandles};

    fn epoch_slot() -> EpochSlot {
        let key = [1u8; 32];
        let template = HeaderTemplate {
            kem_id: 1,
            kem_param: 3,
            sig_id: 1,
            sig_param: 3,
            session_id: [9, 8, 7, 6, 5, 4, 3, 2],
            epoch: 0,
        };
        let sender = AeadSender::new(AeadAlgorithm::aes_gcm(&key), template);
        let receiver = AeadReceiver::new(AeadAlgorithm::aes_gcm(&key), template, aead::DEFAULT_REPLAY_WINDOW);
        new_epoch_slot(EpochHandles::new(0, "cs-mlkem768-aesgcm-mldsa65".to_string(), template.session_id, sender, receiver))
    }

    #[tokio::test]
    async fn status_snapshot_reflects_epoch() {
        let (tx, _rx) = mpsc::channel(1);
        let sup = Supervisor::new(
            Role::Responder,
            epoch_slot(),
            std::sync::Arc::new(Counters::default()),
            std::env::temp_dir().join("unused-status.json").to_str().unwrap().to_string(),
            tx,
        );
        let snapshot = sup.status_snapshot();
        assert_eq!(snapshot.role, "gcs");
        assert_eq!(snapshot.state, "handshake_ok");
        assert_eq!(snapshot.suite_id, "cs-mlkem768-aesgcm-mldsa65");
        assert_eq!(snapshot.session_id_hex, "0908070605040302");
    }

    #[tokio::test]
    async fn mark_running_transitions_state() {
        let (tx, _rx) = mpsc::channel(1);
        let sup = Supervisor::new(
            Role::Responder,
            epoch_slot(),
            std::sync::Arc::new(Counters::default()),
            std::env::temp_dir().join("unused-status2.json").to_str().unwrap().to_string(),
            tx,
        );
        sup.mark_running();
        assert_eq!(sup.status_snapshot().state, "running");
    }

    #[tokio::test]
    async fn record_rekey_result_updates_counters() {
        let (tx, _rx) = mpsc::channel(1);
        let sup = Supervisor::new(
            Role::Initiator,
            epoch_slot(),
            std::sync::Arc::new(Counters::default()),
            std::env::temp_dir().join(format!("status-{}.json", std::process::id())).to_str().unwrap().to_string(),
            tx,
        );
        sup.record_rekey_result(true, Some("cs-mlkem1024-aesgcm-mldsa87".to_string()), None);
        let snapshot = sup.status_snapshot();
        assert_eq!(snapshot.rekeys_ok, 1);
        assert_eq!(snapshot.state, "rekey_ok");
        assert_eq!(snapshot.last_rekey_suite.as_deref(), Some("cs-mlkem1024-aesgcm-mldsa87"));
    }

    #[tokio::test]
    async fn record_rekey_failure_sets_error_reason() {
        let (tx, _rx) = mpsc::channel(1);
        let sup = Supervisor::new(
            Role::Initiator,
            epoch_slot(),
            std::sync::Arc::new(Counters::default()),
            std::env::temp_dir().join(format!("status-fail-{}.json", std::process::id())).to_str().unwrap().to_string(),
            tx,
        );
        sup.begin_rekey(Some("cs-mlkem1024-aesgcm-mldsa87".to_string())).unwrap();
        sup.record_rekey_result(false, None, Some("handshake timed out".to_string()));
        let snapshot = sup.status_snapshot();
        assert_eq!(snapshot.rekeys_fail, 1);
        assert_eq!(snapshot.state, "rekey_fail");
        assert_eq!(snapshot.error_reason.as_deref(), Some("handshake timed out"));
        assert_eq!(sup.rekey_state(), rekey::RekeyState::Active);
    }
}
