//! Session status snapshot, persisted atomically: write to a temp file next
//! to the target path, then `rename` over it, so a reader never observes a
//! half-written file.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// The supervisor's observable state, surfaced in every status snapshot.
/// `RekeyOk`/`RekeyFail` are transient: the next rekey attempt or the next
/// `mark_running` call moves back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    HandshakeOk,
    Running,
    RekeyOk,
    RekeyFail,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::HandshakeOk => "handshake_ok",
            SessionState::Running => "running",
            SessionState::RekeyOk => "rekey_ok",
            SessionState::RekeyFail => "rekey_fail",
            SessionState::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub role: String,
    pub state: String,
    pub session_id_hex: String,
    pub active_epoch: u8,
    pub suite_id: String,
    pub new_suite: Option<String>,
    pub enc_in: u64,
    pub enc_out: u64,
    pub drops: u64,
    pub rekeys_ok: u64,
    pub rekeys_fail: u64,
    pub last_rekey_suite: Option<String>,
    pub error_reason: Option<String>,
}

/// Write `status` to `path` atomically: serialize to a sibling `.tmp` file,
/// flush, then rename it into place.
pub fn write_atomic(path: &str, status: &Status) -> io::Result<()> {
    let target = Path::new(path);
    let tmp_path = target.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(status)?;
    std::fs::write(&tmp_path, &bytes)?;
    std::fs::rename(&tmp_path, target)?;
    Ok(())
}
