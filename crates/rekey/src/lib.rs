//! Two-phase rekey state machine: negotiate a fresh epoch over a brand new
//! TCP handshake, then commit it atomically with one AEAD-sealed
//! `commit`/`committed` exchange under the *old* epoch's keys.
//!
//! The state machine here is pure — it holds no socket. The session
//! supervisor drives a fresh TCP connection through `handshake::run_*` for
//! the negotiate phase and ships the `commit`/`committed` bytes this crate
//! produces over the existing dataplane channel for the commit phase.

use handshake::HandshakeOutcome;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyState {
    Active,
    Negotiating,
    PendingCommit,
}

#[derive(Debug, Error)]
pub enum RekeyError {
    #[error("rekey already in progress")]
    AlreadyInProgress,
    #[error("no negotiation is in progress")]
    NotNegotiating,
    #[error("no commit is pending")]
    NotPendingCommit,
    #[error("commit message names epoch {wire}, pending epoch is {pending}")]
    EpochMismatch { wire: u8, pending: u8 },
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ControlMessage {
    Commit { epoch: u8 },
    Committed { epoch: u8 },
}

impl ControlMessage {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ControlMessage always serializes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RekeyError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Drives one side of a rekey. The negotiating side (whichever end
/// initiates) and the responding side both run one of these, but their
/// roles in the commit exchange differ: the initiator sends `commit` and
/// waits for `committed`; the peer waits for `commit` and replies.
pub struct RekeyCoordinator {
    state: RekeyState,
    pending: Option<(HandshakeOutcome, u8)>,
}

impl RekeyCoordinator {
    pub fn new() -> Self {
        Self { state: RekeyState::Active, pending: None }
    }

    pub fn state(&self) -> RekeyState {
        self.state
    }

    pub fn begin_negotiation(&mut self) -> Result<(), RekeyError> {
        if self.state != RekeyState::Active {
            return Err(RekeyError::AlreadyInProgress);
        }
        self.state = RekeyState::Negotiating;
        Ok(())
    }

    /// Negotiation's fresh handshake completed; stage the new epoch and
    /// move to pending-commit. The caller still has the active epoch's
    /// Sender/Receiver live for the dataplane at this point.
    pub fn negotiated(&mut self, outcome: HandshakeOutcome, new_epoch: u8) -> Result<(), RekeyError> {
        if self.state != RekeyState::Negotiating {
            return Err(RekeyError::NotNegotiating);
        }
        self.pending = Some((outcome, new_epoch));
        self.state = RekeyState::PendingCommit;
        Ok(())
    }

    /// Build the `commit` message the negotiation's initiator sends under
    /// the *old* epoch's keys.
    pub fn build_commit(&self) -> Result<ControlMessage, RekeyError> {
        let (_, epoch) = self.pending.as_ref().ok_or(RekeyError::NotPendingCommit)?;
        Ok(ControlMessage::Commit { epoch: *epoch })
    }

    /// The peer that did not initiate negotiation receives `commit`,
    /// validates the epoch, and activates — returning the outcome the
    /// caller should install as the new active epoch.
    pub fn receive_commit(&mut self, msg: &ControlMessage) -> Result<HandshakeOutcome, RekeyError> {
        let (outcome, pending_epoch) = self.pending.take().ok_or(RekeyError::NotPendingCommit)?;
        match msg {
            ControlMessage::Commit { epoch } if *epoch == pending_epoch => {
                self.state = RekeyState::Active;
                Ok(outcome)
            }
            ControlMessage::Commit { epoch } => {
                self.pending = Some((outcome, pending_epoch));
                Err(RekeyError::EpochMismatch { wire: *epoch, pending: pending_epoch })
            }
            ControlMessage::Committed { .. } => {
                self.pending = Some((outcome, pending_epoch));
                Err(RekeyError::NotPendingCommit)
            }
        }
    }

    pub fn build_committed(&self, epoch: u8) -> ControlMessage {
        ControlMessage::Committed { epoch }
    }

    /// The initiator receives `committed` back and activates its own
    /// staged epoch atomically with the peer.
    pub fn receive_committed(&mut self, msg: &ControlMessage) -> Result<HandshakeOutcome, RekeyError> {
        let (outcome, pending_epoch) = self.pending.take().ok_or(RekeyError::NotPendingCommit)?;
        match msg {
            ControlMessage::Committed { epoch } if *epoch == pending_epoch => {
                self.state = RekeyState::Active;
                Ok(outcome)
            }
            ControlMessage::Committed { epoch } => {
                self.pending = Some((outcome, pending_epoch));
                Err(RekeyError::EpochMismatch { wire: *epoch, pending: pending_epoch })
            }
            ControlMessage::Commit { .. } => {
                self.pending = Some((outcome, pending_epoch));
                Err(RekeyError::NotPendingCommit)
            }
        }
    }

    pub fn abort(&mut self) {
        self.state = RekeyState::Active;
        self.pending = None;
    }
}

impl Default for RekeyCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use handshake::Role;
    use kdf::EpochKeys;
    use suites::{AeadToken, NistLevel, SuiteDescriptor};

    fn fake_outcome() -> HandshakeOutcome {
        HandshakeOutcome {
            suite: SuiteDescriptor {
                suite_id: "cs-mlkem512-aesgcm-mldsa44".to_string(),
                kem_name: "ML-KEM-512".to_string(),
                sig_name: "ML-DSA-44".to_string(),
                aead_token: AeadToken::AesGcm,
                kdf: "HKDF-SHA256".to_string(),
                nist_level: NistLevel::L1,
                kem_id: 1,
                kem_param: 1,
                sig_id: 1,
                sig_param: 1,
            },
            epoch_keys: EpochKeys { client_send_key: [0; 32], server_send_key: [0; 32], session_id: [0; 8] },
            role: Role::Initiator,
        }
    }

    #[test]
    fn cannot_begin_negotiation_twice() {
        let mut coord = RekeyCoordinator::new();
        coord.begin_negotiation().unwrap();
        assert!(matches!(coord.begin_negotiation(), Err(RekeyError::AlreadyInProgress)));
    }

    #[test]
    fn full_initiator_side_commit_flow() {
        let mut coord = RekeyCoordinator::new();
        coord.begin_negotiation().unwrap();
        coord.negotiated(fake_outcome(), 1).unwrap();
        assert_eq!(coord.state(), RekeyState::PendingCommit);

        let commit = coord.build_commit().unwrap();
        let committed = ControlMessage::Committed { epoch: 1 };
        let activated = coord.receive_committed(&committed).unwrap();
        assert_eq!(activated.suite.suite_id, "cs-mlkem512-aesgcm-mldsa44");
        assert_eq!(coord.state(), RekeyState::Active);
        let _ = commit;
    }

    #[test]
    fn peer_side_commit_flow() {
        let mut coord = RekeyCoordinator::new();
        coord.begin_negotiation().unwrap();
        coord.negotiated(fake_outcome(), 1).unwrap();

        let commit = ControlMessage::Commit { epoch: 1 };
        let activated = coord.receive_commit(&commit).unwrap();
        assert_eq!(coord.state(), RekeyState::Active);
        let reply = coord.build_committed(1);
        assert!(matches!(reply, ControlMessage::Committed { epoch: 1 }));
        let _ = activated;
    }

    #[test]
    fn epoch_mismatch_is_rejected_and_state_preserved() {
        let mut coord = RekeyCoordinator::new();
        coord.begin_negotiation().unwrap();
        coord.negotiated(fake_outcome(), 1).unwrap();

        let wrong = ControlMessage::Committed { epoch: 2 };
        let err = coord.receive_committed(&wrong).unwrap_err();
        assert!(matches!(err, RekeyError::EpochMismatch { wire: 2, pending: 1 }));
        assert_eq!(coord.state(), RekeyState::PendingCommit);
    }

    #[test]
    fn control_message_roundtrips_through_json() {
        let msg = ControlMessage::Commit { epoch: 7 };
        let bytes = msg.encode();
        let decoded = ControlMessage::decode(&bytes).unwrap();
        assert!(matches!(decoded, ControlMessage::Commit { epoch: 7 }));
    }
}
