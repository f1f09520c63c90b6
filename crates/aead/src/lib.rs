//! Per-epoch AEAD framing: `Sender` seals plaintext into wire datagrams,
//! `Receiver` authenticates and unframes them, enforcing the sliding replay
//! window before every AEAD open.
//!
//! A `Receiver` never updates its window state on a failed open — a forged
//! or corrupted datagram can be rejected any number of times without ever
//! poisoning the legitimate sequence space.

use aes_gcm::{Aes256Gcm, Key as AesKey};
use ascon_aead::Ascon128;
use chacha20poly1305::ChaCha20Poly1305;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use thiserror::Error;
use wire::Header;

pub use wire::{DecodeError, HEADER_LEN};

pub const DEFAULT_REPLAY_WINDOW: usize = 1024;
pub const MIN_REPLAY_WINDOW: usize = 64;
pub const MAX_REPLAY_WINDOW: usize = 8192;

/// The full per-packet rejection taxonomy. Any caller outside this crate
/// sees only `Option<Vec<u8>>` — this enum exists so every internal
/// rejection reason is logged at `debug!` before being collapsed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    #[error("malformed datagram")]
    Malformed,
    #[error("header fields do not match this session/epoch")]
    HeaderMismatch,
    #[error("nonce inconsistent with sequence number")]
    NonceInconsistent,
    #[error("replayed sequence number")]
    Replay,
    #[error("sequence number too old for the replay window")]
    TooOld,
    #[error("AEAD authentication failed")]
    AuthFail,
}

impl From<DecodeError> for RejectionKind {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::TooShort(_) => RejectionKind::Malformed,
            DecodeError::BadVersion(_) => RejectionKind::HeaderMismatch,
        }
    }
}

/// One negotiated AEAD, bound to its key at construction. Selection is a
/// closed match over the suite's `AeadToken` — no dynamic dispatch beyond
/// this one enum.
pub enum AeadAlgorithm {
    AesGcm(Aes256Gcm),
    ChaCha20Poly1305(ChaCha20Poly1305),
    Ascon128(Ascon128),
}

impl AeadAlgorithm {
    pub fn aes_gcm(key: &[u8; 32]) -> Self {
        AeadAlgorithm::AesGcm(Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key)))
    }

    pub fn chacha20poly1305(key: &[u8; 32]) -> Self {
        AeadAlgorithm::ChaCha20Poly1305(ChaCha20Poly1305::new_from_slice(key).expect("32-byte key"))
    }

    /// Ascon-128 takes a 16-byte key; the low 16 bytes of the 32-byte
    /// HKDF output are used, matching the key-shortening convention the
    /// suite registry documents for this AEAD token.
    pub fn ascon128(key: &[u8; 32]) -> Self {
        AeadAlgorithm::Ascon128(Ascon128::new_from_slice(&key[..16]).expect("16-byte key"))
    }

    /// Ascon-128's nonce is 16 bytes; our wire nonce is 12. The extra 4
    /// bytes are zero-padded on the left, same as the AAD-carried seq
    /// itself is zero-padded within its own 12-byte field.
    fn seal(&self, nonce12: &[u8; 12], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, ()> {
        match self {
            AeadAlgorithm::AesGcm(c) => c.encrypt(nonce12.into(), Payload { msg: plaintext, aad }).map_err(|_| ()),
            AeadAlgorithm::ChaCha20Poly1305(c) => {
                c.encrypt(nonce12.into(), Payload { msg: plaintext, aad }).map_err(|_| ())
            }
            AeadAlgorithm::Ascon128(c) => {
                let mut nonce16 = [0u8; 16];
                nonce16[4..16].copy_from_slice(nonce12);
                c.encrypt(&nonce16.into(), Payload { msg: plaintext, aad }).map_err(|_| ())
            }
        }
    }

    fn open(&self, nonce12: &[u8; 12], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, ()> {
        match self {
            AeadAlgorithm::AesGcm(c) => c.decrypt(nonce12.into(), Payload { msg: ciphertext, aad }).map_err(|_| ()),
            AeadAlgorithm::ChaCha20Poly1305(c) => {
                c.decrypt(nonce12.into(), Payload { msg: ciphertext, aad }).map_err(|_| ())
            }
            AeadAlgorithm::Ascon128(c) => {
                let mut nonce16 = [0u8; 16];
                nonce16[4..16].copy_from_slice(nonce12);
                c.decrypt(&nonce16.into(), Payload { msg: ciphertext, aad }).map_err(|_| ())
            }
        }
    }
}

/// Fixed header fields a `Sender`/`Receiver` stamps on every datagram for
/// one epoch: everything except `seq`, which the sender increments and the
/// receiver reads off the wire.
#[derive(Debug, Clone, Copy)]
pub struct HeaderTemplate {
    pub kem_id: u8,
    pub kem_param: u8,
    pub sig_id: u8,
    pub sig_param: u8,
    pub session_id: [u8; 8],
    pub epoch: u8,
}

pub struct Sender {
    algorithm: AeadAlgorithm,
    template: HeaderTemplate,
    next_seq: u64,
}

impl Sender {
    pub fn new(algorithm: AeadAlgorithm, template: HeaderTemplate) -> Self {
        Self { algorithm, template, next_seq: 0 }
    }

    /// Seal one plaintext, returning the full wire datagram (header ||
    /// nonce || ciphertext||tag). Advances the internal sequence counter.
    pub fn seal_next(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, RejectionKind> {
        let header = Header {
            version: wire::WIRE_VERSION,
            kem_id: self.template.kem_id,
            kem_param: self.template.kem_param,
            sig_id: self.template.sig_id,
            sig_param: self.template.sig_param,
            session_id: self.template.session_id,
            seq: self.next_seq,
            epoch: self.template.epoch,
        };
        let packed = header.pack();
        let nonce = header.nonce();
        let ciphertext = self
            .algorithm
            .seal(&nonce, &packed, plaintext)
            .map_err(|_| RejectionKind::AuthFail)?;
        self.next_seq += 1;

        let mut datagram = Vec::with_capacity(HEADER_LEN + nonce.len() + ciphertext.len());
        datagram.extend_from_slice(&packed);
        datagram.extend_from_slice(&nonce);
        datagram.extend_from_slice(&ciphertext);
        Ok(datagram)
    }

    pub fn current_seq(&self) -> u64 {
        self.next_seq
    }
}

/// Sliding replay window. `highest_seen == -1` means no datagram has ever
/// been accepted for this epoch. The bitset tracks the `window_size` most
/// recent sequence numbers below `highest_seen`.
struct ReplayWindow {
    highest_seen: i64,
    window_size: usize,
    seen: Vec<bool>,
}

impl ReplayWindow {
    fn new(window_size: usize) -> Self {
        Self { highest_seen: -1, window_size, seen: vec![false; window_size] }
    }

    fn slot(&self, seq: i64) -> usize {
        (seq as u64 % self.window_size as u64) as usize
    }

    /// Check only — never mutates state. Returns `Ok(())` if `seq` is
    /// allowed to proceed to an AEAD open attempt.
    fn pre_check(&self, seq: u64) -> Result<(), RejectionKind> {
        let seq = seq as i64;
        if self.highest_seen < 0 {
            return Ok(());
        }
        if seq > self.highest_seen {
            return Ok(());
        }
        if seq <= self.highest_seen - self.window_size as i64 {
            return Err(RejectionKind::TooOld);
        }
        if self.seen[self.slot(seq)] {
            return Err(RejectionKind::Replay);
        }
        Ok(())
    }

    /// Commit `seq` as accepted. Only called after a successful AEAD open.
    fn commit(&mut self, seq: u64) {
        let seq = seq as i64;
        if self.highest_seen < 0 {
            self.seen.iter_mut().for_each(|b| *b = false);
            self.seen[self.slot(seq)] = true;
            self.highest_seen = seq;
            return;
        }
        if seq > self.highest_seen {
            let gap = seq - self.highest_seen;
            if gap as usize >= self.window_size {
                self.seen.iter_mut().for_each(|b| *b = false);
            } else {
                for s in (self.highest_seen + 1)..=seq {
                    if s != seq {
                        self.seen[self.slot(s)] = false;
                    }
                }
            }
            self.highest_seen = seq;
        }
        self.seen[self.slot(seq)] = true;
    }
}

pub struct Receiver {
    algorithm: AeadAlgorithm,
    expected: HeaderTemplate,
    window: ReplayWindow,
}

impl Receiver {
    pub fn new(algorithm: AeadAlgorithm, expected: HeaderTemplate, replay_window: usize) -> Self {
        let window = replay_window.clamp(MIN_REPLAY_WINDOW, MAX_REPLAY_WINDOW);
        Self { algorithm, expected, window: ReplayWindow::new(window) }
    }

    /// Authenticate and unframe one datagram. Never panics on attacker
    /// input; every rejection reason is returned, never swallowed
    /// silently, so the caller can log it at `debug!` before collapsing to
    /// `None` at the public boundary.
    pub fn open(&mut self, datagram: &[u8]) -> Result<Vec<u8>, RejectionKind> {
        if datagram.len() < HEADER_LEN + 12 {
            return Err(RejectionKind::Malformed);
        }
        let header = Header::unpack_checked(datagram).map_err(RejectionKind::from)?;

        if header.kem_id != self.expected.kem_id
            || header.kem_param != self.expected.kem_param
            || header.sig_id != self.expected.sig_id
            || header.sig_param != self.expected.sig_param
            || header.session_id != self.expected.session_id
            || header.epoch != self.expected.epoch
        {
            return Err(RejectionKind::HeaderMismatch);
        }

        let wire_nonce: [u8; 12] = datagram[HEADER_LEN..HEADER_LEN + 12].try_into().unwrap();
        if wire_nonce != header.nonce() {
            return Err(RejectionKind::NonceInconsistent);
        }

        self.window.pre_check(header.seq)?;

        let ciphertext = &datagram[HEADER_LEN + 12..];
        let plaintext = self
            .algorithm
            .open(&wire_nonce, &datagram[..HEADER_LEN], ciphertext)
            .map_err(|_| RejectionKind::AuthFail)?;

        self.window.commit(header.seq);
        Ok(plaintext)
    }
}
