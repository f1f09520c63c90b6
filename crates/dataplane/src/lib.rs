//! UDP dataplane: two independent pipelines — plaintext in / wire out, and
//! wire in / plaintext out — sharing only one atomic "current epoch"
//! pointer. A rekey commit swaps that pointer; neither pipeline ever takes
//! a lock held by the other.

use aead::{Receiver as AeadReceiver, RejectionKind, Sender as AeadSender};
use arc_swap::ArcSwap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

const MAX_DATAGRAM: usize = 65507;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Data = 0,
    Control = 1,
}

impl PacketType {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PacketType::Data),
            1 => Some(PacketType::Control),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DataplaneError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer address mismatch, strict_peer_match is enabled")]
    PeerMismatch,
    #[error("no peer address has been learned yet")]
    PeerUnknown,
    #[error("empty datagram")]
    EmptyDatagram,
}

/// One epoch's live Sender/Receiver pair. Both are `Mutex`-guarded: each
/// pipeline only ever holds its own lock, and a rekey commit replaces the
/// whole `Arc` rather than mutating fields in place.
pub struct EpochHandles {
    pub epoch: u8,
    pub suite_id: String,
    pub session_id: [u8; 8],
    sender: Mutex<AeadSender>,
    receiver: Mutex<AeadReceiver>,
}

impl EpochHandles {
    pub fn new(epoch: u8, suite_id: String, session_id: [u8; 8], sender: AeadSender, receiver: AeadReceiver) -> Self {
        Self { epoch, suite_id, session_id, sender: Mutex::new(sender), receiver: Mutex::new(receiver) }
    }
}

/// The one pointer shared between the two pipelines and the rekey task.
pub type EpochSlot = Arc<ArcSwap<EpochHandles>>;

pub fn new_epoch_slot(initial: EpochHandles) -> EpochSlot {
    Arc::new(ArcSwap::from_pointee(initial))
}

/// Peer-address learning and enforcement. The first authenticated datagram
/// fixes the peer address unless one was configured up front; afterwards,
/// `strict` decides whether a mismatched source is dropped or merely
/// logged.
pub struct PeerGuard {
    configured: Option<SocketAddr>,
    learned: Mutex<Option<SocketAddr>>,
    strict: bool,
}

impl PeerGuard {
    pub fn new(configured: Option<SocketAddr>, strict: bool) -> Self {
        Self { configured, learned: Mutex::new(None), strict }
    }

    /// Called only after a datagram has been successfully authenticated.
    /// Returns `Err` if the source must be rejected under
    /// `strict_peer_match`.
    pub fn observe(&self, src: SocketAddr) -> Result<(), DataplaneError> {
        if let Some(fixed) = self.configured {
            if fixed != src && self.strict {
                return Err(DataplaneError::PeerMismatch);
            }
            return Ok(());
        }
        let mut learned = self.learned.lock().unwrap();
        match *learned {
            Some(addr) if addr == src => Ok(()),
            Some(_) if self.strict => Err(DataplaneError::PeerMismatch),
            Some(_) => Ok(()),
            None => {
                *learned = Some(src);
                Ok(())
            }
        }
    }

    pub fn current(&self) -> Option<SocketAddr> {
        self.configured.or(*self.learned.lock().unwrap())
    }
}

#[derive(Default)]
pub struct Counters {
    pub enc_in: AtomicU64,
    pub enc_out: AtomicU64,
    pub drops: AtomicU64,
}

/// Reads plaintext datagrams off `plaintext_sock`, seals each under the
/// current epoch, and sends the wire datagram (`header || nonce ||
/// ciphertext`, per the wire format) to `peer`. When `enable_packet_type`
/// is set, a `PacketType::Data` byte is prepended to the plaintext before
/// sealing, inside the AEAD envelope — classification never touches
/// anything outside the authenticated payload.
pub async fn run_plaintext_to_wire(
    plaintext_sock: Arc<UdpSocket>,
    wire_sock: Arc<UdpSocket>,
    slot: EpochSlot,
    peer: Arc<PeerGuard>,
    counters: Arc<Counters>,
    enable_packet_type: bool,
) -> Result<(), DataplaneError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, _src) = plaintext_sock.recv_from(&mut buf).await?;
        if len == 0 {
            continue;
        }
        let Some(peer_addr) = peer.current() else {
            debug!("dropping plaintext datagram: peer address not yet learned");
            counters.drops.fetch_add(1, Ordering::Relaxed);
            continue;
        };
        let epoch = slot.load();
        let sealed = {
            let mut sender = epoch.sender.lock().unwrap();
            if enable_packet_type {
                let mut tagged = Vec::with_capacity(1 + len);
                tagged.push(PacketType::Data as u8);
                tagged.extend_from_slice(&buf[..len]);
                sender.seal_next(&tagged)
            } else {
                sender.seal_next(&buf[..len])
            }
        };
        match sealed {
            Ok(datagram) => {
                wire_sock.send_to(&datagram, peer_addr).await?;
                counters.enc_out.fetch_add(1, Ordering::Relaxed);
            }
            Err(reason) => {
                debug!(?reason, "failed to seal outgoing datagram");
                counters.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Reads wire datagrams, authenticates each under the current epoch, and
/// forwards the decrypted plaintext to `plaintext_sock`. When
/// `enable_packet_type` is set, the first byte of the *decrypted* plaintext
/// (never the ciphertext) is treated as a type tag and control-tagged
/// payloads are handed to `control_tx` instead of the plaintext egress
/// socket; otherwise every authenticated datagram is forwarded as data.
pub async fn run_wire_to_plaintext(
    wire_sock: Arc<UdpSocket>,
    plaintext_sock: Arc<UdpSocket>,
    plaintext_dest: SocketAddr,
    slot: EpochSlot,
    peer: Arc<PeerGuard>,
    counters: Arc<Counters>,
    enable_packet_type: bool,
    control_tx: tokio::sync::mpsc::Sender<(Vec<u8>, SocketAddr)>,
) -> Result<(), DataplaneError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, src) = wire_sock.recv_from(&mut buf).await?;
        if len == 0 {
            continue;
        }
        let epoch = slot.load();
        let opened = {
            let mut receiver = epoch.receiver.lock().unwrap();
            receiver.open(&buf[..len])
        };
        match opened {
            Ok(plaintext) => {
                if peer.observe(src).is_err() {
                    debug!(%src, "dropping datagram from unlearned/mismatched peer");
                    counters.drops.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                if !enable_packet_type {
                    plaintext_sock.send_to(&plaintext, plaintext_dest).await?;
                    counters.enc_in.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let Some((&tag, payload)) = plaintext.split_first() else {
                    debug!("dropping empty plaintext under packet-type classification");
                    counters.drops.fetch_add(1, Ordering::Relaxed);
                    continue;
                };
                match PacketType::from_byte(tag) {
                    Some(PacketType::Data) => {
                        plaintext_sock.send_to(payload, plaintext_dest).await?;
                        counters.enc_in.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(PacketType::Control) => {
                        if control_tx.send((payload.to_vec(), src)).await.is_err() {
                            warn!("control channel receiver dropped; discarding control datagram");
                        }
                    }
                    None => {
                        debug!("dropping plaintext with unknown packet type byte");
                        counters.drops.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(reason) => {
                log_rejection(reason);
                counters.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

fn log_rejection(reason: RejectionKind) {
    debug!(?reason, "datagram rejected");
}
