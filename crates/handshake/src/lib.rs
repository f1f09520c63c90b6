//! TCP handshake state machine: ClientHello / ServerHello /
//! ClientKeyExchange / Finished, run as a blocking async function on one
//! tokio task rather than as a coroutine shared with the dataplane.
//!
//! Every message is length-prefixed JSON (one `u32` big-endian byte count,
//! then the payload) written with a single `write_all` — the same framing
//! shape the dataplane's predecessor transport used for its control
//! frames, just serialized with `serde` instead of hand-packed fields.

use aead::{AeadAlgorithm, HeaderTemplate, Receiver as AeadReceiver, Sender as AeadSender};
use kdf::EpochKeys;
use pqc::{kem, sig};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use suites::{SuiteDescriptor, SuiteError, SuiteRegistry};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_MESSAGE_LEN: u32 = 1 << 20;
const CONFIRMATION: &[u8] = b"OK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator, // drone: connects out
    Responder, // GCS: owns the listener
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("handshake exceeded its total time budget")]
    Timeout,
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer message malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("no offered suite is known to this peer")]
    NoCommonSuite,
    #[error("suite registry error: {0}")]
    UnknownSuite(#[from] SuiteError),
    #[error("peer signature did not verify")]
    SignatureInvalid,
    #[error("KEM operation failed: {0}")]
    Kem(#[from] pqc::PqcError),
    #[error("key derivation failed: {0}")]
    Kdf(#[from] kdf::KdfError),
    #[error("confirmation exchange failed")]
    ConfirmationFailed,
    #[error("declared message length {0} exceeds the maximum")]
    MessageTooLarge(u32),
}

/// Static identity material each peer is provisioned with out of band.
/// Loading it from disk/config is the excluded CLI collaborator's job;
/// this crate only consumes the raw bytes.
pub struct Identity {
    pub signing_key: [u8; 32],
    pub peer_verifying_key: [u8; 32],
}

#[derive(Debug)]
pub struct HandshakeOutcome {
    pub suite: SuiteDescriptor,
    pub epoch_keys: EpochKeys,
    pub role: Role,
}

#[derive(Serialize, Deserialize)]
struct ClientHello {
    client_random: [u8; 32],
    offered_suites: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ServerHelloBody {
    server_random: [u8; 32],
    chosen_suite: String,
    kem_encapsulation_key: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct ServerHello {
    body: ServerHelloBody,
    server_signature: Vec<u8>,
}

/// Baseline client auth is KEM-only: the drone signs nothing, since the
/// pre-distributed GCS public key already authenticates the server side.
#[derive(Serialize, Deserialize)]
struct ClientKeyExchange {
    kem_ciphertext: Vec<u8>,
}

async fn write_framed<T: Serialize>(stream: &mut TcpStream, msg: &T) -> Result<Vec<u8>, HandshakeError> {
    let bytes = serde_json::to_vec(msg)?;
    let len = u32::try_from(bytes.len()).expect("handshake message fits u32");
    timeout(MESSAGE_TIMEOUT, async {
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(&bytes).await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    .map_err(|_| HandshakeError::Timeout)??;
    Ok(bytes)
}

async fn read_framed<T: for<'de> Deserialize<'de>>(stream: &mut TcpStream) -> Result<(T, Vec<u8>), HandshakeError> {
    timeout(MESSAGE_TIMEOUT, async {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_MESSAGE_LEN {
            return Ok(Err(HandshakeError::MessageTooLarge(len)));
        }
        let mut bytes = vec![0u8; len as usize];
        stream.read_exact(&mut bytes).await?;
        Ok(Ok(bytes))
    })
    .await
    .map_err(|_| HandshakeError::Timeout)??
    .map(|bytes| {
        let value = serde_json::from_slice::<T>(&bytes)?;
        Ok((value, bytes))
    })?
}

fn transcript_hash(messages: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for m in messages {
        hasher.update(m);
    }
    hasher.finalize().into()
}

/// Drone side: connects out, offers suites, verifies the GCS's signature,
/// encapsulates against its KEM key, then exchanges AEAD-sealed
/// confirmations before declaring the epoch live.
pub async fn run_initiator(
    stream: &mut TcpStream,
    registry: &SuiteRegistry,
    identity: &Identity,
    offered_suites: &[String],
) -> Result<HandshakeOutcome, HandshakeError> {
    timeout(TOTAL_TIMEOUT, run_initiator_inner(stream, registry, identity, offered_suites))
        .await
        .map_err(|_| HandshakeError::Timeout)?
}

async fn run_initiator_inner(
    stream: &mut TcpStream,
    registry: &SuiteRegistry,
    identity: &Identity,
    offered_suites: &[String],
) -> Result<HandshakeOutcome, HandshakeError> {
    let mut client_random = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut client_random);
    let client_hello = ClientHello { client_random, offered_suites: offered_suites.to_vec() };
    let ch_bytes = write_framed(stream, &client_hello).await?;

    let (server_hello, sh_bytes): (ServerHello, _) = read_framed(stream).await?;
    let suite = registry.get(&server_hello.body.chosen_suite)?;

    let verifier = sig::verifier_for_param(suite.sig_param).ok_or(HandshakeError::SignatureInvalid)?;
    let signed_payload = serde_json::to_vec(&server_hello.body)?;
    verifier
        .verify(&identity.peer_verifying_key, &signed_payload, &server_hello.server_signature)
        .map_err(|_| HandshakeError::SignatureInvalid)?;

    let kem_backend = kem::backend_for_param(suite.kem_param).ok_or(HandshakeError::SignatureInvalid)?;
    let (kem_ciphertext, shared_secret) = kem_backend.encapsulate(&server_hello.body.kem_encapsulation_key)?;

    let cke = ClientKeyExchange { kem_ciphertext };
    let cke_bytes = write_framed(stream, &cke).await?;

    let hash = transcript_hash(&[&ch_bytes, &sh_bytes, &cke_bytes]);
    let epoch_keys = kdf::derive(&shared_secret, &hash, &suite.suite_id)?;

    exchange_confirmation(stream, &suite, &epoch_keys, Role::Initiator).await?;

    Ok(HandshakeOutcome { suite, epoch_keys, role: Role::Initiator })
}

/// GCS side: accepts one connection, selects a suite from the drone's
/// offer, signs its own contribution, decapsulates the drone's KEM
/// ciphertext, then mirrors the confirmation exchange.
pub async fn run_responder(
    stream: &mut TcpStream,
    registry: &SuiteRegistry,
    identity: &Identity,
    supported_suites: &[String],
) -> Result<HandshakeOutcome, HandshakeError> {
    timeout(TOTAL_TIMEOUT, run_responder_inner(stream, registry, identity, supported_suites))
        .await
        .map_err(|_| HandshakeError::Timeout)?
}

async fn run_responder_inner(
    stream: &mut TcpStream,
    registry: &SuiteRegistry,
    identity: &Identity,
    supported_suites: &[String],
) -> Result<HandshakeOutcome, HandshakeError> {
    let (client_hello, ch_bytes): (ClientHello, _) = read_framed(stream).await?;

    let chosen = client_hello
        .offered_suites
        .iter()
        .find(|id| supported_suites.iter().any(|s| s == *id))
        .ok_or(HandshakeError::NoCommonSuite)?
        .clone();
    let suite = registry.get(&chosen)?;

    let kem_backend = kem::backend_for_param(suite.kem_param).ok_or(HandshakeError::SignatureInvalid)?;
    let (decapsulation_key, encapsulation_key) = kem_backend.generate_keypair();

    let mut server_random = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut server_random);
    let body = ServerHelloBody { server_random, chosen_suite: chosen, kem_encapsulation_key: encapsulation_key };
    let signer = sig::Ed25519Signer::from_bytes(&identity.signing_key);
    let signed_payload = serde_json::to_vec(&body)?;
    let server_signature = signer.sign(&signed_payload);
    let server_hello = ServerHello { body, server_signature };
    let sh_bytes = write_framed(stream, &server_hello).await?;

    let (cke, cke_bytes): (ClientKeyExchange, _) = read_framed(stream).await?;
    let shared_secret = kem_backend.decapsulate(&decapsulation_key, &cke.kem_ciphertext)?;

    let hash = transcript_hash(&[&ch_bytes, &sh_bytes, &cke_bytes]);
    let epoch_keys = kdf::derive(&shared_secret, &hash, &suite.suite_id)?;

    exchange_confirmation(stream, &suite, &epoch_keys, Role::Responder).await?;

    Ok(HandshakeOutcome { suite, epoch_keys, role: Role::Responder })
}

/// Both sides seal and open a single `"OK"` datagram over the still-open
/// TCP handshake socket, under epoch 0, proving both ends agree on the
/// derived keys before the dataplane ever sees the epoch.
async fn exchange_confirmation(
    stream: &mut TcpStream,
    suite: &SuiteDescriptor,
    epoch_keys: &EpochKeys,
    role: Role,
) -> Result<(), HandshakeError> {
    let template = HeaderTemplate {
        kem_id: suite.kem_id,
        kem_param: suite.kem_param,
        sig_id: suite.sig_id,
        sig_param: suite.sig_param,
        session_id: epoch_keys.session_id,
        epoch: 0,
    };
    let algo_for = |key: &[u8; 32]| match suite.aead_token {
        suites::AeadToken::AesGcm => AeadAlgorithm::aes_gcm(key),
        suites::AeadToken::ChaCha20Poly1305 => AeadAlgorithm::chacha20poly1305(key),
        suites::AeadToken::Ascon128 => AeadAlgorithm::ascon128(key),
    };

    let (send_key, recv_key) = match role {
        Role::Initiator => (&epoch_keys.client_send_key, &epoch_keys.server_send_key),
        Role::Responder => (&epoch_keys.server_send_key, &epoch_keys.client_send_key),
    };

    let mut sender = AeadSender::new(algo_for(send_key), template);
    let outgoing = sender.seal_next(CONFIRMATION).map_err(|_| HandshakeError::ConfirmationFailed)?;
    write_raw(stream, &outgoing).await?;

    let incoming = read_raw(stream).await?;
    let mut receiver = AeadReceiver::new(algo_for(recv_key), template, aead::DEFAULT_REPLAY_WINDOW);
    let plaintext = receiver.open(&incoming).map_err(|_| HandshakeError::ConfirmationFailed)?;
    if plaintext != CONFIRMATION {
        return Err(HandshakeError::ConfirmationFailed);
    }
    Ok(())
}

async fn write_raw(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), HandshakeError> {
    let len = u32::try_from(bytes.len()).expect("confirmation datagram fits u32");
    timeout(MESSAGE_TIMEOUT, async {
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(bytes).await
    })
    .await
    .map_err(|_| HandshakeError::Timeout)??;
    Ok(())
}

async fn read_raw(stream: &mut TcpStream) -> Result<Vec<u8>, HandshakeError> {
    timeout(MESSAGE_TIMEOUT, async {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        let mut bytes = vec![0u8; len as usize];
        stream.read_exact(&mut bytes).await?;
        Ok::<_, std::io::Error>(bytes)
    })
    .await
    .map_err(|_| HandshakeError::Timeout)?
    .map_err(HandshakeError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_handshake_over_loopback_agrees_on_keys() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let drone_seed = [1u8; 32];
        let gcs_seed = [2u8; 32];
        let drone_pub: [u8; 32] =
            sig::Ed25519Signer::from_bytes(&drone_seed).public_key_bytes().try_into().unwrap();
        let gcs_pub: [u8; 32] = sig::Ed25519Signer::from_bytes(&gcs_seed).public_key_bytes().try_into().unwrap();

        let registry = SuiteRegistry::new();
        let suites_list = vec!["cs-mlkem512-aesgcm-mldsa44".to_string()];

        let server_task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let identity = Identity { signing_key: gcs_seed, peer_verifying_key: drone_pub };
            run_responder(&mut sock, &registry, &identity, &["cs-mlkem512-aesgcm-mldsa44".to_string()]).await
        });

        let registry2 = SuiteRegistry::new();
        let mut client_sock = TcpStream::connect(addr).await.unwrap();
        let identity = Identity { signing_key: drone_seed, peer_verifying_key: gcs_pub };
        let client_result = run_initiator(&mut client_sock, &registry2, &identity, &suites_list).await;

        let server_result = server_task.await.unwrap();

        let client_outcome = client_result.expect("client handshake succeeds");
        let server_outcome = server_result.expect("server handshake succeeds");
        assert_eq!(client_outcome.epoch_keys.session_id, server_outcome.epoch_keys.session_id);
        assert_eq!(client_outcome.epoch_keys.client_send_key, server_outcome.epoch_keys.client_send_key);
        assert_eq!(client_outcome.epoch_keys.server_send_key, server_outcome.epoch_keys.server_send_key);
    }

    #[tokio::test]
    async fn wrong_peer_key_fails_signature_verification() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let drone_seed = [3u8; 32];
        let gcs_seed = [4u8; 32];
        let wrong_pub = [5u8; 32];
        let gcs_pub: [u8; 32] = sig::Ed25519Signer::from_bytes(&gcs_seed).public_key_bytes().try_into().unwrap();

        let registry = SuiteRegistry::new();

        let server_task = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Responder pins the wrong drone public key.
            let identity = Identity { signing_key: gcs_seed, peer_verifying_key: wrong_pub };
            run_responder(&mut sock, &registry, &identity, &["cs-mlkem512-aesgcm-mldsa44".to_string()]).await
        });

        let registry2 = SuiteRegistry::new();
        let mut client_sock = TcpStream::connect(addr).await.unwrap();
        let identity = Identity { signing_key: drone_seed, peer_verifying_key: gcs_pub };
        let suites_list = vec!["cs-mlkem512-aesgcm-mldsa44".to_string()];
        let _ = run_initiator(&mut client_sock, &registry2, &identity, &suites_list).await;

        let server_result = server_task.await.unwrap();
        assert!(matches!(server_result, Err(HandshakeError::SignatureInvalid)));
    }
}
