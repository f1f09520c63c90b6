//! Thin process entry point: parses a handful of `--flag`/`--flag=value`
//! arguments (role and an optional config/identity path), wires the crates
//! together, and blocks until the control channel's `stop` command fires.
//! Real argv/file-based configuration loading is intentionally not built
//! out here — see `session::Config` for the data contract a fuller CLI
//! would populate.

use aead::{AeadAlgorithm, HeaderTemplate, Receiver as AeadReceiver, Sender as AeadSender};
use anyhow::{Context, Result};
use dataplane::{new_epoch_slot, Counters, EpochHandles, PeerGuard};
use handshake::{Identity, Role};
use session::{Config, RekeyRequest, Supervisor};
use std::sync::Arc;
use suites::SuiteRegistry;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tracing::{info, warn};

fn arg_val(args: &[String], key: &str) -> Option<String> {
    for i in 0..args.len() {
        if args[i] == key {
            if i + 1 < args.len() {
                return Some(args[i + 1].clone());
            }
        } else if let Some(rest) = args[i].strip_prefix(&(key.to_string() + "=")) {
            return Some(rest.to_string());
        }
    }
    None
}

fn parse_role(args: &[String]) -> Result<Role> {
    match arg_val(args, "--role").as_deref() {
        Some("drone") => Ok(Role::Initiator),
        Some("gcs") => Ok(Role::Responder),
        other => anyhow::bail!("--role must be drone or gcs, got {other:?}"),
    }
}

/// Identity material is provisioned out of band in a real deployment;
/// here we accept 32-byte hex seeds via env vars and fall back to a fixed
/// demo seed so the binary is runnable without extra setup.
fn load_identity(role: Role) -> Identity {
    let (signing_var, peer_var, demo_signing, demo_peer) = match role {
        Role::Initiator => ("PQC_PROXY_DRONE_SIGNING_KEY_HEX", "PQC_PROXY_GCS_VERIFYING_KEY_HEX", [1u8; 32], [2u8; 32]),
        Role::Responder => ("PQC_PROXY_GCS_SIGNING_KEY_HEX", "PQC_PROXY_DRONE_VERIFYING_KEY_HEX", [2u8; 32], [1u8; 32]),
    };
    let signing_key = std::env::var(signing_var).ok().and_then(|s| hex_to_32(&s)).unwrap_or(demo_signing);
    let peer_verifying_key = std::env::var(peer_var).ok().and_then(|s| hex_to_32(&s)).unwrap_or(demo_peer);
    Identity { signing_key, peer_verifying_key }
}

fn hex_to_32(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let role = parse_role(&args)?;
    let config = Config::default();
    config.validate().context("invalid configuration")?;
    let identity = load_identity(role);
    let registry = SuiteRegistry::new();
    let offered_suites = registry.list();

    info!(role = ?role, "starting pqc-proxy");

    let outcome = match role {
        Role::Initiator => {
            let addr = format!("{}:{}", config.gcs_host, config.tcp_handshake_port);
            let mut stream = TcpStream::connect(&addr).await.context("connecting to GCS handshake listener")?;
            handshake::run_initiator(&mut stream, &registry, &identity, &offered_suites)
                .await
                .context("drone-side handshake failed")?
        }
        Role::Responder => {
            let addr = format!("{}:{}", config.gcs_host, config.tcp_handshake_port);
            let listener = TcpListener::bind(&addr).await.context("binding handshake listener")?;
            let (mut stream, peer) = listener.accept().await.context("accepting drone connection")?;
            info!(%peer, "accepted handshake connection");
            handshake::run_responder(&mut stream, &registry, &identity, &offered_suites)
                .await
                .context("gcs-side handshake failed")?
        }
    };

    info!(suite = %outcome.suite.suite_id, "handshake complete");

    let template = HeaderTemplate {
        kem_id: outcome.suite.kem_id,
        kem_param: outcome.suite.kem_param,
        sig_id: outcome.suite.sig_id,
        sig_param: outcome.suite.sig_param,
        session_id: outcome.epoch_keys.session_id,
        epoch: 0,
    };
    let (send_key, recv_key) = match role {
        Role::Initiator => (&outcome.epoch_keys.client_send_key, &outcome.epoch_keys.server_send_key),
        Role::Responder => (&outcome.epoch_keys.server_send_key, &outcome.epoch_keys.client_send_key),
    };
    let algo_for = |key: &[u8; 32]| match outcome.suite.aead_token {
        suites::AeadToken::AesGcm => AeadAlgorithm::aes_gcm(key),
        suites::AeadToken::ChaCha20Poly1305 => AeadAlgorithm::chacha20poly1305(key),
        suites::AeadToken::Ascon128 => AeadAlgorithm::ascon128(key),
    };
    let sender = AeadSender::new(algo_for(send_key), template);
    let receiver = AeadReceiver::new(algo_for(recv_key), template, config.replay_window);
    let epoch_slot = new_epoch_slot(EpochHandles::new(
        0,
        outcome.suite.suite_id.clone(),
        template.session_id,
        sender,
        receiver,
    ));
    let counters = Arc::new(Counters::default());

    let (udp_rx_port, udp_tx_port, plaintext_rx_port, plaintext_tx_port) = match role {
        Role::Initiator => (config.udp_drone_rx, config.udp_gcs_rx, config.drone_plaintext_rx, config.drone_plaintext_tx),
        Role::Responder => (config.udp_gcs_rx, config.udp_drone_rx, config.gcs_plaintext_rx, config.gcs_plaintext_tx),
    };
    let wire_sock = Arc::new(UdpSocket::bind(("127.0.0.1", udp_rx_port)).await.context("binding wire UDP socket")?);
    let plaintext_sock =
        Arc::new(UdpSocket::bind(("127.0.0.1", plaintext_rx_port)).await.context("binding plaintext UDP socket")?);
    let plaintext_dest: std::net::SocketAddr = format!("127.0.0.1:{plaintext_tx_port}").parse().unwrap();
    let peer_addr: std::net::SocketAddr = format!("127.0.0.1:{udp_tx_port}").parse().unwrap();
    let peer_guard = Arc::new(PeerGuard::new(Some(peer_addr), config.strict_peer_match));

    let (control_tx, mut control_rx) = mpsc::channel::<(Vec<u8>, std::net::SocketAddr)>(64);
    tokio::spawn(async move {
        while let Some((payload, src)) = control_rx.recv().await {
            warn!(%src, len = payload.len(), "received in-band control datagram; rekey commit handling not wired into this demo binary");
        }
    });

    tokio::spawn(dataplane::run_plaintext_to_wire(
        plaintext_sock.clone(),
        wire_sock.clone(),
        epoch_slot.clone(),
        peer_guard.clone(),
        counters.clone(),
        config.enable_packet_type,
    ));
    tokio::spawn(dataplane::run_wire_to_plaintext(
        wire_sock.clone(),
        plaintext_sock.clone(),
        plaintext_dest,
        epoch_slot.clone(),
        peer_guard.clone(),
        counters.clone(),
        config.enable_packet_type,
        control_tx,
    ));

    let (rekey_tx, mut rekey_rx) = mpsc::channel::<RekeyRequest>(8);
    let supervisor = Supervisor::new(role, epoch_slot, counters, config.status_path.clone(), rekey_tx);
    let supervisor_for_rekey = supervisor.clone();
    tokio::spawn(async move {
        while let Some(req) = rekey_rx.recv().await {
            warn!(suite = ?req.suite, "rekey requested; fresh-TCP negotiate/commit orchestration is not driven by this demo binary");
            let reason = "rekey orchestration not implemented in this binary".to_string();
            supervisor_for_rekey.record_rekey_result(false, None, Some(reason.clone()));
            let _ = req.reply.send(Err(reason));
        }
    });

    supervisor.mark_running();
    supervisor.persist_status();

    let control_addr = format!("127.0.0.1:{}", config.control_port);
    let control_listener = TcpListener::bind(&control_addr).await.context("binding control listener")?;
    let (command_tx, command_rx) = mpsc::channel(32);
    let supervisor_for_control = supervisor.clone();
    tokio::spawn(control::run_server(control_listener, command_tx));
    tokio::spawn(supervisor_for_control.run_control_loop(command_rx));

    supervisor.shutdown_signal().notified().await;
    info!("shutting down");
    Ok(())
}
