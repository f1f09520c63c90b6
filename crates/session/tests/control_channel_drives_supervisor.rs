//! Drives the real control TCP server against a live `Supervisor`: a ping,
//! a status query that reflects the epoch installed at startup, and a stop
//! that releases the supervisor's shutdown signal. Mirrors the way
//! `proxy::main` wires `control::run_server` to `Supervisor::run_control_loop`.

use aead::{AeadAlgorithm, HeaderTemplate, Receiver as AeadReceiver, Sender as AeadSender};
use dataplane::{new_epoch_slot, Counters, EpochHandles};
use handshake::Role;
use session::Supervisor;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

fn epoch_slot() -> dataplane::EpochSlot {
    let key = [7u8; 32];
    let template = HeaderTemplate {
        kem_id: 1,
        kem_param: 3,
        sig_id: 1,
        sig_param: 3,
        session_id: [1, 2, 3, 4, 5, 6, 7, 8],
        epoch: 0,
    };
    let sender = AeadSender::new(AeadAlgorithm::aes_gcm(&key), template);
    let receiver = AeadReceiver::new(AeadAlgorithm::aes_gcm(&key), template, aead::DEFAULT_REPLAY_WINDOW);
    new_epoch_slot(EpochHandles::new(0, "cs-mlkem768-aesgcm-mldsa65".to_string(), template.session_id, sender, receiver))
}

async fn send_request(addr: std::net::SocketAddr, line: &str) -> serde_json::Value {
    let mut sock = TcpStream::connect(addr).await.unwrap();
    sock.write_all(line.as_bytes()).await.unwrap();
    sock.write_all(b"\n").await.unwrap();
    let mut reader = BufReader::new(sock);
    let mut response = String::new();
    reader.read_line(&mut response).await.unwrap();
    serde_json::from_str(response.trim()).unwrap()
}

#[tokio::test]
async fn ping_status_and_stop_over_the_control_channel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (rekey_tx, mut rekey_rx) = mpsc::channel(4);
    tokio::spawn(async move {
        while let Some(req) = rekey_rx.recv().await {
            let _ = req.reply.send(Err("rekey worker not under test".to_string()));
        }
    });

    let status_path = std::env::temp_dir().join(format!("control-test-status-{}.json", std::process::id()));
    let supervisor = Supervisor::new(
        Role::Responder,
        epoch_slot(),
        Arc::new(Counters::default()),
        status_path.to_str().unwrap().to_string(),
        rekey_tx,
    );

    let (command_tx, command_rx) = mpsc::channel(32);
    tokio::spawn(control::run_server(listener, command_tx));
    let supervisor_task = supervisor.clone();
    tokio::spawn(async move { supervisor_task.run_control_loop(command_rx).await });

    let pong = send_request(addr, r#"{"cmd":"ping"}"#).await;
    assert_eq!(pong["result"], "pong");

    let status = send_request(addr, r#"{"cmd":"status"}"#).await;
    assert_eq!(status["result"], "status");
    assert_eq!(status["snapshot"]["role"], "gcs");
    assert_eq!(status["snapshot"]["suite_id"], "cs-mlkem768-aesgcm-mldsa65");

    let stopping = send_request(addr, r#"{"cmd":"stop"}"#).await;
    assert_eq!(stopping["result"], "stopping");

    tokio::time::timeout(std::time::Duration::from_secs(2), supervisor.shutdown_signal().notified())
        .await
        .expect("stop command should release the shutdown signal");

    let _ = std::fs::remove_file(&status_path);
}
