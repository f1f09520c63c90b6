//! TCP control channel: one line-delimited JSON request per connection.
//!
//! Grounded in the reference scheduler's own control client (`{"cmd": ...}`
//! request, one JSON-lines response, fresh TCP connection per RPC) — this
//! crate implements the server side only. It never touches session state
//! directly: every request becomes a `Command` sent down an `mpsc` channel,
//! and the session supervisor answers through a `oneshot` reply, so this
//! crate has no dependency on `session` and no risk of a dependency cycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("session supervisor channel closed")]
    ChannelClosed,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Status,
    Rekey { suite: Option<String> },
    Stop,
}

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Pong,
    Status { snapshot: serde_json::Value },
    RekeyAccepted,
    RekeyRejected { reason: String },
    Stopping,
    Error { message: String },
}

/// One command dispatched to the session supervisor, with a `oneshot` for
/// the reply. `Status`'s snapshot shape is owned entirely by the session
/// crate — this crate only forwards the `serde_json::Value` it is handed.
pub enum Command {
    Ping { reply: oneshot::Sender<()> },
    Status { reply: oneshot::Sender<serde_json::Value> },
    Rekey { suite: Option<String>, reply: oneshot::Sender<Result<(), String>> },
    Stop { reply: oneshot::Sender<()> },
}

/// Accept connections on `listener` forever, dispatching each request to
/// `commands`. Returns only on a fatal accept error; a single connection's
/// I/O error never brings the server down.
pub async fn run_server(listener: TcpListener, commands: mpsc::Sender<Command>) -> Result<(), ControlError> {
    loop {
        let (sock, peer) = listener.accept().await?;
        let commands = commands.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(sock, commands).await {
                debug!(%peer, error = %e, "control connection ended with an error");
            }
        });
    }
}

async fn handle_connection(sock: tokio::net::TcpStream, commands: mpsc::Sender<Command>) -> Result<(), ControlError> {
    let (read_half, mut write_half) = sock.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.trim().is_empty() {
        return Ok(());
    }

    let response = match serde_json::from_str::<Request>(line.trim()) {
        Ok(request) => dispatch(request, &commands).await,
        Err(e) => Response::Error { message: e.to_string() },
    };

    let mut out = serde_json::to_vec(&response)?;
    out.push(b'\n');
    write_half.write_all(&out).await?;
    Ok(())
}

async fn dispatch(request: Request, commands: &mpsc::Sender<Command>) -> Response {
    match request {
        Request::Ping => {
            let (tx, rx) = oneshot::channel();
            if commands.send(Command::Ping { reply: tx }).await.is_err() {
                return channel_closed();
            }
            match rx.await {
                Ok(()) => Response::Pong,
                Err(_) => channel_closed(),
            }
        }
        Request::Status => {
            let (tx, rx) = oneshot::channel();
            if commands.send(Command::Status { reply: tx }).await.is_err() {
                return channel_closed();
            }
            match rx.await {
                Ok(snapshot) => Response::Status { snapshot },
                Err(_) => channel_closed(),
            }
        }
        Request::Rekey { suite } => {
            let (tx, rx) = oneshot::channel();
            if commands.send(Command::Rekey { suite, reply: tx }).await.is_err() {
                return channel_closed();
            }
            match rx.await {
                Ok(Ok(())) => Response::RekeyAccepted,
                Ok(Err(reason)) => Response::RekeyRejected { reason },
                Err(_) => channel_closed(),
            }
        }
        Request::Stop => {
            let (tx, rx) = oneshot::channel();
            if commands.send(Command::Stop { reply: tx }).await.is_err() {
                return channel_closed();
            }
            match rx.await {
                Ok(()) => Response::Stopping,
                Err(_) => channel_closed(),
            }
        }
    }
}

fn channel_closed() -> Response {
    warn!("session supervisor command channel closed");
    Response::Error { message: "session supervisor is not responding".to_string() }
}
