//! TCP server
//!
//! Accepts connections and runs one session per socket. Responsibilities:
//! - split each stream into a reader loop (rolling frame decoder) and a
//!   writer task draining the session's command channel
//! - enforce the handshake: the first frame must be `Hello`, which the
//!   server echoes back as the handshake ack before the session is ready
//! - translate decoded commands into engine operations and acknowledge
//!   every non-ack command with `CommandAck`
//! - on EOF, I/O failure or protocol error, close the session and release
//!   everything the peer held in the engine
//!
//! A protocol error (bad checksum, unknown kind, oversize frame, empty
//! queue name) is fatal for that session only; other sessions keep
//! running.

use std::sync::{Arc, Mutex};

use nexq_broker::{Broker, BrokerError, Peer};
use nexq_wire::{encode_frame, Command, CommandKind, FrameDecoder};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error("expected Hello, got {0:?}")]
    HelloExpected(CommandKind),
    #[error("Hello after handshake")]
    UnexpectedHello,
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

enum SessionState {
    AwaitingHello,
    Ready(Uuid),
}

/// Bind `addr` and serve forever.
pub async fn start_server(
    addr: String,
    broker: Arc<Mutex<Broker>>,
    max_frame_bytes: usize,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    run(listener, broker, max_frame_bytes).await;
    Ok(())
}

/// Serve an already-bound listener forever.
pub async fn run(listener: TcpListener, broker: Arc<Mutex<Broker>>, max_frame_bytes: usize) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let broker = broker.clone();
                tokio::spawn(async move {
                    handle_connection(stream, addr.to_string(), broker, max_frame_bytes).await;
                });
            }
            Err(e) => {
                warn!("accept failed: {e}");
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: String,
    broker: Arc<Mutex<Broker>>,
    max_frame_bytes: usize,
) {
    debug!(%peer_addr, "connection accepted");
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            let frame = match encode_frame(&command) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("failed to encode outbound frame: {e}");
                    continue;
                }
            };
            if let Err(e) = write_half.write_all(&frame).await {
                debug!("write failed: {e}");
                break;
            }
        }
    });

    let mut decoder = FrameDecoder::new(max_frame_bytes);
    let mut state = SessionState::AwaitingHello;

    'session: loop {
        match read_half.read_buf(decoder.buffer_mut()).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%peer_addr, "read failed: {e}");
                break;
            }
        }
        loop {
            let command = match decoder.try_next() {
                Ok(Some(command)) => command,
                Ok(None) => break,
                Err(e) => {
                    warn!(%peer_addr, "protocol error: {e}");
                    break 'session;
                }
            };
            if let Err(e) = handle_command(&broker, &tx, &mut state, command) {
                warn!(%peer_addr, "session error: {e}");
                break 'session;
            }
        }
    }

    if let SessionState::Ready(peer_id) = state {
        broker.lock().unwrap().cleanup_session(&peer_id, &tx);
    }
    debug!(%peer_addr, "session closed");
}

fn handle_command(
    broker: &Arc<Mutex<Broker>>,
    tx: &UnboundedSender<Command>,
    state: &mut SessionState,
    command: Command,
) -> Result<(), SessionError> {
    match state {
        SessionState::AwaitingHello => {
            if command.kind != CommandKind::Hello {
                return Err(SessionError::HelloExpected(command.kind));
            }
            let peer_id = command.message.peer_id;
            broker
                .lock()
                .unwrap()
                .register_peer(Peer::new(peer_id, tx.clone()));
            // The echoed Hello is the handshake ack.
            let _ = tx.send(command);
            *state = SessionState::Ready(peer_id);
            Ok(())
        }
        SessionState::Ready(peer_id) => {
            let peer_id = *peer_id;
            let message = command.message;
            let ack_id = message.message_id;
            match command.kind {
                CommandKind::Hello => return Err(SessionError::UnexpectedHello),
                CommandKind::Enqueue => {
                    broker.lock().unwrap().enqueue(message)?;
                }
                CommandKind::Subscribe => {
                    broker.lock().unwrap().subscribe(&message.queue, peer_id)?;
                }
                CommandKind::Unsubscribe => {
                    broker.lock().unwrap().unsubscribe(&message.queue, &peer_id);
                }
                CommandKind::Clear => {
                    broker.lock().unwrap().clear(&message.queue);
                }
                CommandKind::ProcessMessage => {
                    // Nothing for the server to do; replies travel as
                    // Enqueue. Acked below like any other command.
                }
                CommandKind::CommandAck => {
                    broker.lock().unwrap().handle_ack(&peer_id, &ack_id);
                    return Ok(());
                }
            }
            let _ = tx.send(Command::ack(peer_id, ack_id));
            Ok(())
        }
    }
}
