use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

use traydio_core::protocol::{Broadcast, Message, StateSnapshot, PROTOCOL_VERSION};

use crate::controller::ControllerEvent;
use crate::Notification;

/// TCP control surface for the presentation layer (status-area widget,
/// preferences dialog, scripts).  Clients get a `Hello` with the full state
/// snapshot on connect, then a stream of broadcasts; commands flow the other
/// way into the controller loop.
pub fn start_server(
    bind_address: String,
    port: u16,
    snapshot_rx: watch::Receiver<StateSnapshot>,
    notify_tx: broadcast::Sender<Notification>,
    event_tx: mpsc::Sender<ControllerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);

        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("failed to bind control socket {}: {}", addr, e);
                return;
            }
        };

        info!("control socket listening at {}", addr);

        let mut client_id = 0usize;
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    client_id += 1;
                    info!("client {} connected from {}", client_id, peer);
                    let snapshots = snapshot_rx.clone();
                    let notifications = notify_tx.subscribe();
                    let commands = event_tx.clone();
                    tokio::spawn(async move {
                        handle_client(stream, client_id, snapshots, notifications, commands).await;
                        info!("client {} disconnected", client_id);
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    })
}

async fn handle_client(
    stream: TcpStream,
    client_id: usize,
    snapshot_rx: watch::Receiver<StateSnapshot>,
    mut notify_rx: broadcast::Receiver<Notification>,
    event_tx: mpsc::Sender<ControllerEvent>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Hello with the current snapshot on connect
    let hello = Message::Broadcast(Broadcast::Hello {
        protocol_version: PROTOCOL_VERSION,
        state: snapshot_rx.borrow().clone(),
    });
    match hello.encode() {
        Ok(bytes) => {
            if write_half.write_all(&bytes).await.is_err() {
                return;
            }
        }
        Err(e) => {
            error!("failed to encode hello: {}", e);
            return;
        }
    }

    loop {
        tokio::select! {
            result = read_half.read(&mut tmp) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        read_buf.extend_from_slice(&tmp[..n]);
                        loop {
                            if read_buf.len() < 4 {
                                break;
                            }
                            match Message::decode(&read_buf) {
                                Ok((Message::Command(cmd), consumed)) => {
                                    read_buf.drain(..consumed);
                                    info!("client {} sent command: {:?}", client_id, cmd);
                                    if event_tx.send(ControllerEvent::Command(cmd)).await.is_err() {
                                        warn!("controller event channel closed");
                                        return;
                                    }
                                }
                                Ok((_, consumed)) => {
                                    read_buf.drain(..consumed);
                                }
                                Err(_) => break,
                            }
                        }
                    }
                    Err(e) => {
                        error!("read error from client {}: {}", client_id, e);
                        break;
                    }
                }
            }

            msg = notify_rx.recv() => {
                match msg {
                    Ok(notification) => {
                        let broadcast = match notification {
                            // State payloads come from the snapshot channel so
                            // clients always see the full, consistent picture.
                            Notification::StateChanged { .. } => Broadcast::State {
                                state: snapshot_rx.borrow().clone(),
                            },
                            Notification::MetadataChanged(metadata) => {
                                Broadcast::Metadata { metadata }
                            }
                            Notification::UserError { title, message } => {
                                Broadcast::Error { title, message }
                            }
                            Notification::Notify(message) => Broadcast::Notice { message },
                        };
                        if let Ok(bytes) = Message::Broadcast(broadcast).encode() {
                            if write_half.write_all(&bytes).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("client {} missed {} notifications, resyncing", client_id, n);
                        let state = Broadcast::State {
                            state: snapshot_rx.borrow().clone(),
                        };
                        if let Ok(bytes) = Message::Broadcast(state).encode() {
                            let _ = write_half.write_all(&bytes).await;
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
