//! WebSocket transport
//!
//! This file implements the listener and the `Connection` used by the broker
//! when clients speak JSON over WebSockets. Responsibilities:
//! - bind the listening socket; a bind failure aborts start-up
//! - accept TCP/WebSocket connections, one task per connection, capped by
//!   `max_connections`
//! - turn inbound text frames into `ClientPacket`s for the session loop
//! - push outbound packets through a per-connection channel to the socket
//! - honour forced closes so an evicted session's receive loop ends

use std::net::SocketAddr;
use std::sync::Arc;

use futures::Stream;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_tungstenite::{WebSocketStream, accept_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::config::Settings;
use crate::transport::connection::Connection;
use crate::transport::message::ClientPacket;
use crate::transport::session::run_session;
use crate::utils::BrokerError;

/// A `Connection` backed by one WebSocket.
#[derive(Debug)]
pub struct WsConnection {
    remote: SocketAddr,
    sender: mpsc::UnboundedSender<WsMessage>,
    closed: watch::Sender<bool>,
}

impl WsConnection {
    pub fn new(
        remote: SocketAddr,
        sender: mpsc::UnboundedSender<WsMessage>,
        closed: watch::Sender<bool>,
    ) -> Self {
        Self {
            remote,
            sender,
            closed,
        }
    }
}

impl Connection for WsConnection {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn send(&self, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }

        let msg = match String::from_utf8(payload) {
            Ok(text) => WsMessage::text(text),
            Err(e) => WsMessage::binary(e.into_bytes()),
        };
        self.sender
            .send(msg)
            .map_err(|_| BrokerError::ConnectionClosed)
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Decode inbound frames until the peer goes away or the connection is
/// closed locally, in which case one `ConnectionClosed` error is yielded.
pub fn incoming<S>(
    receiver: S,
    closed: watch::Receiver<bool>,
) -> impl Stream<Item = Result<ClientPacket, BrokerError>>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    futures::stream::unfold(
        (receiver, closed, false),
        |(mut receiver, mut closed, done)| async move {
            if done {
                return None;
            }

            loop {
                if *closed.borrow() {
                    return Some((Err(BrokerError::ConnectionClosed), (receiver, closed, true)));
                }

                tokio::select! {
                    changed = closed.changed() => {
                        if changed.is_err() {
                            return Some((Err(BrokerError::ConnectionClosed), (receiver, closed, true)));
                        }
                    }
                    frame = receiver.next() => match frame {
                        None | Some(Ok(WsMessage::Close(_))) => return None,
                        Some(Err(e)) => return Some((Err(e.into()), (receiver, closed, true))),
                        Some(Ok(WsMessage::Text(text))) => {
                            let packet = ClientPacket::decode(text.as_str());
                            return Some((packet, (receiver, closed, false)));
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            let packet = std::str::from_utf8(&data)
                                .map_err(|e| BrokerError::Protocol(e.to_string()))
                                .and_then(ClientPacket::decode);
                            return Some((packet, (receiver, closed, false)));
                        }
                        Some(Ok(_)) => {}
                    },
                }
            }
        },
    )
}

pub struct WsServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl WsServer {
    pub async fn bind(addr: &str) -> Result<Self, BrokerError> {
        let bind_err = |source| BrokerError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever. Accept errors are logged and skipped.
    pub async fn serve(self, broker: Arc<Broker>, max_connections: usize) {
        info!("WebSocket server listening on ws://{}", self.local_addr);
        let slots = Arc::new(Semaphore::new(max_connections));

        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "couldn't accept connection");
                    continue;
                }
            };

            let Ok(permit) = slots.clone().try_acquire_owned() else {
                warn!(%remote, max_connections, "connection limit reached, refusing");
                drop(stream);
                continue;
            };

            let broker = broker.clone();
            spawn(async move {
                handle_connection(broker, stream, remote).await;
                drop(permit);
            });
        }
    }
}

/// Bind `addr` and serve until the task is dropped. Only a bind failure is
/// returned.
pub async fn start_websocket_server(
    addr: String,
    broker: Arc<Broker>,
    settings: Settings,
) -> Result<(), BrokerError> {
    let server = WsServer::bind(&addr).await?;
    server.serve(broker, settings.broker.max_connections).await;
    Ok(())
}

async fn handle_connection(broker: Arc<Broker>, stream: TcpStream, remote: SocketAddr) {
    debug!(%remote, "accepted connection");

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%remote, error = %e, "WebSocket handshake error");
            return;
        }
    };
    let (ws_sender, ws_receiver) = ws_stream.split();

    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let (closed_tx, closed_rx) = watch::channel(false);
    let connection = Arc::new(WsConnection::new(remote, tx, closed_tx));

    let writer = spawn(write_loop(ws_sender, rx, closed_rx.clone()));

    let events = Box::pin(incoming(ws_receiver, closed_rx));
    if let Err(e) = run_session(broker, connection.clone(), events).await {
        debug!(%remote, error = %e, "session error");
    }

    connection.close();
    let _ = writer.await;
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

// Drains queued frames before honouring a close so final replies still go out.
async fn write_loop(
    mut ws_sender: WsSink,
    mut rx: mpsc::UnboundedReceiver<WsMessage>,
    mut closed: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(msg) => {
                    if let Err(e) = ws_sender.send(msg).await {
                        debug!(error = %e, "failed to send frame");
                        break;
                    }
                }
                None => break,
            },
            _ = closed.changed() => break,
        }
    }
    let _ = ws_sender.close().await;
}
