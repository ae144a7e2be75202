use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::config::Settings;
use crate::transport::message::{ClientPacket, ServerPacket, SubscriptionRequest};
use crate::transport::websocket::{WsServer, start_websocket_server};
use crate::utils::BrokerError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_server() -> (SocketAddr, Arc<Broker>) {
    let broker = Arc::new(Broker::new());
    let server = WsServer::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = server.local_addr();
    tokio::spawn(server.serve(broker.clone(), 16));
    (addr, broker)
}

async fn connect(addr: SocketAddr, client_id: &str) -> Socket {
    let (mut ws, _) = connect_async(format!("ws://{addr}"))
        .await
        .expect("WebSocket handshake failed");
    send(
        &mut ws,
        ClientPacket::Connect {
            client_id: Some(client_id.to_string()),
            clean_session: true,
        },
    )
    .await;
    match recv(&mut ws).await {
        ServerPacket::ConnAck { client_id: id, .. } => assert_eq!(id, client_id),
        other => panic!("expected conn_ack, got {other:?}"),
    }
    ws
}

async fn send(ws: &mut Socket, packet: ClientPacket) {
    let text = serde_json::to_string(&packet).unwrap();
    ws.send(WsMessage::text(text)).await.expect("send failed");
}

async fn recv(ws: &mut Socket) -> ServerPacket {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a packet")
            .expect("stream ended")
            .expect("read failed");
        if let WsMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn subscribe(ws: &mut Socket, filter: &str, qos: u8) {
    send(
        ws,
        ClientPacket::Subscribe {
            packet_id: 1,
            filters: vec![SubscriptionRequest {
                filter: filter.to_string(),
                qos,
            }],
        },
    )
    .await;
    assert_eq!(
        recv(ws).await,
        ServerPacket::SubAck {
            packet_id: 1,
            return_codes: vec![qos],
        }
    );
}

#[tokio::test]
async fn test_connect_and_ping() {
    let (addr, broker) = setup_server().await;
    let mut ws = connect(addr, "pinger").await;

    send(&mut ws, ClientPacket::PingReq).await;
    assert_eq!(recv(&mut ws).await, ServerPacket::PingResp);
    assert!(broker.clients().contains("pinger"));
}

#[tokio::test]
async fn test_publish_reaches_wildcard_subscriber() {
    let (addr, _broker) = setup_server().await;
    let mut subscriber = connect(addr, "sub").await;
    let mut publisher = connect(addr, "pub").await;

    subscribe(&mut subscriber, "sensors/+/temp", 0).await;

    send(
        &mut publisher,
        ClientPacket::Publish {
            packet_id: None,
            topic: "sensors/kitchen/temp".to_string(),
            payload: "21.5".to_string(),
            qos: 0,
        },
    )
    .await;

    assert_eq!(
        recv(&mut subscriber).await,
        ServerPacket::Publish {
            packet_id: None,
            topic: "sensors/kitchen/temp".to_string(),
            payload: "21.5".to_string(),
            qos: 0,
        }
    );
}

#[tokio::test]
async fn test_qos1_delivery_is_acknowledged() {
    let (addr, broker) = setup_server().await;
    let mut subscriber = connect(addr, "sub").await;
    let mut publisher = connect(addr, "pub").await;

    subscribe(&mut subscriber, "jobs/#", 1).await;

    send(
        &mut publisher,
        ClientPacket::Publish {
            packet_id: Some(42),
            topic: "jobs/build".to_string(),
            payload: "start".to_string(),
            qos: 1,
        },
    )
    .await;
    assert_eq!(
        recv(&mut publisher).await,
        ServerPacket::PubAck { packet_id: 42 }
    );

    let ServerPacket::Publish {
        packet_id: Some(id),
        qos: 1,
        ..
    } = recv(&mut subscriber).await
    else {
        panic!("expected a QoS 1 publish");
    };
    let client = broker.clients().get("sub").unwrap();
    assert!(client.store.contains(id));

    send(&mut subscriber, ClientPacket::PubAck { packet_id: id }).await;
    // a ping round trip orders the ack before the check
    send(&mut subscriber, ClientPacket::PingReq).await;
    assert_eq!(recv(&mut subscriber).await, ServerPacket::PingResp);
    assert!(client.store.is_empty());
}

#[tokio::test]
async fn test_qos2_handshake_over_websocket() {
    let (addr, broker) = setup_server().await;
    let mut subscriber = connect(addr, "sub").await;
    let mut publisher = connect(addr, "pub").await;

    subscribe(&mut subscriber, "orders", 2).await;

    send(
        &mut publisher,
        ClientPacket::Publish {
            packet_id: Some(9),
            topic: "orders".to_string(),
            payload: "one".to_string(),
            qos: 2,
        },
    )
    .await;
    assert_eq!(recv(&mut publisher).await, ServerPacket::PubRec { packet_id: 9 });
    send(&mut publisher, ClientPacket::PubRel { packet_id: 9 }).await;
    assert_eq!(recv(&mut publisher).await, ServerPacket::PubComp { packet_id: 9 });

    let ServerPacket::Publish {
        packet_id: Some(id),
        qos: 2,
        ..
    } = recv(&mut subscriber).await
    else {
        panic!("expected a QoS 2 publish");
    };
    send(&mut subscriber, ClientPacket::PubRec { packet_id: id }).await;
    assert_eq!(recv(&mut subscriber).await, ServerPacket::PubRel { packet_id: id });
    send(&mut subscriber, ClientPacket::PubComp { packet_id: id }).await;
    send(&mut subscriber, ClientPacket::PingReq).await;
    assert_eq!(recv(&mut subscriber).await, ServerPacket::PingResp);

    let client = broker.clients().get("sub").unwrap();
    assert!(client.store.is_empty());
}

#[tokio::test]
async fn test_reconnect_closes_previous_socket() {
    let (addr, broker) = setup_server().await;
    let mut first = connect(addr, "dup").await;
    let mut second = connect(addr, "dup").await;

    // the first socket is closed by the server
    let closed = timeout(Duration::from_secs(2), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "first connection was not closed");

    send(&mut second, ClientPacket::PingReq).await;
    assert_eq!(recv(&mut second).await, ServerPacket::PingResp);
    assert!(broker.clients().contains("dup"));
}

#[tokio::test]
async fn test_malformed_frame_is_rejected() {
    let (addr, broker) = setup_server().await;
    let mut ws = connect(addr, "sloppy").await;

    ws.send(WsMessage::text("not json")).await.unwrap();
    assert!(matches!(recv(&mut ws).await, ServerPacket::Error { .. }));

    // the session is torn down after a protocol error
    for _ in 0..100 {
        if !broker.clients().contains("sloppy") {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("client still registered");
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let result = start_websocket_server(addr, Arc::new(Broker::new()), Settings::default()).await;

    assert!(matches!(result, Err(BrokerError::Bind { .. })));
}
