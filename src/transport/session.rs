//! Per-connection protocol session
//!
//! `run_session` drives one connection from CONNECT to teardown:
//! - the first packet must be `connect`; the client is then registered,
//!   evicting any earlier connection under the same identity
//! - subscriptions are answered with a SUBACK carrying the granted QoS, or
//!   `0x80` for a rejected filter
//! - inbound publishes are routed through the broker and acknowledged per QoS
//! - acknowledgments for outbound messages advance the client's store
//!
//! The session ends when the client disconnects, the event stream ends or
//! fails (including after a forced close), or the client breaks the
//! protocol. Teardown only unregisters the client if it has not been replaced.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::broker::message::{ClientMessage, DeliveryStatus, QoS};
use crate::client::Client;
use crate::transport::connection::Connection;
use crate::transport::message::{ClientPacket, SUBACK_FAILURE, ServerPacket, SubscriptionRequest};
use crate::utils::BrokerError;

enum Flow {
    Continue,
    Disconnect,
}

pub async fn run_session<S>(
    broker: Arc<Broker>,
    connection: Arc<dyn Connection>,
    mut events: S,
) -> Result<(), BrokerError>
where
    S: Stream<Item = Result<ClientPacket, BrokerError>> + Unpin,
{
    let remote = connection.remote_addr();

    let (client_id, clean_session) = match events.next().await {
        Some(Ok(ClientPacket::Connect {
            client_id,
            clean_session,
        })) => (client_id, clean_session),
        Some(Ok(other)) => {
            warn!(%remote, packet = ?other, "first packet was not connect");
            reject(&*connection, "expected connect");
            return Err(BrokerError::Protocol("first packet must be connect".into()));
        }
        Some(Err(e)) => {
            match &e {
                BrokerError::Protocol(reason) => reject(&*connection, reason),
                _ => connection.close(),
            }
            return Err(e);
        }
        None => return Ok(()),
    };

    let client_id = match client_id {
        Some(id) if !id.is_empty() => id,
        _ => format!("client-{}", Uuid::new_v4()),
    };

    let client = Arc::new(Client::new(client_id, connection.clone()));
    let session_present = broker.connect(client.clone(), clean_session);

    let mut result = client.send(&ServerPacket::ConnAck {
        client_id: client.id.clone(),
        session_present,
    });

    if result.is_ok() {
        while let Some(event) = events.next().await {
            let outcome = event.and_then(|packet| handle_packet(&broker, &client, packet));
            match outcome {
                Ok(Flow::Continue) => {}
                Ok(Flow::Disconnect) => break,
                Err(e) => {
                    if let BrokerError::Protocol(reason) = &e {
                        warn!(client_id = %client.id, %reason, "protocol violation");
                        reject(&*connection, reason);
                    }
                    result = Err(e);
                    break;
                }
            }
        }
    }

    broker.disconnect(&client, clean_session);
    connection.close();

    match &result {
        Ok(()) | Err(BrokerError::ConnectionClosed) => {
            info!(client_id = %client.id, %remote, "session ended")
        }
        Err(e) => debug!(client_id = %client.id, %remote, error = %e, "session ended with error"),
    }
    result
}

fn reject(connection: &dyn Connection, reason: &str) {
    let packet = ServerPacket::Error {
        message: reason.to_string(),
    };
    if let Ok(bytes) = packet.encode() {
        let _ = connection.send(bytes);
    }
    connection.close();
}

fn handle_packet(broker: &Broker, client: &Client, packet: ClientPacket) -> Result<Flow, BrokerError> {
    match packet {
        ClientPacket::Connect { .. } => {
            return Err(BrokerError::Protocol("duplicate connect".into()));
        }
        ClientPacket::Subscribe { packet_id, filters } => {
            let return_codes = filters
                .iter()
                .map(|request| subscribe_one(broker, client, request))
                .collect();
            client.send(&ServerPacket::SubAck {
                packet_id,
                return_codes,
            })?;
        }
        ClientPacket::Unsubscribe { packet_id, filters } => {
            for filter in &filters {
                if let Err(e) = broker.unsubscribe(&client.id, filter.as_bytes()) {
                    debug!(client_id = %client.id, error = %e, "unsubscribe ignored");
                }
            }
            client.send(&ServerPacket::UnsubAck { packet_id })?;
        }
        ClientPacket::Publish {
            packet_id,
            topic,
            payload,
            qos,
        } => handle_publish(broker, client, packet_id, &topic, &payload, qos)?,
        ClientPacket::PubAck { packet_id } => {
            if !client.store.advance(packet_id, DeliveryStatus::Acknowledged) {
                debug!(client_id = %client.id, packet_id, "unexpected puback");
            }
        }
        ClientPacket::PubRec { packet_id } => {
            if client.store.release(packet_id) {
                client.send(&ServerPacket::PubRel { packet_id })?;
            } else {
                debug!(client_id = %client.id, packet_id, "unexpected pubrec");
            }
        }
        ClientPacket::PubComp { packet_id } => {
            if !client.store.advance(packet_id, DeliveryStatus::Complete) {
                debug!(client_id = %client.id, packet_id, "unexpected pubcomp");
            }
        }
        ClientPacket::PubRel { packet_id } => {
            client
                .incoming
                .acknowledge(packet_id, DeliveryStatus::Complete, true);
            client.send(&ServerPacket::PubComp { packet_id })?;
        }
        ClientPacket::PingReq => client.send(&ServerPacket::PingResp)?,
        ClientPacket::Disconnect => return Ok(Flow::Disconnect),
    }
    Ok(Flow::Continue)
}

fn subscribe_one(broker: &Broker, client: &Client, request: &SubscriptionRequest) -> u8 {
    let granted = QoS::try_from(request.qos)
        .and_then(|qos| broker.subscribe(&client.id, request.filter.as_bytes(), qos));
    match granted {
        Ok(qos) => qos.as_u8(),
        Err(e) => {
            warn!(client_id = %client.id, filter = %request.filter, error = %e, "subscription rejected");
            SUBACK_FAILURE
        }
    }
}

fn handle_publish(
    broker: &Broker,
    client: &Client,
    packet_id: Option<u16>,
    topic: &str,
    payload: &str,
    qos: u8,
) -> Result<(), BrokerError> {
    let qos = QoS::try_from(qos).map_err(|e| BrokerError::Protocol(e.to_string()))?;
    let packet_id = match (qos, packet_id) {
        (QoS::AtMostOnce, _) => None,
        (_, Some(id)) if id != 0 => Some(id),
        _ => return Err(BrokerError::Protocol("publish with QoS > 0 needs a packet id".into())),
    };

    // A repeated QoS 2 publish still waiting for its release was already routed.
    if let Some(id) = packet_id {
        if qos == QoS::ExactlyOnce && client.incoming.contains(id) {
            return client.send(&ServerPacket::PubRec { packet_id: id });
        }
    }

    if let Err(e) = broker.publish(topic.as_bytes(), payload.as_bytes(), qos) {
        warn!(client_id = %client.id, topic, error = %e, "publish rejected");
        return client.send(&ServerPacket::Error {
            message: e.to_string(),
        });
    }

    match (qos, packet_id) {
        (QoS::AtLeastOnce, Some(id)) => client.send(&ServerPacket::PubAck { packet_id: id }),
        (QoS::ExactlyOnce, Some(id)) => {
            client.incoming.store(
                id,
                ClientMessage::new(id, topic, payload.as_bytes(), qos, &client.id),
            );
            client.incoming.acknowledge(id, DeliveryStatus::Received, false);
            client.send(&ServerPacket::PubRec { packet_id: id })
        }
        _ => Ok(()),
    }
}
