//! Protocol packets exchanged with clients.
//!
//! The transport speaks JSON objects tagged by `type`, one per WebSocket text
//! frame. Field names and flows follow MQTT 3.1.1; payloads travel as UTF-8
//! strings.

use serde::{Deserialize, Serialize};

use crate::utils::BrokerError;

/// SUBACK return code for a rejected subscription.
pub const SUBACK_FAILURE: u8 = 0x80;

fn default_clean_session() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubscriptionRequest {
    pub filter: String,
    pub qos: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientPacket {
    Connect {
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default = "default_clean_session")]
        clean_session: bool,
    },
    Subscribe {
        packet_id: u16,
        filters: Vec<SubscriptionRequest>,
    },
    Unsubscribe {
        packet_id: u16,
        filters: Vec<String>,
    },
    Publish {
        #[serde(default)]
        packet_id: Option<u16>,
        topic: String,
        payload: String,
        #[serde(default)]
        qos: u8,
    },
    PubAck {
        packet_id: u16,
    },
    PubRec {
        packet_id: u16,
    },
    PubRel {
        packet_id: u16,
    },
    PubComp {
        packet_id: u16,
    },
    PingReq,
    Disconnect,
}

impl ClientPacket {
    pub fn decode(text: &str) -> Result<Self, BrokerError> {
        serde_json::from_str(text).map_err(|e| BrokerError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPacket {
    ConnAck {
        client_id: String,
        session_present: bool,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    UnsubAck {
        packet_id: u16,
    },
    Publish {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        packet_id: Option<u16>,
        topic: String,
        payload: String,
        qos: u8,
    },
    PubAck {
        packet_id: u16,
    },
    PubRec {
        packet_id: u16,
    },
    PubRel {
        packet_id: u16,
    },
    PubComp {
        packet_id: u16,
    },
    PingResp,
    Error {
        message: String,
    },
}

impl ServerPacket {
    pub fn encode(&self) -> Result<Vec<u8>, BrokerError> {
        Ok(serde_json::to_vec(self)?)
    }
}
