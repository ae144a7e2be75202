use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::transport::connection::Connection;
use crate::transport::message::ServerPacket;
use crate::utils::BrokerError;

/// Connection double that records every frame sent through it.
#[derive(Debug)]
pub struct RecordingConnection {
    remote: SocketAddr,
    sent: Mutex<Vec<Vec<u8>>>,
    closed: AtomicBool,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            remote: "127.0.0.1:40000".parse().unwrap(),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn packets(&self) -> Vec<ServerPacket> {
        self.sent
            .lock()
            .iter()
            .map(|frame| serde_json::from_slice(frame).unwrap())
            .collect()
    }

    /// Drain and decode everything sent so far.
    pub fn take(&self) -> Vec<ServerPacket> {
        let frames = std::mem::take(&mut *self.sent.lock());
        frames
            .iter()
            .map(|frame| serde_json::from_slice(frame).unwrap())
            .collect()
    }
}

impl Connection for RecordingConnection {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn send(&self, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::ConnectionClosed);
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
