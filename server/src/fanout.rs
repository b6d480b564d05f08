//! Outbound message queue shared by every request handler
//!
//! Handlers never touch the socket. They enqueue here and a single network
//! sender task drains the queue in order, so every observer receives
//! broadcasts in exactly the order they were enqueued.

use log::error;
use shared::Packet;
use std::net::SocketAddr;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum FanoutMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
    BroadcastPacket { packet: Packet },
}

#[derive(Debug, Clone)]
pub struct Fanout {
    tx: mpsc::UnboundedSender<FanoutMessage>,
}

impl Fanout {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FanoutMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues `packet` for every connected observer
    pub fn broadcast(&self, packet: Packet) {
        if let Err(e) = self.tx.send(FanoutMessage::BroadcastPacket { packet }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Queues `packet` for one connection only
    pub fn send(&self, addr: SocketAddr, packet: Packet) {
        if let Err(e) = self.tx.send(FanoutMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for {}: {}", addr, e);
        }
    }
}
