//! Typed event channels.
//!
//! One broadcast channel per event kind; subsystems subscribe at
//! construction and tests drain receivers deterministically. There is no
//! string-keyed emitter anywhere.

use crate::types::{MessageId, NodeId};
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct PeerDiscovered {
    pub node_id: Option<NodeId>,
    pub address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct PeerBanned {
    pub node_id: NodeId,
    pub address: String,
    pub permanent: bool,
}

#[derive(Clone, Debug)]
pub struct DeliveryConfirmed {
    pub message_id: MessageId,
    pub destination: Option<NodeId>,
}

#[derive(Clone, Debug)]
pub struct DeliveryFailed {
    pub message_id: MessageId,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct FragmentComplete {
    pub message_id: MessageId,
    pub sender: NodeId,
    pub payload_len: usize,
}

/// Bundle of per-kind broadcast senders, cloned into each subsystem.
#[derive(Clone)]
pub struct EventBus {
    pub peer_discovered: broadcast::Sender<PeerDiscovered>,
    pub peer_banned: broadcast::Sender<PeerBanned>,
    pub delivery_confirmed: broadcast::Sender<DeliveryConfirmed>,
    pub delivery_failed: broadcast::Sender<DeliveryFailed>,
    pub fragment_complete: broadcast::Sender<FragmentComplete>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            peer_discovered: broadcast::channel(CHANNEL_CAPACITY).0,
            peer_banned: broadcast::channel(CHANNEL_CAPACITY).0,
            delivery_confirmed: broadcast::channel(CHANNEL_CAPACITY).0,
            delivery_failed: broadcast::channel(CHANNEL_CAPACITY).0,
            fragment_complete: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
