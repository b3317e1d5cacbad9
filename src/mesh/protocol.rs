//! Mesh protocol: message dispatch, outbound pipeline and sync machine.
//!
//! Receive path: envelope → fragmenter → (complete payloads) signature and
//! duplicate checks → handler → ledger/peer updates. Send path: handler →
//! reliable-delivery tracker → priority queue → QoS → duty-cycle gate →
//! fragments handed to the transport driver. The protocol owns every mesh
//! subsystem; external callers interact through its methods only.

use crate::crypto::NodeIdentity;
use crate::error::{NodeError, NodeResult};
use crate::events::{DeliveryFailed, EventBus, FragmentComplete};
use crate::ledger::LedgerService;
use crate::merkle;
use crate::mesh::delivery::ReliableDelivery;
use crate::mesh::duty_cycle::DutyCycle;
use crate::mesh::flood::{FloodCache, FloodDecision, FloodMessage};
use crate::mesh::fragment::{Fragment, Fragmenter, FragmenterConfig, FragmentProgress};
use crate::mesh::message::{MeshMessage, SyncStage};
use crate::mesh::priority_queue::{PriorityQueue, QueueConfig, QueuedMessage};
use crate::mesh::routing::{RouteEntry, RouteTable, RoutingConfig};
use crate::mesh::wire::Envelope;
use crate::peers::ban_list::Misbehavior;
use crate::peers::manager::PeerManager;
use crate::types::{
    now_ms, MessageId, NodeClass, NodeId, PayloadKind, ReliabilityLevel, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Headers exchanged per batch during header sync.
pub const HEADER_BATCH_SIZE: usize = 100;
/// Default TTL for controlled floods.
pub const FLOOD_TTL: u8 = 8;

/// How a node reaches the rest of the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Parallel download over the connection pool.
    Internet,
    /// Fragmented, duty-cycle-gated, prioritized radio sync.
    Mesh,
    /// Gateway node: download over internet, relay over mesh.
    Hybrid,
}

/// Result of probing both transports.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportProbe {
    pub internet_reachable: bool,
    pub mesh_reachable: bool,
}

pub fn select_strategy(probe: &TransportProbe) -> SyncStrategy {
    match (probe.internet_reachable, probe.mesh_reachable) {
        (true, true) => SyncStrategy::Hybrid,
        (true, false) => SyncStrategy::Internet,
        _ => SyncStrategy::Mesh,
    }
}

/// Per-peer sync progression.
#[derive(Clone, Debug)]
pub struct PeerSync {
    pub stage: SyncStage,
    pub peer_height: u64,
    pub headers_validated: u64,
    pub snapshot_height: Option<u64>,
    pub last_transition_at: u64,
}

impl PeerSync {
    fn new() -> Self {
        Self {
            stage: SyncStage::Discovering,
            peer_height: 0,
            headers_validated: 0,
            snapshot_height: None,
            last_transition_at: now_ms(),
        }
    }

    fn transition(&mut self, stage: SyncStage) {
        if self.stage != stage {
            tracing::debug!(from = ?self.stage, to = ?stage, "Sync stage transition");
            self.stage = stage;
            self.last_transition_at = now_ms();
        }
    }
}

/// A frame ready for the transport driver, produced by the outbound pump.
#[derive(Clone, Debug)]
pub struct OutboundFrame {
    pub destination: Option<NodeId>,
    pub bytes: Vec<u8>,
}

struct QueuedFragment {
    fragment: Fragment,
    destination: Option<NodeId>,
}

pub struct MeshProtocol {
    identity: Arc<NodeIdentity>,
    node_class: NodeClass,
    fragmenter: Fragmenter,
    queue: PriorityQueue<QueuedFragment>,
    duty_cycle: DutyCycle,
    delivery: ReliableDelivery,
    routes: RouteTable,
    flood: FloodCache,
    peers: PeerManager,
    ledger: Arc<LedgerService>,
    events: EventBus,
    sync_states: HashMap<NodeId, PeerSync>,
    beacon_sequence: u64,
    flood_sequence: u64,
    /// Replies produced by request handlers, drained by the send loop.
    outbox: Vec<(NodeId, MeshMessage)>,
    /// Message payload TTL while queued, per priority rank.
    queue_ttls_ms: [u64; 4],
}

impl MeshProtocol {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Arc<NodeIdentity>,
        node_class: NodeClass,
        fragmenter_config: FragmenterConfig,
        queue_config: QueueConfig,
        duty_cycle: DutyCycle,
        routing_config: RoutingConfig,
        peers: PeerManager,
        ledger: Arc<LedgerService>,
        events: EventBus,
    ) -> Self {
        Self {
            fragmenter: Fragmenter::new(identity.clone(), fragmenter_config),
            queue: PriorityQueue::new(queue_config),
            duty_cycle,
            delivery: ReliableDelivery::new(),
            routes: RouteTable::new(routing_config),
            flood: FloodCache::new(4_096, 600_000),
            peers,
            ledger,
            events,
            identity,
            node_class,
            sync_states: HashMap::new(),
            beacon_sequence: 0,
            flood_sequence: 0,
            outbox: Vec::new(),
            queue_ttls_ms: [120_000, 90_000, 60_000, 30_000],
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.identity.node_id()
    }

    pub fn peers(&self) -> &PeerManager {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerManager {
        &mut self.peers
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn delivery(&self) -> &ReliableDelivery {
        &self.delivery
    }

    pub fn sync_state(&self, peer: &NodeId) -> Option<&PeerSync> {
        self.sync_states.get(peer)
    }

    pub fn set_emergency_mode(&mut self, on: bool) {
        self.duty_cycle.set_emergency_mode(on);
        self.delivery.set_emergency(on);
        self.fragmenter.set_emergency(on);
    }

    /// Periodic signed beacon advertising this node's route facts.
    pub async fn make_beacon(&mut self) -> NodeResult<Envelope> {
        self.beacon_sequence += 1;
        let height = self.ledger.height().await;
        let completeness = 1.0; // full local UTXO set once bootstrapped
        let route_signature = RouteEntry::sign_advertisement(
            &self.identity,
            self.beacon_sequence,
            self.node_class,
            height,
            completeness,
        );
        Envelope::seal(
            &self.identity,
            &MeshMessage::Beacon {
                node_class: self.node_class,
                blockchain_height: height,
                utxo_completeness: completeness,
                sequence_no: self.beacon_sequence,
                route_signature,
            },
        )
    }

    /// Queue a payload for mesh transmission: fragment, register delivery
    /// tracking, enqueue by priority. Returns the message id.
    pub fn send_payload(
        &mut self,
        kind: PayloadKind,
        payload: &[u8],
        reliability: ReliabilityLevel,
        destination: Option<NodeId>,
    ) -> NodeResult<MessageId> {
        let fragments = self.fragmenter.fragment(kind, payload)?;
        let message_id = fragments[0].header.message_id;
        let priority = fragments[0].header.priority;

        self.delivery
            .send_reliable(message_id, destination, kind, priority, reliability);

        let emergency = self.delivery.qos().emergency()
            && priority == crate::types::MessagePriority::Critical;
        for fragment in fragments {
            let mut queued = QueuedMessage::new(
                QueuedFragment {
                    fragment,
                    destination,
                },
                priority,
                self.queue_ttls_ms[priority.rank()],
            );
            if emergency {
                queued = queued.emergency();
            }
            self.queue
                .enqueue(queued)
                .map_err(|e| NodeError::Transient(format!("queue: {e}")))?;
        }
        Ok(message_id)
    }

    /// Drain the queue through QoS and the duty-cycle gate. Frames that do
    /// not fit the current window stay queued for the next pump.
    pub fn pump_transmissions(&mut self, now: u64) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        let mut requeue = Vec::new();

        while let Some(entry) = self.queue.dequeue() {
            let params = self.delivery.qos().params_for(entry.priority);
            let wire = entry.item.fragment.to_wire();

            if !self
                .duty_cycle
                .can_transmit(now, wire.len(), params.duty_cycle_exempt)
            {
                requeue.push(entry);
                // Lower-priority frames will not fit either once a frame of
                // this size is blocked
                break;
            }

            self.duty_cycle.record_transmission(now, wire.len());
            self.delivery
                .mark_sent(&entry.item.fragment.header.message_id);
            frames.push(OutboundFrame {
                destination: entry.item.destination,
                bytes: wire,
            });
        }

        for entry in requeue {
            let _ = self.queue.enqueue(entry);
        }
        frames
    }

    /// Dispatch one inbound envelope. Misbehavior is attributed to the
    /// sending peer; valid traffic updates peer stats and routes.
    pub async fn handle_envelope(&mut self, envelope: &Envelope) -> NodeResult<()> {
        let sender = envelope.node_id;
        let message = match envelope.open() {
            Ok(message) => {
                self.peers.record_message(&sender, true);
                message
            }
            Err(err) => {
                self.peers.record_message(&sender, false);
                self.attribute(&sender, &err);
                return Err(err);
            }
        };

        let result = self.dispatch(sender, message).await;
        if let Err(err) = &result {
            if matches!(err, NodeError::ProtocolViolation { .. }) {
                self.peers.note_invalid_message(&sender);
            }
            self.attribute(&sender, err);
        }
        result
    }

    fn attribute(&mut self, sender: &NodeId, err: &NodeError) {
        match err {
            NodeError::RateLimited { .. } => {
                self.peers.record_misbehavior(sender, Misbehavior::Spam);
            }
            NodeError::ProtocolViolation { .. } => {
                self.peers
                    .record_misbehavior(sender, Misbehavior::InvalidMessage);
            }
            NodeError::DoubleSpend { .. } => {
                self.peers
                    .record_misbehavior(sender, Misbehavior::MaliciousContent);
            }
            _ => {}
        }
    }

    async fn dispatch(&mut self, sender: NodeId, message: MeshMessage) -> NodeResult<()> {
        match message {
            MeshMessage::Beacon {
                node_class,
                blockchain_height,
                utxo_completeness,
                sequence_no,
                route_signature,
            } => {
                let entry = RouteEntry::from_beacon(
                    sender,
                    sender,
                    1,
                    node_class,
                    blockchain_height,
                    utxo_completeness,
                    1.0,
                    sequence_no,
                    route_signature,
                    now_ms(),
                );
                self.routes.add_route(entry, now_ms())?;
                let sync = self.sync_states.entry(sender).or_insert_with(PeerSync::new);
                sync.peer_height = blockchain_height;
                Ok(())
            }

            MeshMessage::CapabilityAnnounce { listen_addr, .. } => {
                if let Some(addr) = listen_addr {
                    tracing::debug!(peer = %hex::encode(sender), addr, "Capability announce");
                }
                Ok(())
            }

            MeshMessage::VersionNegotiate {
                version, chain_id, ..
            } => {
                if version != PROTOCOL_VERSION {
                    return Err(NodeError::protocol(
                        Some(&hex::encode(sender)),
                        format!("unsupported protocol version {version}"),
                    ));
                }
                let local_chain = self.ledger_chain_id().await;
                if chain_id != local_chain {
                    return Err(NodeError::protocol(
                        Some(&hex::encode(sender)),
                        format!("foreign chain {chain_id}"),
                    ));
                }
                self.sync_states
                    .entry(sender)
                    .or_insert_with(PeerSync::new)
                    .transition(SyncStage::Negotiating);
                Ok(())
            }

            MeshMessage::SyncStatus { stage, height, .. } => {
                let local_height = self.ledger.height().await;
                let sync = self.sync_states.entry(sender).or_insert_with(PeerSync::new);
                sync.peer_height = height;
                // A peer on a longer chain while we believed ourselves
                // synchronized forces reorg handling
                if height > local_height && sync.stage == SyncStage::Synchronized {
                    sync.transition(SyncStage::ReorgHandling);
                } else if stage == SyncStage::Synchronized && height <= local_height {
                    sync.transition(SyncStage::Synchronized);
                }
                Ok(())
            }

            MeshMessage::UtxoHeaderBatch { headers } => {
                let mut prev: Option<&merkle::SpvHeader> = None;
                for header in &headers {
                    merkle::validate_spv_header(header, prev)?;
                    prev = Some(header);
                }
                let sync = self.sync_states.entry(sender).or_insert_with(PeerSync::new);
                sync.headers_validated += headers.len() as u64;
                sync.transition(if sync.headers_validated >= sync.peer_height {
                    SyncStage::UtxoSetSync
                } else {
                    SyncStage::HeaderSync
                });
                Ok(())
            }

            MeshMessage::UtxoSetSnapshot {
                height, set_hash, ..
            } => {
                // Snapshot acceptance requires the committed set hash to
                // match before blocks stack on top
                let local_hash = self.ledger.utxo_set().set_hash();
                let sync = self.sync_states.entry(sender).or_insert_with(PeerSync::new);
                if set_hash == local_hash {
                    sync.snapshot_height = Some(height);
                    sync.transition(SyncStage::BlockSync);
                    Ok(())
                } else {
                    Err(NodeError::protocol(
                        Some(&hex::encode(sender)),
                        "utxo snapshot hash mismatch",
                    ))
                }
            }

            MeshMessage::UtxoBlockResponse { blocks } => {
                for block in blocks {
                    self.ledger.apply_block(block).await?;
                }
                let local_height = self.ledger.height().await;
                let sync = self.sync_states.entry(sender).or_insert_with(PeerSync::new);
                if local_height >= sync.peer_height {
                    sync.transition(SyncStage::MempoolSync);
                }
                Ok(())
            }

            MeshMessage::UtxoBlockFragment { fragment_bytes } => {
                let fragment = Fragment::from_wire(&fragment_bytes)?;
                self.handle_fragment(fragment).await
            }

            MeshMessage::UtxoMerkleProof {
                compressed_proof, ..
            } => {
                let proof = merkle::decompress_proof(&compressed_proof)?;
                if !merkle::verify(&proof, &proof.root) {
                    return Err(NodeError::protocol(
                        Some(&hex::encode(sender)),
                        "merkle proof does not verify",
                    ));
                }
                Ok(())
            }

            MeshMessage::RetransmissionRequest(request) => {
                let served = self.fragmenter.handle_retransmission_request(&request)?;
                self.enqueue_fragments(served, Some(sender));
                Ok(())
            }

            MeshMessage::FragmentAck(ack) => {
                let message_id = ack.message_id;
                self.fragmenter.apply_ack(&ack).ok();
                if self.delivery.handle_ack(&message_id) {
                    let _ = self.events.delivery_confirmed.send(
                        crate::events::DeliveryConfirmed {
                            message_id,
                            destination: Some(sender),
                        },
                    );
                }
                Ok(())
            }

            MeshMessage::FragmentNack(nack) => {
                let message_id = nack.message_id;
                let served = self.fragmenter.apply_nack(&nack)?;
                self.delivery.handle_nack(&message_id);
                self.enqueue_fragments(served, Some(sender));
                Ok(())
            }

            MeshMessage::DutyCycleStatus {
                window_utilisation,
                queue_depth,
                ..
            } => {
                // Neighbour congestion feeds adaptive retransmission
                self.fragmenter
                    .set_conditions(&crate::mesh::fragment::NetworkConditions {
                        packet_loss: 0.0,
                        congestion_level: window_utilisation.clamp(0.0, 1.0),
                        latency_ms: queue_depth as u64 * 100,
                    });
                Ok(())
            }

            MeshMessage::UtxoHeaderRequest {
                start_height,
                count,
            } => {
                let count = (count as usize).min(HEADER_BATCH_SIZE);
                let mut headers = Vec::with_capacity(count);
                for index in start_height..start_height + count as u64 {
                    match self.ledger.block_at(index).await {
                        Some(block) => headers.push(block.spv_header()),
                        None => break,
                    }
                }
                self.outbox
                    .push((sender, MeshMessage::UtxoHeaderBatch { headers }));
                Ok(())
            }

            MeshMessage::UtxoSetRequest { height } => {
                let utxos = self.ledger.utxo_set().snapshot();
                let set_hash = self.ledger.utxo_set().set_hash();
                self.outbox.push((
                    sender,
                    MeshMessage::UtxoSetSnapshot {
                        height,
                        set_hash,
                        utxos,
                    },
                ));
                Ok(())
            }

            MeshMessage::UtxoBlockRequest {
                start_height,
                end_height,
            } => {
                let mut blocks = Vec::new();
                for index in start_height..=end_height.min(start_height + 32) {
                    match self.ledger.block_at(index).await {
                        Some(block) => blocks.push(block),
                        None => break,
                    }
                }
                self.outbox
                    .push((sender, MeshMessage::UtxoBlockResponse { blocks }));
                Ok(())
            }

            MeshMessage::CompressionNegotiate { .. } | MeshMessage::UtxoSetDelta { .. } => {
                // Negotiation outcome and incremental deltas are consumed by
                // the sync driver; nothing to validate beyond the envelope
                Ok(())
            }
        }
    }

    /// Replies produced by request handlers since the last drain, sealed
    /// for transmission.
    pub fn drain_outbox(&mut self) -> Vec<(NodeId, Envelope)> {
        let pending = std::mem::take(&mut self.outbox);
        pending
            .into_iter()
            .filter_map(|(peer, message)| {
                Envelope::seal(&self.identity, &message)
                    .ok()
                    .map(|envelope| (peer, envelope))
            })
            .collect()
    }

    /// Originate a controlled flood from this node.
    pub fn originate_flood(&mut self, kind: PayloadKind, payload: Vec<u8>) -> FloodMessage {
        self.flood_sequence += 1;
        FloodMessage::originate(&self.identity, self.flood_sequence, FLOOD_TTL, kind, payload)
    }

    async fn handle_fragment(&mut self, fragment: Fragment) -> NodeResult<()> {
        let sender = fragment.header.node_id;
        let kind = fragment.header.payload_kind;
        let message_id = fragment.header.message_id;

        match self.fragmenter.accept(fragment)? {
            FragmentProgress::Complete { payload } => {
                let _ = self.events.fragment_complete.send(FragmentComplete {
                    message_id,
                    sender,
                    payload_len: payload.len(),
                });
                self.deliver_payload(kind, payload).await
            }
            FragmentProgress::Progress { .. } | FragmentProgress::Duplicate => Ok(()),
        }
    }

    /// A fully reassembled payload reaches its domain handler.
    async fn deliver_payload(&mut self, kind: PayloadKind, payload: Vec<u8>) -> NodeResult<()> {
        match kind {
            PayloadKind::Block => {
                let block = bincode::deserialize(&payload)
                    .map_err(|e| NodeError::protocol(None, format!("malformed block: {e}")))?;
                self.ledger.apply_block(block).await
            }
            PayloadKind::UtxoTransaction => {
                let tx = bincode::deserialize(&payload).map_err(|e| {
                    NodeError::protocol(None, format!("malformed transaction: {e}"))
                })?;
                self.ledger.submit_transaction(tx).map(|_| ())
            }
            PayloadKind::MerkleProof => {
                let proof = merkle::decompress_proof(&payload)?;
                if merkle::verify(&proof, &proof.root) {
                    Ok(())
                } else {
                    Err(NodeError::protocol(None, "reassembled proof invalid"))
                }
            }
            _ => Ok(()),
        }
    }

    fn enqueue_fragments(&mut self, fragments: Vec<Fragment>, destination: Option<NodeId>) {
        for fragment in fragments {
            let priority = fragment.header.priority;
            let _ = self.queue.enqueue(QueuedMessage::new(
                QueuedFragment {
                    fragment,
                    destination,
                },
                priority,
                self.queue_ttls_ms[priority.rank()],
            ));
        }
    }

    /// Flood admission: loop check on the path vector, then cache and TTL
    /// rules. Forwarded floods re-enter the queue.
    pub fn handle_flood(&mut self, mut message: FloodMessage) -> NodeResult<bool> {
        let self_id = self.identity.node_id();
        match self.routes.check_path(&message.path, &self_id) {
            crate::mesh::routing::PathCheck::Clean => {}
            problem => {
                return Err(NodeError::protocol(
                    Some(&hex::encode(message.originator)),
                    format!("path vector rejected: {problem:?}"),
                ));
            }
        }

        match self.flood.should_forward(&mut message, &self_id, now_ms())? {
            FloodDecision::Forward => Ok(true),
            FloodDecision::DropDuplicate | FloodDecision::DropTtlExpired => Ok(false),
        }
    }

    /// Forward an admitted flood toward `next_hop`: the payload re-enters
    /// the pipeline as signed fragments with a delivery entry, an ACK
    /// deadline and the per-type retry policy.
    pub fn forward_flood(
        &mut self,
        message: &FloodMessage,
        next_hop: NodeId,
    ) -> NodeResult<MessageId> {
        let bytes = bincode::serialize(message)
            .map_err(|e| NodeError::Transient(format!("flood serialization: {e}")))?;
        self.send_payload(
            message.payload_kind,
            &bytes,
            ReliabilityLevel::Confirmed,
            Some(next_hop),
        )
    }

    /// Periodic housekeeping: retransmissions, retry timers, expiries.
    pub fn tick(&mut self, now: u64) -> Vec<Envelope> {
        let mut control = Vec::new();

        for request in self.fragmenter.due_retransmission_requests(now) {
            if let Ok(envelope) = Envelope::seal(
                &self.identity,
                &MeshMessage::RetransmissionRequest(request),
            ) {
                control.push(envelope);
            }
        }

        for failed in self.fragmenter.take_failed() {
            let _ = self.events.delivery_failed.send(DeliveryFailed {
                message_id: failed,
                reason: "reassembly failed".to_string(),
            });
        }

        for message_id in self.delivery.due_retries(now) {
            // Re-enqueue the stored fragments for another transmission round
            if let Some(fragments) = self.fragmenter.outbound_fragments(&message_id) {
                let destination = self.delivery.get(&message_id).and_then(|p| p.destination);
                self.enqueue_fragments(fragments, destination);
            }
        }

        self.fragmenter.expire(now);
        self.queue.remove_expired();
        self.routes.prune_stale(now);
        self.peers.maintain();
        control
    }

    async fn ledger_chain_id(&self) -> String {
        // Chain id is fixed at bootstrap; cached via the genesis config
        self.ledger.chain_id().await
    }

    /// Shutdown: every still-pending delivery becomes a dead letter.
    pub fn drain_for_shutdown(&mut self) -> usize {
        self.delivery.drain_to_dead_letter()
    }

    /// Snapshot incomplete reassembly sessions for persistence.
    pub fn persist_sessions(&self) -> Vec<(MessageId, Vec<u8>)> {
        self.fragmenter.persist_sessions()
    }

    /// Restore persisted reassembly sessions after a restart.
    pub fn restore_sessions(&mut self, snapshots: Vec<Vec<u8>>) -> usize {
        self.fragmenter.restore_sessions(snapshots)
    }

    /// Report for `duty_cycle_status` broadcasts.
    pub fn duty_cycle_report(&mut self, now: u64) -> MeshMessage {
        MeshMessage::DutyCycleStatus {
            region: self.duty_cycle.region().name().to_string(),
            window_utilisation: self.duty_cycle.utilisation(now),
            queue_depth: self.queue.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_selection() {
        assert_eq!(
            select_strategy(&TransportProbe {
                internet_reachable: true,
                mesh_reachable: true
            }),
            SyncStrategy::Hybrid
        );
        assert_eq!(
            select_strategy(&TransportProbe {
                internet_reachable: true,
                mesh_reachable: false
            }),
            SyncStrategy::Internet
        );
        assert_eq!(
            select_strategy(&TransportProbe {
                internet_reachable: false,
                mesh_reachable: true
            }),
            SyncStrategy::Mesh
        );
        assert_eq!(select_strategy(&TransportProbe::default()), SyncStrategy::Mesh);
    }

    #[test]
    fn sync_state_transitions() {
        let mut sync = PeerSync::new();
        assert_eq!(sync.stage, SyncStage::Discovering);
        sync.transition(SyncStage::Negotiating);
        sync.transition(SyncStage::HeaderSync);
        sync.transition(SyncStage::UtxoSetSync);
        sync.transition(SyncStage::BlockSync);
        sync.transition(SyncStage::MempoolSync);
        sync.transition(SyncStage::Synchronized);
        assert_eq!(sync.stage, SyncStage::Synchronized);

        // Reorg is reachable from any state
        sync.transition(SyncStage::ReorgHandling);
        assert_eq!(sync.stage, SyncStage::ReorgHandling);
    }
}
