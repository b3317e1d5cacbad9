//! Message fragmentation and reassembly.
//!
//! Payloads above the per-type fragment cap are split into consecutive,
//! individually signed fragments. Each inbound message id gets a reassembly
//! session that tracks received slots, recomputes the missing set on every
//! arrival, and emits signed retransmission requests on an exponential
//! backoff schedule. Cumulative and selective ACKs excuse sequence numbers
//! from the missing set; NACKs trigger immediate retransmission from the
//! outbound store.

use crate::crypto::{derive_message_id, verify_signature, NodeIdentity};
use crate::error::{NodeError, NodeResult};
use crate::mesh::message::{AckList, FragmentAck, FragmentNack, RetransmissionRequest};
use crate::mesh::rate_limiter::SenderQuota;
use crate::types::{now_ms, MessageId, MessagePriority, NodeId, PayloadKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Fixed-width fragment header:
/// `message_id(16) | sequence_no(2) | total_fragments(2) | message_type(1) |
/// priority(1) | node_id(32) | signature(64)`.
pub const FRAGMENT_HEADER_SIZE: usize = 16 + 2 + 2 + 1 + 1 + 32 + 64;

/// ACK/NACK timestamps outside this window are protocol violations.
const ACK_TIMESTAMP_WINDOW_MS: u64 = 30_000;

// Domain tags folded into control-message signatures.
const TAG_ACK: u8 = 0x41;
const TAG_NACK: u8 = 0x4E;
const TAG_RETRANSMIT: u8 = 0x52;

fn kind_to_byte(kind: PayloadKind) -> u8 {
    match kind {
        PayloadKind::UtxoTransaction => 0,
        PayloadKind::Block => 1,
        PayloadKind::MerkleProof => 2,
        PayloadKind::SyncStatus => 3,
        PayloadKind::Discovery => 4,
        PayloadKind::Other => 5,
    }
}

fn byte_to_kind(byte: u8) -> Option<PayloadKind> {
    Some(match byte {
        0 => PayloadKind::UtxoTransaction,
        1 => PayloadKind::Block,
        2 => PayloadKind::MerkleProof,
        3 => PayloadKind::SyncStatus,
        4 => PayloadKind::Discovery,
        5 => PayloadKind::Other,
        _ => return None,
    })
}

fn priority_to_byte(priority: MessagePriority) -> u8 {
    priority.rank() as u8
}

fn byte_to_priority(byte: u8) -> Option<MessagePriority> {
    Some(match byte {
        0 => MessagePriority::Critical,
        1 => MessagePriority::High,
        2 => MessagePriority::Normal,
        3 => MessagePriority::Low,
        _ => return None,
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FragmentHeader {
    pub message_id: MessageId,
    pub sequence_no: u16,
    pub total_fragments: u16,
    pub payload_kind: PayloadKind,
    pub priority: MessagePriority,
    pub node_id: NodeId,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub payload: Vec<u8>,
}

impl Fragment {
    fn signed_region(
        message_id: &MessageId,
        sequence_no: u16,
        total_fragments: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut region = Vec::with_capacity(20 + payload.len());
        region.extend_from_slice(message_id);
        region.extend_from_slice(&sequence_no.to_be_bytes());
        region.extend_from_slice(&total_fragments.to_be_bytes());
        region.extend_from_slice(payload);
        region
    }

    pub fn verify(&self) -> NodeResult<()> {
        let region = Self::signed_region(
            &self.header.message_id,
            self.header.sequence_no,
            self.header.total_fragments,
            &self.payload,
        );
        verify_signature(&self.header.node_id, &region, &self.header.signature).map_err(|_| {
            NodeError::protocol(
                Some(&hex::encode(self.header.node_id)),
                "fragment signature invalid",
            )
        })
    }

    /// Fixed-width wire layout followed by the payload.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAGMENT_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.message_id);
        out.extend_from_slice(&self.header.sequence_no.to_be_bytes());
        out.extend_from_slice(&self.header.total_fragments.to_be_bytes());
        out.push(kind_to_byte(self.header.payload_kind));
        out.push(priority_to_byte(self.header.priority));
        out.extend_from_slice(&self.header.node_id);
        out.extend_from_slice(&self.header.signature);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn from_wire(bytes: &[u8]) -> NodeResult<Self> {
        if bytes.len() < FRAGMENT_HEADER_SIZE {
            return Err(NodeError::protocol(None, "truncated fragment"));
        }

        let mut message_id = [0u8; 16];
        message_id.copy_from_slice(&bytes[0..16]);
        let sequence_no = u16::from_be_bytes([bytes[16], bytes[17]]);
        let total_fragments = u16::from_be_bytes([bytes[18], bytes[19]]);
        let payload_kind = byte_to_kind(bytes[20])
            .ok_or_else(|| NodeError::protocol(None, "unknown fragment message type"))?;
        let priority = byte_to_priority(bytes[21])
            .ok_or_else(|| NodeError::protocol(None, "unknown fragment priority"))?;
        let mut node_id = [0u8; 32];
        node_id.copy_from_slice(&bytes[22..54]);
        let signature = bytes[54..118].to_vec();
        let payload = bytes[118..].to_vec();

        Ok(Self {
            header: FragmentHeader {
                message_id,
                sequence_no,
                total_fragments,
                payload_kind,
                priority,
                node_id,
                signature,
            },
            payload,
        })
    }
}

/// Retransmission backoff:
/// `delay = min(base · multiplier^attempt + U(0, jitter), cap)`.
#[derive(Clone, Debug)]
pub struct RetransmissionPolicy {
    pub base_ms: u64,
    pub multiplier: f64,
    pub jitter_frac: f64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetransmissionPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            multiplier: 2.0,
            jitter_frac: 0.2,
            cap_ms: 16_000,
            max_attempts: 3,
        }
    }
}

impl RetransmissionPolicy {
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let backoff = self.base_ms as f64 * self.multiplier.powi(attempt as i32);
        let jitter = rand::random::<f64>() * self.jitter_frac * self.base_ms as f64;
        ((backoff + jitter) as u64).min(self.cap_ms)
    }

    /// Network-adaptive tuning: loss raises attempts, congestion raises the
    /// cap, latency raises the base.
    pub fn tuned(&self, conditions: &NetworkConditions) -> Self {
        let mut policy = self.clone();
        if conditions.packet_loss > 0.3 {
            policy.max_attempts = self.max_attempts + 2;
        } else if conditions.packet_loss > 0.1 {
            policy.max_attempts = self.max_attempts + 1;
        }
        if conditions.congestion_level > 0.5 {
            policy.cap_ms = (self.cap_ms as f64 * (1.0 + conditions.congestion_level)) as u64;
        }
        if conditions.latency_ms > 1_000 {
            policy.base_ms = self.base_ms + conditions.latency_ms / 2;
        }
        policy
    }
}

/// Observed link conditions driving adaptive retransmission.
#[derive(Clone, Copy, Debug, Default)]
pub struct NetworkConditions {
    pub packet_loss: f64,
    pub congestion_level: f64,
    pub latency_ms: u64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Receiving,
    Complete,
    Failed,
}

/// Per-message receive state. Persisted across restarts so an edge node does
/// not lose a half-received transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReassemblySession {
    pub message_id: MessageId,
    pub total_fragments: u16,
    slots: Vec<Option<Vec<u8>>>,
    /// Sequence numbers excused by ACKs: not received, but not requested.
    acked: HashSet<u16>,
    pub priority: MessagePriority,
    pub payload_kind: PayloadKind,
    pub state: SessionState,
    pub retry_count: u32,
    pub next_retransmission_at: u64,
    pub created_at: u64,
    pub last_arrival_at: u64,
    pub sender_id: NodeId,
    pub duplicates: u32,
}

impl ReassemblySession {
    fn new(fragment: &Fragment, now: u64) -> Self {
        Self {
            message_id: fragment.header.message_id,
            total_fragments: fragment.header.total_fragments,
            slots: vec![None; fragment.header.total_fragments as usize],
            acked: HashSet::new(),
            priority: fragment.header.payload_kind.priority(false),
            payload_kind: fragment.header.payload_kind,
            state: SessionState::Receiving,
            retry_count: 0,
            next_retransmission_at: 0,
            created_at: now,
            last_arrival_at: now,
            sender_id: fragment.header.node_id,
            duplicates: 0,
        }
    }

    pub fn received_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn completion_ratio(&self) -> f64 {
        self.received_count() as f64 / self.total_fragments.max(1) as f64
    }

    /// Sequence numbers neither received nor excused by an ACK.
    pub fn missing(&self) -> Vec<u16> {
        (0..self.total_fragments)
            .filter(|seq| self.slots[*seq as usize].is_none() && !self.acked.contains(seq))
            .collect()
    }

    fn assemble(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for slot in &self.slots {
            if let Some(chunk) = slot {
                payload.extend_from_slice(chunk);
            }
        }
        payload
    }
}

/// Progress report from accepting one fragment.
#[derive(Debug, PartialEq)]
pub enum FragmentProgress {
    Progress { missing: Vec<u16> },
    Complete { payload: Vec<u8> },
    Duplicate,
}

#[derive(Clone, Debug)]
pub struct FragmenterConfig {
    pub max_sessions: usize,
    pub session_timeout_ms: u64,
    pub rtt_estimate_ms: u64,
    pub fragments_per_minute: u32,
    pub max_sessions_per_sender: usize,
}

impl Default for FragmenterConfig {
    fn default() -> Self {
        Self {
            max_sessions: 256,
            session_timeout_ms: 120_000,
            rtt_estimate_ms: 2_000,
            fragments_per_minute: 600,
            max_sessions_per_sender: 16,
        }
    }
}

pub struct Fragmenter {
    identity: Arc<NodeIdentity>,
    config: FragmenterConfig,
    policy: RetransmissionPolicy,
    sessions: HashMap<MessageId, ReassemblySession>,
    /// Fragments we originated, kept to serve retransmissions and NACKs.
    outbound: HashMap<MessageId, Vec<Fragment>>,
    quota: SenderQuota,
    failed: Vec<MessageId>,
    emergency: bool,
}

impl Fragmenter {
    pub fn new(identity: Arc<NodeIdentity>, config: FragmenterConfig) -> Self {
        let quota = SenderQuota::new(config.fragments_per_minute, config.max_sessions_per_sender);
        Self {
            identity,
            config,
            policy: RetransmissionPolicy::default(),
            sessions: HashMap::new(),
            outbound: HashMap::new(),
            quota,
            failed: Vec::new(),
            emergency: false,
        }
    }

    pub fn set_emergency(&mut self, emergency: bool) {
        self.emergency = emergency;
    }

    pub fn set_conditions(&mut self, conditions: &NetworkConditions) {
        self.policy = RetransmissionPolicy::default().tuned(conditions);
    }

    pub fn session(&self, message_id: &MessageId) -> Option<&ReassemblySession> {
        self.sessions.get(message_id)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Split a payload into signed fragments, retaining them for
    /// retransmission service. A payload that fits one fragment still yields
    /// `total_fragments = 1`.
    pub fn fragment(&mut self, kind: PayloadKind, payload: &[u8]) -> NodeResult<Vec<Fragment>> {
        let cap = kind.fragment_payload_cap();
        let chunk_count = payload.len().div_ceil(cap).max(1);
        if chunk_count > u16::MAX as usize {
            return Err(NodeError::validation(
                crate::error::ValidationField::Amount,
                format!("payload needs {chunk_count} fragments (max {})", u16::MAX),
            ));
        }

        let message_id = derive_message_id(&self.identity.node_id(), now_ms(), payload);
        let total = chunk_count as u16;
        let priority = kind.priority(self.emergency);
        let node_id = self.identity.node_id();

        let mut chunks: Vec<&[u8]> = payload.chunks(cap).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }

        let mut fragments = Vec::with_capacity(chunk_count);
        for (seq, chunk) in chunks.into_iter().enumerate() {
            let sequence_no = seq as u16;
            let signature = self.identity.sign(&Fragment::signed_region(
                &message_id,
                sequence_no,
                total,
                chunk,
            ));
            fragments.push(Fragment {
                header: FragmentHeader {
                    message_id,
                    sequence_no,
                    total_fragments: total,
                    payload_kind: kind,
                    priority,
                    node_id,
                    signature,
                },
                payload: chunk.to_vec(),
            });
        }

        self.outbound.insert(message_id, fragments.clone());
        Ok(fragments)
    }

    /// Accept one inbound fragment and advance its session.
    pub fn accept(&mut self, fragment: Fragment) -> NodeResult<FragmentProgress> {
        fragment.verify()?;
        let sender = fragment.header.node_id;
        let sender_hex = hex::encode(sender);

        if !self.quota.allow_fragment(&sender) {
            return Err(NodeError::RateLimited {
                subject: sender_hex,
            });
        }

        if fragment.header.total_fragments == 0
            || fragment.header.sequence_no >= fragment.header.total_fragments
        {
            return Err(NodeError::protocol(
                Some(&sender_hex),
                format!(
                    "sequence {} out of range (total {})",
                    fragment.header.sequence_no, fragment.header.total_fragments
                ),
            ));
        }

        if fragment.payload.len() > fragment.header.payload_kind.fragment_payload_cap() {
            return Err(NodeError::protocol(
                Some(&sender_hex),
                "fragment payload exceeds type cap",
            ));
        }

        let now = now_ms();
        let message_id = fragment.header.message_id;

        if !self.sessions.contains_key(&message_id) {
            if !self.quota.allow_session(&sender) {
                return Err(NodeError::RateLimited {
                    subject: sender_hex,
                });
            }
            if self.sessions.len() >= self.config.max_sessions {
                self.evict_one();
            }
            self.quota.session_opened(&sender);
            self.sessions
                .insert(message_id, ReassemblySession::new(&fragment, now));
        }

        let session = self.sessions.get_mut(&message_id).expect("just inserted");

        // A conflicting fragment count for the same id is an attack or a
        // corrupt sender; the fragment is discarded.
        if session.total_fragments != fragment.header.total_fragments {
            return Err(NodeError::protocol(
                Some(&sender_hex),
                "inconsistent total_fragments for session",
            ));
        }

        let slot = &mut session.slots[fragment.header.sequence_no as usize];
        if slot.is_some() {
            session.duplicates += 1;
            return Ok(FragmentProgress::Duplicate);
        }
        *slot = Some(fragment.payload);
        session.last_arrival_at = now;

        if session.received_count() == session.total_fragments as usize {
            session.state = SessionState::Complete;
            let payload = session.assemble();
            let sender = session.sender_id;
            self.sessions.remove(&message_id);
            self.quota.session_closed(&sender);
            return Ok(FragmentProgress::Complete { payload });
        }

        Ok(FragmentProgress::Progress {
            missing: session.missing(),
        })
    }

    /// Evict the lowest-priority oldest incomplete session, preferring
    /// sessions at most half complete over nearly-finished ones.
    fn evict_one(&mut self) {
        let victim = self
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Receiving)
            .min_by_key(|s| {
                (
                    s.completion_ratio() > 0.5,
                    std::cmp::Reverse(s.priority.rank()),
                    s.created_at,
                )
            })
            .map(|s| (s.message_id, s.sender_id));

        if let Some((id, sender)) = victim {
            tracing::warn!(message_id = %hex::encode(id), "🗑️  Evicting reassembly session under pressure");
            self.sessions.remove(&id);
            self.quota.session_closed(&sender);
        }
    }

    /// Sessions with missing fragments whose backoff timer elapsed produce a
    /// signed retransmission request; sessions out of attempts fail.
    pub fn due_retransmission_requests(&mut self, now: u64) -> Vec<RetransmissionRequest> {
        let rtt = self.config.rtt_estimate_ms;
        let max_attempts = self.policy.max_attempts;
        let mut requests = Vec::new();
        let mut newly_failed = Vec::new();

        for session in self.sessions.values_mut() {
            if session.state != SessionState::Receiving {
                continue;
            }
            let missing = session.missing();
            if missing.is_empty() {
                continue;
            }
            if now.saturating_sub(session.last_arrival_at) <= rtt {
                continue;
            }
            if now < session.next_retransmission_at {
                continue;
            }

            if session.retry_count >= max_attempts {
                session.state = SessionState::Failed;
                newly_failed.push((session.message_id, session.sender_id));
                continue;
            }

            let timestamp_ms = now;
            let mut region = vec![TAG_RETRANSMIT];
            region.extend_from_slice(&session.message_id);
            for seq in &missing {
                region.extend_from_slice(&seq.to_be_bytes());
            }
            region.extend_from_slice(&timestamp_ms.to_be_bytes());
            region.extend_from_slice(&self.identity.node_id());

            requests.push(RetransmissionRequest {
                message_id: session.message_id,
                missing_fragments: missing,
                timestamp_ms,
                node_id: self.identity.node_id(),
                signature: self.identity.sign(&region),
            });

            session.retry_count += 1;
            session.next_retransmission_at = now + self.policy.delay_ms(session.retry_count);
        }

        for (id, sender) in newly_failed {
            tracing::warn!(message_id = %hex::encode(id), "⏱️  Reassembly failed after max retries");
            self.sessions.remove(&id);
            self.quota.session_closed(&sender);
            self.failed.push(id);
        }

        requests
    }

    /// Drain sessions that failed since the last call.
    pub fn take_failed(&mut self) -> Vec<MessageId> {
        std::mem::take(&mut self.failed)
    }

    fn check_control_timestamp(&self, timestamp_ms: u64, sender: &str) -> NodeResult<()> {
        let now = now_ms();
        let delta = now.abs_diff(timestamp_ms);
        if delta > ACK_TIMESTAMP_WINDOW_MS {
            return Err(NodeError::protocol(
                Some(sender),
                format!("control timestamp {delta}ms outside ±30s window"),
            ));
        }
        Ok(())
    }

    /// Apply a cumulative or selective ACK to the session it names. The
    /// acked sequence numbers leave the missing set and are never requested.
    pub fn apply_ack(&mut self, ack: &FragmentAck) -> NodeResult<()> {
        let sender = hex::encode(ack.node_id);
        let mut region = vec![TAG_ACK];
        region.extend_from_slice(&ack.message_id);
        region.extend_from_slice(&ack.acks.signing_bytes());
        region.extend_from_slice(&ack.timestamp_ms.to_be_bytes());
        region.extend_from_slice(&ack.node_id);
        verify_signature(&ack.node_id, &region, &ack.signature)
            .map_err(|_| NodeError::protocol(Some(&sender), "ack signature invalid"))?;
        self.check_control_timestamp(ack.timestamp_ms, &sender)?;

        let known = self.sessions.contains_key(&ack.message_id)
            || self.outbound.contains_key(&ack.message_id);
        if !known {
            return Err(NodeError::protocol(
                Some(&sender),
                "ack for a message this node never handled",
            ));
        }

        if let Some(session) = self.sessions.get_mut(&ack.message_id) {
            match &ack.acks {
                AckList::Cumulative(up_to) => {
                    for seq in 0..=*up_to {
                        session.acked.insert(seq);
                    }
                }
                AckList::Selective(list) => {
                    session.acked.extend(list.iter().copied());
                }
            }
        }
        Ok(())
    }

    /// A NACK lists explicitly missing indices; respond with the stored
    /// fragments immediately (transmission is still duty-cycle gated).
    pub fn apply_nack(&mut self, nack: &FragmentNack) -> NodeResult<Vec<Fragment>> {
        let sender = hex::encode(nack.node_id);
        let mut region = vec![TAG_NACK];
        region.extend_from_slice(&nack.message_id);
        for seq in &nack.missing {
            region.extend_from_slice(&seq.to_be_bytes());
        }
        region.extend_from_slice(&nack.timestamp_ms.to_be_bytes());
        region.extend_from_slice(&nack.node_id);
        verify_signature(&nack.node_id, &region, &nack.signature)
            .map_err(|_| NodeError::protocol(Some(&sender), "nack signature invalid"))?;
        self.check_control_timestamp(nack.timestamp_ms, &sender)?;

        self.serve_fragments(&nack.message_id, &nack.missing, &sender)
    }

    /// Serve a peer's signed retransmission request from the outbound store.
    pub fn handle_retransmission_request(
        &mut self,
        request: &RetransmissionRequest,
    ) -> NodeResult<Vec<Fragment>> {
        let sender = hex::encode(request.node_id);
        let mut region = vec![TAG_RETRANSMIT];
        region.extend_from_slice(&request.message_id);
        for seq in &request.missing_fragments {
            region.extend_from_slice(&seq.to_be_bytes());
        }
        region.extend_from_slice(&request.timestamp_ms.to_be_bytes());
        region.extend_from_slice(&request.node_id);
        verify_signature(&request.node_id, &region, &request.signature).map_err(|_| {
            NodeError::protocol(Some(&sender), "retransmission request signature invalid")
        })?;

        self.serve_fragments(&request.message_id, &request.missing_fragments, &sender)
    }

    /// Stored outbound fragments for a message this node originated, used
    /// by the delivery tracker when a retry timer fires.
    pub fn outbound_fragments(&self, message_id: &MessageId) -> Option<Vec<Fragment>> {
        self.outbound.get(message_id).cloned()
    }

    fn serve_fragments(
        &self,
        message_id: &MessageId,
        wanted: &[u16],
        sender: &str,
    ) -> NodeResult<Vec<Fragment>> {
        let stored = self.outbound.get(message_id).ok_or_else(|| {
            NodeError::protocol(Some(sender), "request for a message this node never originated")
        })?;

        Ok(wanted
            .iter()
            .filter_map(|seq| stored.get(*seq as usize))
            .cloned()
            .collect())
    }

    /// Sign a fragment ACK for a session this node is receiving.
    pub fn make_ack(&self, message_id: MessageId, acks: AckList) -> FragmentAck {
        let timestamp_ms = now_ms();
        let node_id = self.identity.node_id();
        let mut region = vec![TAG_ACK];
        region.extend_from_slice(&message_id);
        region.extend_from_slice(&acks.signing_bytes());
        region.extend_from_slice(&timestamp_ms.to_be_bytes());
        region.extend_from_slice(&node_id);

        FragmentAck {
            message_id,
            acks,
            timestamp_ms,
            node_id,
            signature: self.identity.sign(&region),
        }
    }

    pub fn make_nack(&self, message_id: MessageId, missing: Vec<u16>) -> FragmentNack {
        let timestamp_ms = now_ms();
        let node_id = self.identity.node_id();
        let mut region = vec![TAG_NACK];
        region.extend_from_slice(&message_id);
        for seq in &missing {
            region.extend_from_slice(&seq.to_be_bytes());
        }
        region.extend_from_slice(&timestamp_ms.to_be_bytes());
        region.extend_from_slice(&node_id);

        FragmentNack {
            message_id,
            missing,
            timestamp_ms,
            node_id,
            signature: self.identity.sign(&region),
        }
    }

    /// Drop sessions idle past the timeout and outbound stores nobody asked
    /// about for twice that long.
    pub fn expire(&mut self, now: u64) -> usize {
        let timeout = self.config.session_timeout_ms;
        let expired: Vec<(MessageId, NodeId)> = self
            .sessions
            .values()
            .filter(|s| now.saturating_sub(s.last_arrival_at) > timeout)
            .map(|s| (s.message_id, s.sender_id))
            .collect();

        for (id, sender) in &expired {
            self.sessions.remove(id);
            self.quota.session_closed(sender);
            self.failed.push(*id);
        }
        expired.len()
    }

    /// Snapshot incomplete sessions for the `session/` key space.
    pub fn persist_sessions(&self) -> Vec<(MessageId, Vec<u8>)> {
        self.sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Receiving)
            .filter_map(|(id, s)| bincode::serialize(s).ok().map(|bytes| (*id, bytes)))
            .collect()
    }

    /// Restore persisted sessions after a restart.
    pub fn restore_sessions(&mut self, snapshots: Vec<Vec<u8>>) -> usize {
        let mut restored = 0;
        for bytes in snapshots {
            if let Ok(session) = bincode::deserialize::<ReassemblySession>(&bytes) {
                if session.state == SessionState::Receiving {
                    self.quota.session_opened(&session.sender_id);
                    self.sessions.insert(session.message_id, session);
                    restored += 1;
                }
            }
        }
        restored
    }
}
