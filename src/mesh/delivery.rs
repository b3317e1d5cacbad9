//! QoS policy and reliable delivery tracking.
//!
//! Every confirmed or guaranteed send gets a pending-delivery entry with an
//! ACK deadline. Timeouts and NACKs reschedule the send on a per-type
//! exponential backoff; exhausted or cancelled entries land in the
//! dead-letter store. A per-destination circuit breaker suspends retries
//! toward peers that keep failing.

use crate::types::{now_ms, MessageId, MessagePriority, NodeId, PayloadKind, ReliabilityLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-priority transmission parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QosParams {
    pub tx_power_dbm: i8,
    pub retry_attempts: u32,
    pub confirmation_required: bool,
    pub compression_required: bool,
    pub timeout_ms: u64,
    pub duty_cycle_exempt: bool,
}

#[derive(Clone, Debug, Default)]
pub struct QosPolicy {
    emergency: bool,
}

impl QosPolicy {
    pub fn set_emergency(&mut self, on: bool) {
        self.emergency = on;
    }

    pub fn emergency(&self) -> bool {
        self.emergency
    }

    pub fn params_for(&self, priority: MessagePriority) -> QosParams {
        let mut params = match priority {
            MessagePriority::Critical => QosParams {
                tx_power_dbm: 17,
                retry_attempts: 5,
                confirmation_required: true,
                compression_required: false,
                timeout_ms: 30_000,
                duty_cycle_exempt: false,
            },
            MessagePriority::High => QosParams {
                tx_power_dbm: 14,
                retry_attempts: 3,
                confirmation_required: true,
                compression_required: true,
                timeout_ms: 20_000,
                duty_cycle_exempt: false,
            },
            MessagePriority::Normal => QosParams {
                tx_power_dbm: 11,
                retry_attempts: 2,
                confirmation_required: false,
                compression_required: true,
                timeout_ms: 15_000,
                duty_cycle_exempt: false,
            },
            MessagePriority::Low => QosParams {
                tx_power_dbm: 8,
                retry_attempts: 1,
                confirmation_required: false,
                compression_required: true,
                timeout_ms: 10_000,
                duty_cycle_exempt: false,
            },
        };

        if self.emergency {
            params.tx_power_dbm = (params.tx_power_dbm + 3).min(20);
            params.retry_attempts = params.retry_attempts.max(5);
            params.timeout_ms = params.timeout_ms.max(60_000);
            if priority == MessagePriority::Critical {
                params.duty_cycle_exempt = true;
            }
        }
        params
    }
}

/// Per-message-type retry schedule. Delay carries up to 20% jitter.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub multiplier: f64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn for_kind(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::UtxoTransaction => RetryPolicy {
                base_ms: 1_000,
                multiplier: 1.5,
                cap_ms: 30_000,
                max_attempts: 5,
            },
            PayloadKind::Block => RetryPolicy {
                base_ms: 500,
                multiplier: 1.2,
                cap_ms: 15_000,
                max_attempts: 7,
            },
            PayloadKind::MerkleProof | PayloadKind::SyncStatus => RetryPolicy {
                base_ms: 2_000,
                multiplier: 2.0,
                cap_ms: 60_000,
                max_attempts: 3,
            },
            PayloadKind::Discovery | PayloadKind::Other => RetryPolicy {
                base_ms: 5_000,
                multiplier: 2.0,
                cap_ms: 120_000,
                max_attempts: 2,
            },
        }
    }

    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let backoff = self.base_ms as f64 * self.multiplier.powi(attempt as i32);
        let jitter = 1.0 + rand::random::<f64>() * 0.2;
        ((backoff * jitter) as u64).min(self.cap_ms)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Acknowledged,
    DeadLetter,
}

#[derive(Clone, Debug)]
pub struct PendingDelivery {
    pub message_id: MessageId,
    pub destination: Option<NodeId>,
    pub payload_kind: PayloadKind,
    pub priority: MessagePriority,
    pub reliability: ReliabilityLevel,
    pub created_at: u64,
    pub sent_at: Option<u64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: u64,
    pub acknowledged: bool,
    pub last_error: Option<String>,
    pub status: DeliveryStatus,
}

/// Five consecutive failures open the breaker for five minutes. While open,
/// retries toward the destination are deferred by one minute and re-queued.
#[derive(Clone, Copy, Debug, Default)]
struct CircuitBreaker {
    consecutive_failures: u32,
    opened_at: Option<u64>,
}

const BREAKER_TRIP_THRESHOLD: u32 = 5;
const BREAKER_OPEN_MS: u64 = 300_000;
const BREAKER_DEFER_MS: u64 = 60_000;

impl CircuitBreaker {
    fn is_open(&self, now: u64) -> bool {
        matches!(self.opened_at, Some(at) if now < at + BREAKER_OPEN_MS)
    }

    fn record_failure(&mut self, now: u64) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= BREAKER_TRIP_THRESHOLD && self.opened_at.is_none() {
            self.opened_at = Some(now);
        }
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.opened_at = None;
    }
}

pub struct ReliableDelivery {
    qos: QosPolicy,
    pending: HashMap<MessageId, PendingDelivery>,
    breakers: HashMap<NodeId, CircuitBreaker>,
    dead_letter: Vec<PendingDelivery>,
}

impl ReliableDelivery {
    pub fn new() -> Self {
        Self {
            qos: QosPolicy::default(),
            pending: HashMap::new(),
            breakers: HashMap::new(),
            dead_letter: Vec::new(),
        }
    }

    pub fn qos(&self) -> &QosPolicy {
        &self.qos
    }

    pub fn set_emergency(&mut self, on: bool) {
        self.qos.set_emergency(on);
    }

    /// Register a send. Best-effort deliveries are not tracked; the entry is
    /// acknowledged the moment it leaves.
    pub fn send_reliable(
        &mut self,
        message_id: MessageId,
        destination: Option<NodeId>,
        kind: PayloadKind,
        priority: MessagePriority,
        reliability: ReliabilityLevel,
    ) -> DeliveryStatus {
        let now = now_ms();

        if reliability == ReliabilityLevel::BestEffort {
            return DeliveryStatus::Acknowledged;
        }

        let policy = RetryPolicy::for_kind(kind);
        let params = self.qos.params_for(priority);
        let max_retries = match reliability {
            ReliabilityLevel::Guaranteed => policy.max_attempts.max(params.retry_attempts),
            _ => policy.max_attempts,
        };

        self.pending.insert(
            message_id,
            PendingDelivery {
                message_id,
                destination,
                payload_kind: kind,
                priority,
                reliability,
                created_at: now,
                sent_at: None,
                retry_count: 0,
                max_retries,
                next_retry_at: now + params.timeout_ms,
                acknowledged: false,
                last_error: None,
                status: DeliveryStatus::Pending,
            },
        );
        DeliveryStatus::Pending
    }

    pub fn mark_sent(&mut self, message_id: &MessageId) {
        if let Some(entry) = self.pending.get_mut(message_id) {
            entry.sent_at = Some(now_ms());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn get(&self, message_id: &MessageId) -> Option<&PendingDelivery> {
        self.pending.get(message_id)
    }

    pub fn dead_letters(&self) -> &[PendingDelivery] {
        &self.dead_letter
    }

    /// A valid ACK resolves the entry and closes the destination's breaker.
    /// Returns false for unknown ids (ACK for a message never originated).
    pub fn handle_ack(&mut self, message_id: &MessageId) -> bool {
        match self.pending.remove(message_id) {
            Some(mut entry) => {
                entry.acknowledged = true;
                entry.status = DeliveryStatus::Acknowledged;
                if let Some(dest) = entry.destination {
                    self.breakers.entry(dest).or_default().record_success();
                }
                tracing::debug!(message_id = %hex::encode(message_id), "✅ Delivery acknowledged");
                true
            }
            None => false,
        }
    }

    /// A NACK schedules an immediate retry (still duty-cycle gated).
    pub fn handle_nack(&mut self, message_id: &MessageId) {
        let now = now_ms();
        if let Some(entry) = self.pending.get_mut(message_id) {
            entry.last_error = Some("nack".to_string());
            entry.next_retry_at = now;
        }
    }

    /// Entries whose ACK deadline elapsed. Each returned id should be
    /// re-enqueued; exhausted entries move to the dead-letter store instead.
    pub fn due_retries(&mut self, now: u64) -> Vec<MessageId> {
        let mut to_retry = Vec::new();
        let mut to_bury = Vec::new();

        for entry in self.pending.values_mut() {
            if entry.status != DeliveryStatus::Pending || now < entry.next_retry_at {
                continue;
            }

            // Open breaker: defer rather than burn a retry
            if let Some(dest) = entry.destination {
                let breaker = self.breakers.entry(dest).or_default();
                if breaker.is_open(now) {
                    entry.next_retry_at = now + BREAKER_DEFER_MS;
                    continue;
                }
                breaker.record_failure(now);
            }

            entry.retry_count += 1;
            entry.last_error = Some("ack timeout".to_string());

            if entry.retry_count > entry.max_retries {
                to_bury.push(entry.message_id);
            } else {
                let policy = RetryPolicy::for_kind(entry.payload_kind);
                entry.next_retry_at = now + policy.delay_ms(entry.retry_count);
                to_retry.push(entry.message_id);
            }
        }

        for id in to_bury {
            self.bury(&id, "max retries exceeded");
        }
        to_retry
    }

    /// Cancellation is terminal: the entry leaves the retry queue and its
    /// ACK deadline is void.
    pub fn cancel(&mut self, message_id: &MessageId) -> bool {
        if self.pending.contains_key(message_id) {
            self.bury(message_id, "cancelled");
            true
        } else {
            false
        }
    }

    fn bury(&mut self, message_id: &MessageId, reason: &str) {
        if let Some(mut entry) = self.pending.remove(message_id) {
            entry.status = DeliveryStatus::DeadLetter;
            entry.last_error = Some(reason.to_string());
            tracing::warn!(
                message_id = %hex::encode(message_id),
                reason,
                "💀 Delivery dead-lettered"
            );
            self.dead_letter.push(entry);
        }
    }

    pub fn breaker_open(&self, destination: &NodeId) -> bool {
        self.breakers
            .get(destination)
            .map(|b| b.is_open(now_ms()))
            .unwrap_or(false)
    }

    /// Graceful shutdown: every remaining pending entry becomes a dead
    /// letter so no ACK timer survives the process.
    pub fn drain_to_dead_letter(&mut self) -> usize {
        let ids: Vec<MessageId> = self.pending.keys().copied().collect();
        let drained = ids.len();
        for id in ids {
            self.bury(&id, "shutdown");
        }
        drained
    }
}

impl Default for ReliableDelivery {
    fn default() -> Self {
        Self::new()
    }
}
