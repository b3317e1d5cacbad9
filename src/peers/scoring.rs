//! Peer scoring: weighted reliability, performance and behavior.
//!
//! Each component is a weighted blend of observed rates; the overall score
//! is the weighted mean of the three, decayed between scoring intervals so
//! a peer cannot coast on ancient good behavior.

const W_RELIABILITY: f64 = 0.4;
const W_PERFORMANCE: f64 = 0.3;
const W_BEHAVIOR: f64 = 0.3;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;
/// Neutral starting score for unknown peers.
pub const INITIAL_SCORE: f64 = 50.0;

/// Raw observations a score is computed from.
#[derive(Clone, Debug, Default)]
pub struct PeerObservations {
    pub uptime: f64,
    pub connection_success_rate: f64,
    pub message_delivery_rate: f64,
    pub latency_ms: Option<u64>,
    pub throughput_score: f64,
    pub signal_dbm: Option<i16>,
    pub messages_received: u64,
    pub messages_invalid: u64,
    pub propagation_score: f64,
    pub compliance_score: f64,
}

/// Latency mapping: ≤50 ms→1.0 stepping down to 0.1 above a second.
pub fn latency_score(latency_ms: u64) -> f64 {
    match latency_ms {
        0..=50 => 1.0,
        51..=100 => 0.8,
        101..=200 => 0.6,
        201..=500 => 0.4,
        501..=1000 => 0.2,
        _ => 0.1,
    }
}

/// Signal mapping: ≥−60 dBm→1.0 stepping down to 0.1 below −100 dBm.
pub fn signal_score(signal_dbm: i16) -> f64 {
    match signal_dbm {
        s if s >= -60 => 1.0,
        s if s >= -70 => 0.8,
        s if s >= -80 => 0.6,
        s if s >= -90 => 0.4,
        s if s >= -100 => 0.2,
        _ => 0.1,
    }
}

pub fn reliability(obs: &PeerObservations) -> f64 {
    0.4 * obs.uptime + 0.3 * obs.connection_success_rate + 0.3 * obs.message_delivery_rate
}

pub fn performance(obs: &PeerObservations) -> f64 {
    let latency = obs.latency_ms.map(latency_score).unwrap_or(0.5);
    let signal = obs.signal_dbm.map(signal_score).unwrap_or(0.5);
    0.4 * latency + 0.3 * obs.throughput_score + 0.3 * signal
}

pub fn behavior(obs: &PeerObservations) -> f64 {
    let validity = if obs.messages_received == 0 {
        1.0
    } else {
        1.0 - obs.messages_invalid as f64 / obs.messages_received as f64
    };
    0.4 * validity.max(0.0) + 0.3 * obs.propagation_score + 0.3 * obs.compliance_score
}

/// Overall score on the 0..100 scale.
pub fn overall(obs: &PeerObservations) -> f64 {
    let weighted = W_RELIABILITY * reliability(obs)
        + W_PERFORMANCE * performance(obs)
        + W_BEHAVIOR * behavior(obs);
    let normalized = weighted / (W_RELIABILITY + W_PERFORMANCE + W_BEHAVIOR);
    (normalized * MAX_SCORE).clamp(MIN_SCORE, MAX_SCORE)
}

/// Score decay between scoring intervals: `exp(−decay_rate · Δt_days)`.
pub fn decayed(score: f64, decay_rate: f64, elapsed_days: f64) -> f64 {
    (score * (-decay_rate * elapsed_days).exp()).clamp(MIN_SCORE, MAX_SCORE)
}
