pub mod delivery;
pub mod duty_cycle;
pub mod flood;
pub mod fragment;
pub mod message;
pub mod priority_queue;
pub mod protocol;
pub mod rate_limiter;
pub mod routing;
pub mod wire;
