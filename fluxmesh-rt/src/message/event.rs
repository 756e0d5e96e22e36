// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use super::envelope::Envelope;

/// Payload delivered to a component's timer hook.
#[derive(Debug, Clone)]
pub struct TimerEvent {
    /// Identifier the component supplied when the timer was added.
    pub timer_id: String,
    /// Optional payload attached at timer creation.
    pub payload: Option<Value>,
}

/// Payload delivered to a component's cache-expiry hook.
#[derive(Debug, Clone)]
pub struct CacheExpiryEvent {
    /// The cache key that expired.
    pub key: String,
    /// The value that was stored under the key when it expired.
    pub expired_value: Value,
    /// Optional metadata attached when the entry was stored.
    pub metadata: Option<Value>,
}

/// All inter-component transport is an `Event`.
///
/// Component runners only ever pull events from their input channel;
/// message envelopes, timer ticks and cache expiries arrive through the
/// same bounded queue so per-component ordering holds across kinds.
pub enum Event {
    /// A message envelope handed from the previous stage (or the broker).
    Message(Envelope),
    /// A timer registered through the shared timer manager fired.
    Timer(TimerEvent),
    /// A cache entry owned by this component expired.
    CacheExpiry(CacheExpiryEvent),
}

impl Event {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Message(_) => "message",
            Event::Timer(_) => "timer",
            Event::CacheExpiry(_) => "cache_expiry",
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Message(env) => f.debug_tuple("Message").field(env).finish(),
            Event::Timer(t) => f.debug_tuple("Timer").field(t).finish(),
            Event::CacheExpiry(c) => f.debug_tuple("CacheExpiry").field(c).finish(),
        }
    }
}
