// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Layer 3: Internal module imports
use super::expression::{DestExpression, SourceExpression};

/// Callback fired exactly once when the downstream boundary confirms
/// durable handling of an envelope.
pub type AckCallback = Box<dyn FnOnce() + Send + 'static>;

/// Callback fired exactly once with a [`NackOutcome`] when processing of
/// an envelope fails somewhere downstream.
pub type NackCallback = Box<dyn FnOnce(NackOutcome) + Send + 'static>;

/// Outcome attached to a negative acknowledgement.
///
/// `Failed` marks a redeliverable failure: the broker may deliver the
/// message again. `Rejected` marks a poison message that must not be
/// redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NackOutcome {
    /// Redeliverable failure.
    Failed,
    /// Poison message, no redelivery.
    Rejected,
}

impl fmt::Display for NackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NackOutcome::Failed => write!(f, "FAILED"),
            NackOutcome::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// In-process wrapper around a broker message.
///
/// The broker payload itself is immutable once published; the envelope adds
/// the mutable scratch state a flow needs while the message is in flight:
///
/// - `payload` / `topic` / `user_properties`: the broker-facing triple
/// - `previous`: the immediately preceding component's output
/// - `user_data`: free-form scratch shared along the chain
/// - `ack_callbacks` / `nack_callbacks`: ordered stacks fired when the
///   flow settles the message
///
/// # Settlement invariants
///
/// An envelope settles at most once: the first call to
/// [`call_acknowledgements`](Envelope::call_acknowledgements) or
/// [`call_negative_acknowledgements`](Envelope::call_negative_acknowledgements)
/// drains *both* stacks, so an ack can never be followed by a nack for the
/// same envelope (or vice versa).
pub struct Envelope {
    payload: Value,
    topic: String,
    user_properties: Map<String, Value>,
    user_data: Map<String, Value>,
    previous: Value,
    ack_callbacks: Vec<AckCallback>,
    nack_callbacks: Vec<NackCallback>,
    settled: bool,
}

impl Envelope {
    /// Create an envelope from the broker-facing triple.
    pub fn new(payload: Value, topic: impl Into<String>, user_properties: Map<String, Value>) -> Self {
        Self {
            payload,
            topic: topic.into(),
            user_properties,
            user_data: Map::new(),
            previous: Value::Null,
            ack_callbacks: Vec::new(),
            nack_callbacks: Vec::new(),
            settled: false,
        }
    }

    /// Create an empty envelope (no payload, no topic).
    ///
    /// Used by internal senders that only populate `previous`, e.g. an app
    /// posting directly into its implicit broker output.
    pub fn empty() -> Self {
        Self::new(Value::Null, "", Map::new())
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.topic = topic.into();
    }

    pub fn user_properties(&self) -> &Map<String, Value> {
        &self.user_properties
    }

    pub fn user_properties_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.user_properties
    }

    pub fn set_user_properties(&mut self, user_properties: Map<String, Value>) {
        self.user_properties = user_properties;
    }

    pub fn user_data(&self) -> &Map<String, Value> {
        &self.user_data
    }

    pub fn user_data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.user_data
    }

    pub fn previous(&self) -> &Value {
        &self.previous
    }

    pub fn set_previous(&mut self, previous: Value) {
        self.previous = previous;
    }

    /// Push an acknowledgement callback onto the ack stack.
    pub fn add_acknowledgement(&mut self, callback: AckCallback) {
        self.ack_callbacks.push(callback);
    }

    /// Push a negative-acknowledgement callback onto the nack stack.
    pub fn add_negative_acknowledgement(&mut self, callback: NackCallback) {
        self.nack_callbacks.push(callback);
    }

    /// Fire the acknowledgement chain.
    ///
    /// Callbacks run in reverse registration order (most recent stage
    /// first). No-op if the envelope has already settled. Both stacks are
    /// drained.
    pub fn call_acknowledgements(&mut self) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.nack_callbacks.clear();
        while let Some(callback) = self.ack_callbacks.pop() {
            callback();
        }
    }

    /// Fire the negative-acknowledgement chain with `outcome`.
    ///
    /// Same settlement rules as [`call_acknowledgements`](Self::call_acknowledgements).
    pub fn call_negative_acknowledgements(&mut self, outcome: NackOutcome) {
        if self.settled {
            return;
        }
        self.settled = true;
        self.ack_callbacks.clear();
        while let Some(callback) = self.nack_callbacks.pop() {
            callback(outcome);
        }
    }

    /// Whether either chain has already fired.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Number of pending acknowledgement callbacks.
    pub fn ack_callback_count(&self) -> usize {
        self.ack_callbacks.len()
    }

    /// Take the envelope out of the runner's borrow, leaving an empty,
    /// already-handled shell behind.
    ///
    /// For components that hand the message somewhere themselves (the
    /// subscription router, batching components) and return `Consumed`.
    /// The callback stacks move with the taken envelope.
    pub fn take(&mut self) -> Envelope {
        std::mem::replace(self, Envelope::empty())
    }

    /// Copy the envelope's data fields without the callback stacks.
    ///
    /// The copy can never settle the original's broker message, which is
    /// what keeps fan-out (dev broker, tracing snapshots) free of
    /// double-ack hazards.
    pub fn clone_without_acks(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            topic: self.topic.clone(),
            user_properties: self.user_properties.clone(),
            user_data: self.user_data.clone(),
            previous: self.previous.clone(),
            ack_callbacks: Vec::new(),
            nack_callbacks: Vec::new(),
            settled: false,
        }
    }

    /// Evaluate a source expression against this envelope.
    ///
    /// Total: missing paths evaluate to `Value::Null`.
    pub fn get_data(&self, expr: &SourceExpression) -> Value {
        expr.evaluate(self)
    }

    /// Write `value` at the slot addressed by `dest`, creating
    /// intermediate objects as needed.
    pub fn set_data(&mut self, dest: &DestExpression, value: Value) {
        dest.assign(self, value);
    }

    /// Remove the value at the slot addressed by `dest`, if present.
    pub fn remove_data(&mut self, dest: &DestExpression) {
        dest.remove(self);
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("topic", &self.topic)
            .field("payload", &self.payload)
            .field("user_properties", &self.user_properties)
            .field("previous", &self.previous)
            .field("ack_callbacks", &self.ack_callbacks.len())
            .field("nack_callbacks", &self.nack_callbacks.len())
            .field("settled", &self.settled)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn counted_ack(counter: &Arc<AtomicUsize>) -> AckCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn ack_fires_each_callback_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut env = Envelope::new(json!({"x": 1}), "a/b", Map::new());
        env.add_acknowledgement(counted_ack(&counter));
        env.add_acknowledgement(counted_ack(&counter));

        env.call_acknowledgements();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        // Second settlement attempt is a no-op.
        env.call_acknowledgements();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(env.is_settled());
    }

    #[test]
    fn ack_runs_in_reverse_registration_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut env = Envelope::empty();
        for stage in ["head", "mid", "tail"] {
            let order = Arc::clone(&order);
            env.add_acknowledgement(Box::new(move || order.lock().push(stage)));
        }

        env.call_acknowledgements();
        assert_eq!(*order.lock(), vec!["tail", "mid", "head"]);
    }

    #[test]
    fn nack_drains_ack_stack() {
        let acks = Arc::new(AtomicUsize::new(0));
        let nacks = Arc::new(AtomicUsize::new(0));

        let mut env = Envelope::empty();
        env.add_acknowledgement(counted_ack(&acks));
        let nack_counter = Arc::clone(&nacks);
        env.add_negative_acknowledgement(Box::new(move |outcome| {
            assert_eq!(outcome, NackOutcome::Failed);
            nack_counter.fetch_add(1, Ordering::SeqCst);
        }));

        env.call_negative_acknowledgements(NackOutcome::Failed);
        assert_eq!(nacks.load(Ordering::SeqCst), 1);
        assert_eq!(acks.load(Ordering::SeqCst), 0);

        // Ack after nack must not fire anything.
        env.call_acknowledgements();
        assert_eq!(acks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clone_without_acks_shares_no_callbacks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut env = Envelope::new(json!("hello"), "t", Map::new());
        env.add_acknowledgement(counted_ack(&counter));

        let mut copy = env.clone_without_acks();
        copy.call_acknowledgements();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        env.call_acknowledgements();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_envelope_defaults() {
        let env = Envelope::empty();
        assert_eq!(env.payload(), &Value::Null);
        assert_eq!(env.topic(), "");
        assert!(env.user_properties().is_empty());
        assert!(!env.is_settled());
    }
}
