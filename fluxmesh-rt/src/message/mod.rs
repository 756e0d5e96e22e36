//! Message envelope, event transport, and payload handling.
//!
//! Everything that moves between components is an [`Event`]; broker-facing
//! payloads travel inside an [`Envelope`] carrying the acknowledgement
//! callback stacks that keep at-least-once semantics intact across a flow.

pub mod codec;
pub mod envelope;
pub mod event;
pub mod expression;
pub mod transforms;

pub use codec::{decode_payload, encode_payload, CodecError, PayloadEncoding, PayloadFormat};
pub use envelope::{AckCallback, Envelope, NackCallback, NackOutcome};
pub use event::{CacheExpiryEvent, Event, TimerEvent};
pub use expression::{DestExpression, ExpressionError, SourceExpression};
pub use transforms::{TransformError, TransformStep, Transforms};
