//! The change bus: per-Thing observable streams with bounded fan-out.
//!
//! Streams are *hot*: emissions are not buffered for absent subscribers and
//! late subscribers only see future events. Every subscriber owns a bounded
//! queue (drop-oldest on overflow, loss flagged on the next delivery) so a
//! slow consumer never blocks a fast one.

mod cancel;
mod change_bus;
mod events;
mod id;
mod topic;

pub use cancel::CancellationSignal;
pub use change_bus::ChangeBus;
pub use events::{
    EmittedEvent, PropertyChangeEvent, TdChangeEvent, TdChangeMethod, TdChangeType,
};
pub use id::{SubscriptionId, SubscriptionIdError};
pub use topic::{Delivery, PublishOutcome, Topic, TopicSubscriber};
