//! Notification delivery.
//!
//! # Responsibility
//! - Define the sink contract hosts implement per channel.
//! - Route payloads to sinks, count outcomes and retry failures once.
//!
//! # Invariants
//! - Delivery failures never propagate to the message flow.

pub mod dispatcher;
pub mod sink;

pub use dispatcher::{DispatchOutcome, DispatchStats, Dispatcher};
pub use sink::{
    Delivery, NotificationPayload, NotificationSink, RecordingSink, SinkError, SinkRegistry,
    SinkRegistryError, SoundCue,
};
