//! Sink contract and per-channel registry.

use crate::model::identity::IdentityId;
use crate::model::preference::NotificationChannel;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Sound parameters forwarded to audible channels.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundCue {
    pub key: String,
    pub volume: f32,
    pub pitch: f32,
}

/// Everything a sink needs to render one mention notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    pub sender_id: IdentityId,
    pub sender_name: String,
    pub target_name: String,
    /// Rendered message the mention came from.
    pub excerpt: String,
    pub sound: SoundCue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// No sink registered for the channel.
    NoSink(NotificationChannel),
    /// Target is no longer reachable, e.g. disconnected mid-flight.
    TargetGone(IdentityId),
    /// Transient delivery failure.
    Failed(String),
}

impl SinkError {
    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl Display for SinkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSink(channel) => {
                write!(f, "no sink registered for channel `{}`", channel.as_db_str())
            }
            Self::TargetGone(id) => write!(f, "notification target is gone: {id}"),
            Self::Failed(message) => write!(f, "notification delivery failed: {message}"),
        }
    }
}

impl Error for SinkError {}

/// Host-side delivery primitive for one channel.
pub trait NotificationSink: Send + Sync {
    fn send(
        &self,
        target: IdentityId,
        channel: NotificationChannel,
        payload: &NotificationPayload,
    ) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkRegistryError {
    /// `none` never delivers, so it cannot take a sink.
    MutedChannel,
    DuplicateChannel(NotificationChannel),
}

impl Display for SinkRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MutedChannel => write!(f, "channel `none` cannot have a sink"),
            Self::DuplicateChannel(channel) => {
                write!(f, "sink already registered for `{}`", channel.as_db_str())
            }
        }
    }
}

impl Error for SinkRegistryError {}

/// Channel to sink routing table.
#[derive(Default, Clone)]
pub struct SinkRegistry {
    sinks: BTreeMap<NotificationChannel, Arc<dyn NotificationSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        channel: NotificationChannel,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<(), SinkRegistryError> {
        if channel == NotificationChannel::None {
            return Err(SinkRegistryError::MutedChannel);
        }
        if self.sinks.contains_key(&channel) {
            return Err(SinkRegistryError::DuplicateChannel(channel));
        }
        self.sinks.insert(channel, sink);
        Ok(())
    }

    /// Registers `sink` for every deliverable channel not yet taken.
    pub fn register_fallback(&mut self, sink: Arc<dyn NotificationSink>) {
        for channel in NotificationChannel::all() {
            if *channel != NotificationChannel::None {
                self.sinks.entry(*channel).or_insert_with(|| Arc::clone(&sink));
            }
        }
    }

    pub fn get(&self, channel: NotificationChannel) -> Option<Arc<dyn NotificationSink>> {
        self.sinks.get(&channel).cloned()
    }

    /// Sorted channels with a registered sink.
    pub fn channels(&self) -> Vec<NotificationChannel> {
        self.sinks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

/// One delivery observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub target: IdentityId,
    pub channel: NotificationChannel,
    pub payload: NotificationPayload,
}

/// Sink that keeps every delivery in memory.
///
/// Used by the smoke probe and by tests; `fail_next` injects transient
/// failures.
#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
    failures_left: Mutex<u32>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` sends fail with [`SinkError::Failed`].
    pub fn fail_next(&self, count: u32) {
        *self.failures_left.lock() = count;
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn delivered_to(&self, target: IdentityId) -> usize {
        self.deliveries
            .lock()
            .iter()
            .filter(|delivery| delivery.target == target)
            .count()
    }

    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.lock().is_empty()
    }
}

impl NotificationSink for RecordingSink {
    fn send(
        &self,
        target: IdentityId,
        channel: NotificationChannel,
        payload: &NotificationPayload,
    ) -> Result<(), SinkError> {
        {
            let mut failures_left = self.failures_left.lock();
            if *failures_left > 0 {
                *failures_left -= 1;
                return Err(SinkError::Failed("injected failure".to_string()));
            }
        }
        self.deliveries.lock().push(Delivery {
            target,
            channel,
            payload: payload.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        NotificationPayload, NotificationSink, RecordingSink, SinkRegistry, SinkRegistryError,
        SoundCue,
    };
    use crate::model::preference::NotificationChannel;
    use std::sync::Arc;
    use uuid::Uuid;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            sender_id: Uuid::new_v4(),
            sender_name: "Alex".to_string(),
            target_name: "Sam".to_string(),
            excerpt: "hi @Sam".to_string(),
            sound: SoundCue {
                key: "entity.player.levelup".to_string(),
                volume: 1.0,
                pitch: 1.0,
            },
        }
    }

    #[test]
    fn register_rejects_muted_and_duplicate_channels() {
        let mut registry = SinkRegistry::new();
        let sink = Arc::new(RecordingSink::new());

        registry
            .register(NotificationChannel::Title, sink.clone())
            .unwrap();
        assert_eq!(
            registry.register(NotificationChannel::Title, sink.clone()),
            Err(SinkRegistryError::DuplicateChannel(NotificationChannel::Title))
        );
        assert_eq!(
            registry.register(NotificationChannel::None, sink),
            Err(SinkRegistryError::MutedChannel)
        );
        assert_eq!(registry.channels(), vec![NotificationChannel::Title]);
    }

    #[test]
    fn fallback_fills_only_free_channels() {
        let mut registry = SinkRegistry::new();
        let title = Arc::new(RecordingSink::new());
        registry
            .register(NotificationChannel::Title, title.clone())
            .unwrap();
        registry.register_fallback(Arc::new(RecordingSink::new()));

        assert_eq!(registry.len(), 3);
        assert!(registry.get(NotificationChannel::None).is_none());
        registry
            .get(NotificationChannel::Title)
            .unwrap()
            .send(Uuid::new_v4(), NotificationChannel::Title, &payload())
            .unwrap();
        assert_eq!(title.len(), 1);
    }

    #[test]
    fn recording_sink_fails_injected_sends_then_records() {
        let sink = RecordingSink::new();
        let target = Uuid::new_v4();
        sink.fail_next(1);

        assert!(sink
            .send(target, NotificationChannel::Sound, &payload())
            .unwrap_err()
            .is_retryable());
        sink.send(target, NotificationChannel::Sound, &payload())
            .unwrap();
        assert_eq!(sink.delivered_to(target), 1);
    }
}
