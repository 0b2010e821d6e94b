//! Channel routing with counted outcomes and a single deferred retry.
//!
//! # Invariants
//! - `dispatch` never returns an error; every failure is logged and counted.
//! - A failed delivery is retried at most once. The retry queue is bounded;
//!   overflow is dropped and counted.

use super::sink::{NotificationPayload, SinkError, SinkRegistry};
use crate::model::identity::IdentityId;
use crate::model::preference::NotificationChannel;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};

const DEFAULT_RETRY_CAPACITY: usize = 64;

/// What happened to one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Channel `none`: nothing sent.
    Muted,
    /// Failed; `retry_queued` tells whether one more attempt is pending.
    Failed { error: SinkError, retry_queued: bool },
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Counter snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub muted: u64,
    pub failed: u64,
    pub retried: u64,
    pub retry_dropped: u64,
    /// Retries skipped because the target was gone.
    pub retry_cancelled: u64,
}

struct PendingRetry {
    target: IdentityId,
    channel: NotificationChannel,
    payload: NotificationPayload,
}

pub struct Dispatcher {
    sinks: SinkRegistry,
    retry_tx: Sender<PendingRetry>,
    retry_rx: Receiver<PendingRetry>,
    delivered: AtomicU64,
    muted: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    retry_dropped: AtomicU64,
    retry_cancelled: AtomicU64,
}

impl Dispatcher {
    pub fn new(sinks: SinkRegistry) -> Self {
        Self::with_retry_capacity(sinks, DEFAULT_RETRY_CAPACITY)
    }

    pub fn with_retry_capacity(sinks: SinkRegistry, retry_capacity: usize) -> Self {
        let (retry_tx, retry_rx) = bounded(retry_capacity.max(1));
        Self {
            sinks,
            retry_tx,
            retry_rx,
            delivered: AtomicU64::new(0),
            muted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            retry_dropped: AtomicU64::new(0),
            retry_cancelled: AtomicU64::new(0),
        }
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    /// Sends `payload` to `target` over `channel`.
    pub fn dispatch(
        &self,
        target: IdentityId,
        channel: NotificationChannel,
        payload: NotificationPayload,
    ) -> DispatchOutcome {
        if channel == NotificationChannel::None {
            self.muted.fetch_add(1, Ordering::Relaxed);
            debug!("event=dispatch module=dispatch status=muted");
            return DispatchOutcome::Muted;
        }

        match self.send(target, channel, &payload) {
            Ok(()) => DispatchOutcome::Delivered,
            Err(error) => {
                let retry_queued =
                    error.is_retryable() && self.queue_retry(target, channel, payload);
                DispatchOutcome::Failed {
                    error,
                    retry_queued,
                }
            }
        }
    }

    fn send(
        &self,
        target: IdentityId,
        channel: NotificationChannel,
        payload: &NotificationPayload,
    ) -> Result<(), SinkError> {
        let result = match self.sinks.get(channel) {
            Some(sink) => sink.send(target, channel, payload),
            None => Err(SinkError::NoSink(channel)),
        };
        match &result {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "event=dispatch module=dispatch status=ok channel={}",
                    channel.as_db_str()
                );
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "event=dispatch module=dispatch status=error channel={} error={}",
                    channel.as_db_str(),
                    err
                );
            }
        }
        result
    }

    fn queue_retry(
        &self,
        target: IdentityId,
        channel: NotificationChannel,
        payload: NotificationPayload,
    ) -> bool {
        let pending = PendingRetry {
            target,
            channel,
            payload,
        };
        match self.retry_tx.try_send(pending) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.retry_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("event=dispatch_retry module=dispatch status=dropped reason=queue_full");
                false
            }
        }
    }

    /// Re-sends every queued failure once, skipping targets for which
    /// `deliverable` is false. Returns how many were delivered.
    ///
    /// Entries queued while draining wait for the next call.
    pub fn retry_pending(&self, deliverable: impl Fn(IdentityId) -> bool) -> usize {
        let queued = self.retry_rx.len();
        let mut delivered = 0;
        for pending in self.retry_rx.try_iter().take(queued) {
            if !deliverable(pending.target) {
                self.retry_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!("event=dispatch_retry module=dispatch status=cancelled reason=target_gone");
                continue;
            }
            self.retried.fetch_add(1, Ordering::Relaxed);
            if self
                .send(pending.target, pending.channel, &pending.payload)
                .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn pending_retries(&self) -> usize {
        self.retry_rx.len()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            muted: self.muted.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            retry_dropped: self.retry_dropped.load(Ordering::Relaxed),
            retry_cancelled: self.retry_cancelled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DispatchOutcome, Dispatcher};
    use crate::dispatch::sink::{
        NotificationPayload, RecordingSink, SinkError, SinkRegistry, SoundCue,
    };
    use crate::model::preference::NotificationChannel;
    use std::sync::Arc;
    use uuid::Uuid;

    fn payload() -> NotificationPayload {
        NotificationPayload {
            sender_id: Uuid::new_v4(),
            sender_name: "Alex".to_string(),
            target_name: "Sam".to_string(),
            excerpt: "hey @Sam".to_string(),
            sound: SoundCue {
                key: "entity.player.levelup".to_string(),
                volume: 1.0,
                pitch: 1.0,
            },
        }
    }

    fn dispatcher(capacity: usize) -> (Dispatcher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let mut sinks = SinkRegistry::new();
        sinks
            .register(NotificationChannel::Sound, sink.clone())
            .unwrap();
        (Dispatcher::with_retry_capacity(sinks, capacity), sink)
    }

    #[test]
    fn muted_channel_never_reaches_a_sink() {
        let (dispatcher, sink) = dispatcher(4);
        let outcome = dispatcher.dispatch(Uuid::new_v4(), NotificationChannel::None, payload());
        assert_eq!(outcome, DispatchOutcome::Muted);
        assert!(sink.is_empty());
        assert_eq!(dispatcher.stats().muted, 1);
    }

    #[test]
    fn missing_sink_is_counted_not_retried() {
        let (dispatcher, _sink) = dispatcher(4);
        let outcome = dispatcher.dispatch(Uuid::new_v4(), NotificationChannel::Title, payload());
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                error: SinkError::NoSink(NotificationChannel::Title),
                retry_queued: false,
            }
        );
        assert_eq!(dispatcher.stats().failed, 1);
        assert_eq!(dispatcher.pending_retries(), 0);
    }

    #[test]
    fn transient_failure_is_retried_once() {
        let (dispatcher, sink) = dispatcher(4);
        let target = Uuid::new_v4();
        sink.fail_next(2);

        let outcome = dispatcher.dispatch(target, NotificationChannel::Sound, payload());
        assert!(matches!(
            outcome,
            DispatchOutcome::Failed {
                retry_queued: true,
                ..
            }
        ));
        assert_eq!(dispatcher.retry_pending(|_| true), 0);
        // The retry failed too and is not queued again.
        assert_eq!(dispatcher.pending_retries(), 0);
        assert_eq!(dispatcher.retry_pending(|_| true), 0);
        assert_eq!(sink.delivered_to(target), 0);

        sink.fail_next(1);
        dispatcher.dispatch(target, NotificationChannel::Sound, payload());
        assert_eq!(dispatcher.retry_pending(|_| true), 1);
        assert_eq!(sink.delivered_to(target), 1);

        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn full_retry_queue_drops_and_counts() {
        let (dispatcher, sink) = dispatcher(1);
        sink.fail_next(2);
        dispatcher.dispatch(Uuid::new_v4(), NotificationChannel::Sound, payload());
        let second = dispatcher.dispatch(Uuid::new_v4(), NotificationChannel::Sound, payload());

        assert!(matches!(
            second,
            DispatchOutcome::Failed {
                retry_queued: false,
                ..
            }
        ));
        assert_eq!(dispatcher.stats().retry_dropped, 1);
        assert_eq!(dispatcher.retry_pending(|_| true), 1);
    }

    #[test]
    fn retry_for_departed_target_is_skipped() {
        let (dispatcher, sink) = dispatcher(4);
        let gone = Uuid::new_v4();
        sink.fail_next(1);
        dispatcher.dispatch(gone, NotificationChannel::Sound, payload());

        assert_eq!(dispatcher.retry_pending(|target| target != gone), 0);
        assert_eq!(dispatcher.pending_retries(), 0);
        assert_eq!(sink.delivered_to(gone), 0);
        let stats = dispatcher.stats();
        assert_eq!(stats.retry_cancelled, 1);
        assert_eq!(stats.retried, 0);
    }
}
