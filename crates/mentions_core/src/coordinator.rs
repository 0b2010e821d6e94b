//! Per-message mention pipeline.
//!
//! # Responsibility
//! - Scan, resolve, rate-limit, gate and dispatch the mentions of one chat
//!   message, each candidate independently.
//! - Keep durable storage off the calling context: cache misses and
//!   preference changes run on the worker pool and come back through
//!   [`MentionCoordinator::pump`].
//! - Track session presence so dispatches and retries for departed
//!   identities are dropped.
//!
//! # Invariants
//! - `on_message` never blocks on storage and never re-scans the text.
//! - Gate and dispatch always run on the calling context.
//! - A resolution that is not a single identity is terminal.
//! - A deferred dispatch is cancelled when either its sender or its target
//!   left after the message arrived.
//! - Every tracked job reports exactly one completion, even when it panics.
//! - Chat text is never logged; only lengths and counts are.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, MentionConfig};
use crate::db::{ConnectionPool, DbError};
use crate::dispatch::{
    DispatchOutcome, DispatchStats, Dispatcher, NotificationPayload, SinkRegistry, SoundCue,
};
use crate::gate::{SuppressionGate, SuppressionReason};
use crate::mention::{render_highlights, IdentityResolver, MentionScanner};
use crate::model::identity::{Identity, IdentityId};
use crate::model::mention::Resolution;
use crate::model::preference::Preference;
use crate::rate_limit::{RateDecision, RateLimitPolicy, RateLimiter};
use crate::repo::preference_repo::{PreferenceRepository, SqlitePreferenceRepository};
use crate::roster::IdentityRoster;
use crate::service::preference_store::{
    PreferenceChange, PreferenceLookup, PreferenceStore, PreferenceStoreOptions,
    PreferenceWriteError,
};
use crate::worker::{StoreWorkerPool, WorkerError};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Terminal or pending state of one mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionOutcome {
    Unresolved,
    Ambiguous { candidates: usize },
    SelfMention,
    /// Target already handled earlier in the same message.
    Duplicate,
    /// Past the per-message target cap.
    OverMessageCap,
    RateLimited(RateDecision),
    Suppressed(SuppressionReason),
    Dispatched(DispatchOutcome),
    /// Waiting for the target's preference; finished by `pump`.
    Pending,
    /// Worker queue refused the preference lookup.
    StoreBusy,
    /// Target left before its preference arrived.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionReport {
    /// Name as written, without the marker.
    pub token: String,
    pub target: Option<IdentityId>,
    pub outcome: MentionOutcome,
}

/// Result of [`MentionCoordinator::on_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReport {
    /// Message with resolved mentions rewritten through the highlight format.
    pub rendered_text: String,
    pub mentions: Vec<MentionReport>,
}

impl MessageReport {
    pub fn count(&self, matches: impl Fn(&MentionOutcome) -> bool) -> usize {
        self.mentions
            .iter()
            .filter(|mention| matches(&mention.outcome))
            .count()
    }

    pub fn delivered(&self) -> usize {
        self.count(|outcome| {
            matches!(outcome, MentionOutcome::Dispatched(dispatch) if dispatch.is_delivered())
        })
    }

    pub fn pending(&self) -> usize {
        self.count(|outcome| matches!(outcome, MentionOutcome::Pending))
    }
}

/// Completed deferred dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredReport {
    pub sender: IdentityId,
    pub target: IdentityId,
    pub outcome: MentionOutcome,
    /// The preference came from a fallback after a store failure.
    pub degraded: bool,
}

/// Completed preference change.
#[derive(Debug)]
pub struct ChangeReport {
    pub request_id: u64,
    pub identity_id: IdentityId,
    pub change: PreferenceChange,
    pub result: Result<Option<Preference>, PreferenceWriteError>,
}

/// Everything one pump finished.
#[derive(Debug, Default)]
pub struct PumpReport {
    pub dispatches: Vec<DeferredReport>,
    pub changes: Vec<ChangeReport>,
    pub retries_delivered: usize,
    pub cooldowns_swept: usize,
    /// Background jobs that panicked before reporting.
    pub abandoned: usize,
}

impl PumpReport {
    fn merge(&mut self, other: PumpReport) {
        self.dispatches.extend(other.dispatches);
        self.changes.extend(other.changes);
        self.retries_delivered += other.retries_delivered;
        self.cooldowns_swept += other.cooldowns_swept;
        self.abandoned += other.abandoned;
    }
}

#[derive(Debug)]
pub enum CoordinatorError {
    Config(ConfigError),
    Db(DbError),
    Worker(WorkerError),
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Worker(err) => write!(f, "{err}"),
        }
    }
}

impl Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Worker(err) => Some(err),
        }
    }
}

impl From<ConfigError> for CoordinatorError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for CoordinatorError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<WorkerError> for CoordinatorError {
    fn from(value: WorkerError) -> Self {
        Self::Worker(value)
    }
}

/// Dispatch waiting for the target's preference.
struct PendingDispatch {
    sender: IdentityId,
    sender_name: String,
    /// Sender was in the roster when the message arrived.
    sender_present: bool,
    sender_generation: u64,
    target: Identity,
    target_generation: u64,
    excerpt: String,
}

enum Completion {
    Lookup {
        pending: PendingDispatch,
        lookup: PreferenceLookup,
    },
    Change(ChangeReport),
    Warmed,
    /// The job unwound before sending its own completion.
    Abandoned,
}

/// Reports `Completion::Abandoned` when the job unwinds before completing.
struct CompletionGuard {
    tx: Option<Sender<Completion>>,
}

impl CompletionGuard {
    fn new(tx: Sender<Completion>) -> Self {
        Self { tx: Some(tx) }
    }

    fn complete(mut self, completion: Completion) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(completion);
        }
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // A job refused by the queue is dropped unrun; `submit_tracked`
        // already accounted for it.
        if !thread::panicking() {
            return;
        }
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Completion::Abandoned);
        }
    }
}

pub struct MentionCoordinator {
    config: MentionConfig,
    scanner: MentionScanner,
    resolver: IdentityResolver,
    roster: Arc<dyn IdentityRoster>,
    limiter: RateLimiter,
    gate: SuppressionGate,
    dispatcher: Dispatcher,
    store: Arc<PreferenceStore>,
    workers: StoreWorkerPool,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
    generations: Mutex<HashMap<IdentityId, u64>>,
    in_flight: AtomicUsize,
    next_request_id: AtomicU64,
}

impl MentionCoordinator {
    /// Wires the pipeline over an explicit repository and clock.
    pub fn new(
        config: MentionConfig,
        roster: Arc<dyn IdentityRoster>,
        repo: Arc<dyn PreferenceRepository>,
        sinks: SinkRegistry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoordinatorError> {
        config.validate()?;
        let workers = StoreWorkerPool::new(config.worker_threads, config.worker_queue_capacity)?;
        let store = Arc::new(PreferenceStore::new(
            repo,
            Arc::clone(&clock),
            PreferenceStoreOptions::from(&config),
        ));
        let (completion_tx, completion_rx) = unbounded();

        info!(
            "event=coordinator_start module=coordinator status=ok trigger_rule={:?} sinks={}",
            config.trigger_rule,
            sinks.len()
        );
        Ok(Self {
            scanner: MentionScanner::new(&config),
            resolver: IdentityResolver::new(&config),
            limiter: RateLimiter::new(RateLimitPolicy::from(&config), clock),
            gate: SuppressionGate::new(),
            dispatcher: Dispatcher::new(sinks),
            roster,
            store,
            workers,
            completion_tx,
            completion_rx,
            generations: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            next_request_id: AtomicU64::new(1),
            config,
        })
    }

    /// Opens the SQLite store named by `config.storage` (in memory when no
    /// path is set) and wires the pipeline on the system clock.
    pub fn open(
        config: MentionConfig,
        roster: Arc<dyn IdentityRoster>,
        sinks: SinkRegistry,
    ) -> Result<Self, CoordinatorError> {
        let storage = &config.storage;
        let pool = match storage.path.as_ref() {
            Some(path) => ConnectionPool::open(path, storage.pool_size, storage.acquire_timeout())?,
            None => ConnectionPool::open_in_memory(storage.acquire_timeout())?,
        };
        let repo = Arc::new(SqlitePreferenceRepository::new(pool));
        Self::new(config, roster, repo, sinks, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &MentionConfig {
        &self.config
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Lookups and changes submitted but not yet pumped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Handles one chat message from `sender`.
    pub fn on_message(&self, sender: IdentityId, text: &str) -> MessageReport {
        let present = self.roster.list_present();
        let sender_identity = present.iter().find(|identity| identity.id == sender);
        let sender_present = sender_identity.is_some();
        let sender_name = sender_identity.map_or_else(
            || sender.to_string(),
            |identity| identity.display_name.clone(),
        );

        let resolved: Vec<_> = self
            .scanner
            .scan(text)
            .map(|candidate| self.resolver.resolve(sender, &candidate, &present))
            .collect();
        let rendered_text = render_highlights(text, &resolved, &self.config.highlight_format);

        let mut seen = HashSet::new();
        let mut mentions = Vec::with_capacity(resolved.len());
        for mention in resolved {
            let (target, outcome) = match mention.resolution {
                Resolution::Exact(identity)
                | Resolution::CaseInsensitive(identity)
                | Resolution::PrefixUnique(identity) => {
                    let id = identity.id;
                    let outcome = if !seen.insert(id) {
                        MentionOutcome::Duplicate
                    } else if self.config.max_mentions_per_message > 0
                        && seen.len() > self.config.max_mentions_per_message
                    {
                        MentionOutcome::OverMessageCap
                    } else {
                        self.deliver(
                            sender,
                            &sender_name,
                            sender_present,
                            identity,
                            &rendered_text,
                        )
                    };
                    (Some(id), outcome)
                }
                Resolution::Ambiguous(candidates) => (
                    None,
                    MentionOutcome::Ambiguous {
                        candidates: candidates.len(),
                    },
                ),
                Resolution::Unresolved => (None, MentionOutcome::Unresolved),
                Resolution::SelfMention => (Some(sender), MentionOutcome::SelfMention),
            };
            mentions.push(MentionReport {
                token: mention.token,
                target,
                outcome,
            });
        }

        debug!(
            "event=message_scan module=coordinator status=ok text_len={} candidates={} targets={}",
            text.len(),
            mentions.len(),
            seen.len()
        );
        MessageReport {
            rendered_text,
            mentions,
        }
    }

    fn deliver(
        &self,
        sender: IdentityId,
        sender_name: &str,
        sender_present: bool,
        target: Identity,
        excerpt: &str,
    ) -> MentionOutcome {
        if target.id != sender {
            let decision = self.limiter.check(sender, target.id);
            if !decision.is_allowed() {
                debug!(
                    "event=rate_limit module=coordinator status=denied decision={:?}",
                    decision
                );
                return MentionOutcome::RateLimited(decision);
            }
        }

        if let Some(preference) = self.store.cached(target.id) {
            return self.finish(sender, sender_name, &target, &preference, excerpt);
        }

        let pending = PendingDispatch {
            sender,
            sender_name: sender_name.to_string(),
            sender_present,
            sender_generation: self.generation(sender),
            target_generation: self.generation(target.id),
            target,
            excerpt: excerpt.to_string(),
        };
        let target_id = pending.target.id;
        let store = Arc::clone(&self.store);
        let guard = CompletionGuard::new(self.completion_tx.clone());
        match self.submit_tracked(move || {
            let lookup = store.get(target_id);
            guard.complete(Completion::Lookup { pending, lookup });
        }) {
            Ok(()) => MentionOutcome::Pending,
            Err(err) => {
                warn!(
                    "event=preference_lookup module=coordinator status=rejected error={}",
                    err
                );
                MentionOutcome::StoreBusy
            }
        }
    }

    fn finish(
        &self,
        sender: IdentityId,
        sender_name: &str,
        target: &Identity,
        preference: &Preference,
        excerpt: &str,
    ) -> MentionOutcome {
        if let Some(reason) = self
            .gate
            .evaluate(sender, target.id, preference, self.roster.as_ref())
        {
            debug!(
                "event=suppress module=coordinator status=suppressed reason={}",
                reason
            );
            return MentionOutcome::Suppressed(reason);
        }

        let payload = NotificationPayload {
            sender_id: sender,
            sender_name: sender_name.to_string(),
            target_name: target.display_name.clone(),
            excerpt: excerpt.to_string(),
            sound: SoundCue {
                key: preference
                    .sound_key
                    .clone()
                    .unwrap_or_else(|| self.config.default_sound.clone()),
                volume: self.config.sound_volume,
                pitch: self.config.sound_pitch,
            },
        };
        let outcome = self
            .dispatcher
            .dispatch(target.id, preference.channel, payload);
        MentionOutcome::Dispatched(outcome)
    }

    fn submit_tracked(&self, job: impl FnOnce() + Send + 'static) -> Result<(), WorkerError> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = self.workers.submit(job);
        if result.is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
        }
        result
    }

    fn generation(&self, id: IdentityId) -> u64 {
        self.generations.lock().get(&id).copied().unwrap_or(0)
    }

    /// Warms the preference cache of a joining identity in the background.
    pub fn on_join(&self, id: IdentityId) -> Result<(), WorkerError> {
        let store = Arc::clone(&self.store);
        let guard = CompletionGuard::new(self.completion_tx.clone());
        self.submit_tracked(move || {
            store.warm(id);
            guard.complete(Completion::Warmed);
        })
    }

    /// Cancels pending dispatches for `id` and drops its cached preference.
    pub fn on_leave(&self, id: IdentityId) {
        *self.generations.lock().entry(id).or_insert(0) += 1;
        self.store.evict(id);
        debug!("event=session_leave module=coordinator status=ok");
    }

    /// Queues a preference command; its result arrives through `pump`.
    ///
    /// Returns the request id echoed in the [`ChangeReport`].
    pub fn submit_preference_change(
        &self,
        id: IdentityId,
        change: PreferenceChange,
    ) -> Result<u64, WorkerError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let guard = CompletionGuard::new(self.completion_tx.clone());
        self.submit_tracked(move || {
            let result = store.apply(id, change.clone());
            guard.complete(Completion::Change(ChangeReport {
                request_id,
                identity_id: id,
                change,
                result,
            }));
        })?;
        Ok(request_id)
    }

    /// Finishes every completed background job without waiting, then runs
    /// delivery retries and cooldown housekeeping.
    pub fn pump(&self) -> PumpReport {
        let mut report = PumpReport::default();
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.complete(completion, &mut report);
        }
        self.housekeeping(&mut report);
        report
    }

    /// Like [`MentionCoordinator::pump`], but waits up to `timeout` for
    /// outstanding jobs to finish first.
    pub fn pump_blocking(&self, timeout: Duration) -> PumpReport {
        let deadline = Instant::now() + timeout;
        let mut report = PumpReport::default();
        while self.in_flight() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completion_rx.recv_timeout(remaining) {
                Ok(completion) => self.complete(completion, &mut report),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
            }
        }
        report.merge(self.pump());
        report
    }

    fn complete(&self, completion: Completion, report: &mut PumpReport) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        match completion {
            Completion::Lookup { pending, lookup } => {
                report.dispatches.push(self.complete_lookup(pending, lookup));
            }
            Completion::Change(change) => {
                match &change.result {
                    Ok(_) => debug!(
                        "event=preference_change module=coordinator status=ok change={}",
                        change.change.label()
                    ),
                    Err(err) => warn!(
                        "event=preference_change module=coordinator status=error change={} error={}",
                        change.change.label(),
                        err
                    ),
                }
                report.changes.push(change);
            }
            Completion::Warmed => {}
            Completion::Abandoned => {
                warn!("event=worker_job module=coordinator status=abandoned");
                report.abandoned += 1;
            }
        }
    }

    fn complete_lookup(
        &self,
        pending: PendingDispatch,
        lookup: PreferenceLookup,
    ) -> DeferredReport {
        let target_id = pending.target.id;
        let target_left = pending.target_generation != self.generation(target_id)
            || !self.roster.is_present(target_id);
        let sender_left = pending.sender_generation != self.generation(pending.sender)
            || (pending.sender_present && !self.roster.is_present(pending.sender));
        let outcome = if target_left || sender_left {
            debug!(
                "event=dispatch module=coordinator status=cancelled target_left={} sender_left={}",
                target_left, sender_left
            );
            MentionOutcome::Cancelled
        } else {
            self.finish(
                pending.sender,
                &pending.sender_name,
                &pending.target,
                &lookup.preference,
                &pending.excerpt,
            )
        };
        DeferredReport {
            sender: pending.sender,
            target: target_id,
            outcome,
            degraded: lookup.is_degraded(),
        }
    }

    fn housekeeping(&self, report: &mut PumpReport) {
        report.retries_delivered += self
            .dispatcher
            .retry_pending(|target| self.roster.is_present(target));
        report.cooldowns_swept += self.limiter.sweep_if_due();
    }
}
