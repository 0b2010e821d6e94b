//! Mention resolution and notification dispatch engine.
//! Turns chat lines into resolved, rate-limited, preference-gated
//! notifications for the participants they name.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod dispatch;
pub mod gate;
pub mod logging;
pub mod mention;
pub mod model;
pub mod rate_limit;
pub mod repo;
pub mod roster;
pub mod service;
pub mod shard;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, save_config, ConfigError, MentionConfig, StorageConfig, TriggerRule};
pub use coordinator::{
    ChangeReport, CoordinatorError, DeferredReport, MentionCoordinator, MentionOutcome,
    MentionReport, MessageReport, PumpReport,
};
pub use dispatch::{
    DispatchOutcome, DispatchStats, Dispatcher, NotificationPayload, NotificationSink,
    RecordingSink, SinkError, SinkRegistry, SoundCue,
};
pub use gate::{SuppressionGate, SuppressionReason};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use mention::{render_highlights, IdentityResolver, MentionScanner};
pub use model::identity::{Identity, IdentityId};
pub use model::mention::{MatchKind, MentionCandidate, MentionTrigger, Resolution, ResolvedMention};
pub use model::preference::{NotificationChannel, Preference};
pub use rate_limit::{RateDecision, RateLimitPolicy, RateLimiter};
pub use repo::preference_repo::{
    PreferenceRepository, RepoError, RepoResult, SqlitePreferenceRepository,
};
pub use roster::{IdentityRoster, SessionRoster};
pub use service::preference_store::{
    LookupSource, PreferenceChange, PreferenceLookup, PreferenceStore, PreferenceStoreOptions,
    PreferenceWriteError,
};
pub use worker::{StoreWorkerPool, WorkerError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
