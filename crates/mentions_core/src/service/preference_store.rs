//! Cached, write-through preference store.
//!
//! # Responsibility
//! - Serve per-identity preferences from a sharded in-memory cache.
//! - Load misses from the repository and fall back to defaults.
//! - Persist changes with bounded retries, then update the cache.
//!
//! # Invariants
//! - Writes and cache loads for one identity are serialized by that
//!   identity's write lock; the cache is replaced only after the store
//!   accepted the row.
//! - A cache slot leaves the map only while no writer holds it, so one
//!   identity never has two live write locks.
//! - Read failures never surface as errors. Callers get the last cached
//!   value, or defaults, plus the failure for reporting.
//! - Cache readers never take the write lock, so they never wait on the
//!   store.

use crate::clock::Clock;
use crate::config::MentionConfig;
use crate::model::identity::IdentityId;
use crate::model::preference::{NotificationChannel, Preference};
use crate::repo::preference_repo::{PreferenceRepository, RepoError};
use crate::shard::ShardedMap;
use log::{debug, error, warn};
use parking_lot::{Mutex, RwLock};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Where a looked-up preference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupSource {
    Cache,
    Store,
    /// Nothing persisted, or the store could not be read.
    Default,
}

/// Result of [`PreferenceStore::get`].
#[derive(Debug)]
pub struct PreferenceLookup {
    pub preference: Preference,
    pub source: LookupSource,
    /// Store failure that forced the fallback, if any.
    pub degraded: Option<RepoError>,
}

impl PreferenceLookup {
    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

/// Hard failure of a preference change. The change may not persist.
#[derive(Debug)]
pub enum PreferenceWriteError {
    /// Every write attempt failed.
    Exhausted {
        identity_id: IdentityId,
        attempts: u32,
        last: RepoError,
    },
    /// The current row could not be read, so a partial update was refused.
    Unreadable {
        identity_id: IdentityId,
        source: RepoError,
    },
}

impl PreferenceWriteError {
    pub fn identity_id(&self) -> IdentityId {
        match self {
            Self::Exhausted { identity_id, .. } | Self::Unreadable { identity_id, .. } => {
                *identity_id
            }
        }
    }
}

impl Display for PreferenceWriteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted {
                identity_id,
                attempts,
                last,
            } => write!(
                f,
                "preference change for {identity_id} may not persist after {attempts} attempts: {last}"
            ),
            Self::Unreadable {
                identity_id,
                source,
            } => write!(
                f,
                "preference change for {identity_id} refused, current settings unreadable: {source}"
            ),
        }
    }
}

impl Error for PreferenceWriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Unreadable { source, .. } => Some(source),
        }
    }
}

/// Tunables of [`PreferenceStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreferenceStoreOptions {
    pub default_channel: NotificationChannel,
    pub cache_ttl: Duration,
    /// Retries after the first failed write.
    pub write_retries: u32,
    /// Backoff before the first retry; doubled for each further one.
    pub write_backoff: Duration,
}

impl From<&MentionConfig> for PreferenceStoreOptions {
    fn from(config: &MentionConfig) -> Self {
        Self {
            default_channel: config.default_channel,
            cache_ttl: config.preference_cache_ttl(),
            write_retries: config.storage.write_retry_attempts,
            write_backoff: config.storage.write_retry_backoff(),
        }
    }
}

/// User-issued preference command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreferenceChange {
    SetEnabled(bool),
    SetChannel(NotificationChannel),
    SetSound(Option<String>),
    Ignore(IdentityId),
    Unignore(IdentityId),
    /// Delete every stored setting of the identity.
    Forget,
}

impl PreferenceChange {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SetEnabled(_) => "set_enabled",
            Self::SetChannel(_) => "set_channel",
            Self::SetSound(_) => "set_sound",
            Self::Ignore(_) => "ignore",
            Self::Unignore(_) => "unignore",
            Self::Forget => "forget",
        }
    }
}

#[derive(Debug, Clone)]
struct CachedPreference {
    preference: Preference,
    loaded_at: Instant,
}

#[derive(Default)]
struct CacheSlot {
    write_lock: Mutex<()>,
    value: RwLock<Option<CachedPreference>>,
}

pub struct PreferenceStore {
    repo: Arc<dyn PreferenceRepository>,
    clock: Arc<dyn Clock>,
    options: PreferenceStoreOptions,
    slots: ShardedMap<IdentityId, Arc<CacheSlot>>,
}

impl PreferenceStore {
    pub fn new(
        repo: Arc<dyn PreferenceRepository>,
        clock: Arc<dyn Clock>,
        options: PreferenceStoreOptions,
    ) -> Self {
        Self {
            repo,
            clock,
            options,
            slots: ShardedMap::new(),
        }
    }

    pub fn options(&self) -> PreferenceStoreOptions {
        self.options
    }

    fn slot(&self, id: IdentityId) -> Arc<CacheSlot> {
        self.slots
            .entry_or_insert_with(&id, || Arc::new(CacheSlot::default()))
            .lock()
            .clone()
    }

    fn is_fresh(&self, cached: &CachedPreference) -> bool {
        self.clock.now().saturating_duration_since(cached.loaded_at) < self.options.cache_ttl
    }

    /// Returns the cached preference when present and fresh. Never touches
    /// the store.
    pub fn cached(&self, id: IdentityId) -> Option<Preference> {
        let entry = self.slots.get(&id)?;
        let slot = entry.lock().clone();
        let value = slot.value.read();
        value
            .as_ref()
            .filter(|cached| self.is_fresh(cached))
            .map(|cached| cached.preference.clone())
    }

    /// Returns the effective preference of `id`, loading it on a cache miss.
    ///
    /// May block on the store; run it off the calling context.
    pub fn get(&self, id: IdentityId) -> PreferenceLookup {
        if let Some(preference) = self.cached(id) {
            return PreferenceLookup {
                preference,
                source: LookupSource::Cache,
                degraded: None,
            };
        }
        let slot = self.slot(id);
        let _guard = slot.write_lock.lock();
        self.load_locked(&slot, id)
    }

    fn load_locked(&self, slot: &CacheSlot, id: IdentityId) -> PreferenceLookup {
        let previous = slot.value.read().clone();
        if let Some(cached) = previous.as_ref().filter(|cached| self.is_fresh(cached)) {
            return PreferenceLookup {
                preference: cached.preference.clone(),
                source: LookupSource::Cache,
                degraded: None,
            };
        }

        match self.repo.get_preference(id) {
            Ok(row) => {
                let source = if row.is_some() {
                    LookupSource::Store
                } else {
                    LookupSource::Default
                };
                let preference = row
                    .unwrap_or_else(|| Preference::defaults(id, self.options.default_channel));
                *slot.value.write() = Some(CachedPreference {
                    preference: preference.clone(),
                    loaded_at: self.clock.now(),
                });
                debug!(
                    "event=preference_load module=preference_store status=ok source={:?}",
                    source
                );
                PreferenceLookup {
                    preference,
                    source,
                    degraded: None,
                }
            }
            Err(err) => {
                warn!(
                    "event=preference_load module=preference_store status=degraded pool_timeout={} error={}",
                    err.is_pool_timeout(),
                    err
                );
                match previous {
                    Some(stale) => PreferenceLookup {
                        preference: stale.preference,
                        source: LookupSource::Cache,
                        degraded: Some(err),
                    },
                    None => PreferenceLookup {
                        preference: Preference::defaults(id, self.options.default_channel),
                        source: LookupSource::Default,
                        degraded: Some(err),
                    },
                }
            }
        }
    }

    /// Persists `preference` as the full row of `id`, then caches it.
    ///
    /// # Errors
    /// - [`PreferenceWriteError::Exhausted`] once every retry failed; the
    ///   cache keeps its previous value.
    pub fn set(&self, id: IdentityId, preference: Preference) -> Result<(), PreferenceWriteError> {
        let slot = self.slot(id);
        let _guard = slot.write_lock.lock();
        self.write_locked(&slot, id, preference)
    }

    fn write_locked(
        &self,
        slot: &CacheSlot,
        id: IdentityId,
        mut preference: Preference,
    ) -> Result<(), PreferenceWriteError> {
        preference.identity_id = id;
        self.with_retries(id, "preference_write", |repo| {
            repo.upsert_preference(&preference)
        })?;
        *slot.value.write() = Some(CachedPreference {
            preference,
            loaded_at: self.clock.now(),
        });
        Ok(())
    }

    fn with_retries<T>(
        &self,
        id: IdentityId,
        event: &str,
        mut op: impl FnMut(&dyn PreferenceRepository) -> Result<T, RepoError>,
    ) -> Result<T, PreferenceWriteError> {
        let attempts = self.options.write_retries.saturating_add(1);
        let mut backoff = self.options.write_backoff;
        let mut attempt = 1;
        loop {
            match op(self.repo.as_ref()) {
                Ok(value) => {
                    debug!(
                        "event={} module=preference_store status=ok attempt={}",
                        event, attempt
                    );
                    return Ok(value);
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        "event={} module=preference_store status=retry attempt={} error={}",
                        event, attempt, err
                    );
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        "event={} module=preference_store status=error attempts={} error={}",
                        event, attempts, err
                    );
                    return Err(PreferenceWriteError::Exhausted {
                        identity_id: id,
                        attempts,
                        last: err,
                    });
                }
            }
        }
    }

    /// Applies `change` to the current row and persists the result.
    ///
    /// Read-modify-write runs under the identity's write lock so concurrent
    /// changes are not lost.
    pub fn update(
        &self,
        id: IdentityId,
        change: impl FnOnce(&mut Preference),
    ) -> Result<Preference, PreferenceWriteError> {
        let slot = self.slot(id);
        let _guard = slot.write_lock.lock();
        let lookup = self.load_locked(&slot, id);
        if let (Some(err), LookupSource::Default) = (lookup.degraded, lookup.source) {
            return Err(PreferenceWriteError::Unreadable {
                identity_id: id,
                source: err,
            });
        }

        let mut preference = lookup.preference;
        change(&mut preference);
        self.write_locked(&slot, id, preference.clone())?;
        Ok(preference)
    }

    pub fn set_enabled(
        &self,
        id: IdentityId,
        enabled: bool,
    ) -> Result<Preference, PreferenceWriteError> {
        self.update(id, |preference| preference.notifications_enabled = enabled)
    }

    pub fn set_channel(
        &self,
        id: IdentityId,
        channel: NotificationChannel,
    ) -> Result<Preference, PreferenceWriteError> {
        self.update(id, |preference| preference.channel = channel)
    }

    /// `None` restores the configured default sound.
    pub fn set_sound(
        &self,
        id: IdentityId,
        sound_key: Option<String>,
    ) -> Result<Preference, PreferenceWriteError> {
        self.update(id, |preference| preference.sound_key = sound_key)
    }

    pub fn ignore(
        &self,
        id: IdentityId,
        sender: IdentityId,
    ) -> Result<Preference, PreferenceWriteError> {
        self.update(id, |preference| {
            preference.ignore_list.insert(sender);
        })
    }

    pub fn unignore(
        &self,
        id: IdentityId,
        sender: IdentityId,
    ) -> Result<Preference, PreferenceWriteError> {
        self.update(id, |preference| {
            preference.ignore_list.remove(&sender);
        })
    }

    /// Deletes the persisted row and drops the cached value.
    ///
    /// Returns whether a row existed.
    pub fn forget(&self, id: IdentityId) -> Result<bool, PreferenceWriteError> {
        let slot = self.slot(id);
        let _guard = slot.write_lock.lock();
        let existed = self.with_retries(id, "preference_forget", |repo| {
            repo.delete_preference(id)
        })?;
        *slot.value.write() = None;
        Ok(existed)
    }

    /// Runs one command. Returns the resulting row, or `None` after
    /// [`PreferenceChange::Forget`].
    pub fn apply(
        &self,
        id: IdentityId,
        change: PreferenceChange,
    ) -> Result<Option<Preference>, PreferenceWriteError> {
        match change {
            PreferenceChange::SetEnabled(enabled) => self.set_enabled(id, enabled).map(Some),
            PreferenceChange::SetChannel(channel) => self.set_channel(id, channel).map(Some),
            PreferenceChange::SetSound(sound_key) => self.set_sound(id, sound_key).map(Some),
            PreferenceChange::Ignore(sender) => self.ignore(id, sender).map(Some),
            PreferenceChange::Unignore(sender) => self.unignore(id, sender).map(Some),
            PreferenceChange::Forget => self.forget(id).map(|_| None),
        }
    }

    /// Loads `id` into the cache ahead of its first mention.
    pub fn warm(&self, id: IdentityId) -> LookupSource {
        self.get(id).source
    }

    /// Drops the cached value of `id`; the row stays persisted.
    ///
    /// Never waits on a running write. The slot itself is released only
    /// when no writer holds it, so writers on one identity always share a
    /// lock. Returns whether a value was cached.
    pub fn evict(&self, id: IdentityId) -> bool {
        let Some(entry) = self.slots.get(&id) else {
            return false;
        };
        let slot = entry.lock().clone();
        drop(entry);

        let had_value = slot.value.write().take().is_some();
        drop(slot);
        self.slots
            .remove_if(&id, |slot| Arc::strong_count(slot) == 1 && slot.value.read().is_none());
        had_value
    }

    /// Identities holding a cache slot.
    pub fn cached_len(&self) -> usize {
        self.slots.len()
    }
}
