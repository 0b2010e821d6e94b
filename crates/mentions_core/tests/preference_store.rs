use mentions_core::db::{ConnectionPool, DbError};
use mentions_core::{
    LookupSource, ManualClock, NotificationChannel, Preference, PreferenceRepository,
    PreferenceStore, PreferenceStoreOptions, PreferenceWriteError, RepoError, RepoResult,
    SqlitePreferenceRepository,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// Wraps a real repository and fails on demand.
struct FlakyRepository {
    inner: SqlitePreferenceRepository,
    fail_reads: AtomicBool,
    read_delay_ms: AtomicU64,
    write_failures_left: AtomicU32,
    write_calls: AtomicU32,
}

impl FlakyRepository {
    fn new() -> Self {
        let pool = ConnectionPool::open_in_memory(Duration::from_millis(200)).unwrap();
        Self {
            inner: SqlitePreferenceRepository::new(pool),
            fail_reads: AtomicBool::new(false),
            read_delay_ms: AtomicU64::new(0),
            write_failures_left: AtomicU32::new(0),
            write_calls: AtomicU32::new(0),
        }
    }

    fn outage() -> RepoError {
        RepoError::Db(DbError::PoolTimeout {
            waited: Duration::from_millis(200),
        })
    }
}

impl PreferenceRepository for FlakyRepository {
    fn get_preference(&self, id: Uuid) -> RepoResult<Option<Preference>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        self.inner.get_preference(id)
    }

    fn upsert_preference(&self, preference: &Preference) -> RepoResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .write_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Self::outage());
        }
        self.inner.upsert_preference(preference)
    }

    fn delete_preference(&self, id: Uuid) -> RepoResult<bool> {
        self.inner.delete_preference(id)
    }

    fn count_preferences(&self) -> RepoResult<u64> {
        self.inner.count_preferences()
    }
}

fn options() -> PreferenceStoreOptions {
    PreferenceStoreOptions {
        default_channel: NotificationChannel::Sound,
        cache_ttl: Duration::from_secs(30),
        write_retries: 2,
        write_backoff: Duration::from_millis(1),
    }
}

fn store() -> (PreferenceStore, Arc<FlakyRepository>, Arc<ManualClock>) {
    let repo = Arc::new(FlakyRepository::new());
    let clock = Arc::new(ManualClock::new());
    let store = PreferenceStore::new(repo.clone(), clock.clone(), options());
    (store, repo, clock)
}

#[test]
fn read_outage_without_cache_falls_back_to_defaults() {
    let (store, repo, _clock) = store();
    repo.fail_reads.store(true, Ordering::SeqCst);

    let lookup = store.get(Uuid::new_v4());
    assert_eq!(lookup.source, LookupSource::Default);
    assert!(lookup.is_degraded());
    assert!(lookup.preference.notifications_enabled);
    assert!(lookup.degraded.unwrap().is_pool_timeout());
}

#[test]
fn read_outage_with_stale_cache_serves_last_value() {
    let (store, repo, clock) = store();
    let id = Uuid::new_v4();
    store.set_enabled(id, false).unwrap();

    clock.advance(Duration::from_secs(31));
    repo.fail_reads.store(true, Ordering::SeqCst);

    let lookup = store.get(id);
    assert_eq!(lookup.source, LookupSource::Cache);
    assert!(lookup.is_degraded());
    assert!(!lookup.preference.notifications_enabled);
}

#[test]
fn transient_write_failures_are_retried() {
    let (store, repo, _clock) = store();
    let id = Uuid::new_v4();
    repo.write_failures_left.store(2, Ordering::SeqCst);

    store.set_channel(id, NotificationChannel::Title).unwrap();
    assert_eq!(repo.write_calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        repo.inner.get_preference(id).unwrap().map(|p| p.channel),
        Some(NotificationChannel::Title)
    );
}

#[test]
fn exhausted_retries_are_a_hard_error_and_keep_the_cache() {
    let (store, repo, _clock) = store();
    let id = Uuid::new_v4();
    store.set_enabled(id, true).unwrap();
    repo.write_calls.store(0, Ordering::SeqCst);
    repo.write_failures_left.store(10, Ordering::SeqCst);

    let err = store.set_enabled(id, false).unwrap_err();
    match &err {
        PreferenceWriteError::Exhausted { attempts, last, .. } => {
            assert_eq!(*attempts, 3);
            assert!(last.is_pool_timeout());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.identity_id(), id);
    assert_eq!(repo.write_calls.load(Ordering::SeqCst), 3);
    assert_eq!(store.cached(id).map(|p| p.notifications_enabled), Some(true));
}

#[test]
fn partial_update_is_refused_when_current_row_is_unreadable() {
    let (store, repo, _clock) = store();
    repo.fail_reads.store(true, Ordering::SeqCst);

    let err = store.ignore(Uuid::new_v4(), Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, PreferenceWriteError::Unreadable { .. }));
    assert_eq!(repo.write_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn concurrent_updates_on_one_identity_are_not_lost() {
    let (store, repo, _clock) = store();
    let store = Arc::new(store);
    let id = Uuid::new_v4();
    let ignored = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            let ignored = Arc::clone(&ignored);
            thread::spawn(move || {
                let sender = Uuid::new_v4();
                store.ignore(id, sender).unwrap();
                ignored.lock().push(sender);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let persisted = repo.inner.get_preference(id).unwrap().unwrap();
    assert_eq!(persisted.ignore_list.len(), 8);
    for sender in ignored.lock().iter() {
        assert!(persisted.ignores(*sender));
    }
    assert_eq!(store.cached(id), Some(persisted));
}

#[test]
fn evict_during_a_running_update_keeps_both_changes() {
    let (store, repo, _clock) = store();
    let store = Arc::new(store);
    let id = Uuid::new_v4();
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    repo.read_delay_ms.store(200, Ordering::SeqCst);

    let slow_update = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.ignore(id, first).unwrap())
    };
    thread::sleep(Duration::from_millis(50));
    store.evict(id);
    let next_update = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.ignore(id, second).unwrap())
    };
    slow_update.join().unwrap();
    next_update.join().unwrap();

    let persisted = repo.inner.get_preference(id).unwrap().unwrap();
    assert!(persisted.ignores(first));
    assert!(persisted.ignores(second));
}

#[test]
fn readers_racing_writes_never_go_back_and_end_on_the_last_write() {
    let (store, repo, _clock) = store();
    let store = Arc::new(store);
    let id = Uuid::new_v4();
    let done = Arc::new(AtomicBool::new(false));
    store.set_sound(id, Some("0".to_string())).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|reader| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut seen = 0u32;
                while !done.load(Ordering::SeqCst) {
                    let preference = if reader % 2 == 0 {
                        store.get(id).preference
                    } else {
                        match store.cached(id) {
                            Some(preference) => preference,
                            None => continue,
                        }
                    };
                    let version: u32 = preference.sound_key.unwrap().parse().unwrap();
                    assert!(version >= seen, "read {version} after {seen}");
                    seen = version;
                }
            })
        })
        .collect();

    for version in 1..=100u32 {
        store.set_sound(id, Some(version.to_string())).unwrap();
    }
    done.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }

    let last = Some("100".to_string());
    assert_eq!(store.get(id).preference.sound_key, last);
    assert_eq!(repo.inner.get_preference(id).unwrap().unwrap().sound_key, last);
}
