use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use parking_lot::Mutex;
use teki_bkt::BktParams;
use tokio::sync::Mutex as AsyncMutex;

use crate::db::DatabaseProxy;

/// Serializes mastery writes per (user_id, course_id). Two tabs submitting the
/// same assessment concurrently must not interleave their BKT batches.
#[derive(Default)]
pub struct SubmissionLocks {
    locks: Mutex<HashMap<(i64, i64), Arc<AsyncMutex<()>>>>,
}

impl SubmissionLocks {
    pub fn for_key(&self, user_id: i64, course_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        // Entries nobody holds anymore are dropped here, so the registry only
        // tracks in-flight submissions instead of every key ever seen.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(
            locks
                .entry((user_id, course_id))
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}

#[derive(Debug, Clone)]
pub struct BktSettings {
    pub params: BktParams,
    pub mastery_threshold: f64,
}

impl Default for BktSettings {
    fn default() -> Self {
        Self {
            params: BktParams::default(),
            mastery_threshold: teki_bkt::MASTERY_THRESHOLD,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    started_at_system: SystemTime,
    db_proxy: Option<Arc<DatabaseProxy>>,
    bkt: BktSettings,
    submission_locks: Arc<SubmissionLocks>,
}

impl AppState {
    pub fn new(db_proxy: Option<Arc<DatabaseProxy>>, bkt: BktSettings) -> Self {
        Self {
            started_at: Instant::now(),
            started_at_system: SystemTime::now(),
            db_proxy,
            bkt,
            submission_locks: Arc::new(SubmissionLocks::default()),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn started_at_system(&self) -> SystemTime {
        self.started_at_system
    }

    pub fn db_proxy(&self) -> Option<Arc<DatabaseProxy>> {
        self.db_proxy.clone()
    }

    pub fn bkt(&self) -> &BktSettings {
        &self.bkt
    }

    pub fn submission_lock(&self, user_id: i64, course_id: i64) -> Arc<AsyncMutex<()>> {
        self.submission_locks.for_key(user_id, course_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn held_locks_survive_eviction_and_idle_locks_do_not() {
        let locks = SubmissionLocks::default();
        let held = locks.for_key(1, 1);
        drop(locks.for_key(2, 2));

        let _churn = locks.for_key(3, 3);
        {
            let registry = locks.locks.lock();
            assert!(registry.contains_key(&(1, 1)));
            assert!(!registry.contains_key(&(2, 2)));
        }

        // The held key keeps handing out the same mutex.
        assert!(Arc::ptr_eq(&held, &locks.for_key(1, 1)));
    }

    #[test]
    fn same_key_shares_one_lock_across_callers() {
        let locks = SubmissionLocks::default();
        let a = locks.for_key(5, 9);
        let b = locks.for_key(5, 9);
        assert!(Arc::ptr_eq(&a, &b));

        let other = locks.for_key(5, 10);
        assert!(!Arc::ptr_eq(&a, &other));
    }
}
