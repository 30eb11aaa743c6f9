//! In-process deduplication of concurrently delivered jobs. Advisory only:
//! losing the race here is a structured no-op, and cross-process correctness
//! rests entirely on the store's unique indexes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::db::model::JobKind;

struct Holder {
    token: u64,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct JobLockMap {
    inner: Arc<Mutex<LockState>>,
    ttl: Duration,
}

struct LockState {
    holders: HashMap<(String, JobKind), Holder>,
    next_token: u64,
}

pub struct JobLockGuard {
    inner: Arc<Mutex<LockState>>,
    key: (String, JobKind),
    token: u64,
}

impl JobLockMap {
    pub fn new(ttl: Duration) -> JobLockMap {
        JobLockMap {
            inner: Arc::new(Mutex::new(LockState {
                holders: HashMap::new(),
                next_token: 0,
            })),
            ttl,
        }
    }

    /// Non-blocking. None means another worker in this process holds the
    /// key; the caller reports a duplicate and moves on. Expired holders are
    /// reaped on contact, so a crashed-without-drop handler blocks the key
    /// for at most the safety TTL.
    pub fn try_acquire(&self, key: &str, kind: JobKind) -> Option<JobLockGuard> {
        let mut state = self.inner.lock();
        let now = Instant::now();
        let map_key = (key.to_string(), kind);

        if let Some(holder) = state.holders.get(&map_key) {
            if holder.expires_at > now {
                return None;
            }
            log::warn!(
                "Job lock [{}/{}] expired while held; reclaiming",
                map_key.0,
                kind
            );
        }

        state.next_token += 1;
        let token = state.next_token;
        state.holders.insert(
            map_key.clone(),
            Holder {
                token,
                expires_at: now + self.ttl,
            },
        );
        Some(JobLockGuard {
            inner: self.inner.clone(),
            key: map_key,
            token,
        })
    }
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        // Only release our own entry; after a TTL reclaim the key may
        // already belong to a newer holder.
        if let Some(holder) = state.holders.get(&self.key) {
            if holder.token == self.token {
                state.holders.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_refused_while_held() {
        let locks = JobLockMap::new(Duration::from_secs(300));
        let guard = locks.try_acquire("g1", JobKind::CycleTick);
        assert!(guard.is_some());
        assert!(locks.try_acquire("g1", JobKind::CycleTick).is_none());
        // A different job kind on the same group is independent.
        assert!(locks.try_acquire("g1", JobKind::RetryPayment).is_some());
    }

    #[test]
    fn released_on_drop() {
        let locks = JobLockMap::new(Duration::from_secs(300));
        drop(locks.try_acquire("g1", JobKind::CycleTick));
        assert!(locks.try_acquire("g1", JobKind::CycleTick).is_some());
    }

    #[test]
    fn expired_holder_is_reclaimed() {
        let locks = JobLockMap::new(Duration::from_millis(0));
        let _stale = locks.try_acquire("g1", JobKind::CycleTick).unwrap();
        // TTL of zero: the stale holder is immediately reclaimable.
        assert!(locks.try_acquire("g1", JobKind::CycleTick).is_some());
    }

    #[test]
    fn stale_guard_does_not_release_new_holder() {
        let locks = JobLockMap::new(Duration::from_millis(40));
        let stale = locks.try_acquire("g1", JobKind::CycleTick).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let _fresh = locks.try_acquire("g1", JobKind::CycleTick).unwrap();
        drop(stale);
        // The reclaimer still holds the key.
        assert!(locks.try_acquire("g1", JobKind::CycleTick).is_none());
    }
}
