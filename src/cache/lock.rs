//! Poison-tolerant lock acquisition for backend and registry state.
//!
//! A panic while a guard is held must not take the whole cache down: the
//! guarded maps only ever hold self-contained entries, so the worst outcome
//! of recovering is a stale or missing entry, which the engine already
//! treats as a miss.

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    poisoned: PoisonError<G>,
    target: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    warn!(
        op,
        target_module = target,
        lock_kind,
        result = "poisoned_recovered",
        hint = "entries may be stale after a panic in another thread",
        "Recovered from poisoned nestcache lock"
    );
    poisoned.into_inner()
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| recover(poisoned, target, op, "rwlock.read"))
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| recover(poisoned, target, op, "rwlock.write"))
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| recover(poisoned, target, op, "mutex.lock"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn poisoned_mutex_is_recovered() {
        let lock = Arc::new(Mutex::new(vec![1_u8]));
        let clone = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = clone.lock().expect("lock");
            panic!("poison");
        })
        .join();

        assert!(lock.is_poisoned());
        let guard = mutex_lock(&lock, "lock::tests", "read_after_poison");
        assert_eq!(*guard, vec![1]);
    }

    #[test]
    fn poisoned_rwlock_is_recovered_for_reads_and_writes() {
        let lock = Arc::new(RwLock::new(0_u32));
        let clone = Arc::clone(&lock);
        let _ = thread::spawn(move || {
            let _guard = clone.write().expect("lock");
            panic!("poison");
        })
        .join();

        *rw_write(&lock, "lock::tests", "write_after_poison") += 5;
        assert_eq!(*rw_read(&lock, "lock::tests", "read_after_poison"), 5);
    }
}
