use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recovered(op: &'static str, lock_kind: &'static str) {
    warn!(
        op,
        lock_kind,
        result = "poisoned_recovered",
        "Recovered from poisoned cache lock; a fetch or mutation panicked while holding it"
    );
}

pub(crate) fn mutex_lock<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        recovered(op, "mutex.lock");
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    lock.read().unwrap_or_else(|poisoned| {
        recovered(op, "rwlock.read");
        poisoned.into_inner()
    })
}

pub(crate) fn rw_write<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
    lock.write().unwrap_or_else(|poisoned| {
        recovered(op, "rwlock.write");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};

    use super::*;

    #[test]
    fn test_mutex_lock_recovers_from_poison() {
        let lock = Mutex::new(1);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("lock should be acquired");
            panic!("poison the lock");
        }));
        assert!(lock.is_poisoned());
        *mutex_lock(&lock, "test") += 1;
        assert_eq!(*mutex_lock(&lock, "test"), 2);
    }

    #[test]
    fn test_rwlock_recovers_from_poison() {
        let lock = RwLock::new(vec![1]);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write().expect("lock should be acquired");
            panic!("poison the lock");
        }));
        rw_write(&lock, "test").push(2);
        assert_eq!(rw_read(&lock, "test").len(), 2);
    }
}
