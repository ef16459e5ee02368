use std::sync::{Mutex, MutexGuard};

/// Locks `mutex`, taking the inner value back if a previous holder panicked.
pub fn lock_or_recover_mutex<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
