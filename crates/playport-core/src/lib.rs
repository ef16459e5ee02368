//! Foundational low-level utilities shared across Playport crates.
//!
//! Provides the injectable millisecond clock used by session timers, unix
//! time helper, the atomic text writer used for persisted host-side
//! preferences, and poison-tolerant mutex locking.

pub mod atomic_io;
pub mod sync_utils;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use sync_utils::lock_or_recover_mutex;
pub use time_utils::{current_unix_timestamp_ms, ClockFn, ManualClock};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn unit_manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new(1_000);
        let read = clock.as_clock_fn();
        assert_eq!(read(), 1_000);
        assert_eq!(read(), 1_000);
        clock.advance(250);
        assert_eq!(read(), 1_250);
        clock.set(10);
        assert_eq!(read(), 10);
    }

    #[test]
    fn functional_write_text_atomic_replaces_existing_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested").join("preference.json");
        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "second");
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "payload")
            .expect_err("directory destination should fail");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn regression_lock_or_recover_mutex_survives_poisoning() {
        let shared = std::sync::Arc::new(std::sync::Mutex::new(vec![1]));
        let poisoner = shared.clone();
        let outcome = std::thread::spawn(move || {
            let _guard = poisoner.lock().expect("first lock");
            panic!("poison the mutex");
        })
        .join();
        assert!(outcome.is_err());
        assert!(shared.is_poisoned());

        lock_or_recover_mutex(&shared).push(2);
        assert_eq!(*lock_or_recover_mutex(&shared), vec![1, 2]);
    }
}
