//! Thread-scoped "last error" channel
//!
//! Holds the message of the most recent failed call made on the current
//! thread. Successful calls leave it untouched. Asynchronous task failures
//! are never reported here; they are fetched with `get_result`.

use std::cell::RefCell;

use crate::error::StemkitError;

thread_local! {
    static LAST_ERROR: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Overwrite the current thread's last error message
pub fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

/// Message of the most recent failure on this thread (empty if none yet)
pub fn last_error() -> String {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Record the error of a failed result on this thread and pass the result through
pub fn track<T>(result: Result<T, StemkitError>) -> Result<T, StemkitError> {
    if let Err(ref e) = result {
        set_last_error(e.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_does_not_clear() {
        set_last_error("engine not found");
        let ok: Result<u32, StemkitError> = Ok(1);
        assert!(track(ok).is_ok());
        assert_eq!(last_error(), "engine not found");
    }

    #[test]
    fn test_failure_overwrites() {
        set_last_error("old");
        let err: Result<(), StemkitError> = Err(StemkitError::NotFound("job".into()));
        assert!(track(err).is_err());
        assert_eq!(last_error(), "job not found");
    }

    #[test]
    fn test_scoped_to_thread() {
        set_last_error("main thread failure");
        let other = std::thread::spawn(last_error).join().unwrap();
        assert_eq!(other, "");
        assert_eq!(last_error(), "main thread failure");
    }
}
