//! Log-and-continue helpers.
//!
//! Timeline and snapshot writes are observability: their failures are
//! logged here and swallowed by the caller.

use std::fmt::Display;
use tracing::error;

/// Extension trait for logging errors with context.
pub trait ResultExt<T, E> {
    /// Log the error with `context` and the caller location if this is an
    /// `Err`, returning the result unchanged.
    ///
    /// ```ignore
    /// use pipeline_engine::result_ext::ResultExt;
    ///
    /// let written = repo.append_event(&event).await.log("append timeline event").is_ok();
    /// ```
    fn log<S: ToString>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: ToString>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let caller_location = std::panic::Location::caller();
            error!(
                target: "pipeline_engine",
                error = %e,
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Operation failed"
            );
        }
        self
    }
}

/// Extension trait for logging a missing value.
pub trait OptionResultExt<T> {
    /// Log a warning if this is `None`, returning the option unchanged.
    fn log_none<S: ToString>(self, context: S) -> Option<T>;
}

impl<T> OptionResultExt<T> for Option<T> {
    #[track_caller]
    fn log_none<S: ToString>(self, context: S) -> Option<T> {
        if self.is_none() {
            let caller_location = std::panic::Location::caller();
            tracing::warn!(
                target: "pipeline_engine",
                file = %format!("{}:{}", caller_location.file(), caller_location.line()),
                context = %context.to_string(),
                "Expected value was None"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_ext_passes_through() {
        let ok: Result<i32, &str> = Ok(7);
        assert_eq!(ok.log("ok path").unwrap(), 7);

        let err: Result<i32, &str> = Err("write failed");
        assert_eq!(err.log("err path").unwrap_err(), "write failed");
    }

    #[test]
    fn test_option_ext_passes_through() {
        assert_eq!(Some(3).log_none("some"), Some(3));
        assert_eq!(None::<i32>.log_none("none"), None);
    }
}
