//! Logging for the data store.
//!
//! Records are emitted through `tracing` under [`LOG_TARGET`] when the
//! `logging` feature is enabled (the default), so an application can filter
//! store output with a directive such as `typed_store=debug`. With the
//! feature disabled every call site compiles to an empty block.
//!
//! Levels used across the crate:
//!
//! - `trace`: transaction buffer staging
//! - `debug`: cache hits and misses, backend reads and writes
//! - `info`: connect, schema creation and shutdown
//! - `warn`: recoverable surprises such as a cached value of another type
//! - `error`: failures, logged with key context before the error is returned

/// Target every store record is emitted under.
pub const LOG_TARGET: &str = "typed_store";

/// Emit one record at `$level` under [`LOG_TARGET`].
///
/// Expands to a block in both configurations, so it is valid in statement
/// and match-arm position alike.
macro_rules! emit {
    ($level:ident, $($arg:tt)*) => {{
        #[cfg(feature = "logging")]
        ::tracing::$level!(target: $crate::logging::LOG_TARGET, $($arg)*);
    }};
}

macro_rules! trace {
    ($($arg:tt)*) => { $crate::logging::emit!(trace, $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { $crate::logging::emit!(debug, $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { $crate::logging::emit!(info, $($arg)*) };
}

macro_rules! warn_ {
    ($($arg:tt)*) => { $crate::logging::emit!(warn, $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { $crate::logging::emit!(error, $($arg)*) };
}

pub(crate) use {debug, emit, error, info, trace, warn_ as warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_matches_crate_path() {
        assert_eq!(LOG_TARGET, module_path!().split("::").next().unwrap_or_default());
    }

    #[test]
    fn test_macros_are_valid_in_arm_position() {
        let hit = true;
        match hit {
            true => debug!(hit, "cache hit"),
            false => warn!("cache miss"),
        }
        error!(reason = "none", "nothing failed");
    }
}
