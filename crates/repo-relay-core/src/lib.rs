//! Low-level utilities shared across repo-relay crates.
//!
//! Provides the atomic file-write helper used by persisted relay state and the
//! unix-millisecond clock helpers used for link and history expiry.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{
    age_cutoff_unix_ms, current_unix_timestamp_ms, days_to_ms, is_older_than_cutoff,
    MILLIS_PER_DAY,
};
