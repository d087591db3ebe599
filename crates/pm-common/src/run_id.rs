//! Identifiers for runs and weight-set versions.
//!
//! Both are ULIDs: 26 characters, URL-safe and lexicographically ordered by
//! creation time, so the newest weight set also sorts last by version.

use once_cell::sync::Lazy;
use ulid::Ulid;

/// Process-level run ID, generated once at first access.
static RUN_ID: Lazy<String> = Lazy::new(|| Ulid::new().to_string());

/// Identifier of the current process. Logged with every retraining run so
/// operators can tell which instance produced a weight set.
#[inline]
pub fn get() -> &'static str {
    &RUN_ID
}

/// Fresh version identifier for a new weight set.
#[inline]
pub fn new_version() -> String {
    Ulid::new().to_string()
}
