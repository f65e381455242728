//! Time helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current network-adjusted time in seconds.
///
/// This node does not apply a peer time offset; adjusted time is wall
/// clock time.
pub fn adjusted_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
