//! Histogram helpers

use super::labels;
use std::time::Duration;

/// Time a caller spent in `acquire` before getting a connection
pub fn acquire_wait(waited: Duration) {
    metrics::histogram!(labels::ACQUIRE_WAIT_MS).record(waited.as_secs_f64() * 1000.0);
}
