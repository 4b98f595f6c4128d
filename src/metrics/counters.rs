//! Counter helpers

use super::labels;

/// A physical connection was opened
pub fn connection_opened(trust_mode: &'static str) {
    metrics::counter!(labels::CONNECTIONS_OPENED, labels::LABEL_TRUST_MODE => trust_mode)
        .increment(1);
}

/// A physical connection left the pool
pub fn connection_removed(reason: &'static str) {
    metrics::counter!(labels::CONNECTIONS_REMOVED, labels::LABEL_REASON => reason).increment(1);
}

/// A caller obtained a connection
pub fn checkout(reused: bool) {
    let reused = if reused { "true" } else { "false" };
    metrics::counter!(labels::CHECKOUTS, labels::LABEL_REUSED => reused).increment(1);
}

/// The pool observed an error
pub fn error(kind: &'static str) {
    metrics::counter!(labels::ERRORS, labels::LABEL_KIND => kind).increment(1);
}

/// Trust mode moved from strict to relaxed
pub fn trust_downgraded() {
    metrics::counter!(labels::TRUST_DOWNGRADES).increment(1);
}
