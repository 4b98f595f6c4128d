//! Trust mode state machine
//!
//! Two states, one edge: `Strict -> Relaxed`, fired by the first certificate
//! chain failure. There is no way back within a process; strict validation
//! returns only after the CA bundle is fixed and the process restarts.

use crate::diagnostics::{Diagnostics, PoolEvent};
use crate::Error;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// TLS trust posture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustMode {
    /// Full chain validation against the CA bundle, SNI = target host
    #[default]
    Strict,
    /// Chain validation disabled
    Relaxed,
}

impl TrustMode {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Relaxed => "relaxed",
        }
    }

    /// Whether server certificates are validated
    pub fn validates_chain(&self) -> bool {
        matches!(self, Self::Strict)
    }
}

impl fmt::Display for TrustMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-lifetime holder of the current [`TrustMode`]
#[derive(Debug)]
pub struct TrustModeStateMachine {
    relaxed: AtomicBool,
    diagnostics: Diagnostics,
}

impl TrustModeStateMachine {
    /// Start in [`TrustMode::Strict`]
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            relaxed: AtomicBool::new(false),
            diagnostics,
        }
    }

    /// Current mode
    pub fn mode(&self) -> TrustMode {
        if self.relaxed.load(Ordering::Acquire) {
            TrustMode::Relaxed
        } else {
            TrustMode::Strict
        }
    }

    /// Feed an error observed by the pool.
    ///
    /// Only [`Error::TlsTrust`] moves the machine. Returns `true` when this
    /// call performed the transition.
    pub fn observe(&self, err: &Error) -> bool {
        if !err.is_trust_failure() {
            return false;
        }
        self.downgrade(&err.to_string())
    }

    /// Fire the `Strict -> Relaxed` edge.
    ///
    /// Exactly one caller wins; every later call (and any call made while
    /// already relaxed) returns `false` and emits nothing.
    pub fn downgrade(&self, reason: &str) -> bool {
        if self
            .relaxed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.diagnostics.emit(PoolEvent::TrustDowngraded {
            from: TrustMode::Strict,
            to: TrustMode::Relaxed,
            reason: reason.to_string(),
        });
        true
    }

    /// Ask for `mode` and return the mode actually in effect.
    ///
    /// A request for `Relaxed` fires the edge. A request for `Strict` while
    /// relaxed is refused.
    pub fn request(&self, mode: TrustMode) -> TrustMode {
        match mode {
            TrustMode::Relaxed => {
                self.downgrade("relaxed trust requested explicitly");
            }
            TrustMode::Strict if self.mode() == TrustMode::Relaxed => {
                tracing::warn!(
                    "strict trust requested but the process is already relaxed; \
                     restart with a valid CA bundle to restore strict validation"
                );
            }
            TrustMode::Strict => {}
        }
        self.mode()
    }
}

impl Default for TrustModeStateMachine {
    fn default() -> Self {
        Self::new(Diagnostics::none())
    }
}
