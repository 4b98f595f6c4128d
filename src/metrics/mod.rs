//! Metrics emitted by the pool
//!
//! Recorded through the `metrics` facade; no recorder is installed by this
//! crate, so every call is a no-op until the host process installs one.

pub mod counters;
pub mod histograms;
pub mod labels;
