//! Domain layer types and invariants.

pub mod artifacts;
pub mod fingerprint;
pub mod sanitize;
