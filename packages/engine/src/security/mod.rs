// packages/engine/src/security/mod.rs
//! Advisory security checks
//!
//! The gate is not wired into spawning or execution; hosts call
//! [`AccessGate::verify`] before acting and decide what a denial means.

pub mod access_gate;

pub use access_gate::{
    AccessGate, DenialReason, GateAction, SecurityEvent, SecurityEventKind, SecurityReport,
    Severity, ThreatLevel, Verdict,
};
