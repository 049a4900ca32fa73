//! Crate-wide error taxonomy for the Atomic Planning & Feedback Core.
//!
//! Each variant corresponds to one of the failure classes in the design's
//! error-handling section. Structural errors (planning, layer policy,
//! sandbox escapes) are meant to propagate to the [`crate::orchestrator`]
//! and abort the run; atom-scoped errors are caught by the
//! [`crate::worker`]/[`crate::repair`] loop and recorded on the atom instead.

use thiserror::Error;

/// Errors produced anywhere in the APFC pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing credential, invalid workspace root, or otherwise malformed
    /// run configuration. Fatal: surfaced before any component runs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The Planner could not produce a usable atom DAG (unparseable LLM
    /// output, or cycles that survived the retry budget).
    #[error("planning error: {0}")]
    Planning(String),

    /// A layer-policy violation that automatic repair could not resolve.
    #[error("layer policy violation: atom `{atom}` (layer {layer}) depends on layer {dependency_layer}, which is not permitted")]
    LayerPolicy {
        atom: String,
        layer: String,
        dependency_layer: String,
    },

    /// A path resolved outside the workspace root, or a scaffold name
    /// failed the `[A-Za-z0-9_.-]+` validation.
    #[error("workspace security error: {0}")]
    WorkspaceSecurity(String),

    /// The toolchain process failed to start, or produced output the
    /// Workspace could not parse into diagnostics.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// An external call (LLM HTTP request or compiler process) failed
    /// after exhausting its retry budget.
    #[error("external call error: {0}")]
    ExternalCall(String),

    /// An atom exceeded its per-run retry cap. Non-fatal to the run.
    #[error("atom `{0}` exhausted its repair budget")]
    AtomRepairExhausted(String),

    /// The Conflict Resolver returned `fail-fast` for a duplicate or
    /// ambiguous type it could not reconcile automatically.
    #[error("unresolvable conflict: {0}")]
    ConflictUnresolvable(String),

    /// The scheduler found no ready atoms while unfinished work remains.
    /// Indicates a cycle escaped Planner validation - a bug, not user error.
    #[error("deadlock detected: {0} atom(s) pending, none ready")]
    DeadlockDetected(usize),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
