//! Structured compiler diagnostics, produced by the Workspace's toolchain
//! invocation and attributed back to atoms by the Repair Controller.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// A stable compiler diagnostic code, e.g. `"CS0246"`.
    pub code: String,
    pub message: String,
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Round-1 "symbol not found" diagnostics are an expected artifact of
    /// cross-atom forward references and must not count toward an atom's
    /// repair budget (§4.8).
    pub fn is_symbol_not_found(&self) -> bool {
        // Codes vary by toolchain; the convention used across the languages
        // this crate has targeted so far reserves these two families for
        // "name/type could not be resolved".
        matches!(self.code.as_str(), "CS0246" | "CS0103") || self.message.contains("not found")
    }
}
