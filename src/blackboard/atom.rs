//! The atom: the unit of generation scheduled and tracked by the Blackboard.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::diagnostic::Diagnostic;

/// What an atom generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AtomKind {
    Abstraction,
    Interface,
    DataShape,
    Implementation,
    Test,
}

impl AtomKind {
    /// The pluralized directory segment under `src/<layer>/` this kind's
    /// files live in, per the deterministic path formula.
    pub fn dir_name(self) -> &'static str {
        match self {
            AtomKind::Abstraction => "abstractions",
            AtomKind::Interface => "interfaces",
            AtomKind::DataShape => "data-shapes",
            AtomKind::Implementation => "implementations",
            AtomKind::Test => "tests",
        }
    }
}

/// Where an atom sits in the project's lifecycle. See the state machine in
/// the design's Repair Controller section: only the Repair Controller may
/// move a `Completed` atom back to `Pending`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AtomStatus {
    Pending,
    InProgress,
    AwaitingReview,
    Completed,
    Failed,
}

/// A single unit of code generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    pub id: String,
    pub name: String,
    pub kind: AtomKind,
    pub layer: String,
    pub dependencies: Vec<String>,
    pub file_path: PathBuf,
    pub status: AtomStatus,
    pub generated_source: Option<String>,
    pub last_diagnostics: Vec<Diagnostic>,
    pub retry_count: u32,
    /// Signatures-only contract extracted once the atom compiles cleanly.
    pub contract: Option<AtomContract>,
    /// Opaque LLM response-chain correlation token for this atom, if the
    /// provider supports response chaining (§6).
    pub response_id: Option<String>,
}

impl Atom {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: AtomKind,
        layer: impl Into<String>,
        dependencies: Vec<String>,
        file_path: PathBuf,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            layer: layer.into(),
            dependencies,
            file_path,
            status: AtomStatus::Pending,
            generated_source: None,
            last_diagnostics: Vec::new(),
            retry_count: 0,
            contract: None,
            response_id: None,
        }
    }

    /// An atom is only ever considered "done" (whether by success or
    /// exhaustion) once it has left the active pending/in-progress states.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, AtomStatus::Completed | AtomStatus::Failed)
    }
}

/// Signature-only summary of the types an atom contributes, the payload
/// stored in the Semantic Symbol Table and passed to dependents via the
/// Context Assembler's Local tier - bodies never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomContract {
    /// Fully-qualified type names this atom defines, with their member
    /// signatures (no bodies).
    pub defined_types: Vec<TypeSignature>,
    /// Simple names of external types this atom's implementation body
    /// references (populated only for `Implementation` atoms).
    pub referenced_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSignature {
    pub fully_qualified_name: String,
    pub simple_name: String,
    pub kind: TypeKind,
    pub members: Vec<MemberSignature>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TypeKind {
    Interface,
    Class,
    Enum,
    Struct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSignature {
    pub name: String,
    /// Rendered parameter/return signature, language-agnostic text (the
    /// source parser collaborator owns the actual grammar).
    pub signature: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_atom() -> Atom {
        Atom::new(
            "a1",
            "UserDto",
            AtomKind::DataShape,
            "Core",
            vec![],
            PathBuf::from("src/Core/data-shapes/UserDto.cs"),
        )
    }

    #[test]
    fn new_atom_starts_pending() {
        let atom = sample_atom();
        assert_eq!(atom.status, AtomStatus::Pending);
        assert_eq!(atom.retry_count, 0);
        assert!(atom.generated_source.is_none());
        assert!(!atom.is_terminal());
    }

    #[test]
    fn terminal_states() {
        let mut atom = sample_atom();
        atom.status = AtomStatus::Completed;
        assert!(atom.is_terminal());
        atom.status = AtomStatus::Failed;
        assert!(atom.is_terminal());
        atom.status = AtomStatus::AwaitingReview;
        assert!(!atom.is_terminal());
    }

    #[test]
    fn kind_dir_names() {
        assert_eq!(AtomKind::Interface.dir_name(), "interfaces");
        assert_eq!(AtomKind::DataShape.dir_name(), "data-shapes");
        assert_eq!(AtomKind::Implementation.dir_name(), "implementations");
    }

    #[test]
    fn round_trips_through_json() {
        let atom = sample_atom();
        let json = serde_json::to_string(&atom).unwrap();
        let back: Atom = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, atom.id);
        assert_eq!(back.kind, atom.kind);
    }
}
