//! The Semantic Symbol Table: a signature-only index of every type
//! declared by a completed atom, keyed by simple name for fast lookup by
//! the Context Assembler and Conflict Resolver.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::atom::TypeSignature;

/// One SST entry: a declared type plus the atom that owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SstEntry {
    pub signature: TypeSignature,
    pub owning_atom: String,
}

/// Maps simple type name -> all known declarations of that name (normally
/// one, but duplicates/ambiguities are exactly what the Conflict Resolver
/// watches this table for).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticSymbolTable {
    by_simple_name: BTreeMap<String, Vec<SstEntry>>,
}

impl SemanticSymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append-or-replace on the tuple (owning-atom, type-name): a second
    /// registration from the same atom for the same fully-qualified name
    /// replaces the first (regeneration), rather than appending a duplicate.
    pub fn register(&mut self, owning_atom: &str, signature: TypeSignature) {
        let entries = self
            .by_simple_name
            .entry(signature.simple_name.clone())
            .or_default();

        if let Some(existing) = entries.iter_mut().find(|e| {
            e.owning_atom == owning_atom
                && e.signature.fully_qualified_name == signature.fully_qualified_name
        }) {
            existing.signature = signature;
        } else {
            entries.push(SstEntry {
                signature,
                owning_atom: owning_atom.to_string(),
            });
        }
    }

    pub fn lookup(&self, simple_name: &str) -> &[SstEntry] {
        self.by_simple_name
            .get(simple_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All entries currently owned by `atom_id`, across every simple name.
    pub fn entries_for_atom(&self, atom_id: &str) -> Vec<&SstEntry> {
        self.by_simple_name
            .values()
            .flatten()
            .filter(|e| e.owning_atom == atom_id)
            .collect()
    }

    /// Drop every entry owned by `atom_id`. Used both when an atom is
    /// deleted and - per the eager-purge decision in DESIGN.md - when the
    /// Planner reassigns an atom's layer mid-run, since its old
    /// fully-qualified names (layer is part of the namespace) no longer
    /// apply.
    pub fn purge_atom(&mut self, atom_id: &str) {
        for entries in self.by_simple_name.values_mut() {
            entries.retain(|e| e.owning_atom != atom_id);
        }
        self.by_simple_name.retain(|_, entries| !entries.is_empty());
    }

    /// Simple names with more than one distinct fully-qualified name
    /// registered - the ambiguous-name case the Conflict Resolver handles.
    pub fn ambiguous_simple_names(&self) -> Vec<&str> {
        self.by_simple_name
            .iter()
            .filter(|(_, entries)| {
                let mut fqns: Vec<&str> = entries
                    .iter()
                    .map(|e| e.signature.fully_qualified_name.as_str())
                    .collect();
                fqns.sort_unstable();
                fqns.dedup();
                fqns.len() > 1
            })
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// All fully-qualified names registered by more than one atom - the
    /// duplicate-type case.
    pub fn duplicate_fully_qualified_names(&self) -> Vec<(String, Vec<String>)> {
        let mut by_fqn: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entries in self.by_simple_name.values() {
            for entry in entries {
                by_fqn
                    .entry(entry.signature.fully_qualified_name.clone())
                    .or_default()
                    .push(entry.owning_atom.clone());
            }
        }
        by_fqn
            .into_iter()
            .filter(|(_, owners)| owners.len() > 1)
            .collect()
    }
}
