//! The Blackboard: the single shared store of durable run state - atoms,
//! the project manifest, and the Semantic Symbol Table.
//!
//! A reader-preferring lock is chosen here because the Repair Controller's
//! diagnostic-attribution pass issues many concurrent reads (one per
//! diagnostic, against a stable atom set) while Workers hold the write
//! side only for the brief span of a status transition or contract
//! registration. [`parking_lot::RwLock`] gives writers no special
//! priority over already-queued readers, which is what that access
//! pattern wants.

pub mod atom;
pub mod diagnostic;
pub mod manifest;
pub mod sst;

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::error;

use crate::error::{Error, Result};
use crate::persistence;

pub use atom::{Atom, AtomContract, AtomKind, AtomStatus, MemberSignature, TypeKind, TypeSignature};
pub use diagnostic::{Diagnostic, Severity};
pub use manifest::{LayerPolicy, LayerRule, ProjectManifest, ProjectMetadata};
pub use sst::SemanticSymbolTable;

struct Inner {
    atoms: BTreeMap<String, Atom>,
    manifest: ProjectManifest,
    sst: SemanticSymbolTable,
}

/// Shared handle to the run's durable state. Cheap to clone; clones share
/// the same underlying lock.
#[derive(Clone)]
pub struct Blackboard {
    inner: Arc<RwLock<Inner>>,
    manifest_path: Arc<Path>,
}

impl Blackboard {
    pub fn new(manifest: ProjectManifest, manifest_path: impl AsRef<Path>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                atoms: BTreeMap::new(),
                manifest,
                sst: SemanticSymbolTable::new(),
            })),
            manifest_path: Arc::from(manifest_path.as_ref()),
        }
    }

    /// Insert a new atom or overwrite an existing one by id. Persists the
    /// manifest before returning (§4.1: "all mutating operations must
    /// persist the manifest before returning").
    pub fn upsert_atom(&self, atom: Atom) {
        {
            let mut inner = self.inner.write();
            inner.atoms.insert(atom.id.clone(), atom);
        }
        self.persist_manifest_best_effort();
    }

    pub fn get_atom(&self, id: &str) -> Option<Atom> {
        self.inner.read().atoms.get(id).cloned()
    }

    pub fn list_atoms_by_status(&self, status: AtomStatus) -> Vec<Atom> {
        self.inner
            .read()
            .atoms
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect()
    }

    pub fn all_atoms(&self) -> Vec<Atom> {
        self.inner.read().atoms.values().cloned().collect()
    }

    /// Transition an atom's status. Returns an error if the atom is unknown
    /// so callers can't silently no-op on a typo'd id. Persists the
    /// manifest before returning (§4.1).
    pub fn set_status(&self, id: &str, status: AtomStatus) -> Result<()> {
        {
            let mut inner = self.inner.write();
            let atom = inner
                .atoms
                .get_mut(id)
                .ok_or_else(|| Error::Planning(format!("unknown atom `{id}`")))?;
            atom.status = status;
        }
        self.save_manifest()
    }

    /// Whether `atom`'s layer is permitted, under the current layer
    /// policy, to depend on every layer its declared dependencies sit in.
    pub fn validate_layer_dependencies(&self, atom_id: &str) -> Result<()> {
        let inner = self.inner.read();
        let atom = inner
            .atoms
            .get(atom_id)
            .ok_or_else(|| Error::Planning(format!("unknown atom `{atom_id}`")))?;
        for dep_id in &atom.dependencies {
            let Some(dep) = inner.atoms.get(dep_id) else {
                continue;
            };
            if dep.layer != atom.layer && !inner.manifest.layer_policy.allows(&atom.layer, &dep.layer)
            {
                return Err(Error::LayerPolicy {
                    atom: atom.id.clone(),
                    layer: atom.layer.clone(),
                    dependency_layer: dep.layer.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether every dependency of `atom_id` has reached `Completed`.
    pub fn are_dependencies_satisfied(&self, atom_id: &str) -> bool {
        let inner = self.inner.read();
        let Some(atom) = inner.atoms.get(atom_id) else {
            return false;
        };
        atom.dependencies.iter().all(|dep_id| {
            inner
                .atoms
                .get(dep_id)
                .is_some_and(|dep| dep.status == AtomStatus::Completed)
        })
    }

    /// Atoms that are `Pending` with every dependency satisfied - the
    /// scheduler's ready set for the next wave.
    pub fn ready_atoms(&self) -> Vec<Atom> {
        let inner = self.inner.read();
        inner
            .atoms
            .values()
            .filter(|a| a.status == AtomStatus::Pending)
            .filter(|a| {
                a.dependencies.iter().all(|dep_id| {
                    inner
                        .atoms
                        .get(dep_id)
                        .is_some_and(|dep| dep.status == AtomStatus::Completed)
                })
            })
            .cloned()
            .collect()
    }

    pub fn record_completed_file(&self, atom_id: &str, path: std::path::PathBuf) {
        let mut inner = self.inner.write();
        inner.manifest.record_completed_file(atom_id, path);
    }

    pub fn layer_policy(&self) -> LayerPolicy {
        self.inner.read().manifest.layer_policy.clone()
    }

    pub fn manifest(&self) -> ProjectManifest {
        self.inner.read().manifest.clone()
    }

    /// Atomically persist the manifest to `manifest_path` (write-temp then
    /// rename, per the design's persistence section).
    pub fn save_manifest(&self) -> Result<()> {
        let manifest = self.inner.read().manifest.clone();
        persistence::write_atomic_json(&self.manifest_path, &manifest)
    }

    pub fn load_manifest(path: impl AsRef<Path>) -> Result<ProjectManifest> {
        persistence::read_json(path)
    }

    /// Save fails best-effort for the `()`-returning mutators: a write
    /// failure here is logged rather than propagated, since neither
    /// `upsert_atom` nor `sst_register` has an error return to carry it and
    /// repeated saves are idempotent - the next mutation retries the write.
    fn persist_manifest_best_effort(&self) {
        if let Err(err) = self.save_manifest() {
            error!(?err, "failed to persist manifest after blackboard mutation");
        }
    }

    /// Register `atom_id`'s defined types in the Semantic Symbol Table.
    /// Persists the manifest before returning (§4.1).
    pub fn sst_register(&self, atom_id: &str, signatures: Vec<TypeSignature>) {
        {
            let mut inner = self.inner.write();
            for sig in signatures {
                inner.sst.register(atom_id, sig);
            }
        }
        self.persist_manifest_best_effort();
    }

    pub fn sst_lookup(&self, simple_name: &str) -> Vec<sst::SstEntry> {
        self.inner.read().sst.lookup(simple_name).to_vec()
    }

    /// Drop `atom_id`'s SST entries, e.g. on layer reassignment or
    /// regeneration before re-registering its new contract.
    pub fn sst_purge_atom(&self, atom_id: &str) {
        self.inner.write().sst.purge_atom(atom_id);
    }

    pub fn sst_ambiguous_simple_names(&self) -> Vec<String> {
        self.inner
            .read()
            .sst
            .ambiguous_simple_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn sst_duplicate_fully_qualified_names(&self) -> Vec<(String, Vec<String>)> {
        self.inner.read().sst.duplicate_fully_qualified_names()
    }
}
