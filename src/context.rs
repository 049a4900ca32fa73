//! The Context Assembler (C4): produces a prompt as the concatenation of
//! three tiers (§4.4).
//!
//! - **Global** (the map): project metadata, layer policy, completed
//!   files, and a rules block.
//! - **Local** (the tools): signatures only of each direct dependency,
//!   fetched through a hot cache before falling back to the Blackboard/SST.
//! - **Target** (the task): the atom's own identity and instructions.
//!
//! Full bodies of other atoms must never appear in any tier - that
//! invariant is why this module only ever reads [`TypeSignature`], never
//! [`crate::blackboard::Atom::generated_source`].

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::blackboard::atom::{AtomKind, TypeSignature};
use crate::blackboard::{Blackboard, ProjectManifest};

/// Default sliding-expiration window for cached dependency signatures
/// (§4.4: "default 30 minutes").
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// A small concurrent cache keyed by atom identifier, with per-entry
/// sliding expiration. Evictions never fail a lookup - callers fall back
/// to the Blackboard/SST on a miss (§5). Holds both the dependency
/// signature cache and the generated-code cache (keyed `code_<atom>` per
/// §4.6 step 5) under one TTL policy.
pub struct HotCache {
    signatures: Mutex<LruCache<String, CacheEntry<Vec<TypeSignature>>>>,
    code: Mutex<LruCache<String, CacheEntry<String>>>,
    ttl: Duration,
}

fn get_sliding<V: Clone>(
    cache: &mut LruCache<String, CacheEntry<V>>,
    key: &str,
    ttl: Duration,
) -> Option<V> {
    let expired = cache
        .peek(key)
        .is_some_and(|e| e.inserted_at.elapsed() > ttl);
    if expired {
        cache.pop(key);
        return None;
    }
    cache.get_mut(key).map(|e| {
        e.inserted_at = Instant::now();
        e.value.clone()
    })
}

impl HotCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            signatures: Mutex::new(LruCache::new(capacity)),
            code: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn with_default_ttl(capacity: usize) -> Self {
        Self::new(capacity, DEFAULT_CACHE_TTL)
    }

    /// Look up a dependency's cached signatures, keyed by atom
    /// identifier. A hit refreshes the entry's insertion time,
    /// implementing sliding rather than fixed expiration.
    pub fn get(&self, atom_id: &str) -> Option<Vec<TypeSignature>> {
        get_sliding(&mut self.signatures.lock(), atom_id, self.ttl)
    }

    pub fn put(&self, atom_id: impl Into<String>, signatures: Vec<TypeSignature>) {
        self.signatures.lock().put(
            atom_id.into(),
            CacheEntry {
                value: signatures,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn get_code(&self, atom_id: &str) -> Option<String> {
        get_sliding(&mut self.code.lock(), &format!("code_{atom_id}"), self.ttl)
    }

    pub fn put_code(&self, atom_id: &str, source: String) {
        self.code.lock().put(
            format!("code_{atom_id}"),
            CacheEntry {
                value: source,
                inserted_at: Instant::now(),
            },
        );
    }
}

/// Everything the Target tier needs about the atom being generated.
pub struct TargetAtom<'a> {
    pub id: &'a str,
    pub kind: AtomKind,
    pub name: &'a str,
    pub layer: &'a str,
    pub file_path: &'a std::path::Path,
    pub namespace: &'a str,
    pub dependency_ids: &'a [String],
}

pub struct ContextAssembler<'a> {
    blackboard: &'a Blackboard,
    cache: &'a HotCache,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(blackboard: &'a Blackboard, cache: &'a HotCache) -> Self {
        Self { blackboard, cache }
    }

    pub fn assemble(&self, target: &TargetAtom<'_>) -> String {
        let manifest = self.blackboard.manifest();
        let mut prompt = String::new();
        prompt.push_str(&self.global_tier(&manifest));
        prompt.push_str("\n\n");
        prompt.push_str(&self.local_tier(target));
        prompt.push_str("\n\n");
        prompt.push_str(&self.target_tier(target));
        prompt
    }

    fn global_tier(&self, manifest: &ProjectManifest) -> String {
        let completed: Vec<String> = manifest
            .completed_files
            .values()
            .map(|p| p.display().to_string())
            .collect();
        format!(
            "# The Map\nProject: {} (namespace {})\nRules: {}\nCompleted files: {}",
            manifest.metadata.name,
            manifest.metadata.root_namespace,
            manifest.layer_policy.rules_block(),
            if completed.is_empty() {
                "none yet".to_string()
            } else {
                completed.join(", ")
            }
        )
    }

    /// Signatures only, fetched through the hot cache before falling back
    /// to the Blackboard/SST on a miss.
    fn local_tier(&self, target: &TargetAtom<'_>) -> String {
        let mut block = String::from("# The Tools\n");
        for dep_id in target.dependency_ids {
            let signatures = self.cache.get(dep_id).unwrap_or_else(|| {
                let dep_atom = self.blackboard.get_atom(dep_id);
                let signatures = dep_atom
                    .and_then(|a| a.contract)
                    .map(|c| c.defined_types)
                    .unwrap_or_default();
                self.cache.put(dep_id.clone(), signatures.clone());
                signatures
            });
            for sig in signatures {
                block.push_str(&format!(
                    "- {} ({:?}): {}\n",
                    sig.fully_qualified_name,
                    sig.kind,
                    sig.members
                        .iter()
                        .map(|m| m.signature.as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                ));
            }
        }
        block
    }

    fn target_tier(&self, target: &TargetAtom<'_>) -> String {
        let instructions = match target.kind {
            AtomKind::DataShape => "Define a pure-data type with no behavior.",
            AtomKind::Interface | AtomKind::Abstraction => "Define only the contract; no method bodies.",
            AtomKind::Implementation => {
                "Implement the contract; take dependencies by constructor injection."
            }
            AtomKind::Test => "Cover all public members of the target type.",
        };
        format!(
            "# The Task\nAtom: {} ({:?})\nName: {}\nLayer: {}\nNamespace: {}\nFile: {}\nInstructions: {instructions}",
            target.id,
            target.kind,
            target.name,
            target.layer,
            target.namespace,
            target.file_path.display(),
        )
    }
}
