//! The Conflict Resolver (C7): detects duplicate types and ambiguous
//! simple names over the SST, and proposes a policy for each (§4.7).

use std::collections::BTreeMap;

use crate::blackboard::atom::TypeKind;
use crate::blackboard::Blackboard;

/// What to do about one duplicate fully-qualified type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Interface/enum kinds: the later atom must reuse the first one's
    /// declaration instead of redeclaring it.
    KeepFirst { winner: String, loser: String },
    /// Class kinds with disjoint member signatures: merge as a partial
    /// declaration if the target language supports it.
    MergeAsPartial { atoms: Vec<String> },
    /// Class kinds with overlapping, incompatible members: drop the
    /// later atom's declaration and send it a targeted repair.
    RemoveDuplicate { winner: String, loser: String },
    /// Nothing automatic applies; the run is reported unsuccessful.
    FailFast { atoms: Vec<String> },
}

/// What to do about one simple name claimed by more than one
/// fully-qualified type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousNamePolicy {
    pub simple_name: String,
    /// Instruction text to inject into the offending atoms' repair prompts.
    pub instruction: String,
}

pub struct ConflictResolver<'a> {
    blackboard: &'a Blackboard,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(blackboard: &'a Blackboard) -> Self {
        Self { blackboard }
    }

    /// Resolve every duplicate fully-qualified name currently in the SST,
    /// given each owning atom's completion order (earliest first; ties
    /// broken lexicographically by id - callers pass atoms already in
    /// that order via `completion_order`).
    pub fn resolve_duplicates(&self, completion_order: &[String]) -> Vec<DuplicatePolicy> {
        let rank: BTreeMap<&str, usize> = completion_order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();

        self.blackboard
            .sst_duplicate_fully_qualified_names()
            .into_iter()
            .map(|(fqn, owners)| self.resolve_one_duplicate(&fqn, owners, &rank))
            .collect()
    }

    fn resolve_one_duplicate(
        &self,
        fqn: &str,
        mut owners: Vec<String>,
        rank: &BTreeMap<&str, usize>,
    ) -> DuplicatePolicy {
        owners.sort_by(|a, b| {
            rank.get(a.as_str())
                .unwrap_or(&usize::MAX)
                .cmp(rank.get(b.as_str()).unwrap_or(&usize::MAX))
                .then_with(|| a.cmp(b))
        });

        let simple_name = fqn.rsplit('.').next().unwrap_or(fqn);
        let kind = owners
            .first()
            .and_then(|id| self.lookup_kind(simple_name, id));

        let winner = owners[0].clone();
        let loser = owners.get(1).cloned().unwrap_or_else(|| winner.clone());

        match kind {
            Some(TypeKind::Interface) | Some(TypeKind::Enum) => {
                DuplicatePolicy::KeepFirst { winner, loser }
            }
            Some(TypeKind::Class) | Some(TypeKind::Struct) => {
                if self.members_disjoint(simple_name, &owners) {
                    DuplicatePolicy::MergeAsPartial { atoms: owners }
                } else if owners.len() == 2 {
                    DuplicatePolicy::RemoveDuplicate { winner, loser }
                } else {
                    DuplicatePolicy::FailFast { atoms: owners }
                }
            }
            None => DuplicatePolicy::FailFast { atoms: owners },
        }
    }

    fn lookup_kind(&self, simple_name: &str, owner: &str) -> Option<TypeKind> {
        self.blackboard
            .sst_lookup(simple_name)
            .into_iter()
            .find(|e| e.owning_atom == owner)
            .map(|e| e.signature.kind)
    }

    fn members_disjoint(&self, simple_name: &str, owners: &[String]) -> bool {
        let entries = self.blackboard.sst_lookup(simple_name);
        let mut seen = std::collections::BTreeSet::new();
        for owner in owners {
            let Some(entry) = entries.iter().find(|e| &e.owning_atom == owner) else {
                continue;
            };
            for member in &entry.signature.members {
                if !seen.insert(member.name.clone()) {
                    return false;
                }
            }
        }
        true
    }

    /// Every simple name with more than one distinct fully-qualified
    /// declaration (§4.7: "ambiguous simple name").
    pub fn resolve_ambiguous_names(&self) -> Vec<AmbiguousNamePolicy> {
        self.blackboard
            .sst_ambiguous_simple_names()
            .into_iter()
            .map(|simple_name| AmbiguousNamePolicy {
                instruction: format!(
                    "Qualify every reference to `{simple_name}` with its full namespace; \
                     multiple types share this simple name."
                ),
                simple_name,
            })
            .collect()
    }
}
