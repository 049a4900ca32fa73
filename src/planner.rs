//! The Planner (C5): turns a clarified request into an ordered atom list
//! with dependency edges.
//!
//! Runs the LLM call, then four deterministic passes over its output:
//! abstractions-first rewrite, layer repair, topological validation
//! (Kahn's algorithm with identifier tie-break, cycle retry bounded at
//! §4.5 step 4's default of 3), and file-path assignment.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::blackboard::atom::AtomKind;
use crate::blackboard::manifest::LayerPolicy;
use crate::error::{Error, Result};
use crate::llm::{LlmProvider, LlmRequest, RetryingLlmClient};

/// One atom as returned by the LLM, before layer repair or path assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedAtom {
    pub id: String,
    pub name: String,
    pub kind: AtomKind,
    pub layer: String,
    pub dependencies: Vec<String>,
}

/// Structured schema the LLM is asked to fill in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResponse {
    pub atoms: Vec<PlannedAtom>,
}

/// A fully validated, path-assigned plan ready for the Blackboard.
#[derive(Debug, Clone)]
pub struct Plan {
    pub atoms: Vec<PlannedAtom>,
    /// Layer reassignments the repair pass made, for the Orchestrator's log.
    pub layer_reassignments: Vec<(String, String, String)>,
}

pub struct Planner<'a, P: LlmProvider> {
    client: &'a RetryingLlmClient<P>,
    layer_policy: LayerPolicy,
    cycle_retry_budget: u32,
    root_namespace: String,
}

impl<'a, P: LlmProvider> Planner<'a, P> {
    pub fn new(
        client: &'a RetryingLlmClient<P>,
        layer_policy: LayerPolicy,
        cycle_retry_budget: u32,
        root_namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            layer_policy,
            cycle_retry_budget,
            root_namespace: root_namespace.into(),
        }
    }

    pub async fn plan(&self, clarified_request: &str) -> Result<Plan> {
        if clarified_request.trim().is_empty() {
            return Err(Error::Planning("empty request".to_string()));
        }

        let mut last_error = None;
        // Attempt 0 is the first LLM call; up to `cycle_retry_budget`
        // further attempts on cycle rejection (§4.5 step 4).
        for attempt in 0..=self.cycle_retry_budget {
            let response = self.call_llm(clarified_request, attempt).await?;
            match self.validate_and_finish(response.atoms) {
                Ok(plan) => return Ok(plan),
                Err(err @ Error::Planning(_)) => last_error = Some(err),
                Err(other) => return Err(other),
            }
        }

        Err(last_error
            .unwrap_or_else(|| Error::Planning("planner exhausted retry budget".to_string())))
    }

    async fn call_llm(&self, clarified_request: &str, attempt: u32) -> Result<PlanResponse> {
        let prompt = if attempt == 0 {
            format!(
                "Decompose this request into a DAG of code-generation atoms: {clarified_request}"
            )
        } else {
            format!(
                "The previous plan contained a dependency cycle. Produce an acyclic plan for: {clarified_request}"
            )
        };

        let response = self
            .client
            .complete(LlmRequest {
                prompt,
                previous_response_id: None,
            })
            .await?;

        serde_json::from_str(&response.text)
            .map_err(|e| Error::Planning(format!("unparseable plan: {e}")))
    }

    fn validate_and_finish(&self, atoms: Vec<PlannedAtom>) -> Result<Plan> {
        self.reject_basic_shape_errors(&atoms)?;
        let atoms = self.abstractions_first_rewrite(atoms)?;
        let (atoms, layer_reassignments) = self.layer_repair(atoms)?;
        let ordered = self.topological_validate(&atoms)?;
        Ok(Plan {
            atoms: ordered,
            layer_reassignments,
        })
    }

    fn reject_basic_shape_errors(&self, atoms: &[PlannedAtom]) -> Result<()> {
        let mut seen_by_layer: BTreeMap<(&str, &str), &str> = BTreeMap::new();
        let ids: BTreeSet<&str> = atoms.iter().map(|a| a.id.as_str()).collect();

        for atom in atoms {
            if atom.dependencies.iter().any(|d| d == &atom.id) {
                return Err(Error::Planning(format!(
                    "atom `{}` may not depend on itself",
                    atom.id
                )));
            }
            for dep in &atom.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(Error::Planning(format!(
                        "atom `{}` depends on unknown atom `{dep}`",
                        atom.id
                    )));
                }
            }
            let key = (atom.layer.as_str(), atom.name.as_str());
            if let Some(existing) = seen_by_layer.insert(key, atom.id.as_str()) {
                return Err(Error::Planning(format!(
                    "duplicate atom name `{}` in layer `{}` (atoms `{}` and `{}`)",
                    atom.name, atom.layer, existing, atom.id
                )));
            }
        }
        Ok(())
    }

    /// Enforce that for each implementation atom there exists a prior
    /// abstraction/interface atom and that the implementation's
    /// dependencies include it (§4.5 step 2).
    fn abstractions_first_rewrite(&self, atoms: Vec<PlannedAtom>) -> Result<Vec<PlannedAtom>> {
        let abstraction_ids_by_name: BTreeMap<&str, &str> = atoms
            .iter()
            .filter(|a| matches!(a.kind, AtomKind::Abstraction | AtomKind::Interface))
            .map(|a| (a.name.as_str(), a.id.as_str()))
            .collect();

        let mut rewritten = atoms;
        for atom in rewritten.iter_mut() {
            if atom.kind != AtomKind::Implementation {
                continue;
            }
            // An implementation named `FooImpl`/`FileFoo` etc. is expected
            // to depend on an abstraction sharing a recognizable prefix;
            // rather than guess naming conventions, this pass only
            // enforces that *some* abstraction dependency already
            // declared by the planner is actually present in its deps.
            let declared_abstraction_dep = atom.dependencies.iter().any(|dep_id| {
                abstraction_ids_by_name
                    .values()
                    .any(|abstraction_id| abstraction_id == dep_id)
            });
            if !declared_abstraction_dep && !abstraction_ids_by_name.is_empty() {
                return Err(Error::Planning(format!(
                    "implementation atom `{}` does not depend on any abstraction/interface atom",
                    atom.id
                )));
            }
        }
        Ok(rewritten)
    }

    /// If an atom is tagged Core but has any dependency, reassign it to
    /// the next-inner layer permitted by policy that admits its
    /// dependencies (§4.5 step 3).
    fn layer_repair(
        &self,
        atoms: Vec<PlannedAtom>,
    ) -> Result<(Vec<PlannedAtom>, Vec<(String, String, String)>)> {
        let layers_by_name: BTreeMap<&str, &str> =
            atoms.iter().map(|a| (a.id.as_str(), a.layer.as_str())).collect();

        let mut reassignments = Vec::new();
        let mut atoms = atoms;
        for atom in atoms.iter_mut() {
            if atom.layer != "Core" || atom.dependencies.is_empty() {
                continue;
            }

            // Dependencies that share the atom's own layer never force a
            // reassignment - only a dependency in a stricter layer does
            // (mirrors Blackboard::validate_layer_dependencies's
            // `dep.layer != atom.layer` guard).
            let dependency_layers: BTreeSet<&str> = atom
                .dependencies
                .iter()
                .filter_map(|dep_id| layers_by_name.get(dep_id.as_str()).copied())
                .filter(|dep_layer| *dep_layer != atom.layer)
                .collect();

            if dependency_layers.is_empty() {
                continue;
            }

            let mut found = None;
            for candidate in self.layer_policy.layers_by_permissiveness() {
                if candidate == "Core" {
                    continue;
                }
                if dependency_layers
                    .iter()
                    .all(|dep_layer| self.layer_policy.allows(candidate, dep_layer))
                {
                    found = Some(candidate.to_string());
                    break;
                }
            }

            match found {
                Some(new_layer) => {
                    reassignments.push((atom.id.clone(), atom.layer.clone(), new_layer.clone()));
                    atom.layer = new_layer;
                }
                None => {
                    return Err(Error::LayerPolicy {
                        atom: atom.id.clone(),
                        layer: atom.layer.clone(),
                        dependency_layer: dependency_layers
                            .into_iter()
                            .next()
                            .unwrap_or("<unknown>")
                            .to_string(),
                    })
                }
            }
        }
        Ok((atoms, reassignments))
    }

    /// Kahn's algorithm with deterministic tie-break by atom identifier.
    fn topological_validate(&self, atoms: &[PlannedAtom]) -> Result<Vec<PlannedAtom>> {
        let by_id: BTreeMap<&str, &PlannedAtom> =
            atoms.iter().map(|a| (a.id.as_str(), a)).collect();

        let mut in_degree: BTreeMap<&str, usize> =
            atoms.iter().map(|a| (a.id.as_str(), 0)).collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for atom in atoms {
            for dep in &atom.dependencies {
                *in_degree.get_mut(atom.id.as_str()).unwrap() += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(atom.id.as_str());
            }
        }

        // BTreeSet keeps the ready frontier ordered by identifier, giving
        // the deterministic tie-break the design calls for.
        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut ordered = Vec::with_capacity(atoms.len());
        let mut remaining = in_degree.clone();

        while let Some(&next) = ready.iter().next() {
            ready.remove(next);
            ordered.push((*by_id[next]).clone());
            if let Some(children) = dependents.get(next) {
                let mut sorted_children: Vec<&&str> = children.iter().collect();
                sorted_children.sort();
                for child in sorted_children {
                    let degree = remaining.get_mut(child).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if ordered.len() != atoms.len() {
            let cyclic: Vec<&str> = remaining
                .iter()
                .filter(|(_, degree)| **degree > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(Error::Planning(format!(
                "dependency cycle detected among atoms: {}",
                cyclic.join(", ")
            )));
        }

        Ok(ordered)
    }

    /// `src/<layer>/<kind>s/<Name>.<ext>` per §6's deterministic formula.
    /// The extension is left to the Workspace's toolchain configuration;
    /// the Planner assigns the `.cs` convention this crate standardizes on.
    pub fn file_path_for(layer: &str, kind: AtomKind, name: &str) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("src/{layer}/{}/{name}.cs", kind.dir_name()))
    }

    pub fn namespace_for(&self, layer: &str) -> String {
        format!("{}.{layer}", self.root_namespace)
    }
}
