//! The Repair Controller (C8): the bounded progressive repair loop that
//! runs after every atom has been generated at least once (§4.8).

use std::collections::BTreeMap;

use tracing::{info, instrument};

use crate::blackboard::atom::AtomStatus;
use crate::blackboard::{Blackboard, Diagnostic};
use crate::conflict::ConflictResolver;
use crate::error::Result;
use crate::llm::LlmProvider;
use crate::parser::SourceParser;
use crate::toolchain::{DiagnosticParser, Toolchain};
use crate::worker::{IsolatedCompiler, Worker, WorkerOutcome};
use crate::workspace::Workspace;

/// Outcome of the whole repair loop, reported up to the Orchestrator.
#[derive(Debug, Clone)]
pub struct RepairResult {
    pub success: bool,
    pub rounds_run: u32,
    pub residual_diagnostics: Vec<Diagnostic>,
    pub failed_atoms: Vec<String>,
}

pub struct RepairController<'a, T, DP, P, C, S>
where
    T: Toolchain,
    DP: DiagnosticParser,
    P: LlmProvider,
    C: IsolatedCompiler,
    S: SourceParser,
{
    blackboard: &'a Blackboard,
    workspace: &'a Workspace<T, DP>,
    worker: &'a Worker<'a, T, DP, P, C, S>,
    max_rounds: u32,
    solution_path: std::path::PathBuf,
    namespace_for_layer: Box<dyn Fn(&str) -> String + Send + Sync + 'a>,
}

impl<'a, T, DP, P, C, S> RepairController<'a, T, DP, P, C, S>
where
    T: Toolchain,
    DP: DiagnosticParser,
    P: LlmProvider,
    C: IsolatedCompiler,
    S: SourceParser,
{
    pub fn new(
        blackboard: &'a Blackboard,
        workspace: &'a Workspace<T, DP>,
        worker: &'a Worker<'a, T, DP, P, C, S>,
        max_rounds: u32,
        solution_path: std::path::PathBuf,
        namespace_for_layer: impl Fn(&str) -> String + Send + Sync + 'a,
    ) -> Self {
        Self {
            blackboard,
            workspace,
            worker,
            max_rounds,
            solution_path,
            namespace_for_layer: Box::new(namespace_for_layer),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<RepairResult> {
        let mut round: u32 = 0;
        loop {
            let build = self.workspace.build_project(&self.solution_path).await?;

            if build.succeeded() {
                info!(round, "whole-project build succeeded");
                return Ok(RepairResult {
                    success: true,
                    rounds_run: round,
                    residual_diagnostics: Vec::new(),
                    failed_atoms: Vec::new(),
                });
            }

            let is_final_round = round + 1 >= self.max_rounds;
            let buckets = self.bucket_diagnostics(&build.diagnostics, round);
            let ordered_atoms = self.prioritize(&buckets);

            if is_final_round {
                let failed_atoms: Vec<String> = self
                    .blackboard
                    .all_atoms()
                    .into_iter()
                    .filter(|a| a.status == AtomStatus::Failed)
                    .map(|a| a.id)
                    .collect();
                return Ok(RepairResult {
                    success: false,
                    rounds_run: round + 1,
                    residual_diagnostics: build.diagnostics,
                    failed_atoms,
                });
            }

            for atom_id in ordered_atoms {
                let diagnostics = buckets.get(&atom_id).cloned().unwrap_or_default();
                self.regenerate(&atom_id, diagnostics).await?;
            }

            round += 1;
        }
    }

    /// Bucket diagnostics by the atom that owns the file they point at;
    /// diagnostics whose file is not owned by any atom attribute to the
    /// most-recently-modified candidate among atoms referencing the
    /// offending symbol (§4.8 step 3). Round-1 "symbol not found"
    /// diagnostics are expected and excluded (§4.8 key decision).
    fn bucket_diagnostics(
        &self,
        diagnostics: &[Diagnostic],
        round: u32,
    ) -> BTreeMap<String, Vec<Diagnostic>> {
        let atoms = self.blackboard.all_atoms();
        let by_file: BTreeMap<&std::path::Path, &str> = atoms
            .iter()
            .map(|a| (a.file_path.as_path(), a.id.as_str()))
            .collect();

        let mut buckets: BTreeMap<String, Vec<Diagnostic>> = BTreeMap::new();

        for diag in diagnostics {
            if !diag.is_error() {
                continue;
            }
            if round == 0 && diag.is_symbol_not_found() {
                continue;
            }

            if let Some(owner) = by_file.get(diag.file.as_path()) {
                buckets.entry(owner.to_string()).or_default().push(diag.clone());
                continue;
            }

            if let Some(owner) = self.most_recently_modified_referencing(&atoms, diag) {
                buckets.entry(owner).or_default().push(diag.clone());
            }
        }

        buckets
    }

    fn most_recently_modified_referencing(
        &self,
        atoms: &[crate::blackboard::Atom],
        diag: &Diagnostic,
    ) -> Option<String> {
        // "Most recently modified" is approximated by highest retry_count,
        // since this crate does not track wall-clock modification times
        // per atom; an atom that has already been regenerated more times
        // is, by construction, the more recently touched one.
        atoms
            .iter()
            .filter(|a| {
                a.contract
                    .as_ref()
                    .is_some_and(|c| c.referenced_types.iter().any(|t| diag.message.contains(t)))
            })
            .max_by_key(|a| a.retry_count)
            .map(|a| a.id.clone())
    }

    /// Dependency order first, then error count descending, then
    /// identifier (§4.8 step 4).
    fn prioritize(&self, buckets: &BTreeMap<String, Vec<Diagnostic>>) -> Vec<String> {
        let atoms_by_id: BTreeMap<String, crate::blackboard::Atom> = self
            .blackboard
            .all_atoms()
            .into_iter()
            .map(|a| (a.id.clone(), a))
            .collect();

        let depth = |id: &str| -> u32 { dependency_depth(id, &atoms_by_id) };

        let mut ids: Vec<String> = buckets.keys().cloned().collect();
        ids.sort_by(|a, b| {
            depth(a)
                .cmp(&depth(b))
                .then_with(|| buckets[b].len().cmp(&buckets[a].len()))
                .then_with(|| a.cmp(b))
        });
        ids
    }

    async fn regenerate(&self, atom_id: &str, diagnostics: Vec<Diagnostic>) -> Result<()> {
        let mut atom = self
            .blackboard
            .get_atom(atom_id)
            .expect("bucketed atom must exist");
        atom.last_diagnostics = diagnostics;
        atom.retry_count += 1;
        atom.status = AtomStatus::Pending;
        let layer = atom.layer.clone();
        self.blackboard.upsert_atom(atom);

        let namespace = (self.namespace_for_layer)(&layer);
        match self.worker.run_atom(atom_id, &namespace).await? {
            WorkerOutcome::Completed | WorkerOutcome::Failed => Ok(()),
        }
    }
}

fn dependency_depth(
    id: &str,
    atoms_by_id: &BTreeMap<String, crate::blackboard::Atom>,
) -> u32 {
    match atoms_by_id.get(id) {
        Some(atom) if atom.dependencies.is_empty() => 0,
        Some(atom) => {
            1 + atom
                .dependencies
                .iter()
                .map(|dep| dependency_depth(dep, atoms_by_id))
                .max()
                .unwrap_or(0)
        }
        None => 0,
    }
}
