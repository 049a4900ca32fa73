//! The Orchestrator (C9): the linear phase driver (§4.9).

use std::collections::BTreeMap;
use std::path::PathBuf;

use futures::future::join_all;
use tracing::{info, instrument, warn};

use crate::blackboard::atom::AtomStatus;
use crate::blackboard::{
    Atom, Blackboard, Diagnostic, LayerPolicy, ProjectManifest, ProjectMetadata, Severity,
};
use crate::conflict::{ConflictResolver, DuplicatePolicy};
use crate::config::{CompilationMode, RunConfig};
use crate::error::{Error, Result};
use crate::llm::{LlmProvider, RetryingLlmClient};
use crate::parser::SourceParser;
use crate::planner::Planner;
use crate::repair::RepairController;
use crate::toolchain::{DiagnosticParser, Toolchain};
use crate::worker::{IsolatedCompiler, Worker};
use crate::workspace::Workspace;

/// The structured result every run produces (§7: "a structured result
/// with `success=false`, a top-level error kind, per-atom statuses, and
/// the last round's diagnostic summary").
#[derive(Debug, Clone)]
pub struct RunResult {
    pub success: bool,
    pub workspace_path: PathBuf,
    pub atom_statuses: BTreeMap<String, AtomStatus>,
    pub residual_diagnostics: Vec<Diagnostic>,
    pub error_kind: Option<&'static str>,
}

/// A hook that turns a raw request into a clarified one (§4.9 step 1).
/// The trivial default simply passes the request through unchanged.
#[async_trait::async_trait]
pub trait ClarificationHook: Send + Sync {
    async fn clarify(&self, raw_request: &str) -> Result<String>;
}

#[derive(Default)]
pub struct PassthroughClarification;

#[async_trait::async_trait]
impl ClarificationHook for PassthroughClarification {
    async fn clarify(&self, raw_request: &str) -> Result<String> {
        Ok(raw_request.to_string())
    }
}

pub struct Orchestrator<T, DP, P, C, S, H>
where
    T: Toolchain,
    DP: DiagnosticParser,
    P: LlmProvider,
    C: IsolatedCompiler,
    S: SourceParser,
    H: ClarificationHook,
{
    config: RunConfig,
    workspace: Workspace<T, DP>,
    llm: RetryingLlmClient<P>,
    compiler: C,
    parser: S,
    clarification: H,
    solution_name: String,
}

impl<T, DP, P, C, S, H> Orchestrator<T, DP, P, C, S, H>
where
    T: Toolchain,
    DP: DiagnosticParser,
    P: LlmProvider,
    C: IsolatedCompiler,
    S: SourceParser,
    H: ClarificationHook,
{
    pub fn new(
        config: RunConfig,
        workspace: Workspace<T, DP>,
        llm: RetryingLlmClient<P>,
        compiler: C,
        parser: S,
        clarification: H,
        solution_name: impl Into<String>,
    ) -> Self {
        Self {
            config,
            workspace,
            llm,
            compiler,
            parser,
            clarification,
            solution_name: solution_name.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self, raw_request: &str) -> Result<RunResult> {
        let manifest_path = self.workspace.root().join("solution_manifest.json");
        let root_namespace = self.solution_name.clone();

        let clarified = self.clarification.clarify(raw_request).await?;

        let layer_policy = LayerPolicy::standard_three_layer();
        let planner = Planner::new(
            &self.llm,
            layer_policy.clone(),
            self.config.cycle_retry_budget,
            root_namespace.clone(),
        );

        let plan = match planner.plan(&clarified).await {
            Ok(plan) => plan,
            Err(err) => {
                return Ok(RunResult {
                    success: false,
                    workspace_path: self.workspace.root().to_path_buf(),
                    atom_statuses: BTreeMap::new(),
                    residual_diagnostics: Vec::new(),
                    error_kind: Some(error_kind(&err)),
                })
            }
        };

        let manifest = ProjectManifest::new(
            ProjectMetadata {
                name: self.solution_name.clone(),
                root_namespace: root_namespace.clone(),
                target_framework: "net8.0".to_string(),
            },
            layer_policy,
        );
        let blackboard = Blackboard::new(manifest, manifest_path);

        for planned in &plan.atoms {
            let file_path = Planner::<P>::file_path_for(&planned.layer, planned.kind, &planned.name);
            blackboard.upsert_atom(Atom::new(
                planned.id.clone(),
                planned.name.clone(),
                planned.kind,
                planned.layer.clone(),
                planned.dependencies.clone(),
                file_path,
            ));
        }
        blackboard.save_manifest()?;

        for planned in &plan.atoms {
            if let Err(err) = blackboard.validate_layer_dependencies(&planned.id) {
                return Ok(RunResult {
                    success: false,
                    workspace_path: self.workspace.root().to_path_buf(),
                    atom_statuses: self.snapshot_statuses(&blackboard),
                    residual_diagnostics: Vec::new(),
                    error_kind: Some(error_kind(&err)),
                });
            }
        }

        if let Err(err) = self.scaffold(&plan.atoms).await {
            return Ok(RunResult {
                success: false,
                workspace_path: self.workspace.root().to_path_buf(),
                atom_statuses: self.snapshot_statuses(&blackboard),
                residual_diagnostics: Vec::new(),
                error_kind: Some(error_kind(&err)),
            });
        }

        let cache = crate::context::HotCache::with_default_ttl(256);
        let worker = Worker::new(
            &blackboard,
            &self.workspace,
            &cache,
            &self.llm,
            &self.compiler,
            &self.parser,
            self.config.max_retries,
        );

        if let Err(deadlock) = self.schedule_until_drained(&blackboard, &worker, &root_namespace).await {
            return Ok(RunResult {
                success: false,
                workspace_path: self.workspace.root().to_path_buf(),
                atom_statuses: self.snapshot_statuses(&blackboard),
                residual_diagnostics: Vec::new(),
                error_kind: Some(error_kind(&deadlock)),
            });
        }

        let completion_order: Vec<String> = plan.atoms.iter().map(|a| a.id.clone()).collect();
        if let Err(err) = self
            .resolve_conflicts(&blackboard, &worker, &completion_order, &root_namespace)
            .await
        {
            return Ok(RunResult {
                success: false,
                workspace_path: self.workspace.root().to_path_buf(),
                atom_statuses: self.snapshot_statuses(&blackboard),
                residual_diagnostics: Vec::new(),
                error_kind: Some(error_kind(&err)),
            });
        }

        let result = match self.config.compilation_mode {
            CompilationMode::AtomOnly => {
                let failed = blackboard.list_atoms_by_status(AtomStatus::Failed);
                RunResult {
                    success: failed.is_empty(),
                    workspace_path: self.workspace.root().to_path_buf(),
                    atom_statuses: self.snapshot_statuses(&blackboard),
                    residual_diagnostics: Vec::new(),
                    error_kind: None,
                }
            }
            CompilationMode::Progressive => {
                let root_namespace_for_repair = root_namespace.clone();
                let controller = RepairController::new(
                    &blackboard,
                    &self.workspace,
                    &worker,
                    self.config.max_progressive_rounds,
                    PathBuf::from(format!("{}.sln", self.solution_name)),
                    move |layer: &str| format!("{root_namespace_for_repair}.{layer}"),
                );
                let repair = controller.run().await?;
                RunResult {
                    success: repair.success,
                    workspace_path: self.workspace.root().to_path_buf(),
                    atom_statuses: self.snapshot_statuses(&blackboard),
                    residual_diagnostics: repair.residual_diagnostics,
                    error_kind: if repair.success {
                        None
                    } else {
                        Some("atom-repair-exhausted")
                    },
                }
            }
        };

        blackboard.save_manifest()?;
        info!(success = result.success, "run finished");
        Ok(result)
    }

    async fn scaffold(&self, atoms: &[crate::planner::PlannedAtom]) -> Result<()> {
        let solution = self.workspace.scaffold_solution(&self.solution_name).await?;
        require_success(&solution, "scaffold solution")?;

        let layers: std::collections::BTreeSet<&str> =
            atoms.iter().map(|a| a.layer.as_str()).collect();
        for layer in layers {
            let project_name = format!("{}.{layer}", self.solution_name);
            let rel_path = PathBuf::from(format!("src/{layer}/{project_name}.csproj"));
            let library = self.workspace.scaffold_library(&project_name, &rel_path).await?;
            require_success(&library, "scaffold library")?;
            let attach = self
                .workspace
                .attach_library(&self.solution_name, &rel_path)
                .await?;
            require_success(&attach, "attach library")?;
        }
        Ok(())
    }

    /// Repeatedly pick all atoms with satisfied dependencies and invoke
    /// the Worker on each, possibly concurrently within a wave (§4.9 step
    /// 5, §5). Surfaces `deadlock-detected` if no atoms are ready while
    /// unfinished work remains.
    async fn schedule_until_drained(
        &self,
        blackboard: &Blackboard,
        worker: &Worker<'_, T, DP, P, C, S>,
        root_namespace: &str,
    ) -> Result<()> {
        loop {
            let pending_count = blackboard
                .all_atoms()
                .into_iter()
                .filter(|a| !a.is_terminal())
                .count();
            if pending_count == 0 {
                return Ok(());
            }

            let ready = blackboard.ready_atoms();
            if ready.is_empty() {
                warn!(pending_count, "no ready atoms with work remaining");
                return Err(Error::DeadlockDetected(pending_count));
            }

            let jobs: Vec<(String, String)> = ready
                .iter()
                .map(|atom| (atom.id.clone(), format!("{root_namespace}.{}", atom.layer)))
                .collect();
            let futures = jobs.iter().map(|(id, namespace)| worker.run_atom(id, namespace));
            for outcome in join_all(futures).await {
                outcome?;
            }
        }
    }

    /// Resolve duplicate fully-qualified types and ambiguous simple names
    /// over the SST once every atom has completed at least one pass
    /// (§4.7). `completion_order` ranks atoms earliest-registered-first,
    /// which the Planner's deterministic emission order already gives us.
    async fn resolve_conflicts(
        &self,
        blackboard: &Blackboard,
        worker: &Worker<'_, T, DP, P, C, S>,
        completion_order: &[String],
        root_namespace: &str,
    ) -> Result<()> {
        let resolver = ConflictResolver::new(blackboard);

        for policy in resolver.resolve_duplicates(completion_order) {
            match policy {
                DuplicatePolicy::KeepFirst { loser, .. } => {
                    blackboard.sst_purge_atom(&loser);
                    self.regenerate_with_instruction(
                        blackboard,
                        worker,
                        &loser,
                        root_namespace,
                        "Do not redeclare this type; reuse the declaration an earlier atom already produced.",
                    )
                    .await?;
                }
                DuplicatePolicy::MergeAsPartial { atoms } => {
                    for atom_id in atoms.iter().skip(1) {
                        self.regenerate_with_instruction(
                            blackboard,
                            worker,
                            atom_id,
                            root_namespace,
                            "Declare this type as a partial type; another atom contributes disjoint members to the same type.",
                        )
                        .await?;
                    }
                }
                DuplicatePolicy::RemoveDuplicate { winner, loser } => {
                    blackboard.sst_purge_atom(&loser);
                    self.regenerate_with_instruction(
                        blackboard,
                        worker,
                        &loser,
                        root_namespace,
                        &format!(
                            "Remove this type's declaration and reference the version atom `{winner}` produces instead."
                        ),
                    )
                    .await?;
                }
                DuplicatePolicy::FailFast { atoms } => {
                    return Err(Error::ConflictUnresolvable(format!(
                        "no automatic resolution applies to the type shared by atoms: {}",
                        atoms.join(", ")
                    )));
                }
            }
        }

        for policy in resolver.resolve_ambiguous_names() {
            let owners: Vec<String> = blackboard
                .sst_lookup(&policy.simple_name)
                .into_iter()
                .map(|entry| entry.owning_atom)
                .collect();
            for atom_id in owners {
                self.regenerate_with_instruction(
                    blackboard,
                    worker,
                    &atom_id,
                    root_namespace,
                    &policy.instruction,
                )
                .await?;
            }
        }

        Ok(())
    }

    async fn regenerate_with_instruction(
        &self,
        blackboard: &Blackboard,
        worker: &Worker<'_, T, DP, P, C, S>,
        atom_id: &str,
        root_namespace: &str,
        instruction: &str,
    ) -> Result<()> {
        let Some(mut atom) = blackboard.get_atom(atom_id) else {
            return Ok(());
        };
        atom.last_diagnostics.push(Diagnostic {
            severity: Severity::Error,
            code: "CONFLICT".to_string(),
            message: instruction.to_string(),
            file: atom.file_path.clone(),
            line: 1,
            column: 1,
        });
        atom.retry_count += 1;
        atom.status = AtomStatus::Pending;
        let layer = atom.layer.clone();
        blackboard.upsert_atom(atom);

        let namespace = format!("{root_namespace}.{layer}");
        worker.run_atom(atom_id, &namespace).await?;
        Ok(())
    }

    fn snapshot_statuses(&self, blackboard: &Blackboard) -> BTreeMap<String, AtomStatus> {
        blackboard
            .all_atoms()
            .into_iter()
            .map(|a| (a.id, a.status))
            .collect()
    }
}

fn require_success(result: &crate::workspace::BuildResult, step: &str) -> Result<()> {
    if result.succeeded() {
        Ok(())
    } else {
        Err(Error::Toolchain(format!(
            "{step} failed (exit {}): {}",
            result.exit_code, result.stderr
        )))
    }
}

fn error_kind(err: &Error) -> &'static str {
    match err {
        Error::Configuration(_) => "configuration",
        Error::Planning(_) => "planning",
        Error::LayerPolicy { .. } => "layer-policy",
        Error::WorkspaceSecurity(_) => "workspace-security",
        Error::Toolchain(_) => "toolchain",
        Error::ExternalCall(_) => "external-call",
        Error::AtomRepairExhausted(_) => "atom-repair-exhausted",
        Error::ConflictUnresolvable(_) => "conflict-unresolvable",
        Error::DeadlockDetected(_) => "deadlock-detected",
        Error::Serialization(_) | Error::Toml(_) | Error::Io(_) => "io",
    }
}
