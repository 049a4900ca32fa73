//! The Worker (C6): executes one atom through up to N attempts (§4.6).

use tracing::{info, instrument, warn};

use crate::blackboard::atom::{AtomContract, AtomKind, AtomStatus, TypeSignature};
use crate::blackboard::{Atom, Blackboard, Diagnostic};
use crate::context::{ContextAssembler, HotCache, TargetAtom};
use crate::error::Result;
use crate::llm::{LlmProvider, LlmRequest, RetryingLlmClient};
use crate::parser::{SourceParser, SymbolExtractor};
use crate::toolchain::{DiagnosticParser, Toolchain};
use crate::workspace::Workspace;

/// Outcome of one Worker pass over a single atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed,
    Failed,
}

/// Anything the Worker needs to compile a candidate source body in
/// isolation against the current SST (§4.6 step 5). Kept as a trait so
/// this crate stays language-agnostic; a concrete implementation drives
/// the Workspace's toolchain against a scratch single-file compile unit.
#[async_trait::async_trait]
pub trait IsolatedCompiler: Send + Sync {
    async fn compile(
        &self,
        source: &str,
        known_signatures: &[TypeSignature],
    ) -> Result<Vec<Diagnostic>>;
}

pub struct Worker<'a, T: Toolchain, DP: DiagnosticParser, P: LlmProvider, C: IsolatedCompiler, S: SourceParser> {
    blackboard: &'a Blackboard,
    workspace: &'a Workspace<T, DP>,
    cache: &'a HotCache,
    llm: &'a RetryingLlmClient<P>,
    compiler: &'a C,
    parser: &'a S,
    max_attempts: u32,
}

impl<'a, T: Toolchain, DP: DiagnosticParser, P: LlmProvider, C: IsolatedCompiler, S: SourceParser>
    Worker<'a, T, DP, P, C, S>
{
    pub fn new(
        blackboard: &'a Blackboard,
        workspace: &'a Workspace<T, DP>,
        cache: &'a HotCache,
        llm: &'a RetryingLlmClient<P>,
        compiler: &'a C,
        parser: &'a S,
        max_attempts: u32,
    ) -> Self {
        Self {
            blackboard,
            workspace,
            cache,
            llm,
            compiler,
            parser,
            max_attempts,
        }
    }

    /// Run one atom through the generate/compile loop. Cancellation at
    /// any `.await` point leaves the atom in its current status and
    /// propagates the cancellation (tokio's own cooperative cancellation
    /// covers this - the Worker adds no extra cleanup that would need to
    /// run on drop).
    #[instrument(skip(self), fields(atom_id = %atom_id))]
    pub async fn run_atom(&self, atom_id: &str, namespace: &str) -> Result<WorkerOutcome> {
        self.blackboard.set_status(atom_id, AtomStatus::InProgress)?;

        loop {
            let atom = self
                .blackboard
                .get_atom(atom_id)
                .expect("atom must exist once run_atom is invoked on it");

            if atom.retry_count >= self.max_attempts {
                self.blackboard.set_status(atom_id, AtomStatus::Failed)?;
                warn!(attempts = atom.retry_count, "atom exhausted repair budget");
                return Ok(WorkerOutcome::Failed);
            }

            let prompt = self.build_prompt(&atom, namespace);
            let previous_response_id = if atom.retry_count == 0 {
                self.last_dependency_response_id(&atom)
            } else {
                atom.response_id.clone()
            };
            let response = self
                .llm
                .complete(LlmRequest {
                    prompt,
                    previous_response_id,
                })
                .await?;

            let source = extract_code_block(&response.text);

            let mut updated = atom.clone();
            updated.generated_source = Some(source.clone());
            updated.status = AtomStatus::AwaitingReview;
            updated.response_id = response.response_id.clone();
            self.blackboard.upsert_atom(updated);

            let known_signatures = self.known_signatures(&atom);
            let diagnostics = self.compiler.compile(&source, &known_signatures).await?;

            if diagnostics.iter().any(Diagnostic::is_error) {
                let mut failed_attempt = self
                    .blackboard
                    .get_atom(atom_id)
                    .expect("atom must still exist");
                failed_attempt.last_diagnostics = diagnostics;
                failed_attempt.retry_count += 1;
                failed_attempt.status = AtomStatus::Pending;
                self.blackboard.upsert_atom(failed_attempt);
                continue;
            }

            let contract = SymbolExtractor::new(self.parser).extract(&source, atom.kind, namespace)?;
            self.register_contract(&atom, contract);

            self.workspace.write(&atom.file_path, &source).await?;
            self.blackboard
                .record_completed_file(atom_id, atom.file_path.clone());

            self.cache.put_code(atom_id, source);
            self.blackboard.set_status(atom_id, AtomStatus::Completed)?;
            info!("atom completed");
            return Ok(WorkerOutcome::Completed);
        }
    }

    /// The last declared dependency's stored response id, used as the
    /// previous-response token for an atom's first generation attempt
    /// (§6). Repairs instead chain off the atom's own prior id.
    fn last_dependency_response_id(&self, atom: &Atom) -> Option<String> {
        atom.dependencies
            .last()
            .and_then(|dep_id| self.blackboard.get_atom(dep_id))
            .and_then(|dep| dep.response_id)
    }

    fn build_prompt(&self, atom: &Atom, namespace: &str) -> String {
        let assembler = ContextAssembler::new(self.blackboard, self.cache);
        let target = TargetAtom {
            id: &atom.id,
            kind: atom.kind,
            name: &atom.name,
            layer: &atom.layer,
            file_path: &atom.file_path,
            namespace,
            dependency_ids: &atom.dependencies,
        };
        let mut prompt = assembler.assemble(&target);

        if atom.retry_count > 0 {
            prompt.push_str("\n\n# Prior attempt\n");
            if let Some(prior_source) = &atom.generated_source {
                prompt.push_str(&format!("```\n{prior_source}\n```\n"));
            }
            prompt.push_str("Diagnostics from the prior attempt:\n");
            for diag in &atom.last_diagnostics {
                prompt.push_str(&format!(
                    "- {} ({}): {} at {}:{}:{}\n",
                    diag.code,
                    format!("{:?}", diag.severity),
                    diag.message,
                    diag.file.display(),
                    diag.line,
                    diag.column,
                ));
            }
            prompt.push_str("Repair the code above minimally - do not rewrite it from scratch.\n");
        }

        prompt
    }

    fn known_signatures(&self, atom: &Atom) -> Vec<TypeSignature> {
        atom.dependencies
            .iter()
            .flat_map(|dep_id| {
                self.cache.get(dep_id).unwrap_or_else(|| {
                    self.blackboard
                        .get_atom(dep_id)
                        .and_then(|a| a.contract)
                        .map(|c| c.defined_types)
                        .unwrap_or_default()
                })
            })
            .collect()
    }

    fn register_contract(&self, atom: &Atom, contract: AtomContract) {
        self.blackboard
            .sst_register(&atom.id, contract.defined_types.clone());
        self.cache.put(atom.id.clone(), contract.defined_types.clone());

        let mut completed = self
            .blackboard
            .get_atom(&atom.id)
            .expect("atom must still exist");
        completed.contract = Some(contract);
        self.blackboard.upsert_atom(completed);
    }
}

/// Strip fenced code-block markers from an LLM response; if there is no
/// fence, use the full response trimmed (§4.6 step 3).
pub fn extract_code_block(response: &str) -> String {
    let trimmed = response.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip an optional language tag on the opening fence line.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim().to_string();
        }
        return body.trim().to_string();
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::{AtomKind, LayerPolicy, ProjectManifest, ProjectMetadata};
    use crate::llm::{LlmRetryPolicy, LlmResponse};
    use crate::parser::{ParsedMember, ParsedType, SyntaxSummary};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn extracts_fenced_code_block() {
        let response = "Here you go:\n```csharp\nclass Foo {}\n```\nDone.";
        assert_eq!(extract_code_block(response), "class Foo {}");
    }

    #[test]
    fn uses_full_response_when_unfenced() {
        let response = "  class Foo {}  ";
        assert_eq!(extract_code_block(response), "class Foo {}");
    }

    struct ScriptedProvider {
        responses: Vec<&'static str>,
        call: AtomicU32,
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let idx = self.call.fetch_add(1, Ordering::SeqCst) as usize;
            let text = self.responses[idx.min(self.responses.len() - 1)];
            Ok(LlmResponse {
                text: text.to_string(),
                response_id: Some(format!("resp-{idx}")),
            })
        }
    }

    struct AlwaysCleanCompiler;

    #[async_trait::async_trait]
    impl IsolatedCompiler for AlwaysCleanCompiler {
        async fn compile(&self, _source: &str, _known: &[TypeSignature]) -> Result<Vec<Diagnostic>> {
            Ok(Vec::new())
        }
    }

    struct FailsOnceCompiler {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl IsolatedCompiler for FailsOnceCompiler {
        async fn compile(&self, _source: &str, _known: &[TypeSignature]) -> Result<Vec<Diagnostic>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![Diagnostic {
                    severity: crate::blackboard::Severity::Error,
                    code: "CS1002".to_string(),
                    message: "expected ;".to_string(),
                    file: PathBuf::from("src/Core/data-shapes/UserDto.cs"),
                    line: 1,
                    column: 1,
                }])
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct FakeParser;

    impl SourceParser for FakeParser {
        fn parse(&self, _source: &str) -> Result<SyntaxSummary> {
            Ok(SyntaxSummary {
                types: vec![ParsedType {
                    name: "UserDto".to_string(),
                    kind: crate::blackboard::atom::TypeKind::Class,
                    members: vec![ParsedMember {
                        name: "Id".to_string(),
                        signature: "Guid Id { get; }".to_string(),
                    }],
                }],
                imports: vec![],
                referenced_names: vec![],
            })
        }
    }

    fn board() -> (Blackboard, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manifest = ProjectManifest::new(
            ProjectMetadata {
                name: "Demo".to_string(),
                root_namespace: "Demo".to_string(),
                target_framework: "net8.0".to_string(),
            },
            LayerPolicy::standard_three_layer(),
        );
        let path = dir.path().join("solution_manifest.json");
        (Blackboard::new(manifest, path), dir)
    }

    #[derive(Clone)]
    struct FakeToolchain;

    impl Toolchain for FakeToolchain {
        fn program(&self) -> &str {
            "true"
        }
        fn scaffold_solution_args(&self, name: &str) -> Vec<String> {
            vec!["new".to_string(), "sln".to_string(), "-n".to_string(), name.to_string()]
        }
        fn scaffold_library_args(&self, name: &str, _path: &std::path::Path) -> Vec<String> {
            vec!["new".to_string(), "classlib".to_string(), "-n".to_string(), name.to_string()]
        }
        fn attach_library_args(&self, _solution: &str, path: &std::path::Path) -> Vec<String> {
            vec!["sln".to_string(), "add".to_string(), path.display().to_string()]
        }
        fn build_args(&self, path: &std::path::Path) -> Vec<String> {
            vec!["build".to_string(), path.display().to_string()]
        }
        fn restore_args(&self, path: &std::path::Path) -> Vec<String> {
            vec!["restore".to_string(), path.display().to_string()]
        }
    }

    #[derive(Clone)]
    struct FakeDiagnosticParser;

    impl DiagnosticParser for FakeDiagnosticParser {
        fn parse_diagnostics(&self, _stdout: &str, _stderr: &str) -> Vec<Diagnostic> {
            Vec::new()
        }
    }

    fn workspace() -> (Workspace<FakeToolchain, FakeDiagnosticParser>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (
            Workspace::new(dir.path(), FakeToolchain, FakeDiagnosticParser).unwrap(),
            dir,
        )
    }

    #[tokio::test]
    async fn successful_compile_marks_atom_completed_and_registers_sst() {
        let (board, _dir) = board();
        board.upsert_atom(Atom::new(
            "a1",
            "UserDto",
            AtomKind::DataShape,
            "Core",
            vec![],
            PathBuf::from("src/Core/data-shapes/UserDto.cs"),
        ));

        let provider = ScriptedProvider {
            responses: vec!["```\nclass UserDto {}\n```"],
            call: AtomicU32::new(0),
        };
        let llm = RetryingLlmClient::new(provider, LlmRetryPolicy::default());
        let cache = HotCache::with_default_ttl(8);
        let compiler = AlwaysCleanCompiler;
        let parser = FakeParser;
        let (ws, _ws_dir) = workspace();
        let worker = Worker::new(&board, &ws, &cache, &llm, &compiler, &parser, 3);

        let outcome = worker.run_atom("a1", "Demo.Core").await.unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed);
        assert_eq!(board.get_atom("a1").unwrap().status, AtomStatus::Completed);
        assert_eq!(board.sst_lookup("UserDto").len(), 1);
        assert!(ws.exists("src/Core/data-shapes/UserDto.cs").await.unwrap());
        assert_eq!(
            board.manifest().completed_files.get("a1").unwrap(),
            &PathBuf::from("src/Core/data-shapes/UserDto.cs")
        );
    }

    #[tokio::test]
    async fn retries_after_compile_failure_then_succeeds() {
        let (board, _dir) = board();
        board.upsert_atom(Atom::new(
            "a1",
            "UserDto",
            AtomKind::DataShape,
            "Core",
            vec![],
            PathBuf::from("src/Core/data-shapes/UserDto.cs"),
        ));

        let provider = ScriptedProvider {
            responses: vec!["```\nclass UserDto { bad }\n```", "```\nclass UserDto {}\n```"],
            call: AtomicU32::new(0),
        };
        let llm = RetryingLlmClient::new(provider, LlmRetryPolicy::default());
        let cache = HotCache::with_default_ttl(8);
        let compiler = FailsOnceCompiler {
            calls: AtomicU32::new(0),
        };
        let parser = FakeParser;
        let (ws, _ws_dir) = workspace();
        let worker = Worker::new(&board, &ws, &cache, &llm, &compiler, &parser, 3);

        let outcome = worker.run_atom("a1", "Demo.Core").await.unwrap();
        assert_eq!(outcome, WorkerOutcome::Completed);
        assert_eq!(board.get_atom("a1").unwrap().retry_count, 1);
    }

    struct AlwaysFailsCompiler;

    #[async_trait::async_trait]
    impl IsolatedCompiler for AlwaysFailsCompiler {
        async fn compile(&self, _source: &str, _known: &[TypeSignature]) -> Result<Vec<Diagnostic>> {
            Ok(vec![Diagnostic {
                severity: crate::blackboard::Severity::Error,
                code: "CS1002".to_string(),
                message: "expected ;".to_string(),
                file: PathBuf::from("src/Core/data-shapes/UserDto.cs"),
                line: 1,
                column: 1,
            }])
        }
    }

    #[tokio::test]
    async fn exhausting_attempts_marks_atom_failed_without_erroring() {
        let (board, _dir) = board();
        board.upsert_atom(Atom::new(
            "a1",
            "UserDto",
            AtomKind::DataShape,
            "Core",
            vec![],
            PathBuf::from("src/Core/data-shapes/UserDto.cs"),
        ));

        let provider = ScriptedProvider {
            responses: vec!["```\nclass UserDto { bad }\n```"],
            call: AtomicU32::new(0),
        };
        let llm = RetryingLlmClient::new(provider, LlmRetryPolicy::default());
        let cache = HotCache::with_default_ttl(8);
        let compiler = AlwaysFailsCompiler;
        let parser = FakeParser;
        let (ws, _ws_dir) = workspace();
        let worker = Worker::new(&board, &ws, &cache, &llm, &compiler, &parser, 2);

        let outcome = worker.run_atom("a1", "Demo.Core").await.unwrap();
        assert_eq!(outcome, WorkerOutcome::Failed);
        assert_eq!(board.get_atom("a1").unwrap().status, AtomStatus::Failed);
    }

    struct CapturingProvider {
        seen_previous_response_id: std::sync::Arc<std::sync::Mutex<Option<Option<String>>>>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for CapturingProvider {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            *self.seen_previous_response_id.lock().unwrap() = Some(request.previous_response_id);
            Ok(LlmResponse {
                text: "```\nclass FileUserRepository {}\n```".to_string(),
                response_id: Some("resp-dependent".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn first_generation_chains_off_the_last_dependencys_response_id() {
        let (board, _dir) = board();
        let mut dep = Atom::new(
            "a1",
            "UserDto",
            AtomKind::DataShape,
            "Core",
            vec![],
            PathBuf::from("src/Core/data-shapes/UserDto.cs"),
        );
        dep.status = AtomStatus::Completed;
        dep.response_id = Some("resp-a1".to_string());
        board.upsert_atom(dep);
        board.upsert_atom(Atom::new(
            "a2",
            "FileUserRepository",
            AtomKind::Implementation,
            "Infrastructure",
            vec!["a1".to_string()],
            PathBuf::from("src/Infrastructure/implementations/FileUserRepository.cs"),
        ));

        let seen_previous_response_id = std::sync::Arc::new(std::sync::Mutex::new(None));
        let provider = CapturingProvider {
            seen_previous_response_id: seen_previous_response_id.clone(),
        };
        let llm = RetryingLlmClient::new(provider, LlmRetryPolicy::default());
        let cache = HotCache::with_default_ttl(8);
        let compiler = AlwaysCleanCompiler;
        let parser = FakeParser;
        let (ws, _ws_dir) = workspace();
        let worker = Worker::new(&board, &ws, &cache, &llm, &compiler, &parser, 3);

        worker.run_atom("a2", "Demo.Infrastructure").await.unwrap();

        let seen = seen_previous_response_id.lock().unwrap().clone().unwrap();
        assert_eq!(seen, Some("resp-a1".to_string()));
    }
}
