//! Drives `Orchestrator::run` through a plan where two Infrastructure
//! atoms each declare a type with the same fully-qualified name and
//! disjoint members - the Merge-As-Partial path (§4.7) - and confirms
//! only the later-ranked atom is regenerated.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use apfc::{
    AtomStatus, CompilationMode, Diagnostic, DiagnosticParser, IsolatedCompiler, LlmProvider,
    LlmRequest, LlmResponse, LlmRetryPolicy, Orchestrator, ParsedMember, ParsedType,
    PassthroughClarification, Result, RetryingLlmClient, RunConfig, SourceParser, SyntaxSummary,
    Toolchain, TypeKind, TypeSignature, Workspace,
};
use std::path::Path;

#[derive(Clone)]
struct NoopToolchain;

impl Toolchain for NoopToolchain {
    fn program(&self) -> &str {
        "true"
    }
    fn scaffold_solution_args(&self, name: &str) -> Vec<String> {
        vec!["new".to_string(), "sln".to_string(), "-n".to_string(), name.to_string()]
    }
    fn scaffold_library_args(&self, name: &str, _path: &Path) -> Vec<String> {
        vec!["new".to_string(), "classlib".to_string(), "-n".to_string(), name.to_string()]
    }
    fn attach_library_args(&self, _solution: &str, path: &Path) -> Vec<String> {
        vec!["sln".to_string(), "add".to_string(), path.display().to_string()]
    }
    fn build_args(&self, path: &Path) -> Vec<String> {
        vec!["build".to_string(), path.display().to_string()]
    }
    fn restore_args(&self, path: &Path) -> Vec<String> {
        vec!["restore".to_string(), path.display().to_string()]
    }
}

#[derive(Clone)]
struct NoopDiagnosticParser;

impl DiagnosticParser for NoopDiagnosticParser {
    fn parse_diagnostics(&self, _stdout: &str, _stderr: &str) -> Vec<Diagnostic> {
        Vec::new()
    }
}

struct AlwaysCleanCompiler;

#[async_trait::async_trait]
impl IsolatedCompiler for AlwaysCleanCompiler {
    async fn compile(&self, _source: &str, _known: &[TypeSignature]) -> Result<Vec<Diagnostic>> {
        Ok(Vec::new())
    }
}

/// Derives type identity from markers embedded in the generated source
/// text rather than from the atom that produced it - the Symbol Extractor
/// only ever sees source, never an atom id, so the fixture has to carry
/// the distinguishing signal the same way a real parser would: in the
/// code itself.
struct MarkerParser;

impl SourceParser for MarkerParser {
    fn parse(&self, source: &str) -> Result<SyntaxSummary> {
        if source.contains("interface IAuditTrail") {
            return Ok(SyntaxSummary {
                types: vec![ParsedType {
                    name: "IAuditTrail".to_string(),
                    kind: TypeKind::Interface,
                    members: vec![],
                }],
                imports: vec![],
                referenced_names: vec![],
            });
        }

        let member = if source.contains("/*MemberId*/") {
            ParsedMember {
                name: "Id".to_string(),
                signature: "int Id".to_string(),
            }
        } else if source.contains("/*MemberTimestamp*/") {
            ParsedMember {
                name: "Timestamp".to_string(),
                signature: "DateTime Timestamp".to_string(),
            }
        } else {
            panic!("fixture source carries no recognized marker: {source}");
        };

        Ok(SyntaxSummary {
            types: vec![ParsedType {
                name: "AuditEntry".to_string(),
                kind: TypeKind::Class,
                members: vec![member],
            }],
            imports: vec![],
            referenced_names: vec!["IAuditTrail".to_string()],
        })
    }
}

/// Routes the planning call to a fixed plan and every atom-generation
/// call to a canned declaration keyed by the `Atom: <id> (` marker the
/// Context Assembler's Target tier always renders, counting how many
/// times each atom's generation prompt was served.
struct ScriptedProvider {
    plan_json: String,
    calls_a1: Arc<AtomicU32>,
    calls_a2: Arc<AtomicU32>,
    calls_a3: Arc<AtomicU32>,
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let text = if request.prompt.contains("Decompose this request") {
            self.plan_json.clone()
        } else if request.prompt.contains("Atom: a1 (") {
            self.calls_a1.fetch_add(1, Ordering::SeqCst);
            "```\npublic interface IAuditTrail {}\n```".to_string()
        } else if request.prompt.contains("Atom: a2 (") {
            self.calls_a2.fetch_add(1, Ordering::SeqCst);
            "```\npublic class AuditEntry { /*MemberId*/ public int Id; }\n```".to_string()
        } else if request.prompt.contains("Atom: a3 (") {
            self.calls_a3.fetch_add(1, Ordering::SeqCst);
            "```\npublic class AuditEntry { /*MemberTimestamp*/ public System.DateTime Timestamp; }\n```"
                .to_string()
        } else {
            panic!("unexpected prompt, no atom marker found: {}", request.prompt);
        };
        Ok(LlmResponse {
            text,
            response_id: None,
        })
    }
}

#[tokio::test]
async fn two_implementations_sharing_a_type_name_merge_as_partial_and_only_the_loser_regenerates() {
    let plan_json = serde_json::json!({
        "atoms": [
            {"id": "a1", "name": "IAuditTrail", "kind": "interface", "layer": "Core", "dependencies": []},
            {"id": "a2", "name": "InMemoryAuditTrail", "kind": "implementation", "layer": "Infrastructure", "dependencies": ["a1"]},
            {"id": "a3", "name": "FileAuditTrail", "kind": "implementation", "layer": "Infrastructure", "dependencies": ["a1"]},
        ]
    })
    .to_string();

    let calls_a1 = Arc::new(AtomicU32::new(0));
    let calls_a2 = Arc::new(AtomicU32::new(0));
    let calls_a3 = Arc::new(AtomicU32::new(0));

    let dir = tempfile::tempdir().unwrap();
    let workspace = Workspace::new(dir.path(), NoopToolchain, NoopDiagnosticParser).unwrap();
    let llm = RetryingLlmClient::new(
        ScriptedProvider {
            plan_json,
            calls_a1: calls_a1.clone(),
            calls_a2: calls_a2.clone(),
            calls_a3: calls_a3.clone(),
        },
        LlmRetryPolicy::default(),
    );
    let orchestrator = Orchestrator::new(
        RunConfig {
            workspace_root: dir.path().to_path_buf(),
            compilation_mode: CompilationMode::AtomOnly,
            ..Default::default()
        },
        workspace,
        llm,
        AlwaysCleanCompiler,
        MarkerParser,
        PassthroughClarification,
        "Demo",
    );

    let result = orchestrator
        .run("an audit trail interface with an in-memory and a file-backed recorder")
        .await
        .unwrap();

    assert!(result.success, "expected a clean run: {result:?}");
    assert_eq!(result.atom_statuses["a1"], AtomStatus::Completed);
    assert_eq!(result.atom_statuses["a2"], AtomStatus::Completed);
    assert_eq!(result.atom_statuses["a3"], AtomStatus::Completed);

    assert_eq!(calls_a1.load(Ordering::SeqCst), 1, "a1 has no conflict and runs once");
    assert_eq!(calls_a2.load(Ordering::SeqCst), 1, "a2 is first-ranked and keeps its declaration");
    assert_eq!(
        calls_a3.load(Ordering::SeqCst),
        2,
        "a3 is second-ranked and must be regenerated as a partial contribution"
    );
}
