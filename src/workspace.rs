//! The Workspace: a sandboxed file-system facade rooted at a canonical
//! directory, plus the external toolchain invocation it serializes.
//!
//! Every path this module hands back or accepts is resolved to absolute
//! form and checked against the canonical root *after* normalization -
//! `canonicalize()` alone is not enough for paths that do not yet exist
//! (a not-yet-written atom source file), so non-existent components are
//! normalized lexically before the prefix check.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::blackboard::diagnostic::Diagnostic;
use crate::error::{Error, Result};
use crate::toolchain::{DiagnosticParser, Toolchain};

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());

/// Validate a solution/project/library name against the injection-safe
/// pattern required before it ever reaches a shelled-out command.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(Error::WorkspaceSecurity(format!(
            "name `{name}` must match [A-Za-z0-9_.-]+"
        )))
    }
}

/// Result of an external build or restore invocation.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn error_diagnostics(&self) -> Vec<&Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error()).collect()
    }
}

/// Sandboxed facade over one run's workspace directory and its toolchain.
pub struct Workspace<T: Toolchain, P: DiagnosticParser> {
    root: PathBuf,
    toolchain: T,
    parser: P,
}

impl<T: Toolchain, P: DiagnosticParser> Workspace<T, P> {
    /// Create a facade rooted at `root`. `root` must already exist; the
    /// caller is responsible for creating the run's directory.
    pub fn new(root: impl Into<PathBuf>, toolchain: T, parser: P) -> Result<Self> {
        let root = root.into();
        let canonical = root
            .canonicalize()
            .map_err(|e| Error::WorkspaceSecurity(format!("workspace root `{root:?}`: {e}")))?;
        Ok(Self {
            root: canonical,
            toolchain,
            parser,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `rel` against the root and reject anything that would
    /// escape it. `rel` may name a file that does not yet exist, so this
    /// normalizes lexically rather than requiring the path to resolve on
    /// disk first.
    pub fn resolve(&self, rel: impl AsRef<Path>) -> Result<PathBuf> {
        let candidate = self.root.join(rel.as_ref());
        let normalized = normalize_lexically(&candidate);
        if normalized.starts_with(&self.root) {
            Ok(normalized)
        } else {
            Err(Error::WorkspaceSecurity(format!(
                "path `{:?}` escapes workspace root `{:?}`",
                rel.as_ref(),
                self.root
            )))
        }
    }

    pub async fn exists(&self, rel: impl AsRef<Path>) -> Result<bool> {
        let path = self.resolve(rel)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    pub async fn read(&self, rel: impl AsRef<Path>) -> Result<String> {
        let path = self.resolve(rel)?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    pub async fn write(&self, rel: impl AsRef<Path>, contents: &str) -> Result<()> {
        let path = self.resolve(rel)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn scaffold_solution(&self, name: &str) -> Result<BuildResult> {
        validate_name(name)?;
        self.run_toolchain(&self.toolchain.scaffold_solution_args(name))
            .await
    }

    #[instrument(skip(self))]
    pub async fn scaffold_library(&self, name: &str, rel_path: impl AsRef<Path>) -> Result<BuildResult> {
        validate_name(name)?;
        let path = self.resolve(rel_path)?;
        self.run_toolchain(&self.toolchain.scaffold_library_args(name, &path))
            .await
    }

    #[instrument(skip(self))]
    pub async fn attach_library(&self, solution: &str, project_path: impl AsRef<Path>) -> Result<BuildResult> {
        validate_name(solution)?;
        let path = self.resolve(project_path)?;
        self.run_toolchain(&self.toolchain.attach_library_args(solution, &path))
            .await
    }

    /// Build the whole solution, serialized: the external toolchain is
    /// invoked one process at a time per the shared-resource policy.
    #[instrument(skip(self))]
    pub async fn build_project(&self, rel_path: impl AsRef<Path>) -> Result<BuildResult> {
        let path = self.resolve(rel_path)?;
        self.run_toolchain(&self.toolchain.build_args(&path)).await
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, rel_path: impl AsRef<Path>) -> Result<BuildResult> {
        let path = self.resolve(rel_path)?;
        self.run_toolchain(&self.toolchain.restore_args(&path)).await
    }

    async fn run_toolchain(&self, args: &[String]) -> Result<BuildResult> {
        debug!(?args, "invoking toolchain");
        let program = self.toolchain.program();
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Toolchain(format!("failed to start `{program}`: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let diagnostics = self.parser.parse_diagnostics(&stdout, &stderr);

        Ok(BuildResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
            diagnostics,
        })
    }
}

/// Lexically normalize `..`/`.` components without touching the
/// filesystem - `Path::canonicalize` requires the path to exist, which a
/// not-yet-written atom source file does not.
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::DiagnosticParser as _;

    struct FakeToolchain;

    impl Toolchain for FakeToolchain {
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

    struct FakeParser;

    impl DiagnosticParser for FakeParser {
        fn parse_diagnostics(&self, _stdout: &str, _stderr: &str) -> Vec<Diagnostic> {
            Vec::new()
        }
    }

    fn workspace() -> (Workspace<FakeToolchain, FakeParser>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (
            Workspace::new(dir.path(), FakeToolchain, FakeParser).unwrap(),
            dir,
        )
    }

    #[test]
    fn valid_names_pass() {
        assert!(validate_name("MyProject.Core").is_ok());
        assert!(validate_name("lib_2").is_ok());
    }

    #[test]
    fn names_with_shell_metacharacters_are_rejected() {
        assert!(validate_name("foo; rm -rf /").is_err());
        assert!(validate_name("../escape").is_err());
        assert!(validate_name("foo bar").is_err());
    }

    #[test]
    fn resolve_rejects_escape_above_root() {
        let (ws, _dir) = workspace();
        let err = ws.resolve("../outside").unwrap_err();
        assert!(matches!(err, Error::WorkspaceSecurity(_)));
    }

    #[test]
    fn resolve_accepts_nested_nonexistent_path() {
        let (ws, _dir) = workspace();
        let resolved = ws.resolve("src/Core/data-shapes/UserDto.cs").unwrap();
        assert!(resolved.starts_with(ws.root()));
    }

    #[test]
    fn resolve_rejects_dotdot_that_climbs_past_root_even_when_nested() {
        let (ws, _dir) = workspace();
        let err = ws.resolve("src/../../outside").unwrap_err();
        assert!(matches!(err, Error::WorkspaceSecurity(_)));
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let (ws, _dir) = workspace();
        ws.write("src/Core/data-shapes/UserDto.cs", "class UserDto {}")
            .await
            .unwrap();
        assert!(ws.exists("src/Core/data-shapes/UserDto.cs").await.unwrap());
        let contents = ws.read("src/Core/data-shapes/UserDto.cs").await.unwrap();
        assert_eq!(contents, "class UserDto {}");
    }

    #[tokio::test]
    async fn build_project_runs_toolchain_and_reports_success() {
        let (ws, _dir) = workspace();
        ws.write("demo.sln", "").await.unwrap();
        let result = ws.build_project("demo.sln").await.unwrap();
        assert!(result.succeeded());
    }
}
