//! Collaborator traits for the external compiler/toolchain (§6).
//!
//! The Workspace shells out to whatever toolchain the target language
//! uses; this crate stays language-agnostic by depending only on these
//! traits. A concrete implementation (e.g. `dotnet build`) lives outside
//! this crate's scope - the examples below exist to exercise the
//! Workspace's own logic.

use std::path::Path;

use crate::blackboard::diagnostic::Diagnostic;

/// Builds the argv for each Workspace operation and names the program to
/// invoke. Implementations never execute anything themselves - the
/// Workspace owns process spawning so it can serialize invocations.
pub trait Toolchain: Send + Sync {
    fn program(&self) -> &str;
    fn scaffold_solution_args(&self, name: &str) -> Vec<String>;
    fn scaffold_library_args(&self, name: &str, path: &Path) -> Vec<String>;
    fn attach_library_args(&self, solution: &str, project_path: &Path) -> Vec<String>;
    fn build_args(&self, path: &Path) -> Vec<String>;
    fn restore_args(&self, path: &Path) -> Vec<String>;
}

/// Shapes a toolchain's raw stdout/stderr into the Diagnostic record of
/// §3. Implementations are language-specific; the regex path forbidden
/// elsewhere in this crate (conflict detection) does not apply here since
/// this is exactly the toolchain's own structured diagnostic format, not
/// ad hoc syntax scraping.
pub trait DiagnosticParser: Send + Sync {
    fn parse_diagnostics(&self, stdout: &str, stderr: &str) -> Vec<Diagnostic>;
}

/// A toolchain that drives the .NET CLI, the convention the rest of this
/// crate's path formulas (`.sln`, `.csproj`) assume.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotnetToolchain;

impl Toolchain for DotnetToolchain {
    fn program(&self) -> &str {
        "dotnet"
    }

    fn scaffold_solution_args(&self, name: &str) -> Vec<String> {
        vec!["new".into(), "sln".into(), "-n".into(), name.into()]
    }

    fn scaffold_library_args(&self, name: &str, path: &Path) -> Vec<String> {
        vec![
            "new".into(),
            "classlib".into(),
            "-n".into(),
            name.into(),
            "-o".into(),
            path.display().to_string(),
        ]
    }

    fn attach_library_args(&self, solution: &str, project_path: &Path) -> Vec<String> {
        vec![
            "sln".into(),
            format!("{solution}.sln"),
            "add".into(),
            project_path.display().to_string(),
        ]
    }

    fn build_args(&self, path: &Path) -> Vec<String> {
        vec![
            "build".into(),
            path.display().to_string(),
            "--nologo".into(),
        ]
    }

    fn restore_args(&self, path: &Path) -> Vec<String> {
        vec!["restore".into(), path.display().to_string()]
    }
}

/// Parses `dotnet build` console output for `file(line,col): error CODE:
/// message` / `warning CODE:` lines, the MSBuild diagnostic format.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotnetDiagnosticParser;

impl DiagnosticParser for DotnetDiagnosticParser {
    fn parse_diagnostics(&self, stdout: &str, stderr: &str) -> Vec<Diagnostic> {
        stdout
            .lines()
            .chain(stderr.lines())
            .filter_map(parse_msbuild_line)
            .collect()
    }
}

fn parse_msbuild_line(line: &str) -> Option<Diagnostic> {
    use crate::blackboard::diagnostic::Severity;

    let (location, rest) = line.split_once(": ")?;
    let (file_part, pos_part) = location.rsplit_once('(')?;
    let pos_part = pos_part.strip_suffix(')')?;
    let (line_no, col_no) = pos_part.split_once(',')?;

    let (severity, rest) = if let Some(r) = rest.strip_prefix("error ") {
        (Severity::Error, r)
    } else if let Some(r) = rest.strip_prefix("warning ") {
        (Severity::Warning, r)
    } else {
        return None;
    };

    let (code, message) = rest.split_once(": ")?;

    Some(Diagnostic {
        severity,
        code: code.to_string(),
        message: message.to_string(),
        file: file_part.trim().into(),
        line: line_no.trim().parse().ok()?,
        column: col_no.trim().parse().ok()?,
    })
}
