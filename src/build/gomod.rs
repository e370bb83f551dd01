//! Minimal go.mod parsing.
//!
//! Only the two pieces dependency resolution needs: the module path, and
//! the `replace` directives whose right-hand side is a relative on-disk
//! path. Everything else in the file is ignored.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::error::ToolingError;
use crate::Result;

/// The module declaration of the working tree, when it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoModule {
    /// Module path from the `module` directive.
    pub name: String,
    /// Directory containing the go.mod file.
    pub dir: PathBuf,
    /// `replace` directives mapping an import-path prefix to a relative
    /// filesystem path. Version-to-version replaces are not directories
    /// and are excluded.
    pub replacements: Vec<(String, String)>,
}

/// Locate and parse the module governing the current directory.
///
/// Returns `Ok(None)` outside of any module (classic GOPATH mode).
///
/// # Errors
///
/// Fails if `go env` cannot run, exits nonzero, or the go.mod file is
/// unreadable or has no module directive.
pub async fn discover() -> Result<Option<GoModule>> {
    let output = Command::new("go")
        .args(["env", "GOMOD"])
        .output()
        .await
        .map_err(|source| ToolingError::Spawn {
            command: "go env".to_string(),
            source,
        })?;

    if !output.status.success() {
        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        return Err(ToolingError::Query {
            command: "go env".to_string(),
            output: String::from_utf8_lossy(&combined).trim().to_string(),
        }
        .into());
    }

    let gomod_path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if gomod_path.is_empty() || gomod_path == "/dev/null" || gomod_path == "NUL" {
        return Ok(None);
    }

    let path = PathBuf::from(&gomod_path);
    let contents = tokio::fs::read_to_string(&path).await?;
    parse(&path, &contents).map(Some)
}

/// Parse go.mod contents. `path` is only used for error reporting and to
/// derive the module directory.
///
/// # Errors
///
/// Fails if the file has no `module` directive.
pub fn parse(path: &Path, contents: &str) -> Result<GoModule> {
    let mut name = None;
    let mut replacements = Vec::new();
    let mut in_replace_block = false;

    for raw in contents.lines() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        if in_replace_block {
            if line == ")" {
                in_replace_block = false;
            } else if let Some(replace) = parse_replace(line) {
                replacements.push(replace);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("module ") {
            name = Some(unquote(rest.trim()).to_string());
        } else if line == "replace (" {
            in_replace_block = true;
        } else if let Some(rest) = line.strip_prefix("replace ") {
            if let Some(replace) = parse_replace(rest.trim()) {
                replacements.push(replace);
            }
        }
    }

    let Some(name) = name else {
        return Err(ToolingError::GoMod {
            path: path.to_path_buf(),
            reason: "missing module directive".to_string(),
        }
        .into());
    };

    Ok(GoModule {
        name,
        dir: path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf(),
        replacements,
    })
}

/// Parse one replace directive body: `old [version] => new [version]`.
/// Only `new` forms that are a relative directory are kept.
fn parse_replace(line: &str) -> Option<(String, String)> {
    let (lhs, rhs) = line.split_once("=>")?;
    let old = lhs.split_whitespace().next()?;
    let mut rhs_tokens = rhs.split_whitespace();
    let new = unquote(rhs_tokens.next()?);
    // A replacement with a version is a module, not a directory.
    if rhs_tokens.next().is_some() {
        return None;
    }
    if new.starts_with("./") || new.starts_with("../") {
        Some((unquote(old).to_string(), new.to_string()))
    } else {
        None
    }
}

fn strip_comment(line: &str) -> &str {
    line.split_once("//").map_or(line, |(code, _)| code)
}

fn unquote(token: &str) -> &str {
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(contents: &str) -> GoModule {
        parse(Path::new("/work/app/go.mod"), contents).unwrap()
    }

    #[test]
    fn test_module_name() {
        let module = parse_ok("module github.com/acme/app\n\ngo 1.21\n");
        assert_eq!(module.name, "github.com/acme/app");
        assert_eq!(module.dir, PathBuf::from("/work/app"));
        assert!(module.replacements.is_empty());
    }

    #[test]
    fn test_quoted_module_name() {
        let module = parse_ok("module \"github.com/acme/app\"\n");
        assert_eq!(module.name, "github.com/acme/app");
    }

    #[test]
    fn test_single_replace() {
        let module = parse_ok(
            "module github.com/acme/app\nreplace github.com/acme/lib => ../lib\n",
        );
        assert_eq!(
            module.replacements,
            vec![("github.com/acme/lib".to_string(), "../lib".to_string())]
        );
    }

    #[test]
    fn test_replace_block() {
        let module = parse_ok(
            "module github.com/acme/app\nreplace (\n\tgithub.com/acme/lib => ./lib\n\tgithub.com/acme/other v1.0.0 => github.com/fork/other v1.1.0\n)\n",
        );
        assert_eq!(
            module.replacements,
            vec![("github.com/acme/lib".to_string(), "./lib".to_string())]
        );
    }

    #[test]
    fn test_replace_to_module_version_skipped() {
        let module = parse_ok(
            "module github.com/acme/app\nreplace github.com/a/b => github.com/c/d v1.2.3\n",
        );
        assert!(module.replacements.is_empty());
    }

    #[test]
    fn test_comments_stripped() {
        let module = parse_ok(
            "// the app\nmodule github.com/acme/app // main module\nreplace github.com/acme/lib => ./lib // local\n",
        );
        assert_eq!(module.name, "github.com/acme/app");
        assert_eq!(module.replacements.len(), 1);
    }

    #[test]
    fn test_missing_module_directive() {
        let err = parse(Path::new("/work/app/go.mod"), "go 1.21\n").unwrap_err();
        assert!(err.to_string().contains("missing module directive"));
    }
}
