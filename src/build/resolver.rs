//! Resolving dependency identifiers to watchable directories.

use std::path::PathBuf;

use tokio::process::Command;

use super::gomod::{self, GoModule};
use crate::error::ToolingError;
use crate::Result;

/// Result of resolving one dependency identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The identifier's source lives here; watch it.
    Dir(PathBuf),
    /// Standard library or otherwise toolchain-internal; never watched.
    Skip,
}

/// Maps dependency identifiers to directories.
///
/// The mode is chosen once at startup: module-aware when the working tree
/// is inside a Go module, classic (GOPATH) otherwise. The two are mutually
/// exclusive for a given run.
#[derive(Debug)]
pub enum DepResolver {
    Module(GoModule),
    Classic,
}

impl DepResolver {
    /// Inspect the working tree and pick the resolution mode.
    ///
    /// # Errors
    ///
    /// Fails if the toolchain cannot be queried or the module declaration
    /// is unparseable.
    pub async fn discover() -> Result<Self> {
        match gomod::discover().await? {
            Some(module) => {
                tracing::debug!(module = %module.name, "module-aware dependency resolution");
                Ok(Self::Module(module))
            }
            None => {
                tracing::debug!("classic (GOPATH) dependency resolution");
                Ok(Self::Classic)
            }
        }
    }

    /// Resolve one identifier.
    ///
    /// # Errors
    ///
    /// Classic-mode lookup failures for user-supplied packages are fatal to
    /// the controller and surface here.
    pub async fn resolve(&self, ident: &str) -> Result<Resolution> {
        match self {
            Self::Module(module) => Ok(resolve_in_module(module, ident)),
            Self::Classic => resolve_classic(ident).await,
        }
    }
}

fn resolve_in_module(module: &GoModule, ident: &str) -> Resolution {
    // The target package itself is commonly named by a filesystem path
    // ("." or "./cmd/app"); those don't carry the module prefix.
    if ident == "." || ident.starts_with("./") || ident.starts_with("../") {
        return Resolution::Dir(PathBuf::from(ident));
    }

    // Local replacements win over the module prefix.
    for (prefix, replacement) in &module.replacements {
        if let Some(suffix) = ident.strip_prefix(prefix.as_str()) {
            return Resolution::Dir(PathBuf::from(format!("{replacement}{suffix}")));
        }
    }

    if let Some(suffix) = ident.strip_prefix(module.name.as_str()) {
        return Resolution::Dir(PathBuf::from(format!(
            "{}{}",
            module.dir.display(),
            suffix
        )));
    }

    // Outside the module: a dependency in the module cache, not edited
    // by the developer.
    Resolution::Skip
}

async fn resolve_classic(ident: &str) -> Result<Resolution> {
    let output = Command::new("go")
        .args(["list", "-find", "-f", "{{.Goroot}}\t{{.Dir}}"])
        .arg(ident)
        .output()
        .await
        .map_err(|source| ToolingError::Spawn {
            command: "go list".to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolingError::Resolve {
            ident: ident.to_string(),
            output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }

    let text = String::from_utf8_lossy(&output.stdout);
    let line = text.trim();
    let Some((goroot, dir)) = line.split_once('\t') else {
        return Err(ToolingError::Resolve {
            ident: ident.to_string(),
            output: format!("unexpected go list output: {line:?}"),
        }
        .into());
    };

    if goroot == "true" {
        Ok(Resolution::Skip)
    } else {
        Ok(Resolution::Dir(PathBuf::from(dir)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> GoModule {
        GoModule {
            name: "github.com/acme/app".to_string(),
            dir: PathBuf::from("/work/app"),
            replacements: vec![("github.com/acme/lib".to_string(), "../lib".to_string())],
        }
    }

    #[test]
    fn test_module_prefix_maps_to_subdirectory() {
        let resolution = resolve_in_module(&module(), "github.com/acme/app/internal/db");
        assert_eq!(
            resolution,
            Resolution::Dir(PathBuf::from("/work/app/internal/db"))
        );
    }

    #[test]
    fn test_module_root_maps_to_module_dir() {
        let resolution = resolve_in_module(&module(), "github.com/acme/app");
        assert_eq!(resolution, Resolution::Dir(PathBuf::from("/work/app")));
    }

    #[test]
    fn test_replacement_wins_over_module_prefix() {
        let resolution = resolve_in_module(&module(), "github.com/acme/lib/util");
        assert_eq!(resolution, Resolution::Dir(PathBuf::from("../lib/util")));
    }

    #[test]
    fn test_relative_target_package() {
        assert_eq!(
            resolve_in_module(&module(), "."),
            Resolution::Dir(PathBuf::from("."))
        );
        assert_eq!(
            resolve_in_module(&module(), "./cmd/app"),
            Resolution::Dir(PathBuf::from("./cmd/app"))
        );
    }

    #[test]
    fn test_external_dependency_skipped() {
        assert_eq!(
            resolve_in_module(&module(), "golang.org/x/sync/errgroup"),
            Resolution::Skip
        );
        assert_eq!(resolve_in_module(&module(), "fmt"), Resolution::Skip);
    }
}
