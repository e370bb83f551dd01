//! The build driver.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;

use super::deps::split_dep_lines;
use crate::config::Config;
use crate::error::{ConfigError, ToolingError};
use crate::Result;

/// Outcome of one build attempt. Both variants are recoverable; anything
/// fatal (missing toolchain, signal) is the `Err` channel of [`Builder::build`].
#[derive(Debug)]
pub enum BuildOutcome {
    /// The executable was written to the configured output path. `deps`
    /// holds the dependency identifiers the verbose build reported, which is
    /// only the packages that actually recompiled, not the full graph.
    Success { deps: Vec<String> },
    /// The compiler rejected the source. The diagnostics are served as the
    /// 502 body until the next rebuild.
    Failure { diagnostics: Vec<u8> },
}

/// Drives `go build` and `go list` for the target package.
#[derive(Debug)]
pub struct Builder {
    package: String,
    extra_args: Vec<String>,
    output_path: PathBuf,
}

impl Builder {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            package: config.package.clone(),
            extra_args: config.build_args.clone(),
            output_path: config.exe_path.clone(),
        }
    }

    /// Build the target package into the temporary executable path.
    ///
    /// The verbose flag makes the toolchain print the identifiers of every
    /// recompiled dependency; noise lines in that output are echoed to
    /// stderr unchanged.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolingError`] if the build tool cannot be spawned or is
    /// killed by a signal. Compiler diagnostics are *not* errors.
    pub async fn build(&self) -> Result<BuildOutcome> {
        let output = Command::new("go")
            .arg("build")
            .args(&self.extra_args)
            .arg("-o")
            .arg(&self.output_path)
            .arg("-v")
            .arg(&self.package)
            .output()
            .await
            .map_err(|source| ToolingError::Spawn {
                command: "go build".to_string(),
                source,
            })?;

        let combined = combine(&output);

        if output.status.success() {
            let lines = split_dep_lines(&combined);
            echo_noise(&lines.noise);
            return Ok(BuildOutcome::Success { deps: lines.deps });
        }

        if output.status.code().is_none() {
            // Killed by a signal: not a compile error the developer caused.
            return Err(ToolingError::Terminated {
                command: "go build".to_string(),
            }
            .into());
        }

        Ok(BuildOutcome::Failure {
            diagnostics: combined,
        })
    }

    /// List the full transitive dependency set of the target package.
    ///
    /// Needed on first build and after a failed build, since incremental
    /// builds only report recompiled packages.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal to the controller.
    pub async fn list_all_deps(&self) -> Result<Vec<String>> {
        let output = Command::new("go")
            .args(["list", "-f", "{{ join .Deps \"\\n\" }}"])
            .arg(&self.package)
            .output()
            .await
            .map_err(|source| ToolingError::Spawn {
                command: "go list".to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ToolingError::Query {
                command: "go list".to_string(),
                output: String::from_utf8_lossy(&combine(&output)).trim().to_string(),
            }
            .into());
        }

        let lines = split_dep_lines(&combine(&output));
        echo_noise(&lines.noise);
        Ok(lines.deps)
    }
}

/// Check at startup that the target names a buildable `package main`.
///
/// # Errors
///
/// Returns the cannot-find-package or not-package-main configuration errors
/// with their hints.
pub async fn verify_main_package(package: &str) -> Result<()> {
    let output = Command::new("go")
        .args(["list", "-f", "{{.Name}}"])
        .arg(package)
        .output()
        .await
        .map_err(|source| ToolingError::Spawn {
            command: "go list".to_string(),
            source,
        })?;

    if !output.status.success() {
        let text = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if looks_like_missing_package(&text) {
            return Err(ConfigError::PackageNotFound {
                package: package.to_string(),
                path_exists: Path::new(package).exists(),
            }
            .into());
        }
        return Err(ConfigError::PackageLookup {
            package: package.to_string(),
            output: text,
        }
        .into());
    }

    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name != "main" {
        return Err(ConfigError::NotMainPackage {
            package: package.to_string(),
        }
        .into());
    }
    Ok(())
}

fn looks_like_missing_package(stderr: &str) -> bool {
    stderr.contains("cannot find package")
        || stderr.contains("no required module provides package")
        || stderr.contains("is not in std")
        || stderr.contains("directory not found")
        || stderr.contains("no such file or directory")
}

/// Interleave order is lost, but everything both streams said is kept:
/// dependency identifiers and diagnostics each survive parsing intact.
fn combine(output: &Output) -> Vec<u8> {
    let mut combined = output.stdout.clone();
    combined.extend_from_slice(&output.stderr);
    combined
}

fn echo_noise(noise: &[String]) {
    let mut stderr = std::io::stderr().lock();
    for line in noise {
        let _ = writeln!(stderr, "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_missing_package() {
        assert!(looks_like_missing_package(
            "package ./nope: cannot find package \"./nope\""
        ));
        assert!(looks_like_missing_package(
            "no required module provides package github.com/acme/gone"
        ));
        assert!(!looks_like_missing_package(
            "go: updates to go.mod needed; to update it: go mod tidy"
        ));
    }

    #[test]
    fn test_combine_keeps_both_streams() {
        use std::os::unix::process::ExitStatusExt;

        let output = Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
        };
        assert_eq!(combine(&output), b"outerr".to_vec());
    }
}
