//! Error types and Result aliases for lrt.
//!
//! This module defines the error hierarchy used throughout the crate, plus
//! the hint text attached to fatal errors. Recoverable conditions (compile
//! errors, boot failures) are not errors here; they travel through the
//! gate as 502 bodies. Everything in this module is either a configuration
//! problem or a fatal runtime failure.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using lrt's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lrt operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration/startup validation error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The proxy could not bind its listen address.
    #[error("{source}")]
    ListenBind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// File watching error.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// The Go toolchain (or the service binary) could not be driven.
    #[error(transparent)]
    Tooling(#[from] ToolingError),

    /// I/O error.
    #[error("{0}")]
    Io(#[from] io::Error),
}

/// Configuration and argument-resolution errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A host:port flag did not parse.
    #[error("{flag} is invalid. Expected something like \"localhost:3000\" or \":3000\". See lrt --help for details")]
    InvalidAddress { flag: &'static str, value: String },

    /// The health-check flag is not a valid URL.
    #[error("--health-check {value:?} is not a valid url. See lrt --help for details")]
    InvalidHealthCheck { value: String },

    /// The health-check URL points at a different host than the service.
    #[error("--health-check {value:?} is not relative to --service {service:?}. See lrt --help for details")]
    HealthCheckNotRelative { value: String, service: String },

    /// A shell-quoted argument string did not parse.
    #[error("{flag} could not be parsed: {reason}")]
    InvalidArgs { flag: &'static str, reason: String },

    /// The target package does not exist.
    #[error("cannot find package {package:?}")]
    PackageNotFound {
        package: String,
        /// Whether the package string names an existing filesystem path,
        /// which usually means the user meant a relative import.
        path_exists: bool,
    },

    /// The target package is not `package main`.
    #[error("{package:?} does not contain package \"main\"")]
    NotMainPackage { package: String },

    /// `go list` failed for a reason other than a missing package.
    #[error("{output}")]
    PackageLookup { package: String, output: String },

    /// The temporary executable path could not be created.
    #[error("failed to create temporary file: {0}")]
    TempFile(#[source] io::Error),
}

/// File watcher errors.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The notify backend could not be initialized.
    #[error("failed to initialize file watcher: {0}")]
    Init(#[source] notify::Error),

    /// A directory subscription failed.
    #[error("failed to watch {path:?}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The event stream reported an unrecoverable backend error.
    #[error("file watcher error: {0}")]
    Backend(#[source] notify::Error),
}

/// Failures driving external commands: the Go toolchain or the built service.
#[derive(Error, Debug)]
pub enum ToolingError {
    /// The command could not be spawned at all.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// The command was killed by a signal before producing an exit code.
    #[error("{command} terminated by signal")]
    Terminated { command: String },

    /// A toolchain query (`go list`, `go env`) exited nonzero.
    #[error("{output}")]
    Query { command: String, output: String },

    /// The module declaration could not be parsed.
    #[error("failed to parse {path:?}: {reason}")]
    GoMod { path: PathBuf, reason: String },

    /// A dependency identifier could not be resolved to a directory.
    #[error("cannot resolve package {ident:?}: {output}")]
    Resolve { ident: String, output: String },

    /// The freshly built service executable could not be started.
    #[error("failed to start service: {0}")]
    StartService(#[source] io::Error),
}

impl Error {
    /// Hint lines printed under the error on the fatal path, if any.
    ///
    /// The first line is rendered after `hint:`; subsequent lines are
    /// indented continuations.
    #[must_use]
    pub fn hint(&self) -> Vec<String> {
        match self {
            Self::ListenBind { address, source }
                if source.kind() == io::ErrorKind::AddrInUse =>
            {
                let port = address.rsplit(':').next().unwrap_or(address);
                vec![
                    "Are you already running a development server somewhere else?".to_string(),
                    format!("if so try `lsof -i:{port}` to find the process id"),
                ]
            }
            Self::Watch(err) if is_fd_exhaustion(err) => vec![
                "you may need to raise the per-process open file limit, try:".to_string(),
                "ulimit -n 1048576".to_string(),
            ],
            Self::Config(ConfigError::PackageNotFound {
                package,
                path_exists: true,
            }) => {
                let mut lines = vec![
                    "go packages are specified by import path, e.g. \"github.com/acme/app\""
                        .to_string(),
                    "to use a relative directory start with ./, e.g. \"./cmd/app\"".to_string(),
                ];
                if package.ends_with(".go") {
                    lines.push("running individual go files is not supported.".to_string());
                }
                lines
            }
            _ => Vec::new(),
        }
    }
}

fn is_fd_exhaustion(err: &WatchError) -> bool {
    let text = match err {
        WatchError::Init(e) | WatchError::Backend(e) => e.to_string(),
        WatchError::Subscribe { source, .. } => source.to_string(),
    };
    text.contains("too many open files") || text.contains("Too many open files")
}

/// Print a fatal error (with hints) to stderr and exit with code 1.
///
/// Fatal errors are meant to be loud: the developer should notice
/// immediately rather than discover a wedged proxy later.
pub fn fatal(err: &Error) -> ! {
    eprintln!("lrt: {err}");
    let mut hints = err.hint().into_iter();
    if let Some(first) = hints.next() {
        eprintln!("     hint: {first}");
        for line in hints {
            eprintln!("           {line}");
        }
    }
    std::process::exit(1);
}
