//! The reload controller.
//!
//! Owns every piece of mutable lifecycle state and orchestrates the rest of
//! the crate: change signals from the watcher are debounced into rebuild
//! runs; a rebuild holds the gate exclusive while it stops the old child,
//! drives `go build`, grows the watch set, starts the new child, and
//! health-probes it; failures along the way become the 502 body served by
//! the proxy until the next rebuild. At most one rebuild sequence is active
//! at any instant: the debouncer awaits each run to completion and the
//! gate serializes against the request path.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

use crate::build::{self, BuildOutcome, Builder, DepResolver, Resolution};
use crate::config::{Config, HostPort};
use crate::error::{self, ConfigError, WatchError};
use crate::proxy::{self, Backend, Gate, ProxyState, ServiceStatus};
use crate::service::{self, Boot, Supervisor};
use crate::watcher::{Debouncer, SourceWatcher, WatchSignal, DEBOUNCE_INTERVAL};
use crate::{Error, Result};

/// The reload controller. One per process; handlers and background tasks
/// share it through an `Arc`.
pub struct Controller {
    config: Config,
    gate: Gate,
    builder: Builder,
    resolver: DepResolver,
    supervisor: AsyncMutex<Supervisor>,
    watcher: parking_lot::Mutex<SourceWatcher>,
}

impl Controller {
    /// Verify the target package, pick the dependency-resolution mode, and
    /// assemble the controller. Returns the watch-signal receiver alongside
    /// it; [`Controller::run`] consumes the receiver.
    ///
    /// # Errors
    ///
    /// Fails on an unbuildable target package, an unusable toolchain, or a
    /// watcher backend that cannot be initialized.
    pub async fn new(
        config: Config,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<WatchSignal>)> {
        build::verify_main_package(&config.package).await?;
        let resolver = DepResolver::discover().await?;

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let watcher = SourceWatcher::new(signals_tx)?;
        let builder = Builder::new(&config);

        let controller = Arc::new(Self {
            config,
            gate: Gate::new(),
            builder,
            resolver,
            supervisor: AsyncMutex::new(Supervisor::new()),
            watcher: parking_lot::Mutex::new(watcher),
        });
        Ok((controller, signals_rx))
    }

    /// Bind the listen address and run until a shutdown signal arrives.
    ///
    /// Spawns the shutdown waiter, the debounced rebuilder (triggered once
    /// immediately for the initial build), and the watch-signal pump, then
    /// serves the proxy.
    ///
    /// # Errors
    ///
    /// Fails if the listen address cannot be bound or the accept loop dies.
    pub async fn run(
        self: Arc<Self>,
        mut signals: mpsc::UnboundedReceiver<WatchSignal>,
    ) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen.bind_addr())
            .await
            .map_err(|source| Error::ListenBind {
                address: self.config.listen.to_string(),
                source,
            })?;
        tracing::info!(listen = %self.config.listen, "lrt listening");

        let controller = Arc::clone(&self);
        tokio::spawn(async move {
            shutdown_signal().await;
            controller.shutdown().await;
        });

        let controller = Arc::clone(&self);
        let debouncer = Debouncer::new(DEBOUNCE_INTERVAL, move || {
            let controller = Arc::clone(&controller);
            async move {
                controller.rebuild().await;
            }
        });
        debouncer.trigger();

        tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                match signal {
                    WatchSignal::Changed(path) => {
                        tracing::debug!(path = %path.display(), "source change");
                        debouncer.trigger();
                    }
                    WatchSignal::Error(err) => {
                        error::fatal(&WatchError::Backend(err).into());
                    }
                }
            }
        });

        proxy::serve(listener, Arc::new(ProxyState::new(self.gate.clone()))).await
    }

    /// Run one rebuild sequence. Recoverable failures end up in the gate's
    /// error response; fatal classes terminate the process.
    async fn rebuild(&self) {
        if let Err(err) = self.try_rebuild().await {
            error::fatal(&err);
        }
    }

    async fn try_rebuild(&self) -> Result<()> {
        let mut state = self.gate.exclusive().await;

        if state.built_once {
            tracing::info!("rebuilding...");
        }
        state.status = ServiceStatus::Building;

        // `go build -v` only names packages that actually recompiled. On the
        // first run, and after a failed build (which reports nothing), the
        // full dependency graph is listed and watched explicitly.
        if !state.built_once || state.error_response.is_some() {
            self.watch_ident(&self.config.package).await?;
            for ident in self.builder.list_all_deps().await? {
                self.watch_ident(&ident).await?;
            }
        }

        state.built_once = true;
        state.error_response = None;

        self.supervisor.lock().await.stop();

        let deps = match self.builder.build().await? {
            BuildOutcome::Failure { diagnostics } => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(&diagnostics);
                let _ = stdout.flush();
                drop(stdout);

                state.error_response = Some(Bytes::from(diagnostics));
                state.status = ServiceStatus::Failed;
                return Ok(());
            }
            BuildOutcome::Success { deps } => deps,
        };

        for ident in &deps {
            self.watch_ident(ident).await?;
        }

        let service = self.service_address();
        let health_url: Uri = self
            .config
            .health_url(&service.authority())
            .parse()
            .map_err(|_| ConfigError::InvalidHealthCheck {
                value: self.config.health_path.clone(),
            })?;

        let mut supervisor = self.supervisor.lock().await;

        // The previous child must be fully reaped before the new one
        // starts: two generations must never hold the service port at once.
        supervisor.drain().await;

        supervisor.start(&self.config.exe_path, &self.config.cmd_args, service.port)?;
        state.status = ServiceStatus::Starting;

        match supervisor
            .wait_healthy(&health_url, self.config.health_timeout)
            .await
        {
            Boot::Ready => {
                let generation = state.next_generation();
                state.backend = Some(Backend {
                    generation,
                    authority: service.authority(),
                });
                state.status = ServiceStatus::Ready;
                tracing::info!(generation, authority = %service.authority(), "service ready");
            }
            Boot::Exited => {
                let body = boot_exit_body(&health_url);
                eprint!("{}", String::from_utf8_lossy(&body));
                state.error_response = Some(Bytes::from(body));
                state.status = ServiceStatus::Failed;
            }
            Boot::TimedOut => {
                let body = boot_timeout_body(&health_url, self.config.health_timeout);
                eprint!("{}", String::from_utf8_lossy(&body));
                state.error_response = Some(Bytes::from(body));
                state.status = ServiceStatus::Failed;
            }
        }

        Ok(())
    }

    /// The address the next generation will listen on. Pinned via
    /// `--service`, or freshly drawn for every rebuild.
    fn service_address(&self) -> HostPort {
        match &self.config.service {
            Some(pinned) => pinned.clone(),
            None => HostPort {
                host: self.config.listen.host.clone(),
                port: service::allocate(&self.config.listen),
            },
        }
    }

    /// Resolve one dependency identifier and add its directory to the
    /// watch set. Skips toolchain-internal packages.
    async fn watch_ident(&self, ident: &str) -> Result<()> {
        match self.resolver.resolve(ident).await? {
            Resolution::Dir(dir) => self.watcher.lock().watch(&dir),
            Resolution::Skip => Ok(()),
        }
    }

    /// Graceful shutdown: wait out in-flight requests, stop and reap the
    /// child, remove the temp executable, exit 0.
    async fn shutdown(&self) {
        tracing::info!("shutting down");
        let mut state = self.gate.exclusive().await;
        state.status = ServiceStatus::Stopping;

        let mut supervisor = self.supervisor.lock().await;
        supervisor.stop();
        supervisor.drain().await;

        std::fs::remove_file(&self.config.exe_path).ok();
        std::process::exit(0);
    }
}

/// Resolves when SIGTERM (Unix) or Ctrl+C arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn boot_exit_body(health_url: &Uri) -> Vec<u8> {
    format!(
        "lrt: error: service unexpectedly exited before responding to {health_url}\n     hint: check the terminal output to see if any errors were logged.\n"
    )
    .into_bytes()
}

fn boot_timeout_body(health_url: &Uri, timeout: Duration) -> Vec<u8> {
    format!(
        "lrt: error: service is still not responding on {health_url} after {}\n     hint: ensure your service listens on $PORT. For example: http.ListenAndServe(\"localhost:\" + os.Getenv(\"PORT\"), nil)\n           also, check the terminal output to see if any errors were logged.\n",
        format_duration(timeout)
    )
    .into_bytes()
}

/// Format a duration the way Go's `time.Duration` prints itself, which is
/// how the timeout appears in the boot-timeout response.
fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let nanos = d.as_nanos();
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    #[allow(clippy::cast_precision_loss)]
    if nanos < 1_000_000 {
        return format!("{}\u{b5}s", trim_zeros(format!("{:.3}", nanos as f64 / 1e3)));
    }
    #[allow(clippy::cast_precision_loss)]
    if nanos < 1_000_000_000 {
        return format!("{}ms", trim_zeros(format!("{:.6}", nanos as f64 / 1e6)));
    }

    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    #[allow(clippy::cast_precision_loss)]
    let secs = (total_secs % 60) as f64 + f64::from(d.subsec_nanos()) / 1e9;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&trim_zeros(format!("{secs:.9}")));
    out.push('s');
    out
}

fn trim_zeros(s: String) -> String {
    if !s.contains('.') {
        return s;
    }
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_whole_seconds() {
        assert_eq!(format_duration(Duration::from_secs(10)), "10s");
        assert_eq!(format_duration(Duration::from_secs(1)), "1s");
    }

    #[test]
    fn test_format_duration_millis() {
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::from_micros(1500)), "1.5ms");
    }

    #[test]
    fn test_format_duration_micros() {
        assert_eq!(format_duration(Duration::from_micros(100)), "100\u{b5}s");
    }

    #[test]
    fn test_format_duration_fractional_seconds() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }

    #[test]
    fn test_format_duration_minutes_and_hours() {
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3605)), "1h0m5s");
    }

    #[test]
    fn test_format_duration_zero() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }

    #[test]
    fn test_boot_exit_body_exact() {
        let url: Uri = "http://localhost:13000/".parse().unwrap();
        let body = String::from_utf8(boot_exit_body(&url)).unwrap();
        assert_eq!(
            body,
            "lrt: error: service unexpectedly exited before responding to http://localhost:13000/\n     hint: check the terminal output to see if any errors were logged.\n"
        );
    }

    #[test]
    fn test_boot_timeout_body_exact() {
        let url: Uri = "http://localhost:13000/healthz".parse().unwrap();
        let body =
            String::from_utf8(boot_timeout_body(&url, Duration::from_millis(500))).unwrap();
        assert_eq!(
            body,
            "lrt: error: service is still not responding on http://localhost:13000/healthz after 500ms\n     hint: ensure your service listens on $PORT. For example: http.ListenAndServe(\"localhost:\" + os.Getenv(\"PORT\"), nil)\n           also, check the terminal output to see if any errors were logged.\n"
        );
    }
}
