//! Child process lifecycle.
//!
//! The supervisor owns the running service: it launches the freshly built
//! executable with `PORT` set, probes it until it answers its health check,
//! and stops it with SIGTERM escalating to SIGKILL. Every child gets a
//! reaper task whose handle is kept until drained, which is how the
//! controller guarantees no two generations ever hold the service port at
//! the same time.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Uri};
use http_body_util::Empty;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::ToolingError;
use crate::Result;

/// How long a stopped child gets to exit before SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Outcome of waiting for a freshly started service to become healthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boot {
    /// The health check answered 2xx.
    Ready,
    /// The child exited before ever answering.
    Exited,
    /// The health-check timeout elapsed first.
    TimedOut,
}

struct RunningService {
    pid: Option<Pid>,
    exited: watch::Receiver<bool>,
}

/// Owns the child service process across generations.
pub struct Supervisor {
    client: Client<HttpConnector, Empty<Bytes>>,
    current: Option<RunningService>,
    reapers: Vec<JoinHandle<()>>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            current: None,
            reapers: Vec::new(),
        }
    }

    /// Launch the service executable.
    ///
    /// The child gets `PORT` in its environment, no stdin, and the parent's
    /// stdout/stderr so the developer sees service logs directly. Returns as
    /// soon as the spawn succeeds; readiness is [`Supervisor::wait_healthy`]'s
    /// concern.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolingError`] if the executable cannot be spawned.
    #[allow(clippy::cast_possible_wrap)]
    pub fn start(&mut self, executable: &Path, args: &[String], port: u16) -> Result<()> {
        let mut child = Command::new(executable)
            .args(args)
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(ToolingError::StartService)?;

        let pid = child.id().map(|id| Pid::from_raw(id as i32));
        let (exit_tx, exited) = watch::channel(false);
        let reaper = tokio::spawn(async move {
            let _ = child.wait().await;
            let _ = exit_tx.send(true);
        });

        self.reapers.push(reaper);
        self.current = Some(RunningService { pid, exited });
        tracing::debug!(port, "service started");
        Ok(())
    }

    /// Wait for the current child to answer its health check.
    ///
    /// Races three futures: a probe loop issuing GETs to `url` (any 2xx
    /// wins; each failed attempt retries immediately, the only pacing being
    /// the round-trip itself), the child-exit notification, and the
    /// timeout. Whichever resolves first decides; the losers are dropped.
    pub async fn wait_healthy(&self, url: &Uri, timeout: Duration) -> Boot {
        let Some(service) = &self.current else {
            return Boot::Exited;
        };
        let mut exited = service.exited.clone();

        let probe = async {
            loop {
                let request = Request::builder()
                    .method(Method::GET)
                    .uri(url.clone())
                    .body(Empty::<Bytes>::new());
                let Ok(request) = request else { continue };
                match self.client.request(request).await {
                    Ok(response) if response.status().is_success() => break,
                    _ => {}
                }
            }
        };

        tokio::select! {
            () = probe => Boot::Ready,
            _ = exited.changed() => Boot::Exited,
            () = tokio::time::sleep(timeout) => Boot::TimedOut,
        }
    }

    /// Begin stopping the current child: SIGTERM now, SIGKILL if it is
    /// still alive after [`STOP_GRACE`].
    ///
    /// Returns immediately; the rebuild overlaps with the old child's
    /// shutdown, and [`Supervisor::drain`] synchronizes before the next
    /// start.
    pub fn stop(&mut self) {
        let Some(service) = self.current.take() else {
            return;
        };
        let Some(pid) = service.pid else {
            return;
        };

        let _ = kill(pid, Signal::SIGTERM);

        let mut exited = service.exited.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = exited.changed() => {}
                () = tokio::time::sleep(STOP_GRACE) => {
                    let _ = kill(pid, Signal::SIGKILL);
                }
            }
        });
    }

    /// Wait until every previously started child has been reaped.
    pub async fn drain(&mut self) {
        for reaper in self.reapers.drain(..) {
            let _ = reaper.await;
        }
    }
}
