//! lrt binary entry point.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

use std::time::Duration;

use clap::Parser;
use lrt::config::RawConfig;
use lrt::controller::Controller;
use lrt::observability::init_tracing;

/// lrt wraps a Go HTTP service and reloads it whenever the source changes.
///
/// lrt proxies requests to your service, holding them while a rebuild is in
/// progress so the service always appears live, and ensuring requests never
/// hit an old version of the code. Your service is booted with a PORT
/// environment variable set and should start an HTTP server on that port.
#[derive(Parser, Debug)]
#[command(name = "lrt")]
#[command(version)]
#[command(about = "Live-reloading reverse proxy for Go HTTP services")]
struct Cli {
    /// Where lrt should listen
    #[arg(long, env = "LRT_LISTEN", default_value = "localhost:3000")]
    listen: String,

    /// Where your service listens (if it does not listen on $PORT)
    #[arg(long, env = "LRT_SERVICE")]
    service: Option<String>,

    /// Extra flags to pass to go build
    #[arg(long, default_value = "")]
    build_args: String,

    /// Extra flags to pass to the service executable
    #[arg(long, default_value = "")]
    cmd_args: String,

    /// The path lrt pings to check your service has started
    #[arg(long, default_value = "/")]
    health_check: String,

    /// How long to wait for the service to boot before assuming it errored
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    health_check_timeout: Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LRT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, env = "LRT_LOG_JSON")]
    log_json: bool,

    /// The go package to build
    #[arg(value_name = "PACKAGE", default_value = ".")]
    package: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    if let Err(err) = run(cli).await {
        lrt::error::fatal(&err);
    }
}

async fn run(cli: Cli) -> lrt::Result<()> {
    let config = RawConfig {
        listen: cli.listen,
        service: cli.service,
        build_args: cli.build_args,
        cmd_args: cli.cmd_args,
        health_check: cli.health_check,
        health_check_timeout: cli.health_check_timeout,
        package: cli.package,
    }
    .resolve()?;

    let (controller, signals) = Controller::new(config).await?;
    controller.run(signals).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["lrt"]).unwrap();
        assert_eq!(cli.listen, "localhost:3000");
        assert!(cli.service.is_none());
        assert_eq!(cli.health_check, "/");
        assert_eq!(cli.health_check_timeout, Duration::from_secs(10));
        assert_eq!(cli.package, ".");
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "lrt",
            "--listen",
            ":4000",
            "--service",
            "localhost:9999",
            "--health-check",
            "/healthz",
            "--health-check-timeout",
            "500ms",
            "--cmd-args",
            "-override-port 9999",
            "./cmd/app",
        ])
        .unwrap();
        assert_eq!(cli.listen, ":4000");
        assert_eq!(cli.service.as_deref(), Some("localhost:9999"));
        assert_eq!(cli.health_check, "/healthz");
        assert_eq!(cli.health_check_timeout, Duration::from_millis(500));
        assert_eq!(cli.cmd_args, "-override-port 9999");
        assert_eq!(cli.package, "./cmd/app");
    }

    #[test]
    fn test_cli_rejects_unknown_flag() {
        assert!(Cli::try_parse_from(["lrt", "--bogus"]).is_err());
    }
}
