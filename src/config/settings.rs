//! Configuration resolution and validation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::Result;

/// A `host:port` pair as accepted by `--listen` and `--service`.
///
/// The host may be empty (`":3000"`), which means "all interfaces" for
/// binding and "localhost" for connecting, matching the usual interpretation
/// of such addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    /// Address string suitable for binding a listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        if self.host.is_empty() {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Authority string suitable for building a URL that connects here.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.is_empty() {
            format!("localhost:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The host to dial, never empty.
    #[must_use]
    pub fn dial_host(&self) -> &str {
        if self.host.is_empty() {
            "localhost"
        } else {
            &self.host
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Bracketed IPv6 literals keep their colons inside the brackets.
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, rest) = rest.split_once(']').ok_or(())?;
            let port = rest.strip_prefix(':').ok_or(())?;
            (host, port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or(())?;
            if host.contains(':') {
                return Err(());
            }
            (host, port)
        };
        let port: u16 = port.parse().map_err(|_| ())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Raw flag values as collected by clap, before validation.
#[derive(Debug, Clone)]
pub struct RawConfig {
    pub listen: String,
    pub service: Option<String>,
    pub build_args: String,
    pub cmd_args: String,
    pub health_check: String,
    pub health_check_timeout: Duration,
    pub package: String,
}

/// Resolved, immutable configuration.
#[derive(Debug)]
pub struct Config {
    /// Where the proxy accepts connections.
    pub listen: HostPort,
    /// Where the service listens, when pinned with `--service`. `None`
    /// means an ephemeral port is drawn for every generation.
    pub service: Option<HostPort>,
    /// Health probe path, always beginning with `/`.
    pub health_path: String,
    /// Maximum wait for the first 2xx from a freshly started service.
    pub health_timeout: Duration,
    /// The Go package to build and supervise.
    pub package: String,
    /// Extra arguments appended to `go build`.
    pub build_args: Vec<String>,
    /// Extra arguments appended to the service invocation.
    pub cmd_args: Vec<String>,
    /// Where `go build -o` writes the service executable.
    pub exe_path: PathBuf,
}

impl RawConfig {
    /// Validate the raw values and produce the immutable [`Config`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for malformed addresses, a health-check URL
    /// that does not resolve relative to the service address, unparseable
    /// shell-quoted argument strings, or a temp-file creation failure.
    pub fn resolve(self) -> Result<Config> {
        let listen: HostPort = self
            .listen
            .parse()
            .map_err(|()| ConfigError::InvalidAddress {
                flag: "--listen",
                value: self.listen.clone(),
            })?;

        let service = match &self.service {
            None => None,
            Some(value) => Some(value.parse().map_err(|()| ConfigError::InvalidAddress {
                flag: "--service",
                value: value.clone(),
            })?),
        };

        let health_path = resolve_health_path(&self.health_check, service.as_ref())?;

        let build_args =
            shell_words::split(&self.build_args).map_err(|e| ConfigError::InvalidArgs {
                flag: "--build-args",
                reason: e.to_string(),
            })?;
        let cmd_args = shell_words::split(&self.cmd_args).map_err(|e| ConfigError::InvalidArgs {
            flag: "--cmd-args",
            reason: e.to_string(),
        })?;

        let exe_path = create_exe_path()?;

        Ok(Config {
            listen,
            service,
            health_path,
            health_timeout: self.health_check_timeout,
            package: self.package,
            build_args,
            cmd_args,
            exe_path,
        })
    }
}

impl Config {
    /// The absolute health probe URL for a given service authority.
    #[must_use]
    pub fn health_url(&self, authority: &str) -> String {
        format!("http://{}{}", authority, self.health_path)
    }
}

/// Normalize `--health-check` to a path, rejecting URLs that do not resolve
/// relative to the service address.
fn resolve_health_path(value: &str, service: Option<&HostPort>) -> Result<String> {
    if let Some(rest) = value
        .strip_prefix("http://")
        .or_else(|| value.strip_prefix("https://"))
    {
        // An absolute URL is only acceptable if it targets the pinned
        // service address exactly; an ephemeral service can never match.
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let matches_service = service.is_some_and(|s| authority == s.authority());
        if !matches_service {
            return Err(ConfigError::HealthCheckNotRelative {
                value: value.to_string(),
                service: service.map(|s| s.to_string()).unwrap_or_default(),
            }
            .into());
        }
        return Ok(format!("/{path}"));
    }

    if value.contains("://") {
        return Err(ConfigError::InvalidHealthCheck {
            value: value.to_string(),
        }
        .into());
    }

    if value.starts_with('/') {
        Ok(value.to_string())
    } else {
        Ok(format!("/{value}"))
    }
}

/// Create the temporary path the service executable is built into.
fn create_exe_path() -> Result<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("lrt-service")
        .tempfile()
        .map_err(ConfigError::TempFile)?;
    let path = file
        .into_temp_path()
        .keep()
        .map_err(|e| ConfigError::TempFile(e.error))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> RawConfig {
        RawConfig {
            listen: "localhost:3000".to_string(),
            service: None,
            build_args: String::new(),
            cmd_args: String::new(),
            health_check: "/".to_string(),
            health_check_timeout: Duration::from_secs(10),
            package: ".".to_string(),
        }
    }

    #[test]
    fn test_host_port_parse() {
        let hp: HostPort = "localhost:3000".parse().unwrap();
        assert_eq!(hp.host, "localhost");
        assert_eq!(hp.port, 3000);
    }

    #[test]
    fn test_host_port_parse_empty_host() {
        let hp: HostPort = ":3000".parse().unwrap();
        assert_eq!(hp.host, "");
        assert_eq!(hp.bind_addr(), "0.0.0.0:3000");
        assert_eq!(hp.authority(), "localhost:3000");
    }

    #[test]
    fn test_host_port_parse_ipv6() {
        let hp: HostPort = "[::1]:8080".parse().unwrap();
        assert_eq!(hp.host, "::1");
        assert_eq!(hp.port, 8080);
    }

    #[test]
    fn test_host_port_rejects_garbage() {
        assert!("localhost".parse::<HostPort>().is_err());
        assert!("localhost:notaport".parse::<HostPort>().is_err());
        assert!("::1:8080".parse::<HostPort>().is_err());
    }

    #[test]
    fn test_resolve_defaults() {
        let config = raw().resolve().unwrap();
        assert_eq!(config.listen.port, 3000);
        assert!(config.service.is_none());
        assert_eq!(config.health_path, "/");
        assert_eq!(config.package, ".");
        assert!(config.build_args.is_empty());
        std::fs::remove_file(&config.exe_path).ok();
    }

    #[test]
    fn test_resolve_invalid_listen() {
        let mut r = raw();
        r.listen = "nonsense".to_string();
        let err = r.resolve().unwrap_err();
        assert!(err.to_string().contains("--listen"));
    }

    #[test]
    fn test_health_path_normalized() {
        assert_eq!(resolve_health_path("healthz", None).unwrap(), "/healthz");
        assert_eq!(resolve_health_path("/healthz", None).unwrap(), "/healthz");
    }

    #[test]
    fn test_health_url_absolute_must_match_service() {
        let service: HostPort = "localhost:9999".parse().unwrap();
        let ok = resolve_health_path("http://localhost:9999/healthz", Some(&service)).unwrap();
        assert_eq!(ok, "/healthz");

        let err =
            resolve_health_path("http://otherhost:9999/healthz", Some(&service)).unwrap_err();
        assert!(err.to_string().contains("not relative"));

        // With an auto-assigned service port, no absolute URL can match.
        let err = resolve_health_path("http://localhost:9999/healthz", None).unwrap_err();
        assert!(err.to_string().contains("not relative"));
    }

    #[test]
    fn test_build_args_shell_quoting() {
        let mut r = raw();
        r.build_args = "-tags 'foo bar' -race".to_string();
        let config = r.resolve().unwrap();
        assert_eq!(config.build_args, vec!["-tags", "foo bar", "-race"]);
        std::fs::remove_file(&config.exe_path).ok();
    }

    #[test]
    fn test_build_args_unbalanced_quote() {
        let mut r = raw();
        r.build_args = "-tags 'foo".to_string();
        let err = r.resolve().unwrap_err();
        assert!(err.to_string().contains("--build-args"));
    }

    #[test]
    fn test_health_url_for_authority() {
        let config = raw().resolve().unwrap();
        assert_eq!(config.health_url("localhost:1234"), "http://localhost:1234/");
        std::fs::remove_file(&config.exe_path).ok();
    }
}
