//! Service port allocation.

use std::net::TcpListener;

use crate::config::HostPort;

/// Ask the kernel for a free port on the listen host (bind-and-close),
/// falling back to `1` prepended to the listen port as a decimal string
/// (listen 3000 → service 13000).
#[must_use]
pub fn allocate(listen: &HostPort) -> u16 {
    TcpListener::bind((listen.dial_host(), 0))
        .ok()
        .and_then(|listener| listener.local_addr().ok())
        .map_or_else(|| fallback(listen.port), |addr| addr.port())
}

fn fallback(listen_port: u16) -> u16 {
    // Ports high enough that the prepend overflows u16 can't be dialed
    // anyway; saturating keeps the failure visible at connect time.
    format!("1{listen_port}").parse().unwrap_or(u16::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_returns_usable_port() {
        let listen: HostPort = "localhost:3000".parse().unwrap();
        let port = allocate(&listen);
        assert_ne!(port, 0);
        // The port was released by the probe; binding it again must work.
        TcpListener::bind(("localhost", port)).unwrap();
    }

    #[test]
    fn test_fallback_prepends_one() {
        assert_eq!(fallback(3000), 13000);
        assert_eq!(fallback(80), 180);
    }

    #[test]
    fn test_fallback_saturates_on_overflow() {
        assert_eq!(fallback(65000), u16::MAX);
    }
}
