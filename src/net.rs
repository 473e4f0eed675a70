//! Selection of free node ports

use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Returns the first port in `range` which is not in use on `host`.
///
/// A port counts as used if a connection to it succeeds. On the local host
/// it must additionally be possible to bind it.
pub fn next_free_port(host: &str, range: RangeInclusive<u16>) -> Result<u16> {
    let local = host == "localhost" || host == "127.0.0.1";
    for port in range.clone() {
        if is_listening(host, port) {
            debug!(host, port, "Port is in use");
            continue;
        }
        if local && TcpListener::bind(("127.0.0.1", port)).is_err() {
            debug!(host, port, "Port cannot be bound");
            continue;
        }
        return Ok(port);
    }
    Err(anyhow!(
        "No free port in {}..={} on [{}]",
        range.start(),
        range.end(),
        host
    ))
}

fn is_listening(host: &str, port: u16) -> bool {
    match (host, port).to_socket_addrs() {
        Ok(mut addresses) => addresses
            .any(|address| TcpStream::connect_timeout(&address, CONNECT_TIMEOUT).is_ok()),
        Err(_) => false,
    }
}
