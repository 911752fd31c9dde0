//! Process-unique consumer names.

use crate::config::IdentityConfig;
use crate::error::{Error, Result};

use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::OnceLock;

use tracing::info;

static CONSUMER_NAME: OnceLock<String> = OnceLock::new();

// Connecting a UDP socket sends nothing; it only selects the outbound interface.
const ROUTE_TARGET: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// Formats a consumer name as `host@pid`.
#[must_use]
pub fn format_consumer_name(host_ip: IpAddr, pid: u32) -> String {
    format!("{host_ip}@{pid}")
}

/// Returns this process's consumer name, computing it on first use.
///
/// The first successful call fixes the name for the lifetime of the process;
/// later calls return the cached value whatever `config` says.
///
/// # Errors
///
/// Returns [`Error::Identity`] if no host address is configured and none can
/// be discovered. Callers treat this as fatal.
pub fn consumer_name(config: &IdentityConfig) -> Result<&'static str> {
    if let Some(name) = CONSUMER_NAME.get() {
        return Ok(name);
    }

    let host_ip = match config.host_ip {
        Some(ip) => ip,
        None => resolve_host_ip().map_err(Error::Identity)?,
    };
    let name = format_consumer_name(host_ip, std::process::id());

    let name = CONSUMER_NAME.get_or_init(|| name);
    info!(consumer = %name, "resolved consumer identity");

    Ok(name)
}

fn resolve_host_ip() -> io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(ROUTE_TARGET)?;
    let ip = socket.local_addr()?.ip();

    if ip.is_unspecified() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no routable local address",
        ));
    }

    Ok(ip)
}
