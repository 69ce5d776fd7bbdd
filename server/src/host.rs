//! Host bootstrap: port selection and connection details for sharing

use log::{debug, info};
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::ops::RangeInclusive;
use tokio::net::TcpListener;

/// Binds the first free port in `ports`.
pub async fn bind_in_range(host: &str, ports: RangeInclusive<u16>) -> io::Result<TcpListener> {
    let mut last_error = None;

    for port in ports.clone() {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                info!("Bound {}:{}", host, port);
                return Ok(listener);
            }
            Err(e) => {
                debug!("Port {} unavailable: {}", port, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("Empty port range {:?}", ports),
        )
    }))
}

/// Best-effort LAN address. Connecting a UDP socket sends nothing; it only
/// makes the OS pick the outbound interface.
pub fn local_ip() -> IpAddr {
    let discover = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    discover().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// What the host shares out-of-band so others can join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAnnouncement {
    pub ip: IpAddr,
    pub port: u16,
    pub token: String,
}

impl HostAnnouncement {
    pub fn new(bound: SocketAddr, token: &str) -> Self {
        let ip = if bound.ip().is_unspecified() {
            local_ip()
        } else {
            bound.ip()
        };
        Self {
            ip,
            port: bound.port(),
            token: token.to_string(),
        }
    }
}

impl fmt::Display for HostAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hosting on {}:{} with token {}",
            self.ip, self.port, self.token
        )
    }
}
