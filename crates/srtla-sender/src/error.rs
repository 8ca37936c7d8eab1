//! Control-plane error types.
//!
//! Sockets are externally owned until a link is fully installed, so every
//! rejection path hands the socket back to the caller instead of dropping
//! it.

use std::io;
use std::net::UdpSocket;
use thiserror::Error;

/// Errors reported synchronously by `Engine::start`. No engine state
/// exists after any of these.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("cannot resolve server address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        source: io::Error,
    },
    #[error("no IPv4 address found for {host}")]
    NoIpv4 { host: String },
    #[error("cannot bind encoder listener on port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("cannot spawn engine thread: {0}")]
    Spawn(io::Error),
}

impl StartError {
    /// Whether retrying the bind later may succeed (port still held by a
    /// lingering socket).
    pub fn is_bind_contention(&self) -> bool {
        matches!(
            self,
            StartError::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse
        )
    }
}

/// `add_link` rejection. The caller's socket rides back inside the error
/// whenever it can.
#[derive(Debug, Error)]
pub enum AddLinkError {
    #[error("virtual IP {virtual_ip} is already enrolled and live")]
    DuplicateVirtualIp {
        virtual_ip: String,
        socket: UdpSocket,
    },
    #[error("link socket rejected: {source}")]
    InvalidSocket { source: io::Error, socket: UdpSocket },
    #[error("engine is stopped")]
    Stopped { socket: UdpSocket },
    /// The engine went away mid-install and the socket with it.
    #[error("engine terminated while installing the link")]
    Terminated,
}

impl AddLinkError {
    /// Recover the socket that was offered to `add_link`, when the engine
    /// still had it to give back.
    pub fn into_socket(self) -> Option<UdpSocket> {
        match self {
            AddLinkError::DuplicateVirtualIp { socket, .. }
            | AddLinkError::InvalidSocket { socket, .. }
            | AddLinkError::Stopped { socket } => Some(socket),
            AddLinkError::Terminated => None,
        }
    }
}

/// `remove_link` refusal. No state changes on any of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RemoveLinkError {
    #[error("removing {virtual_ip} would leave no connected links")]
    LastConnectedLink { virtual_ip: String },
    #[error("no live link with virtual IP {virtual_ip}")]
    UnknownLink { virtual_ip: String },
    #[error("engine is stopped")]
    Stopped,
}
