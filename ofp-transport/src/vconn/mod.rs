//! Virtual connection abstraction: a uniform open/poll/recv/send surface
//! over concrete transports, dispatched by URL scheme.

pub mod tcp;

use std::os::fd::RawFd;

use bitflags::bitflags;

use crate::buffer::Buffer;
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};

bitflags! {
    /// What the caller is interested in for the next poll iteration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Want: u8 {
        const RECV = 0b001;
        const SEND = 0b010;
        const ACCEPT = 0b100;
    }
}

bitflags! {
    /// Readiness bits, shared between the request passed to `prepoll` and
    /// the OS-reported readiness passed to `postpoll`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Revents: u8 {
        const POLLIN = 0b0001;
        const POLLOUT = 0b0010;
        const POLLERR = 0b0100;
        const POLLHUP = 0b1000;
    }
}

/// Output of [`Vconn::prepoll`]: which fd/events the caller should poll
/// on, and whether the implementation already has work ready (in which
/// case the caller may skip the actual `poll()` syscall this iteration).
#[derive(Debug, Clone, Copy)]
pub struct PrePoll {
    pub fd: RawFd,
    pub events: Revents,
    pub already_ready: bool,
}

/// A transport-agnostic connection or listener handle.
///
/// Implementations that don't support a given operation (e.g. `recv` on a
/// passive listener, or `accept` on an active connection) return a
/// [`TransportError::Protocol`] rather than panicking.
pub trait Vconn: Send {
    fn prepoll(&mut self, want: Want) -> Result<PrePoll>;
    fn postpoll(&mut self, revents: Revents) -> Result<()>;

    fn recv(&mut self) -> Result<Buffer> {
        Err(TransportError::protocol("recv not supported on this vconn"))
    }

    fn send(&mut self, msg: Buffer) -> Result<()> {
        let _ = msg;
        Err(TransportError::protocol("send not supported on this vconn"))
    }

    fn accept(&mut self) -> Result<VconnStream> {
        Err(TransportError::protocol("accept not supported on this vconn"))
    }
}

/// A boxed, type-erased vconn, the handle type most callers hold.
pub type VconnStream = Box<dyn Vconn>;

/// Opens a vconn from a `scheme:suffix` URL. Recognized schemes: `tcp`
/// (active, suffix `host[:port]`) and `ptcp` (passive, suffix `port` or
/// empty for [`TransportConfig::default_tcp_port`]).
pub fn open(url: &str, config: &TransportConfig) -> Result<VconnStream> {
    let (scheme, suffix) = url
        .split_once(':')
        .ok_or_else(|| TransportError::protocol(format!("vconn url '{url}' missing scheme separator")))?;

    match scheme {
        "tcp" => Ok(Box::new(tcp::TcpVconn::connect(suffix, config)?)),
        "ptcp" => Ok(Box::new(tcp::PassiveTcpVconn::listen(suffix, config)?)),
        other => Err(TransportError::protocol(format!(
            "unrecognized vconn scheme '{other}'"
        ))),
    }
}

pub(crate) fn would_block() -> TransportError {
    TransportError::Io(std::io::Error::from(std::io::ErrorKind::WouldBlock))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_rejects_url_without_scheme_separator() {
        let config = TransportConfig::default();
        let err = open("nocolonhere", &config).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn open_rejects_unknown_scheme() {
        let config = TransportConfig::default();
        let err = open("udp:127.0.0.1:9", &config).unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
    }
}
