//! Active and passive TCP vconns, framed on the OpenFlow header's
//! network-order length field.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{trace, warn};

use crate::buffer::Buffer;
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::vconn::{would_block, PrePoll, Revents, Vconn, VconnStream, Want};

/// Size of an `ofp_header`: version(1) + type(1) + length(2, network
/// order) + xid(4).
pub const OFP_HEADER_LEN: usize = 8;

fn frame_length(header: &[u8]) -> u16 {
    u16::from_be_bytes([header[2], header[3]])
}

fn host_port_string(suffix: &str, default_port: u16) -> String {
    if let Some((_, port)) = suffix.rsplit_once(':') {
        if port.parse::<u16>().is_ok() {
            return suffix.to_string();
        }
    }
    format!("{suffix}:{default_port}")
}

/// An established TCP connection carrying length-prefixed OpenFlow
/// frames.
pub struct TcpVconn {
    stream: TcpStream,
    /// Bytes accumulated toward the frame currently being assembled.
    rx: Buffer,
    /// At most one outgoing message awaiting a full write.
    tx: Option<Buffer>,
}

impl TcpVconn {
    fn new(stream: TcpStream) -> Self {
        TcpVconn {
            stream,
            rx: Buffer::new(OFP_HEADER_LEN),
            tx: None,
        }
    }

    /// Connects synchronously (blocking is acceptable during setup), then
    /// switches to non-blocking with `TCP_NODELAY` enabled.
    pub fn connect(suffix: &str, config: &TransportConfig) -> Result<Self> {
        let addr_str = host_port_string(suffix, config.default_tcp_port);
        let mut addrs = addr_str
            .to_socket_addrs()
            .map_err(TransportError::Io)?;
        let addr = addrs
            .next()
            .ok_or_else(|| TransportError::protocol(format!("'{addr_str}' resolved to no address")))?;

        let stream = TcpStream::connect(addr).map_err(TransportError::Io)?;
        stream.set_nonblocking(true).map_err(TransportError::Io)?;
        stream.set_nodelay(true).map_err(TransportError::Io)?;
        trace!(target: "ofp_transport::vconn::tcp", %addr, "active tcp vconn connected");
        Ok(TcpVconn::new(stream))
    }

    fn read_into_rx(&mut self, need: usize) -> Result<()> {
        let mut tmp = vec![0u8; need];
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => {
                    return if self.rx.is_empty() {
                        Err(TransportError::Eof)
                    } else {
                        Err(TransportError::protocol(
                            "connection closed with a partial frame buffered",
                        ))
                    };
                }
                Ok(n) => {
                    self.rx.put(&tmp[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn recv_frame(&mut self) -> Result<Buffer> {
        if self.rx.size() < OFP_HEADER_LEN {
            self.read_into_rx(OFP_HEADER_LEN - self.rx.size())?;
            if self.rx.size() < OFP_HEADER_LEN {
                return Err(would_block());
            }
        }

        let length = frame_length(self.rx.payload()) as usize;
        if length < OFP_HEADER_LEN {
            return Err(TransportError::protocol(format!(
                "ofp_header.length {length} is smaller than the header itself"
            )));
        }

        if self.rx.size() < length {
            self.read_into_rx(length - self.rx.size())?;
            if self.rx.size() < length {
                return Err(would_block());
            }
        }

        let mut frame = Buffer::new(length);
        frame.put(self.rx.payload());
        self.rx.reinit(OFP_HEADER_LEN);
        Ok(frame)
    }

    fn send_frame(&mut self, mut msg: Buffer) -> Result<()> {
        if self.tx.is_some() {
            return Err(would_block());
        }
        loop {
            match self.stream.write(msg.payload()) {
                Ok(n) if n == msg.size() => return Ok(()),
                Ok(n) => {
                    msg.pull(n);
                    self.tx = Some(msg);
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.tx = Some(msg);
                    return Ok(());
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn flush_staged(&mut self) -> Result<()> {
        let Some(buf) = self.tx.as_mut() else {
            return Ok(());
        };
        loop {
            match self.stream.write(buf.payload()) {
                Ok(n) => {
                    buf.pull(n);
                    if buf.is_empty() {
                        self.tx = None;
                    }
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    fn has_complete_frame_buffered(&self) -> bool {
        self.rx.size() >= OFP_HEADER_LEN
            && frame_length(self.rx.payload()) as usize <= self.rx.size()
    }
}

impl Vconn for TcpVconn {
    fn prepoll(&mut self, want: Want) -> Result<PrePoll> {
        let mut events = Revents::empty();
        if want.contains(Want::RECV) {
            events |= Revents::POLLIN;
        }
        if want.contains(Want::SEND) && self.tx.is_some() {
            events |= Revents::POLLOUT;
        }
        let already_ready = want.contains(Want::RECV) && self.has_complete_frame_buffered();
        Ok(PrePoll {
            fd: self.stream.as_raw_fd(),
            events,
            already_ready,
        })
    }

    fn postpoll(&mut self, revents: Revents) -> Result<()> {
        if revents.contains(Revents::POLLERR) {
            return Err(TransportError::protocol("poll reported POLLERR"));
        }
        if revents.contains(Revents::POLLOUT) {
            self.flush_staged()?;
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Buffer> {
        self.recv_frame()
    }

    fn send(&mut self, msg: Buffer) -> Result<()> {
        self.send_frame(msg)
    }
}

/// A bound, listening TCP socket producing [`TcpVconn`]s on `accept`.
pub struct PassiveTcpVconn {
    listener: TcpListener,
}

impl PassiveTcpVconn {
    pub fn listen(suffix: &str, config: &TransportConfig) -> Result<Self> {
        let port: u16 = if suffix.is_empty() {
            config.default_tcp_port
        } else {
            suffix
                .parse()
                .map_err(|_| TransportError::protocol(format!("invalid ptcp port '{suffix}'")))?
        };

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(TransportError::Io)?;
        socket.set_reuse_address(true).map_err(TransportError::Io)?;
        let addr: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
        socket.bind(&addr.into()).map_err(TransportError::Io)?;
        socket
            .listen(config.tcp_listen_backlog)
            .map_err(TransportError::Io)?;
        socket.set_nonblocking(true).map_err(TransportError::Io)?;

        let listener: TcpListener = socket.into();
        trace!(target: "ofp_transport::vconn::tcp", port, "passive tcp vconn listening");
        Ok(PassiveTcpVconn { listener })
    }
}

impl Vconn for PassiveTcpVconn {
    fn prepoll(&mut self, want: Want) -> Result<PrePoll> {
        let mut events = Revents::empty();
        if want.contains(Want::ACCEPT) {
            events |= Revents::POLLIN;
        }
        Ok(PrePoll {
            fd: self.listener.as_raw_fd(),
            events,
            already_ready: false,
        })
    }

    fn postpoll(&mut self, revents: Revents) -> Result<()> {
        if revents.contains(Revents::POLLERR) {
            return Err(TransportError::protocol("poll reported POLLERR"));
        }
        Ok(())
    }

    fn accept(&mut self) -> Result<VconnStream> {
        match self.listener.accept() {
            Ok((stream, addr)) => {
                stream.set_nonblocking(true).map_err(TransportError::Io)?;
                stream.set_nodelay(true).map_err(TransportError::Io)?;
                trace!(target: "ofp_transport::vconn::tcp", %addr, "accepted tcp vconn");
                Ok(Box::new(TcpVconn::new(stream)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(would_block()),
            Err(e) => {
                warn!(target: "ofp_transport::vconn::tcp", error = %e, "accept failed");
                Err(TransportError::Io(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ofp_header(length: u16) -> [u8; OFP_HEADER_LEN] {
        let mut h = [0u8; OFP_HEADER_LEN];
        h[0] = 4; // version
        h[1] = 0; // type
        h[2..4].copy_from_slice(&length.to_be_bytes());
        h
    }

    fn connected_pair() -> (TcpVconn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        (TcpVconn::new(client), server)
    }

    #[test]
    fn recv_assembles_frame_delivered_in_one_byte_chunks() {
        let (mut vconn, mut server) = connected_pair();
        let mut frame = ofp_header(12).to_vec();
        frame.extend_from_slice(b"hello world!");

        for byte in &frame {
            server.write_all(&[*byte]).unwrap();
            server.flush().unwrap();
            std::thread::yield_now();
        }
        std::thread::sleep(std::time::Duration::from_millis(20));

        let mut got = Vec::new();
        loop {
            match vconn.recv() {
                Ok(buf) => {
                    got = buf.payload().to_vec();
                    break;
                }
                Err(e) if e.would_block() => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(got, frame);
    }

    #[test]
    fn recv_delivers_zero_payload_frame_immediately() {
        let (mut vconn, mut server) = connected_pair();
        server.write_all(&ofp_header(OFP_HEADER_LEN as u16)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let buf = loop {
            match vconn.recv() {
                Ok(buf) => break buf,
                Err(e) if e.would_block() => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        };
        assert_eq!(buf.size(), OFP_HEADER_LEN);
    }

    #[test]
    fn recv_rejects_length_shorter_than_header() {
        let (mut vconn, mut server) = connected_pair();
        server.write_all(&ofp_header(4)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));

        let err = loop {
            match vconn.recv() {
                Err(e) if e.would_block() => continue,
                Err(e) => break e,
                Ok(_) => panic!("expected protocol error"),
            }
        };
        assert!(matches!(err, TransportError::Protocol(_)));
    }

    #[test]
    fn send_stages_on_short_write_and_postpoll_flushes() {
        let (mut vconn, mut server) = connected_pair();
        let mut frame = ofp_header(16).to_vec();
        frame.extend_from_slice(b"abcdefgh");
        let mut buf = Buffer::new(frame.len());
        buf.put(&frame);

        vconn.send(buf).unwrap();
        vconn.postpoll(Revents::POLLOUT).unwrap();

        let mut got = vec![0u8; frame.len()];
        server.set_nonblocking(false).unwrap();
        server
            .set_read_timeout(Some(std::time::Duration::from_secs(1)))
            .unwrap();
        server.read_exact(&mut got).unwrap();
        assert_eq!(got, frame);
    }

    #[test]
    fn second_send_before_flush_would_block() {
        let (mut vconn, _server) = connected_pair();
        let mut buf1 = Buffer::new(OFP_HEADER_LEN);
        buf1.put(&ofp_header(OFP_HEADER_LEN as u16));
        vconn.tx = Some(buf1);

        let mut buf2 = Buffer::new(OFP_HEADER_LEN);
        buf2.put(&ofp_header(OFP_HEADER_LEN as u16));
        let err = vconn.send(buf2).unwrap_err();
        assert!(err.would_block());
    }
}
