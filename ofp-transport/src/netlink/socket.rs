//! Netlink socket: PID allocation, reliable transact, and the I/O seam
//! that lets [`transact`](NetlinkSocket::transact)'s retry logic be driven
//! by a fake in tests.

use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use netlink_sys::{protocols::NETLINK_GENERIC, Socket, SocketAddr};
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::netlink::header::{NlMsgHdr, NLMSG_HDRLEN, NLM_F_ACK};
use crate::netlink::message::NetlinkMessage;

/// Bits of a Netlink PID reserved for the process's own OS pid.
pub const PROCESS_BITS: u32 = 22;
/// Bits of a Netlink PID used to distinguish sockets within one process.
pub const SOCKET_BITS: u32 = 10;

const PROCESS_MASK: u32 = (1 << PROCESS_BITS) - 1;
const DEFAULT_SLOT_COUNT: u32 = 1 << SOCKET_BITS;

/// `pid ^ wall_clock_seconds`, the historical seed for the per-process
/// sequence counter (spec §3). Falls back to the raw pid if the clock is
/// somehow before the epoch.
fn seed_seq() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0);
    std::process::id() ^ secs
}

/// Process-wide mutable Netlink state: the PID-slot bitmap and the
/// monotonic sequence counter, behind one lock.
///
/// The crate exposes both a lazily-initialized process-wide default (for
/// production use, where one shared sequence space per process mirrors the
/// historical global-statics design) and an explicit constructor (for
/// tests, which run concurrently and must not perturb each other's PID
/// allocations).
pub struct NetlinkContext {
    state: Mutex<ContextState>,
}

struct ContextState {
    slots: Vec<bool>,
    next_seq: u32,
}

impl NetlinkContext {
    /// Creates a context with `slot_count` PID slots, independent of the
    /// process-wide default. The sequence counter is seeded from
    /// `pid ^ wall_clock_seconds` rather than a fixed value: a reply that
    /// outlives its socket's closure and lands on a reused PID cannot then
    /// be mistaken for a current reply, because sequence numbers are
    /// globally unique across process restarts (spec §3).
    pub fn new(slot_count: u32) -> Self {
        NetlinkContext {
            state: Mutex::new(ContextState {
                slots: vec![false; slot_count as usize],
                next_seq: seed_seq(),
            }),
        }
    }

    /// The process-wide default context, sized per [`DEFAULT_SLOT_COUNT`].
    /// Lazily constructed on first use.
    pub fn process_default() -> &'static NetlinkContext {
        Self::process_default_sized(DEFAULT_SLOT_COUNT)
    }

    /// The process-wide default context, sized on first use per
    /// `slot_count` (typically `TransportConfig::netlink_max_pid_slots`).
    /// Since the context is a process-wide singleton, only the first
    /// caller's `slot_count` takes effect; later calls with a different
    /// value reuse the already-constructed context rather than resizing
    /// it, matching the historical design's single shared bitmap.
    pub fn process_default_sized(slot_count: u32) -> &'static NetlinkContext {
        static DEFAULT: OnceLock<NetlinkContext> = OnceLock::new();
        DEFAULT.get_or_init(|| NetlinkContext::new(slot_count))
    }

    /// Allocates the lowest free slot and returns the PID it encodes.
    fn alloc_pid(&self) -> Result<u32> {
        let unix_pid = std::process::id() & PROCESS_MASK;
        let mut state = self.state.lock().unwrap();
        let slot = state.slots.iter().position(|taken| !taken);
        match slot {
            Some(slot) => {
                state.slots[slot] = true;
                Ok(unix_pid | ((slot as u32) << PROCESS_BITS))
            }
            None => Err(TransportError::NoBufferSpace),
        }
    }

    fn free_pid(&self, pid: u32) {
        let slot = (pid >> PROCESS_BITS) as usize;
        let mut state = self.state.lock().unwrap();
        if let Some(taken) = state.slots.get_mut(slot) {
            *taken = false;
        }
    }

    fn next_seq(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq = state.next_seq.wrapping_add(1);
        seq
    }
}

/// Crate-internal seam between the socket's transact/recv logic and the
/// actual syscalls, so `transact`'s resend-on-`ENOBUFS`, sequence
/// filtering, and `EAGAIN`-remap behavior can be driven deterministically
/// by a scripted fake in tests. Production code uses [`RealNetlinkIo`]
/// exclusively.
pub(crate) trait NetlinkIo {
    fn send(&mut self, buf: &[u8], wait: bool) -> Result<()>;
    /// Peeks up to `buf.len()` bytes without consuming the datagram.
    /// Returns the number of bytes that would have been read, which may
    /// exceed `buf.len()` if the datagram is larger (truncation).
    fn peek(&mut self, buf: &mut [u8], wait: bool) -> Result<usize>;
    /// Consumes (and discards) the datagram previously observed by `peek`.
    fn drain_one(&mut self) -> Result<()>;
}

/// Real netlink socket, backed by `netlink-sys`.
pub(crate) struct RealNetlinkIo {
    socket: Socket,
}

fn is_eintr(e: &TransportError) -> bool {
    matches!(e, TransportError::Io(io) if io.raw_os_error() == Some(libc::EINTR))
}

impl NetlinkIo for RealNetlinkIo {
    fn send(&mut self, buf: &[u8], wait: bool) -> Result<()> {
        let flags = if wait { 0 } else { libc::MSG_DONTWAIT };
        loop {
            match self.socket.send(buf, flags) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let err = TransportError::Io(e);
                    if is_eintr(&err) {
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn peek(&mut self, buf: &mut [u8], wait: bool) -> Result<usize> {
        let mut flags = libc::MSG_PEEK;
        if !wait {
            flags |= libc::MSG_DONTWAIT;
        }
        loop {
            match self.socket.recv(buf, flags) {
                Ok(n) => return Ok(n),
                Err(e) => {
                    let err = TransportError::Io(e);
                    if is_eintr(&err) {
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    fn drain_one(&mut self) -> Result<()> {
        let mut discard = [0u8; 1];
        loop {
            match self.socket.recv(&mut discard, 0) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    let err = TransportError::Io(e);
                    if is_eintr(&err) {
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }
}

impl AsRawFd for RealNetlinkIo {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// A bound, (optionally) multicast-subscribed Netlink socket.
pub struct NetlinkSocket {
    io: Box<dyn NetlinkIo + Send>,
    pid: u32,
    ctx: &'static NetlinkContext,
    initial_recv_capacity: usize,
}

impl NetlinkSocket {
    /// Opens a raw Netlink socket for `protocol`, allocates a PID slot
    /// from the process-wide default context, binds it (joining
    /// `multicast_group` if nonzero), and connects the peer address to
    /// the kernel (PID 0).
    pub fn create(
        protocol: isize,
        multicast_group: u32,
        initial_recv_capacity: usize,
    ) -> Result<Self> {
        Self::create_with_context(
            protocol,
            multicast_group,
            initial_recv_capacity,
            NetlinkContext::process_default(),
        )
    }

    /// Like [`NetlinkSocket::create`], but sizes the process-wide PID
    /// context from `config.netlink_max_pid_slots` and the receive peek
    /// buffer from `config.netlink_recv_initial_capacity` instead of the
    /// hardcoded defaults. The preferred entry point for callers that load
    /// a [`crate::config::TransportConfig`].
    pub fn create_configured(
        protocol: isize,
        multicast_group: u32,
        config: &crate::config::TransportConfig,
    ) -> Result<Self> {
        Self::create_with_context(
            protocol,
            multicast_group,
            config.netlink_recv_initial_capacity,
            NetlinkContext::process_default_sized(config.netlink_max_pid_slots),
        )
    }

    pub fn create_with_context(
        protocol: isize,
        multicast_group: u32,
        initial_recv_capacity: usize,
        ctx: &'static NetlinkContext,
    ) -> Result<Self> {
        let pid = ctx.alloc_pid()?;
        let socket = Socket::new(protocol).map_err(TransportError::Io)?;

        let groups = if (1..=32).contains(&multicast_group) {
            1u32 << (multicast_group - 1)
        } else {
            0
        };
        let local_addr = SocketAddr::new(pid, groups);
        socket.bind(&local_addr).map_err(|e| {
            ctx.free_pid(pid);
            TransportError::Io(e)
        })?;

        if multicast_group > 32 {
            socket
                .add_membership(multicast_group)
                .map_err(TransportError::Io)?;
        }

        socket.connect(&SocketAddr::new(0, 0)).map_err(TransportError::Io)?;

        debug!(target: "ofp_transport::netlink", pid, protocol, "netlink socket created");

        Ok(NetlinkSocket {
            io: Box::new(RealNetlinkIo { socket }),
            pid,
            ctx,
            initial_recv_capacity,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Allocates the next sequence number for a request built on this
    /// socket's shared context.
    pub fn next_seq(&self) -> u32 {
        self.ctx.next_seq()
    }

    /// Sends a finalized message. `wait = false` uses `MSG_DONTWAIT`.
    pub fn send(&mut self, msg: &mut NetlinkMessage) -> Result<()> {
        self.send_raw(msg, true)
    }

    fn send_raw(&mut self, msg: &mut NetlinkMessage, wait: bool) -> Result<()> {
        msg.finalize();
        self.io.send(msg.as_bytes(), wait)
    }

    /// Receives one datagram, growing the peek buffer until it fits.
    pub fn recv(&mut self, wait: bool) -> Result<NetlinkMessage> {
        let mut capacity = self.initial_recv_capacity.max(NLMSG_HDRLEN);
        loop {
            let mut buf = vec![0u8; capacity];
            let n = self.io.peek(&mut buf, wait)?;
            if n >= capacity {
                capacity *= 2;
                continue;
            }
            buf.truncate(n);
            self.io.drain_one()?;

            if NlMsgHdr::from_bytes(&buf).is_none() {
                return Err(TransportError::protocol(
                    "netlink datagram shorter than nlmsghdr",
                ));
            }
            let mut buffer = crate::buffer::Buffer::new(buf.len());
            buffer.put(&buf);
            return Ok(NetlinkMessage::from_buffer(buffer));
        }
    }

    /// Reliable request/reply: forces an ACK, resends on `ENOBUFS`,
    /// filters replies by sequence number, and decodes `NLMSG_ERROR`
    /// replies (remapping an in-band `EAGAIN` to a protocol error so it
    /// cannot be confused with the non-blocking "try again" signal).
    pub fn transact(&mut self, mut msg: NetlinkMessage) -> Result<NetlinkMessage> {
        let expect_seq = msg
            .nlmsghdr()
            .ok_or_else(|| TransportError::protocol("message missing nlmsghdr"))?
            .seq;

        {
            let hdr_bytes = &mut msg.buffer_mut().payload_mut()[6..8];
            let mut flags = u16::from_ne_bytes(hdr_bytes.try_into().unwrap());
            flags |= NLM_F_ACK;
            hdr_bytes.copy_from_slice(&flags.to_ne_bytes());
        }

        'resend: loop {
            self.send_raw(&mut msg, true)?;

            let reply = loop {
                match self.recv(true) {
                    Ok(reply) => {
                        let reply_seq = reply.nlmsghdr().map(|h| h.seq).unwrap_or(u32::MAX);
                        if reply_seq != expect_seq {
                            trace!(target: "ofp_transport::netlink", expected = expect_seq, got = reply_seq, "discarding stray reply");
                            continue;
                        }
                        break reply;
                    }
                    Err(e) => {
                        if matches!(&e, TransportError::Io(io) if io.raw_os_error() == Some(libc::ENOBUFS)) {
                            warn!(target: "ofp_transport::netlink", seq = expect_seq, "ENOBUFS, resending request");
                            continue 'resend;
                        }
                        return Err(e);
                    }
                }
            };

            let reply_type = reply.nlmsghdr().map(|h| h.nlmsg_type);
            if reply_type == Some(crate::netlink::header::NLMSG_ERROR) {
                let errno = reply.parse_error()?;
                if errno == 0 {
                    return Ok(reply);
                }
                if errno == -libc::EAGAIN {
                    return Err(TransportError::protocol(
                        "netlink error reply carried EAGAIN",
                    ));
                }
                return Err(TransportError::Io(std::io::Error::from_raw_os_error(-errno)));
            }

            return Ok(reply);
        }
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        self.ctx.free_pid(self.pid);
    }
}

/// Opens a one-shot Generic Netlink socket for use by
/// [`lookup_genl_family`](crate::netlink::genl::lookup_genl_family).
pub(crate) fn open_genl_socket(config: &crate::config::TransportConfig) -> Result<NetlinkSocket> {
    NetlinkSocket::create_configured(NETLINK_GENERIC as isize, 0, config)
}

#[cfg(test)]
impl NetlinkSocket {
    /// Builds a socket around an arbitrary [`NetlinkIo`], bypassing real
    /// socket creation. Used to drive `transact`'s retry logic with a
    /// scripted fake kernel.
    fn from_io(
        io: Box<dyn NetlinkIo + Send>,
        pid: u32,
        ctx: &'static NetlinkContext,
        initial_recv_capacity: usize,
    ) -> Self {
        NetlinkSocket {
            io,
            pid,
            ctx,
            initial_recv_capacity,
        }
    }
}
