//! Building Netlink / Generic-Netlink messages over a [`Buffer`].

use crate::buffer::Buffer;
use crate::error::{Result, TransportError};
use crate::netlink::attr::{nla_align, NlAttrHeader, NLA_HDRLEN, NLA_MAX_LEN};
use crate::netlink::header::{
    GenlMsgHdr, NlMsgHdr, GENL_HDRLEN, NLMSG_ERROR, NLMSG_HDRLEN,
};

/// A Netlink message under construction or received from the wire.
///
/// Wraps a [`Buffer`] whose payload starts at the `nlmsghdr`. The outer
/// `nlmsg_len` field is left at zero while the message grows and is
/// written only by [`NetlinkMessage::finalize`], immediately before send.
pub struct NetlinkMessage {
    buf: Buffer,
}

impl NetlinkMessage {
    /// Starts a bare Netlink message: reserves `hdr + expected_payload`
    /// bytes and emplaces the header with `len = 0`.
    pub fn new(expected_payload: usize, msg_type: u16, flags: u16, seq: u32, pid: u32) -> Self {
        let mut buf = Buffer::new(NLMSG_HDRLEN + expected_payload);
        let hdr = NlMsgHdr {
            len: 0,
            nlmsg_type: msg_type,
            flags,
            seq,
            pid,
        };
        buf.put(&hdr.to_bytes());
        NetlinkMessage { buf }
    }

    /// Starts a Generic-Netlink message: a Netlink header followed
    /// immediately by a `genlmsghdr`.
    pub fn new_genl(
        expected_payload: usize,
        msg_type: u16,
        flags: u16,
        seq: u32,
        pid: u32,
        cmd: u8,
        version: u8,
    ) -> Self {
        let mut msg = Self::new(GENL_HDRLEN + expected_payload, msg_type, flags, seq, pid);
        msg.buf.put(&GenlMsgHdr { cmd, version }.to_bytes());
        msg
    }

    /// Wraps an already-received buffer for parsing. No header is
    /// emplaced; the caller is responsible for having read a well-formed
    /// message into `buf`.
    pub fn from_buffer(buf: Buffer) -> Self {
        NetlinkMessage { buf }
    }

    pub fn nlmsghdr(&self) -> Option<NlMsgHdr> {
        NlMsgHdr::from_bytes(self.buf.payload())
    }

    pub fn genlmsghdr(&self) -> Option<GenlMsgHdr> {
        GenlMsgHdr::from_bytes(&self.buf.payload()[NLMSG_HDRLEN..])
    }

    /// Emplaces an attribute header at the current tail and returns a
    /// mutable slice over `n` payload bytes, zero-padded up to alignment.
    pub fn put_unspec_uninit(&mut self, attr_type: u16, n: usize) -> &mut [u8] {
        let unaligned = NLA_HDRLEN + n;
        assert!(
            nla_align(unaligned) <= NLA_MAX_LEN,
            "attribute {attr_type} of size {n} exceeds NLA_MAX_LEN once aligned"
        );
        let padded = nla_align(unaligned);
        let hdr = NlAttrHeader {
            nla_len: unaligned as u16,
            nla_type: attr_type,
        };
        let region = self.buf.put_uninit(padded);
        region[..NLA_HDRLEN].copy_from_slice(&hdr.to_bytes());
        for b in region[unaligned..].iter_mut() {
            *b = 0;
        }
        &mut region[NLA_HDRLEN..unaligned]
    }

    pub fn put_u8(&mut self, attr_type: u16, v: u8) {
        self.put_unspec_uninit(attr_type, 1)[0] = v;
    }

    pub fn put_u16(&mut self, attr_type: u16, v: u16) {
        self.put_unspec_uninit(attr_type, 2).copy_from_slice(&v.to_ne_bytes());
    }

    pub fn put_u32(&mut self, attr_type: u16, v: u32) {
        self.put_unspec_uninit(attr_type, 4).copy_from_slice(&v.to_ne_bytes());
    }

    pub fn put_u64(&mut self, attr_type: u16, v: u64) {
        self.put_unspec_uninit(attr_type, 8).copy_from_slice(&v.to_ne_bytes());
    }

    /// Appends a NUL-terminated string attribute.
    pub fn put_string(&mut self, attr_type: u16, s: &str) {
        let bytes = s.as_bytes();
        let region = self.put_unspec_uninit(attr_type, bytes.len() + 1);
        region[..bytes.len()].copy_from_slice(bytes);
        region[bytes.len()] = 0;
    }

    /// Appends a zero-length presence-only attribute.
    pub fn put_flag(&mut self, attr_type: u16) {
        self.put_unspec_uninit(attr_type, 0);
    }

    /// Finalizes `inner`'s own `nlmsg_len` and embeds its bytes as a
    /// nested attribute.
    pub fn put_nested(&mut self, attr_type: u16, inner: &mut NetlinkMessage) {
        inner.finalize();
        let payload = inner.buf.payload().to_vec();
        self.put_unspec_uninit(attr_type, payload.len())
            .copy_from_slice(&payload);
    }

    /// Sets the outer `nlmsg_len` to the buffer's current size. Must be
    /// called immediately before handing the message to `send`.
    pub fn finalize(&mut self) {
        let len = self.buf.size() as u32;
        self.buf.payload_mut()[0..4].copy_from_slice(&len.to_ne_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.payload()
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buf
    }

    pub fn into_buffer(self) -> Buffer {
        self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buf
    }

    /// Decodes an `NLMSG_ERROR` payload. The magnitude is the errno (0
    /// means ACK). Codes outside `(i32::MIN, 0]` are coerced to a
    /// protocol error rather than trusted as a valid errno.
    pub fn parse_error(&self) -> Result<i32> {
        let hdr = self
            .nlmsghdr()
            .ok_or_else(|| TransportError::protocol("message shorter than nlmsghdr"))?;
        if hdr.nlmsg_type != NLMSG_ERROR {
            return Err(TransportError::protocol("not an NLMSG_ERROR message"));
        }
        let payload = self.buf.payload();
        let code_bytes = payload
            .get(NLMSG_HDRLEN..NLMSG_HDRLEN + 4)
            .ok_or_else(|| TransportError::protocol("truncated error payload"))?;
        let code = i32::from_ne_bytes(code_bytes.try_into().unwrap());
        if code > 0 || code == i32::MIN {
            return Err(TransportError::protocol(format!(
                "netlink error code {code} outside valid errno range"
            )));
        }
        Ok(code)
    }
}
