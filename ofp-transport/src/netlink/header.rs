//! Wire layout of the Netlink and Generic-Netlink fixed headers.

/// Size of `nlmsghdr` on the wire: 4 x u32/u16 fields = 16 bytes.
pub const NLMSG_HDRLEN: usize = 16;

/// Size of `genlmsghdr` on the wire: cmd(1) + version(1) + reserved(2).
pub const GENL_HDRLEN: usize = 4;

/// `nlmsg_type` for an error/ACK message.
pub const NLMSG_ERROR: u16 = 2;

/// `nlmsg_flags` bit requesting an ACK reply even for otherwise
/// fire-and-forget requests.
pub const NLM_F_ACK: u16 = 0x04;

/// `nlmsg_flags` bit marking a request message.
pub const NLM_F_REQUEST: u16 = 0x01;

/// Host-order view of an `nlmsghdr`. Field order matches the wire layout;
/// (de)serialization is little/native-endian, matching the kernel ABI on
/// the architectures Netlink targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlMsgHdr {
    pub len: u32,
    pub nlmsg_type: u16,
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
}

impl NlMsgHdr {
    pub fn to_bytes(self) -> [u8; NLMSG_HDRLEN] {
        let mut out = [0u8; NLMSG_HDRLEN];
        out[0..4].copy_from_slice(&self.len.to_ne_bytes());
        out[4..6].copy_from_slice(&self.nlmsg_type.to_ne_bytes());
        out[6..8].copy_from_slice(&self.flags.to_ne_bytes());
        out[8..12].copy_from_slice(&self.seq.to_ne_bytes());
        out[12..16].copy_from_slice(&self.pid.to_ne_bytes());
        out
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() < NLMSG_HDRLEN {
            return None;
        }
        Some(NlMsgHdr {
            len: u32::from_ne_bytes(b[0..4].try_into().unwrap()),
            nlmsg_type: u16::from_ne_bytes(b[4..6].try_into().unwrap()),
            flags: u16::from_ne_bytes(b[6..8].try_into().unwrap()),
            seq: u32::from_ne_bytes(b[8..12].try_into().unwrap()),
            pid: u32::from_ne_bytes(b[12..16].try_into().unwrap()),
        })
    }
}

/// Host-order view of a `genlmsghdr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenlMsgHdr {
    pub cmd: u8,
    pub version: u8,
}

impl GenlMsgHdr {
    pub fn to_bytes(self) -> [u8; GENL_HDRLEN] {
        [self.cmd, self.version, 0, 0]
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() < GENL_HDRLEN {
            return None;
        }
        Some(GenlMsgHdr {
            cmd: b[0],
            version: b[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nlmsghdr_round_trips() {
        let h = NlMsgHdr {
            len: 32,
            nlmsg_type: 16,
            flags: NLM_F_REQUEST | NLM_F_ACK,
            seq: 7,
            pid: 1234,
        };
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), NLMSG_HDRLEN);
        assert_eq!(NlMsgHdr::from_bytes(&bytes), Some(h));
    }

    #[test]
    fn genlmsghdr_round_trips() {
        let h = GenlMsgHdr { cmd: 3, version: 1 };
        let bytes = h.to_bytes();
        assert_eq!(GenlMsgHdr::from_bytes(&bytes), Some(h));
    }

    #[test]
    fn from_bytes_rejects_short_input() {
        assert_eq!(NlMsgHdr::from_bytes(&[0u8; 4]), None);
        assert_eq!(GenlMsgHdr::from_bytes(&[0u8; 2]), None);
    }
}
