//! TLV (`nlattr`) alignment and low-level header encode/decode.

/// Size of the fixed `nlattr` header: `nla_len`(2) + `nla_type`(2).
pub const NLA_HDRLEN: usize = 4;

/// Largest value `nla_len` (and therefore a single attribute's encoded
/// size) may hold; the field is a `u16`.
pub const NLA_MAX_LEN: usize = u16::MAX as usize;

/// Rounds `len` up to the next multiple of 4, the Netlink attribute
/// alignment boundary.
pub const fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Decoded view of an attribute header: `nla_len` is the *unaligned*
/// length of header + payload; the next attribute begins at
/// `nla_align(nla_len)` past this one's start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NlAttrHeader {
    pub nla_len: u16,
    pub nla_type: u16,
}

impl NlAttrHeader {
    pub fn to_bytes(self) -> [u8; NLA_HDRLEN] {
        let mut out = [0u8; NLA_HDRLEN];
        out[0..2].copy_from_slice(&self.nla_len.to_ne_bytes());
        out[2..4].copy_from_slice(&self.nla_type.to_ne_bytes());
        out
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        if b.len() < NLA_HDRLEN {
            return None;
        }
        Some(NlAttrHeader {
            nla_len: u16::from_ne_bytes(b[0..2].try_into().unwrap()),
            nla_type: u16::from_ne_bytes(b[2..4].try_into().unwrap()),
        })
    }
}

/// One attribute as seen while walking a buffer: its type, its raw
/// (unaligned) payload, and the offset of the byte immediately following
/// its header, i.e. where the payload starts.
#[derive(Debug, Clone, Copy)]
pub struct RawAttr<'a> {
    pub nla_type: u16,
    pub payload: &'a [u8],
}

/// Iterator over the attributes found at consecutive, alignment-respecting
/// offsets in `buf`. Malformed framing (truncated header, `nla_len` that
/// would run past the end of `buf`) stops iteration and is surfaced once
/// via [`AttrWalkError`]; well-formed but unrecognized attribute types are
/// not filtered here, callers apply a policy separately.
pub struct AttrWalker<'a> {
    buf: &'a [u8],
    offset: usize,
    errored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrWalkError {
    TruncatedHeader,
    LengthExceedsBuffer,
}

impl<'a> AttrWalker<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        AttrWalker {
            buf,
            offset: 0,
            errored: false,
        }
    }
}

impl<'a> Iterator for AttrWalker<'a> {
    type Item = Result<RawAttr<'a>, AttrWalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored || self.offset >= self.buf.len() {
            return None;
        }
        let remaining = &self.buf[self.offset..];
        let hdr = match NlAttrHeader::from_bytes(remaining) {
            Some(h) if (h.nla_len as usize) >= NLA_HDRLEN => h,
            _ => {
                self.errored = true;
                return Some(Err(AttrWalkError::TruncatedHeader));
            }
        };
        let aligned = nla_align(hdr.nla_len as usize);
        if aligned > remaining.len() {
            self.errored = true;
            return Some(Err(AttrWalkError::LengthExceedsBuffer));
        }
        let payload = &remaining[NLA_HDRLEN..hdr.nla_len as usize];
        self.offset += aligned;
        Some(Ok(RawAttr {
            nla_type: hdr.nla_type,
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nla_align_rounds_up_to_four() {
        assert_eq!(nla_align(0), 0);
        assert_eq!(nla_align(1), 4);
        assert_eq!(nla_align(4), 4);
        assert_eq!(nla_align(5), 8);
    }

    #[test]
    fn walker_yields_attributes_in_order_with_padding() {
        let mut buf = Vec::new();
        // attribute 1: type=1, 1-byte payload -> len=5, aligned to 8
        buf.extend_from_slice(&NlAttrHeader { nla_len: 5, nla_type: 1 }.to_bytes());
        buf.push(0xAA);
        buf.extend_from_slice(&[0, 0, 0]); // padding
        // attribute 2: type=2, 4-byte payload -> len=8, already aligned
        buf.extend_from_slice(&NlAttrHeader { nla_len: 8, nla_type: 2 }.to_bytes());
        buf.extend_from_slice(&[1, 2, 3, 4]);

        let attrs: Vec<_> = AttrWalker::new(&buf).collect::<Result<_, _>>().unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].nla_type, 1);
        assert_eq!(attrs[0].payload, &[0xAA]);
        assert_eq!(attrs[1].nla_type, 2);
        assert_eq!(attrs[1].payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn walker_reports_truncated_header() {
        let buf = [0u8; 2];
        let results: Vec<_> = AttrWalker::new(&buf).collect();
        assert_eq!(results, vec![Err(AttrWalkError::TruncatedHeader)]);
    }

    #[test]
    fn walker_reports_length_exceeding_buffer() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&NlAttrHeader { nla_len: 100, nla_type: 1 }.to_bytes());
        let results: Vec<_> = AttrWalker::new(&buf).collect();
        assert_eq!(results, vec![Err(AttrWalkError::LengthExceedsBuffer)]);
    }
}
