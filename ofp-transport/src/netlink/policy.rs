//! Schema-checked attribute parsing.

use crate::error::{Result, TransportError};
use crate::netlink::attr::{AttrWalkError, AttrWalker};

/// Declared shape of one attribute slot in a parse policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    U8,
    U16,
    U32,
    U64,
    /// NUL-terminated string; `max_len` includes the terminator.
    String { max_len: usize },
    /// Zero-length presence-only attribute.
    Flag,
    /// Opaque payload with an explicit length range.
    Binary { min_len: usize, max_len: usize },
}

impl AttrKind {
    fn min_len(&self) -> usize {
        match self {
            AttrKind::U8 => 1,
            AttrKind::U16 => 2,
            AttrKind::U32 => 4,
            AttrKind::U64 => 8,
            AttrKind::String { .. } => 1,
            AttrKind::Flag => 0,
            AttrKind::Binary { min_len, .. } => *min_len,
        }
    }

    fn max_len(&self) -> usize {
        match self {
            AttrKind::U8 => 1,
            AttrKind::U16 => 2,
            AttrKind::U32 => 4,
            AttrKind::U64 => 8,
            AttrKind::String { max_len } => *max_len,
            AttrKind::Flag => 0,
            AttrKind::Binary { max_len, .. } => *max_len,
        }
    }
}

/// One entry in a parse policy: the expected shape, and whether its
/// absence is tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrPolicy {
    pub kind: AttrKind,
    pub optional: bool,
}

impl AttrPolicy {
    pub const fn required(kind: AttrKind) -> Self {
        AttrPolicy {
            kind,
            optional: false,
        }
    }

    pub const fn optional(kind: AttrKind) -> Self {
        AttrPolicy {
            kind,
            optional: true,
        }
    }
}

/// Walks `body` (the bytes following the fixed header(s)) validating each
/// attribute whose type falls within `policy`'s range against its
/// declared shape. Returns one slice per policy slot (`None` if absent).
/// Fails if any attribute is malformed, any present attribute violates
/// its policy, or any non-optional, non-flag slot is never filled.
pub fn policy_parse<'a>(
    body: &'a [u8],
    policy: &[Option<AttrPolicy>],
) -> Result<Vec<Option<&'a [u8]>>> {
    let mut attrs: Vec<Option<&[u8]>> = vec![None; policy.len()];
    let mut required = policy
        .iter()
        .filter(|p| matches!(p, Some(p) if !p.optional && p.kind != AttrKind::Flag))
        .count();

    for res in AttrWalker::new(body) {
        let raw = match res {
            Ok(a) => a,
            Err(AttrWalkError::TruncatedHeader) => {
                return Err(TransportError::protocol("truncated attribute header"))
            }
            Err(AttrWalkError::LengthExceedsBuffer) => {
                return Err(TransportError::protocol("attribute length exceeds buffer"))
            }
        };

        let idx = raw.nla_type as usize;
        if idx >= policy.len() {
            continue;
        }
        let Some(p) = policy[idx] else { continue };

        let len = raw.payload.len();
        if len < p.kind.min_len() {
            return Err(TransportError::protocol(format!(
                "attribute {idx} shorter than minimum {} bytes",
                p.kind.min_len()
            )));
        }
        if p.kind.max_len() > 0 && len > p.kind.max_len() {
            return Err(TransportError::protocol(format!(
                "attribute {idx} longer than maximum {} bytes",
                p.kind.max_len()
            )));
        }
        if let AttrKind::String { .. } = p.kind {
            if raw.payload.last() != Some(&0) {
                return Err(TransportError::protocol(format!(
                    "attribute {idx} missing NUL terminator"
                )));
            }
            if raw.payload[..len - 1].contains(&0) {
                return Err(TransportError::protocol(format!(
                    "attribute {idx} contains an embedded NUL"
                )));
            }
        }

        if attrs[idx].is_none() {
            if !p.optional && p.kind != AttrKind::Flag {
                required -= 1;
            }
            attrs[idx] = Some(raw.payload);
        }
    }

    if required != 0 {
        return Err(TransportError::protocol(
            "missing required netlink attribute",
        ));
    }

    Ok(attrs)
}

pub fn as_u8(b: &[u8]) -> u8 {
    b[0]
}

pub fn as_u16(b: &[u8]) -> u16 {
    u16::from_ne_bytes(b[..2].try_into().unwrap())
}

pub fn as_u32(b: &[u8]) -> u32 {
    u32::from_ne_bytes(b[..4].try_into().unwrap())
}

pub fn as_u64(b: &[u8]) -> u64 {
    u64::from_ne_bytes(b[..8].try_into().unwrap())
}

pub fn as_str(b: &[u8]) -> &str {
    std::str::from_utf8(&b[..b.len() - 1]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::NetlinkMessage;

    #[test]
    fn round_trips_typed_attributes() {
        let mut msg = NetlinkMessage::new(0, 16, 0, 1, 100);
        msg.put_u32(0, 0xCAFEBABE);
        msg.put_string(1, "hello");
        msg.finalize();

        let body = &msg.as_bytes()[16..];
        let policy = [
            Some(AttrPolicy::required(AttrKind::U32)),
            Some(AttrPolicy::required(AttrKind::String { max_len: 64 })),
        ];
        let attrs = policy_parse(body, &policy).unwrap();
        assert_eq!(as_u32(attrs[0].unwrap()), 0xCAFEBABE);
        assert_eq!(as_str(attrs[1].unwrap()), "hello");
    }

    #[test]
    fn missing_required_attribute_is_rejected() {
        let mut msg = NetlinkMessage::new(0, 16, 0, 1, 100);
        msg.put_u32(0, 1);
        msg.finalize();

        let body = &msg.as_bytes()[16..];
        let policy = [
            Some(AttrPolicy::required(AttrKind::U32)),
            Some(AttrPolicy::required(AttrKind::String { max_len: 64 })),
        ];
        assert!(policy_parse(body, &policy).is_err());
    }

    #[test]
    fn unknown_attribute_types_are_skipped() {
        let mut msg = NetlinkMessage::new(0, 16, 0, 1, 100);
        msg.put_u8(99, 1);
        msg.put_u32(0, 42);
        msg.finalize();

        let body = &msg.as_bytes()[16..];
        let policy = [Some(AttrPolicy::required(AttrKind::U32))];
        let attrs = policy_parse(body, &policy).unwrap();
        assert_eq!(as_u32(attrs[0].unwrap()), 42);
    }

    #[test]
    fn first_occurrence_wins_on_duplicate_attributes() {
        let mut msg = NetlinkMessage::new(0, 16, 0, 1, 100);
        msg.put_u32(0, 1);
        msg.put_u32(0, 2);
        msg.finalize();

        let body = &msg.as_bytes()[16..];
        let policy = [Some(AttrPolicy::required(AttrKind::U32))];
        let attrs = policy_parse(body, &policy).unwrap();
        assert_eq!(as_u32(attrs[0].unwrap()), 1);
    }
}
