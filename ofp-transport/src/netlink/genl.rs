//! Generic-Netlink family resolution.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::netlink::header::{NLMSG_HDRLEN, NLM_F_ACK, NLM_F_REQUEST};
use crate::netlink::message::NetlinkMessage;
use crate::netlink::policy::{as_u16, policy_parse, AttrKind, AttrPolicy};
use crate::netlink::socket;

const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;
const GENL_CTRL_VERSION: u8 = 1;

/// A cache cell for a resolved family id: zero means "not yet looked up";
/// a positive value is the resolved id; a negative value is `-errno` from
/// a failed lookup, cached so repeated failures don't retry kernel I/O.
pub struct FamilyCache(AtomicI32);

impl FamilyCache {
    pub const fn new() -> Self {
        FamilyCache(AtomicI32::new(0))
    }
}

impl Default for FamilyCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a Generic-Netlink family name to its numeric id, consulting
/// (and populating) `cache` so repeated calls short-circuit without I/O.
pub fn lookup_genl_family(name: &str, cache: &FamilyCache, config: &TransportConfig) -> Result<u16> {
    let cached = cache.0.load(Ordering::Acquire);
    if cached > 0 {
        return Ok(cached as u16);
    }
    if cached < 0 {
        return Err(TransportError::Io(std::io::Error::from_raw_os_error(-cached)));
    }

    match resolve(name, config) {
        Ok(id) => {
            cache.0.store(id as i32, Ordering::Release);
            Ok(id)
        }
        Err(TransportError::Io(io)) => {
            let errno = io.raw_os_error().unwrap_or(libc::EIO);
            cache.0.store(-errno, Ordering::Release);
            Err(TransportError::Io(io))
        }
        Err(e) => Err(e),
    }
}

fn resolve(name: &str, config: &TransportConfig) -> Result<u16> {
    let mut sock = socket::open_genl_socket(config)?;
    let seq = sock.next_seq();
    let pid = sock.pid();

    let mut msg = NetlinkMessage::new_genl(
        0,
        0x10, // GENL_ID_CTRL
        NLM_F_REQUEST | NLM_F_ACK,
        seq,
        pid,
        CTRL_CMD_GETFAMILY,
        GENL_CTRL_VERSION,
    );
    msg.put_string(CTRL_ATTR_FAMILY_NAME, name);

    let reply = sock.transact(msg)?;

    const GENL_HDR_OFFSET: usize = NLMSG_HDRLEN + 4;
    let body = reply
        .as_bytes()
        .get(GENL_HDR_OFFSET..)
        .ok_or_else(|| TransportError::protocol("getfamily reply too short"))?;

    let mut policy = vec![None; CTRL_ATTR_FAMILY_ID as usize + 1];
    policy[CTRL_ATTR_FAMILY_ID as usize] = Some(AttrPolicy::required(AttrKind::U16));

    let attrs = policy_parse(body, &policy)?;
    let id_bytes = attrs[CTRL_ATTR_FAMILY_ID as usize]
        .ok_or_else(|| TransportError::protocol("getfamily reply missing family id"))?;
    Ok(as_u16(id_bytes))
}
