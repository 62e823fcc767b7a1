//! Netlink and Generic-Netlink message codec, socket, and family
//! resolution.

pub mod attr;
pub mod genl;
pub mod header;
pub mod message;
pub mod policy;
pub mod socket;

pub use genl::{lookup_genl_family, FamilyCache};
pub use message::NetlinkMessage;
pub use socket::{NetlinkContext, NetlinkSocket, PROCESS_BITS, SOCKET_BITS};
