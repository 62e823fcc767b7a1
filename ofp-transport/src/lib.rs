#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod logging;
pub mod netlink;
pub mod vconn;

pub use buffer::Buffer;
pub use config::{load_from_path, TransportConfig};
pub use error::{Result, TransportError};
pub use netlink::{NetlinkContext, NetlinkSocket};
pub use vconn::{Vconn, VconnStream};
