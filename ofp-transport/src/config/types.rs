use serde::Deserialize;

/// Tunables for the Netlink and TCP transports.
///
/// Every field has a default equal to the historical hardcoded constant it
/// replaces, so an empty or absent config file reproduces the fixed behavior
/// exactly.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Port a passive TCP vconn binds to when its URL suffix omits one.
    /// Default: 6633 (`OFP_TCP_PORT`).
    #[serde(default = "default_tcp_port")]
    pub default_tcp_port: u16,

    /// Initial capacity of the buffer used to peek an incoming Netlink
    /// datagram before its true size is known.
    /// Default: 2048.
    #[serde(default = "default_recv_capacity")]
    pub netlink_recv_initial_capacity: usize,

    /// Number of per-process Netlink PID slots, i.e. `2^SOCKET_BITS`.
    /// Default: 1024.
    #[serde(default = "default_pid_slots")]
    pub netlink_max_pid_slots: u32,

    /// Backlog passed to `listen()` for a passive TCP vconn.
    /// Default: 10.
    #[serde(default = "default_backlog")]
    pub tcp_listen_backlog: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_tcp_port: default_tcp_port(),
            netlink_recv_initial_capacity: default_recv_capacity(),
            netlink_max_pid_slots: default_pid_slots(),
            tcp_listen_backlog: default_backlog(),
        }
    }
}

impl TransportConfig {
    /// Checked constructor used by the loader; rejects values that would
    /// break invariants elsewhere in the crate (PID bit-field width, a
    /// bindable port).
    pub fn validate(&self) -> Result<(), String> {
        if self.netlink_max_pid_slots == 0 || !self.netlink_max_pid_slots.is_power_of_two() {
            return Err(format!(
                "netlink_max_pid_slots must be a power of two, got {}",
                self.netlink_max_pid_slots
            ));
        }
        if self.netlink_max_pid_slots > (1 << crate::netlink::socket::SOCKET_BITS) {
            return Err(format!(
                "netlink_max_pid_slots must fit in {} bits",
                crate::netlink::socket::SOCKET_BITS
            ));
        }
        if self.netlink_recv_initial_capacity == 0 {
            return Err("netlink_recv_initial_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

fn default_tcp_port() -> u16 {
    6633
}

fn default_recv_capacity() -> usize {
    2048
}

fn default_pid_slots() -> u32 {
    1024
}

fn default_backlog() -> i32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_historical_constants() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.default_tcp_port, 6633);
        assert_eq!(cfg.netlink_recv_initial_capacity, 2048);
        assert_eq!(cfg.netlink_max_pid_slots, 1024);
        assert_eq!(cfg.tcp_listen_backlog, 10);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_slot_count() {
        let mut cfg = TransportConfig::default();
        cfg.netlink_max_pid_slots = 3;
        assert!(cfg.validate().is_err());
    }
}
