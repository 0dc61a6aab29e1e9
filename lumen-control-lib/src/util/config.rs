use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Central configuration for luminaire communication.
///
/// Every operation that talks to the network receives one of these, either
/// directly or through the owning [`crate::control_interface::Luminaire`].
/// The defaults reproduce the fixed values baked into luminaire firmware;
/// the ports in particular should not be changed, since the devices listen
/// on them unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// TCP port of the command channel.
    pub command_port: u16,
    /// TCP port accepting out-of-band session-release requests.
    pub disconnect_port: u16,
    /// UDP port for best-effort messaging.
    pub udp_port: u16,

    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    /// Wall-clock budget for scanning one network prefix.
    pub discovery_timeout: Duration,

    /// Delivery retries for multi-device fan-out rounds.
    pub command_retries: u32,
    /// Consecutive per-block retries before a file transfer is abandoned.
    pub max_file_retries: u32,

    /// Inclusive range of host suffixes probed during discovery.
    pub scan_range: (u8, u8),
    /// Candidate `/24` prefixes (with trailing dot), tried in order.
    pub networks: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            command_port: 57007,
            disconnect_port: 57011,
            udp_port: 57000,
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(30),
            command_retries: 3,
            max_file_retries: 10,
            scan_range: (2, 254),
            networks: (0..=11).map(|n| format!("192.168.{}.", n)).collect(),
        }
    }
}

impl ApiConfig {
    /// Restricts discovery to a single network prefix. A trailing dot is
    /// appended if the caller left it off.
    pub fn with_network(mut self, network: &str) -> Self {
        let prefix = if network.ends_with('.') {
            network.to_string()
        } else {
            format!("{}.", network)
        };
        self.networks = vec![prefix];
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ports_match_firmware() {
        let config = ApiConfig::default();
        assert_eq!(config.command_port, 57007);
        assert_eq!(config.disconnect_port, 57011);
        assert_eq!(config.udp_port, 57000);
        assert_eq!(config.networks.first().map(String::as_str), Some("192.168.0."));
        assert_eq!(config.networks.len(), 12);
    }

    #[test]
    fn with_network_normalizes_trailing_dot() {
        let config = ApiConfig::default().with_network("10.1.2");
        assert_eq!(config.networks, vec!["10.1.2.".to_string()]);
    }
}
