use std::cmp::max;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use log::{debug, info};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::control_interface::transport::Transport;
use crate::control_interface::{Luminaire, LuminaireIdentifier};
use crate::error::Result;
use crate::util::config::ApiConfig;

/**
Network discovery for luminaires.

Luminaires do not announce themselves; finding them means probing every
usable host of a `/24` prefix on the command port and checking who answers
like a luminaire. Each candidate address gets its own task, and a probe
only counts if the TCP connect succeeds *and* a serial-number query comes
back with the protocol terminator. Plenty of things accept a TCP
connection on a scanned subnet; almost nothing else answers `NS` in
luminaire framing.

Deployments keep all luminaires on one subnet, so scanning stops at the
first prefix that yields a verified device.
*/
pub struct Discovery;

impl Discovery {
    /// Scans the configured candidate prefixes in order, returning the
    /// devices found on the first prefix with any. An empty result is a
    /// normal outcome, not an error.
    pub async fn discover(config: &ApiConfig) -> Result<Vec<Luminaire>> {
        let networks = config.networks.clone();
        Self::discover_on(&networks, config).await
    }

    /// Scans the given `/24` prefixes (trailing dot included, e.g.
    /// `"192.168.1."`) in order.
    pub async fn discover_on(networks: &[String], config: &ApiConfig) -> Result<Vec<Luminaire>> {
        info!("discovering luminaires on {} network(s)", networks.len());
        for network in networks {
            debug!("scanning {}", network);
            let found = Self::scan_network(network, config).await;
            if !found.is_empty() {
                info!(
                    "found {} luminaire(s) on {}, stopping discovery",
                    found.len(),
                    network
                );
                return Ok(found);
            }
            debug!("no luminaires on {}", network);
        }
        info!("discovery complete: no luminaires found");
        Ok(Vec::new())
    }

    /// Scans one prefix. Each host suffix in the configured range is probed
    /// by its own task; results stream back over a channel until every
    /// probe has reported or the scan budget runs out. Probes still in
    /// flight at the deadline are abandoned, not cancelled; whatever they
    /// find is ignored.
    pub async fn scan_network(network: &str, config: &ApiConfig) -> Vec<Luminaire> {
        let (tx, mut rx) = mpsc::channel::<Luminaire>(256);
        let (first, last) = config.scan_range;
        let mut probes = 0usize;
        for suffix in first..=last {
            let candidate = match format!("{}{}", network, suffix).parse::<Ipv4Addr>() {
                Ok(address) => address,
                Err(_) => continue,
            };
            probes += 1;
            let tx = tx.clone();
            let config = config.clone();
            tokio::spawn(async move {
                if let Some(luminaire) = Self::probe(candidate, &config).await {
                    let _ = tx.send(luminaire).await;
                }
            });
        }
        drop(tx);

        let mut found = Vec::new();
        let deadline = Instant::now() + config.discovery_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(
                    "scan budget for {} elapsed, abandoning outstanding probes",
                    network
                );
                break;
            }
            match timeout(remaining, rx.recv()).await {
                Ok(Some(luminaire)) => found.push(luminaire),
                Ok(None) => break,
                Err(_) => {
                    debug!(
                        "scan budget for {} elapsed, abandoning outstanding probes",
                        network
                    );
                    break;
                }
            }
        }
        debug!(
            "{}: {} of {} probes verified",
            network,
            found.len(),
            probes
        );
        found.sort_by_key(Luminaire::address);
        found
    }

    /// Probes one address. Failures are expected for nearly every host in
    /// a scanned range and are swallowed here; only a verified luminaire
    /// comes back.
    async fn probe(address: Ipv4Addr, config: &ApiConfig) -> Option<Luminaire> {
        let addr = SocketAddr::new(IpAddr::V4(address), config.command_port);
        let mut transport = Transport::connect(addr, config.connect_timeout).await.ok()?;
        // A terminated reply to the serial-number query is the whole
        // verification; anything else on this port will not produce one.
        transport.send_raw("NS").await.ok()?;
        transport
            .read_until_terminator(config.command_timeout)
            .await
            .ok()?;
        let mut luminaire = Luminaire::from_transport(address, config.clone(), transport);
        luminaire.initialize_device_info().await;
        debug!("verified luminaire at {}", address);
        Some(luminaire)
    }

    /// Prints an aligned table of discovered devices.
    pub fn pretty_print_luminaires(devices: &[LuminaireIdentifier]) {
        let header = ("IP Address", "Type", "Serial", "Firmware", "MAC Address");
        let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());

        let rows: Vec<(String, String, String, String, String)> = devices
            .iter()
            .map(|d| {
                (
                    d.address.to_string(),
                    d.luminaire_type.to_string(),
                    field(&d.serial_number),
                    field(&d.firmware_version),
                    field(&d.mac_address),
                )
            })
            .collect();

        let width = |pick: fn(&(String, String, String, String, String)) -> &String,
                     label: &str| {
            rows.iter()
                .map(|row| pick(row).len())
                .fold(label.len(), max)
                + 2
        };
        let ip_width = width(|r| &r.0, header.0);
        let type_width = width(|r| &r.1, header.1);
        let serial_width = width(|r| &r.2, header.2);
        let fw_width = width(|r| &r.3, header.3);
        let mac_width = width(|r| &r.4, header.4);

        println!(
            "{:<ip_width$} {:<type_width$} {:<serial_width$} {:<fw_width$} {:<mac_width$}",
            header.0, header.1, header.2, header.3, header.4,
        );
        println!(
            "{:<ip_width$} {:<type_width$} {:<serial_width$} {:<fw_width$} {:<mac_width$}",
            "-".repeat(ip_width - 2),
            "-".repeat(type_width - 2),
            "-".repeat(serial_width - 2),
            "-".repeat(fw_width - 2),
            "-".repeat(mac_width - 2),
        );
        for row in &rows {
            println!(
                "{:<ip_width$} {:<type_width$} {:<serial_width$} {:<fw_width$} {:<mac_width$}",
                row.0, row.1, row.2, row.3, row.4,
            );
        }
    }
}
