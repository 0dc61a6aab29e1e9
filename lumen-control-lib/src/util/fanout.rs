//! Multi-device command fan-out.
//!
//! Sends a command to many luminaires at once and collects replies by
//! polling each connection without blocking, so one silent device cannot
//! stall the rest.

use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::{sleep, Instant};

use crate::control_interface::registry::DeviceRegistry;
use crate::error::{LumenError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// What to send: one command for every address, or one command per address.
#[derive(Debug, Clone)]
pub enum FanoutCommand {
    Broadcast(String),
    PerAddress(Vec<String>),
}

/// Outcome of a fan-out round set.
#[derive(Debug)]
pub struct FanoutReport {
    /// Addresses that never produced a terminated reply.
    pub pending: Vec<Ipv4Addr>,
    /// Accumulated reply text per address, in input order. Possibly empty
    /// for addresses that stayed pending.
    pub replies: Vec<(Ipv4Addr, String)>,
}

/// Sends to every address and polls for replies, for up to `max_tries`
/// rounds of `timeout_per_try` each.
///
/// A retry round only re-sends to addresses whose buffer has no terminator
/// yet. A device that answered with an error status has still answered;
/// repeating a command blindly inside a stateful sequence risks corrupting
/// device state, so the rounds chase delivery, not success, and leave
/// status handling to the caller.
pub async fn send_parallel(
    registry: &DeviceRegistry,
    addresses: &[Ipv4Addr],
    command: FanoutCommand,
    max_tries: u32,
    timeout_per_try: Duration,
) -> Result<FanoutReport> {
    let commands: Vec<String> = match command {
        FanoutCommand::Broadcast(text) => vec![text; addresses.len()],
        FanoutCommand::PerAddress(list) => {
            if list.len() != addresses.len() {
                return Err(LumenError::CommandListMismatch {
                    commands: list.len(),
                    addresses: addresses.len(),
                });
            }
            list
        }
    };

    let mut buffers: Vec<String> = vec![String::new(); addresses.len()];
    let mut tries = 0u32;
    while tries < max_tries && has_pending(&buffers) {
        tries += 1;
        if tries > 1 {
            debug!("fan-out retry round {}", tries);
        }

        for (i, address) in addresses.iter().enumerate() {
            if buffers[i].contains(';') {
                continue;
            }
            match registry.get(*address).await {
                Some(shared) => {
                    let mut luminaire = shared.lock().await;
                    match luminaire.transport_mut() {
                        Some(transport) => {
                            if let Err(e) = transport.send_raw(&commands[i]).await {
                                warn!("fan-out send to {} failed: {}", address, e);
                            }
                        }
                        None => warn!("fan-out: {} is not connected", address),
                    }
                }
                None => warn!("fan-out: no session for {}", address),
            }
        }

        let deadline = Instant::now() + timeout_per_try;
        while Instant::now() < deadline {
            for (i, address) in addresses.iter().enumerate() {
                if buffers[i].contains(';') {
                    continue;
                }
                if let Some(shared) = registry.get(*address).await {
                    let mut luminaire = shared.lock().await;
                    if let Some(transport) = luminaire.transport_mut() {
                        let chunk = transport.read_available();
                        if !chunk.is_empty() {
                            buffers[i].push_str(&chunk);
                        }
                    }
                }
            }
            if !has_pending(&buffers) {
                break;
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    let pending: Vec<Ipv4Addr> = addresses
        .iter()
        .enumerate()
        .filter(|(i, _)| !buffers[*i].contains(';'))
        .map(|(_, address)| *address)
        .collect();
    let replies: Vec<(Ipv4Addr, String)> = addresses.iter().copied().zip(buffers).collect();
    Ok(FanoutReport { pending, replies })
}

fn has_pending(buffers: &[String]) -> bool {
    buffers.iter().any(|buffer| !buffer.contains(';'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::config::ApiConfig;

    #[tokio::test]
    async fn per_address_length_mismatch_is_a_caller_error() {
        let registry = DeviceRegistry::new(ApiConfig::default());
        let addresses = vec![Ipv4Addr::new(127, 0, 0, 2), Ipv4Addr::new(127, 0, 0, 3)];
        let result = send_parallel(
            &registry,
            &addresses,
            FanoutCommand::PerAddress(vec!["DARK".to_string()]),
            1,
            Duration::from_millis(10),
        )
        .await;
        match result {
            Err(LumenError::CommandListMismatch {
                commands,
                addresses,
            }) => {
                assert_eq!(commands, 1);
                assert_eq!(addresses, 2);
            }
            other => panic!("expected CommandListMismatch, got {:?}", other.map(|r| r.pending)),
        }
    }
}
