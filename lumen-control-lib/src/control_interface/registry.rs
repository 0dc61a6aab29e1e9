//! Caller-owned session registry.
//!
//! Maps addresses to live [`Luminaire`] sessions so repeated `connect`
//! calls reuse an existing connection instead of fighting the device for a
//! second one. The registry is plain state owned by whoever constructs it;
//! nothing here is global.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use log::debug;
use tokio::sync::Mutex;

use crate::control_interface::Luminaire;
use crate::error::Result;
use crate::util::config::ApiConfig;

pub struct DeviceRegistry {
    config: ApiConfig,
    sessions: Mutex<HashMap<Ipv4Addr, Arc<Mutex<Luminaire>>>>,
}

impl DeviceRegistry {
    pub fn new(config: ApiConfig) -> Self {
        DeviceRegistry {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Connects to a luminaire, reusing the existing session when one is
    /// already live. Two tasks racing to connect the same address both get
    /// a working session; the loser's duplicate is dropped.
    pub async fn connect(&self, address: Ipv4Addr) -> Result<Arc<Mutex<Luminaire>>> {
        let existing = self.sessions.lock().await.get(&address).cloned();
        if let Some(shared) = existing {
            let mut luminaire = shared.lock().await;
            if luminaire.is_connected() {
                debug!("reusing live session for {}", address);
            } else {
                luminaire.connect().await?;
            }
            drop(luminaire);
            return Ok(shared);
        }

        let mut luminaire = Luminaire::new(address, self.config.clone());
        luminaire.connect().await?;
        let shared = Arc::new(Mutex::new(luminaire));
        self.sessions
            .lock()
            .await
            .insert(address, Arc::clone(&shared));
        Ok(shared)
    }

    /// Registers an already-connected luminaire, e.g. one produced by
    /// discovery. Replaces any previous session for the same address.
    pub async fn adopt(&self, luminaire: Luminaire) -> Arc<Mutex<Luminaire>> {
        let address = luminaire.address();
        let shared = Arc::new(Mutex::new(luminaire));
        self.sessions
            .lock()
            .await
            .insert(address, Arc::clone(&shared));
        shared
    }

    pub async fn get(&self, address: Ipv4Addr) -> Option<Arc<Mutex<Luminaire>>> {
        self.sessions.lock().await.get(&address).cloned()
    }

    pub async fn addresses(&self) -> Vec<Ipv4Addr> {
        let mut addresses: Vec<Ipv4Addr> = self.sessions.lock().await.keys().copied().collect();
        addresses.sort();
        addresses
    }

    /// Disconnects and drops one session. Returns whether one existed.
    pub async fn disconnect(&self, address: Ipv4Addr) -> bool {
        let removed = self.sessions.lock().await.remove(&address);
        match removed {
            Some(shared) => {
                shared.lock().await.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Disconnects every session. Returns how many were closed.
    pub async fn disconnect_all(&self) -> usize {
        let drained: Vec<_> = self.sessions.lock().await.drain().collect();
        let mut count = 0;
        for (_, shared) in drained {
            shared.lock().await.disconnect().await;
            count += 1;
        }
        count
    }
}
