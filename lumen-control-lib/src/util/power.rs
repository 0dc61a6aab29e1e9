//! MQTT-backed power cycling.
//!
//! Lab installations put luminaires behind a switched outlet bank whose
//! controller listens on an MQTT broker. This helper publishes the on/off
//! messages that bank understands. It is an auxiliary channel; nothing in
//! the command path depends on it.

use std::time::Duration;

use anyhow::Result;
use log::{debug, warn};
use rumqttc::{AsyncClient, MqttOptions, QoS};

pub const DEFAULT_BROKER_PORT: u16 = 1883;

const POWER_TOPIC: &str = "/power";

pub struct PowerCycler {
    client: AsyncClient,
}

impl PowerCycler {
    /// Connects to the broker fronting the outlet bank. The MQTT event
    /// loop runs on its own task for the life of the process; publishes do
    /// not flush without it.
    pub async fn connect(broker: &str, port: u16) -> Result<Self> {
        let mut options = MqttOptions::new("lumen-control-power", broker, port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut event_loop) = AsyncClient::new(options, 16);
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => debug!("mqtt event: {:?}", event),
                    Err(e) => {
                        warn!("mqtt event loop stopped: {}", e);
                        break;
                    }
                }
            }
        });
        Ok(PowerCycler { client })
    }

    pub async fn power_on(&self, outlet: u8) -> Result<()> {
        self.publish(format!("{},on", outlet)).await
    }

    pub async fn power_off(&self, outlet: u8) -> Result<()> {
        self.publish(format!("{},off", outlet)).await
    }

    async fn publish(&self, payload: String) -> Result<()> {
        self.client
            .publish(POWER_TOPIC, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}
