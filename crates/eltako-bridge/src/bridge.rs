use std::sync::Arc;

use tokio::sync::mpsc;

use tracing::{error, info, warn};

use eltako::actor::{PositionUpdate, ShadingActor};
use eltako::config::{Config, Device};
use eltako::discovery::{Discovery, DiscoveryEvent};
use eltako::error::Result;
use eltako::registry::ActorRegistry;

/// The startup context of the bridge.
///
/// It ties the configuration, the shared actor registry, and the
/// position update channel together and is passed explicitly to every
/// component instead of living in global state.
pub struct Bridge {
    config: Config,
    registry: Arc<ActorRegistry>,
    updates: mpsc::Sender<PositionUpdate>,
}

impl Bridge {
    /// Creates a [`Bridge`] context.
    pub fn new(
        config: Config,
        registry: Arc<ActorRegistry>,
        updates: mpsc::Sender<PositionUpdate>,
    ) -> Self {
        Self {
            config,
            registry,
            updates,
        }
    }

    /// Starts every configured device that already has an address.
    ///
    /// Devices without an address stay pending until discovery
    /// resolves their serial number.
    ///
    /// # Errors
    ///
    /// The first actor that fails to initialize aborts startup.
    pub async fn start_actors(&self) -> Result<()> {
        for device in &self.config.eltako.devices {
            if device.ip.is_none() {
                info!("Skipping actor {device}, waiting on discovery");
                continue;
            }
            self.start_actor(device.clone()).await?;
        }
        Ok(())
    }

    /// Starts discovery when at least one device is configured with a
    /// serial number.
    ///
    /// # Errors
    ///
    /// An error is returned when the discovery service cannot be
    /// created.
    pub fn start_discovery(self: &Arc<Self>) -> Result<()> {
        if !self
            .config
            .eltako
            .devices
            .iter()
            .any(|device| device.serial.is_some())
        {
            info!("Discovery not started, as no serial number is specified in the configuration");
            return Ok(());
        }

        let (tx, rx) = flume::unbounded();
        let discovery = Arc::new(Discovery::new(tx));
        discovery.start()?;

        let bridge = Arc::clone(self);
        drop(tokio::spawn(async move {
            bridge.handle_discovery_events(rx).await;
        }));

        Ok(())
    }

    async fn start_actor(&self, device: Device) -> Result<()> {
        info!("Initializing actor {device}");
        let actor = Arc::new(ShadingActor::connect(device, self.updates.clone()).await?);
        actor.start(self.config.eltako.polling_interval);
        self.registry.add_actor(actor);
        Ok(())
    }

    async fn handle_discovery_events(&self, events: flume::Receiver<DiscoveryEvent>) {
        while let Ok(event) = events.recv_async().await {
            match event {
                DiscoveryEvent::Added(announcement) => {
                    let Some(device) = self
                        .config
                        .eltako
                        .device_by_serial(&announcement.serial)
                    else {
                        warn!(
                            "Cannot register actor, no device configured with serial `{}`",
                            announcement.serial
                        );
                        continue;
                    };

                    // Only configured-but-not-yet-addressed devices are
                    // resolved through discovery.
                    if device.ip.is_some()
                        || self
                            .registry
                            .get_actor_by_serial(&announcement.serial)
                            .is_some()
                    {
                        continue;
                    }

                    let mut device = device.clone();
                    device.ip = Some(announcement.address.to_string());
                    if let Err(e) = self.start_actor(device).await {
                        error!("Failed to start discovered actor: {e}");
                    }
                }
                DiscoveryEvent::Updated(announcement) => warn!(
                    "Actor updated (not supported): {} at {}:{}",
                    announcement.instance, announcement.address, announcement.port
                ),
                DiscoveryEvent::Removed(announcement) => warn!(
                    "Actor removed (not supported): {} at {}:{}",
                    announcement.instance, announcement.address, announcement.port
                ),
            }
        }
    }
}
