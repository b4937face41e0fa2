use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::stream::ClientRegistry;
use crate::video::StreamSession;

/// Application-wide state shared across handlers
///
/// All device operations go through `session`; handlers never touch a
/// device or relay directly.
pub struct AppState {
    /// Configuration in effect (file merged with CLI overrides)
    pub config: Arc<AppConfig>,
    /// Stream session controller and frame feed
    pub session: Arc<StreamSession>,
    /// Capture devices found at startup, by index
    pub devices: BTreeMap<u32, String>,
    /// Connected MJPEG clients
    pub clients: Arc<ClientRegistry>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        session: Arc<StreamSession>,
        devices: BTreeMap<u32, String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            session,
            devices,
            clients: Arc::new(ClientRegistry::new()),
        })
    }

    /// Display name of device `id`, if it was found at startup
    pub fn device_name(&self, id: u32) -> Option<&str> {
        self.devices.get(&id).map(String::as_str)
    }
}
