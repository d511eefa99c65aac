//! Linux BLE advertising implementation using bluer (BlueZ)

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

pub struct LinuxAdvertiser {
    config: BleTransportConfig,
    /// Keeps the D-Bus connection open while the adapter is in use
    _session: Option<bluer::Session>,
    adapter: Option<bluer::Adapter>,
    advertisement_handle: Option<bluer::adv::AdvertisementHandle>,
}

impl LinuxAdvertiser {
    pub fn new(config: BleTransportConfig) -> Self {
        Self {
            config,
            _session: None,
            adapter: None,
            advertisement_handle: None,
        }
    }

    async fn initialize(&mut self) -> Result<bluer::Adapter, BleTransportError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let session = bluer::Session::new()
            .await
            .map_err(|e| BleTransportError::AdvertisingFailed(format!("BlueZ session: {e}")))?;

        let names = session
            .adapter_names()
            .await
            .map_err(|_| BleTransportError::AdapterNotAvailable)?;
        let name = names
            .get(self.config.adapter_index)
            .ok_or(BleTransportError::AdapterNotFound {
                index: self.config.adapter_index,
                count: names.len(),
            })?;
        let adapter = session
            .adapter(name)
            .map_err(|_| BleTransportError::AdapterNotAvailable)?;

        if !adapter.is_powered().await.unwrap_or(false) {
            return Err(BleTransportError::AdapterPoweredOff);
        }

        info!("Linux BLE adapter {} initialized for advertising", adapter.name());
        self._session = Some(session);
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    fn advertisement(&self, payload: &[u8]) -> bluer::adv::Advertisement {
        let mut service_data = BTreeMap::new();
        service_data.insert(self.config.service_uuid, payload.to_vec());

        bluer::adv::Advertisement {
            advertisement_type: bluer::adv::Type::Broadcast,
            service_uuids: BTreeSet::from([self.config.service_uuid]),
            service_data,
            discoverable: Some(false),
            local_name: None,
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for LinuxAdvertiser {
    async fn advertise(&mut self, payload: &[u8]) -> Result<(), BleTransportError> {
        let adapter = self.initialize().await?;

        // BlueZ allows few concurrent advertisements; release ours first
        if let Some(handle) = self.advertisement_handle.take() {
            drop(handle);
        }

        let handle = adapter
            .advertise(self.advertisement(payload))
            .await
            .map_err(|e| BleTransportError::AdvertisingFailed(e.to_string()))?;
        self.advertisement_handle = Some(handle);

        debug!("Advertising {} byte payload", payload.len());
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), BleTransportError> {
        if let Some(handle) = self.advertisement_handle.take() {
            drop(handle); // Dropping the handle stops advertising
            info!("Stopped BLE advertising");
        }
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        self.advertisement_handle.is_some()
    }
}
