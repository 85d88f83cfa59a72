//! Device registry: configured devices bound to their converters.

use std::collections::{HashMap, HashSet};

use tagbridge_common::{ConversionResult, Reading};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::{DeviceConfig, ServerEndpoint};
use crate::converter::{ConvertError, ConverterRegistry, DEFAULT_CONVERTER, UplinkConverter};

/// Faults raised while binding devices.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No devices configured")]
    MissingDevices,

    #[error("Device '{device}': unknown converter '{converter}'")]
    UnknownConverter { device: String, converter: String },

    #[error("Duplicate device name '{0}'")]
    DuplicateDevice(String),
}

/// A device with the converter it was bound to.
pub struct BoundDevice {
    config: DeviceConfig,
    converter: Box<dyn UplinkConverter>,
}

impl BoundDevice {
    pub fn new(config: DeviceConfig, converter: Box<dyn UplinkConverter>) -> Self {
        Self { config, converter }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn server_id(&self) -> &str {
        &self.config.server_id
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Convert the device's share of a server batch.
    ///
    /// Readings of other devices are filtered out before the converter runs.
    pub fn convert(&self, batch: &[Reading]) -> Result<ConversionResult, ConvertError> {
        let own: Vec<Reading> = batch
            .iter()
            .filter(|r| r.path_for(&self.config.name).is_some())
            .cloned()
            .collect();
        self.converter.convert(&self.config, &own)
    }
}

impl std::fmt::Debug for BoundDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundDevice")
            .field("name", &self.config.name)
            .field("server_id", &self.config.server_id)
            .finish()
    }
}

/// Bound devices, in configuration order.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<BoundDevice>,
    index: HashMap<String, usize>,
    fault: Option<RegistryError>,
}

impl DeviceRegistry {
    /// Bind every configured device to its converter.
    ///
    /// A missing device list is fatal. An unknown converter or a duplicate
    /// name stops binding: devices bound before it are kept, the rest are
    /// abandoned and the fault is available from [`fault`](Self::fault).
    /// Devices on unknown servers are bound with a warning and never polled.
    pub fn bind_all(
        devices: Option<&[DeviceConfig]>,
        converters: &ConverterRegistry,
        servers: &[ServerEndpoint],
    ) -> Result<Self, RegistryError> {
        let devices = devices.ok_or(RegistryError::MissingDevices)?;
        let mut registry = Self::default();

        for device in devices {
            if let Err(e) = registry.bind(device, converters) {
                error!(
                    device = %device.name,
                    error = %e,
                    abandoned = devices.len() - registry.len(),
                    "Device binding failed; remaining devices are not bound"
                );
                registry.fault = Some(e);
                break;
            }

            if !servers.iter().any(|s| s.server_id == device.server_id) {
                warn!(
                    device = %device.name,
                    server = %device.server_id,
                    "Device references an unknown server and will not be polled"
                );
            }
        }

        Ok(registry)
    }

    fn bind(
        &mut self,
        device: &DeviceConfig,
        converters: &ConverterRegistry,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&device.name) {
            return Err(RegistryError::DuplicateDevice(device.name.clone()));
        }

        let factory = converters
            .resolve(device.converter.as_deref())
            .ok_or_else(|| RegistryError::UnknownConverter {
                device: device.name.clone(),
                converter: device
                    .converter
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONVERTER.to_string()),
            })?;

        debug!(
            device = %device.name,
            converter = device.converter.as_deref().unwrap_or(DEFAULT_CONVERTER),
            "Device bound"
        );

        self.index.insert(device.name.clone(), self.devices.len());
        self.devices
            .push(BoundDevice::new(device.clone(), factory(device)));
        Ok(())
    }

    /// The binding fault that stopped [`bind_all`](Self::bind_all), if any.
    pub fn fault(&self) -> Option<&RegistryError> {
        self.fault.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<&BoundDevice> {
        self.index.get(name).map(|&i| &self.devices[i])
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundDevice> {
        self.devices.iter()
    }

    /// Devices read from `server_id`, in configuration order.
    pub fn devices_for_server<'a>(
        &'a self,
        server_id: &'a str,
    ) -> impl Iterator<Item = &'a BoundDevice> + 'a {
        self.devices
            .iter()
            .filter(move |d| d.server_id() == server_id)
    }

    /// The batched tag list of one server: every device on it, in order,
    /// attributes then telemetry. Each tag appears once.
    pub fn tag_list(&self, server_id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.devices_for_server(server_id)
            .flat_map(|d| d.config().tags())
            .filter(|tag| seen.insert(tag.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagbridge_common::{Quality, TagValue};

    fn servers() -> Vec<ServerEndpoint> {
        ["S1", "S2"]
            .iter()
            .map(|id| ServerEndpoint {
                server_id: id.to_string(),
                opc_proxy_ip: "127.0.0.1".to_string(),
                opc_proxy_port: 7766,
                opc_server: "Sim".to_string(),
                collect_interval: 1,
            })
            .collect()
    }

    fn devices() -> Vec<DeviceConfig> {
        vec![
            DeviceConfig::new("A", "S1")
                .with_attribute("model", "model")
                .with_telemetry("temp", "tempC"),
            DeviceConfig::new("B", "S1").with_telemetry("flow", "flow"),
            DeviceConfig::new("C", "S2").with_telemetry("level", "level"),
        ]
    }

    #[test]
    fn test_missing_devices() {
        let err = DeviceRegistry::bind_all(None, &ConverterRegistry::with_defaults(), &servers())
            .unwrap_err();
        assert_eq!(err, RegistryError::MissingDevices);
    }

    #[test]
    fn test_bind_all_and_tag_lists() {
        let devices = devices();
        let registry =
            DeviceRegistry::bind_all(Some(devices.as_slice()), &ConverterRegistry::with_defaults(), &servers())
                .unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.fault().is_none());
        assert_eq!(registry.tag_list("S1"), ["A.model", "A.temp", "B.flow"]);
        assert_eq!(registry.tag_list("S2"), ["C.level"]);
        assert!(registry.tag_list("S3").is_empty());

        let names: Vec<&str> = registry.devices_for_server("S1").map(|d| d.name()).collect();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn test_tag_list_without_repeats() {
        let devices = vec![
            DeviceConfig::new("A", "S1")
                .with_attribute("temp", "tempAttr")
                .with_telemetry("temp", "tempC")
                .with_telemetry("x.y", "xy"),
            DeviceConfig::new("A.x", "S1").with_telemetry("y", "y"),
        ];
        let registry = DeviceRegistry::bind_all(
            Some(devices.as_slice()),
            &ConverterRegistry::with_defaults(),
            &servers(),
        )
        .unwrap();

        assert_eq!(registry.tag_list("S1"), ["A.temp", "A.x.y"]);
    }

    #[test]
    fn test_unknown_converter_abandons_remaining() {
        let mut devices = devices();
        devices[1].converter = Some("MissingConverter".to_string());

        let registry =
            DeviceRegistry::bind_all(Some(devices.as_slice()), &ConverterRegistry::with_defaults(), &servers())
                .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("A").is_some());
        assert!(registry.get("C").is_none());
        assert_eq!(
            registry.fault(),
            Some(&RegistryError::UnknownConverter {
                device: "B".to_string(),
                converter: "MissingConverter".to_string(),
            })
        );
    }

    #[test]
    fn test_duplicate_device_abandons_remaining() {
        let mut devices = devices();
        devices.insert(1, DeviceConfig::new("A", "S2"));

        let registry =
            DeviceRegistry::bind_all(Some(devices.as_slice()), &ConverterRegistry::with_defaults(), &servers())
                .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.fault(),
            Some(&RegistryError::DuplicateDevice("A".to_string()))
        );
        assert_eq!(registry.get("A").unwrap().server_id(), "S1");
    }

    #[test]
    fn test_unknown_server_is_bound() {
        let devices = vec![DeviceConfig::new("Orphan", "S9").with_telemetry("x", "x")];
        let registry =
            DeviceRegistry::bind_all(Some(devices.as_slice()), &ConverterRegistry::with_defaults(), &servers())
                .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.fault().is_none());
    }

    #[test]
    fn test_convert_uses_own_readings() {
        let devices = devices();
        let registry =
            DeviceRegistry::bind_all(Some(devices.as_slice()), &ConverterRegistry::with_defaults(), &servers())
                .unwrap();

        let batch = vec![
            Reading::good("A.model", "X-200"),
            Reading::good("A.temp", 21.5),
            Reading::good("B.flow", 3_i64),
            Reading::good("B.flow", 4_i64).with_quality(Quality::Error),
        ];

        let a = registry.get("A").unwrap().convert(&batch).unwrap();
        assert_eq!(a.len(), 2);

        let b = registry.get("B").unwrap().convert(&batch).unwrap();
        assert_eq!(b.device_name, "B");
        assert_eq!(b.telemetry.len(), 1);
        assert_eq!(b.telemetry_value("flow"), Some(&TagValue::Integer(3)));
    }
}
