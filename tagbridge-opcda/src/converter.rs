//! Conversion of raw OPC readings into device records.

use std::collections::HashMap;
use std::fmt;

use tagbridge_common::{ConversionResult, DataPoint, Reading};
use thiserror::Error;

use crate::config::{DeviceConfig, TagMapping};

/// Name the default converter is registered under.
pub const DEFAULT_CONVERTER: &str = "OpcDaUplinkConverter";

/// A reading batch could not be turned into a record.
#[derive(Debug, Error)]
#[error("Conversion failed for device '{device}': {message}")]
pub struct ConvertError {
    pub device: String,
    pub message: String,
}

impl ConvertError {
    pub fn new(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            message: message.into(),
        }
    }
}

/// Converts the readings of one device into a record.
///
/// Implementations must be pure: the same inputs give the same record, and
/// nothing is carried over between calls.
pub trait UplinkConverter: Send + Sync {
    fn convert(
        &self,
        device: &DeviceConfig,
        readings: &[Reading],
    ) -> Result<ConversionResult, ConvertError>;
}

/// The default converter: maps configured tag paths to record keys.
///
/// Readings with an `Error` quality are dropped, as are readings of other
/// devices and paths no mapping mentions. Device name and type come from the
/// configuration the converter was built for.
#[derive(Debug, Clone)]
pub struct OpcDaUplinkConverter {
    device_name: String,
    device_type: String,
}

impl OpcDaUplinkConverter {
    pub fn new(device: &DeviceConfig) -> Self {
        Self {
            device_name: device.name.clone(),
            device_type: device.device_type.clone(),
        }
    }
}

/// One entry per mapping whose path has a usable reading, in mapping order.
fn mapped_points(mappings: &[TagMapping], values: &HashMap<&str, &Reading>) -> Vec<DataPoint> {
    mappings
        .iter()
        .filter_map(|m| {
            values
                .get(m.path.as_str())
                .map(|r| DataPoint::new(m.key.clone(), r.value.clone()))
        })
        .collect()
}

impl UplinkConverter for OpcDaUplinkConverter {
    fn convert(
        &self,
        device: &DeviceConfig,
        readings: &[Reading],
    ) -> Result<ConversionResult, ConvertError> {
        // first usable reading per path
        let mut values: HashMap<&str, &Reading> = HashMap::new();
        for reading in readings.iter().filter(|r| !r.quality.is_error()) {
            if let Some(path) = reading.path_for(&self.device_name) {
                values.entry(path).or_insert(reading);
            }
        }

        let mut result = ConversionResult::new(&self.device_name, &self.device_type);
        result.attributes = mapped_points(&device.attributes, &values);
        result.telemetry = mapped_points(&device.telemetry, &values);
        Ok(result)
    }
}

/// Builds a converter bound to one device.
pub type ConverterFactory = fn(&DeviceConfig) -> Box<dyn UplinkConverter>;

fn opcda_uplink(device: &DeviceConfig) -> Box<dyn UplinkConverter> {
    Box::new(OpcDaUplinkConverter::new(device))
}

/// Converters available to device bindings, by name.
#[derive(Clone)]
pub struct ConverterRegistry {
    factories: HashMap<String, ConverterFactory>,
}

impl ConverterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with [`OpcDaUplinkConverter`] registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(DEFAULT_CONVERTER, opcda_uplink);
        registry
    }

    /// Register a factory, replacing any previous one of the same name.
    pub fn register(&mut self, name: impl Into<String>, factory: ConverterFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// Look up a factory. `None` selects the default converter.
    pub fn resolve(&self, name: Option<&str>) -> Option<ConverterFactory> {
        self.factories
            .get(name.unwrap_or(DEFAULT_CONVERTER))
            .copied()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("converters", &self.names())
            .finish()
    }
}
