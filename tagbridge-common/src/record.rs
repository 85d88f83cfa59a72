//! Tag readings and the normalized device record built from them.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::{SystemTime, UNIX_EPOCH};

/// Value carried by a tag reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TagValue {
    /// No value (the server returned null, usually with a bad quality).
    Empty,

    /// Boolean value.
    Boolean(bool),

    /// Integer value.
    Integer(i64),

    /// Floating point value.
    Float(f64),

    /// Text value.
    Text(String),

    /// Array item (VT_ARRAY), reported as a list of values.
    Array(Vec<TagValue>),
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Boolean(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<String> for TagValue {
    fn from(v: String) -> Self {
        TagValue::Text(v)
    }
}

impl From<Vec<TagValue>> for TagValue {
    fn from(v: Vec<TagValue>) -> Self {
        TagValue::Array(v)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Text(v.to_string())
    }
}

/// Validity marker reported by the OPC server for a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quality {
    Good,
    Uncertain,
    Bad,
    /// The server could not read the tag at all.
    Error,
    /// Any marker the server reports that is not listed above.
    #[serde(other)]
    Unknown,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "Good",
            Quality::Uncertain => "Uncertain",
            Quality::Bad => "Bad",
            Quality::Error => "Error",
            Quality::Unknown => "Unknown",
        }
    }

    /// Whether the reading must be discarded before conversion.
    pub fn is_error(&self) -> bool {
        matches!(self, Quality::Error)
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One raw result of a batched tag read.
///
/// On the wire a reading is the 4-tuple `[tag, value, quality, timestamp]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Full tag name, `<device>.<path>`.
    pub tag: String,
    pub value: TagValue,
    pub quality: Quality,
    /// Timestamp exactly as reported by the server, if any.
    pub timestamp: Option<String>,
}

impl Reading {
    /// Create a reading with a `Good` quality and no timestamp.
    pub fn good(tag: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            tag: tag.into(),
            value: value.into(),
            quality: Quality::Good,
            timestamp: None,
        }
    }

    /// Set the quality marker.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Set the server timestamp.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// The path of this reading under `device`, or `None` when the tag
    /// belongs to another device.
    ///
    /// ```
    /// use tagbridge_common::record::Reading;
    ///
    /// let reading = Reading::good("boiler.temp.inlet", 21.5);
    /// assert_eq!(reading.path_for("boiler"), Some("temp.inlet"));
    /// assert_eq!(reading.path_for("pump"), None);
    /// ```
    pub fn path_for(&self, device: &str) -> Option<&str> {
        tag_path(&self.tag, device)
    }
}

/// Strip `<device>.` from a tag name.
pub fn tag_path<'a>(tag: &'a str, device: &str) -> Option<&'a str> {
    tag.strip_prefix(device)?.strip_prefix('.')
}

/// Build the tag name of `path` under `device`.
pub fn tag_name(device: &str, path: &str) -> String {
    format!("{}.{}", device, path)
}

#[derive(Serialize, Deserialize)]
struct WireReading(String, TagValue, Quality, Option<String>);

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireReading(
            self.tag.clone(),
            self.value.clone(),
            self.quality,
            self.timestamp.clone(),
        )
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Reading {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let WireReading(tag, value, quality, timestamp) = WireReading::deserialize(deserializer)?;
        Ok(Self {
            tag,
            value,
            quality,
            timestamp,
        })
    }
}

/// A single `{key: value}` entry of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub key: String,
    pub value: TagValue,
}

impl DataPoint {
    pub fn new(key: impl Into<String>, value: impl Into<TagValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Serialize for DataPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.key, &self.value)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for DataPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = std::collections::BTreeMap::<String, TagValue>::deserialize(deserializer)?;
        let mut entries = map.into_iter();
        match (entries.next(), entries.next()) {
            (Some((key, value)), None) => Ok(Self { key, value }),
            _ => Err(serde::de::Error::custom(
                "data point must contain exactly one key",
            )),
        }
    }
}

/// The normalized record forwarded to storage for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub device_name: String,
    pub device_type: String,
    #[serde(default)]
    pub attributes: Vec<DataPoint>,
    #[serde(default)]
    pub telemetry: Vec<DataPoint>,
}

impl ConversionResult {
    /// Create an empty record for a device.
    pub fn new(device_name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            device_type: device_type.into(),
            attributes: Vec::new(),
            telemetry: Vec::new(),
        }
    }

    /// Whether the record carries neither attributes nor telemetry.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.telemetry.is_empty()
    }

    /// Number of data points in the record.
    pub fn len(&self) -> usize {
        self.attributes.len() + self.telemetry.len()
    }

    /// Look up a telemetry value by key.
    pub fn telemetry_value(&self, key: &str) -> Option<&TagValue> {
        self.telemetry
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
    }

    /// Look up an attribute value by key.
    pub fn attribute_value(&self, key: &str) -> Option<&TagValue> {
        self.attributes
            .iter()
            .find(|p| p.key == key)
            .map(|p| &p.value)
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
