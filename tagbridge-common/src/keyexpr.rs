//! Key expressions used by TagBridge on Zenoh.
//!
//! ```text
//! <prefix>/<connector>/<device>        device records
//! <prefix>/@/status                    connector status
//! <prefix>/@/health                    per-server health snapshot
//! <prefix>/@/attributes/<connector>    attribute update requests
//! <prefix>/@/rpc/<connector>           server-side RPC requests
//! ```

/// Default key expression prefix.
pub const KEY_PREFIX: &str = "tagbridge";

/// Replace every character Zenoh would reject or treat as a separator.
///
/// Connector and device names come from configuration and may contain
/// spaces, slashes or wildcards; each one must map to a single chunk.
///
/// ```
/// use tagbridge_common::keyexpr::sanitize_chunk;
///
/// assert_eq!(sanitize_chunk("OPC-DA connector abcde"), "OPC-DA_connector_abcde");
/// assert_eq!(sanitize_chunk("line/1*"), "line_1_");
/// ```
pub fn sanitize_chunk(raw: &str) -> String {
    let chunk: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if chunk.is_empty() {
        "_".to_string()
    } else {
        chunk
    }
}

/// Builder for the key expressions of one storage prefix.
#[derive(Debug, Clone)]
pub struct StorageKeys {
    prefix: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl StorageKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of the records a connector publishes for one device.
    ///
    /// ```
    /// use tagbridge_common::keyexpr::StorageKeys;
    ///
    /// let keys = StorageKeys::new("tagbridge/opcda");
    /// assert_eq!(keys.record("plant A", "boiler"), "tagbridge/opcda/plant_A/boiler");
    /// ```
    pub fn record(&self, connector: &str, device: &str) -> String {
        format!(
            "{}/{}/{}",
            self.prefix,
            sanitize_chunk(connector),
            sanitize_chunk(device)
        )
    }

    /// Wildcard over every record of a connector.
    pub fn connector_wildcard(&self, connector: &str) -> String {
        format!("{}/{}/**", self.prefix, sanitize_chunk(connector))
    }

    pub fn status(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    pub fn health(&self) -> String {
        format!("{}/@/health", self.prefix)
    }

    /// Control key on which attribute updates for a connector arrive.
    pub fn attributes(&self, connector: &str) -> String {
        format!("{}/@/attributes/{}", self.prefix, sanitize_chunk(connector))
    }

    /// Control key on which RPC requests for a connector arrive.
    pub fn rpc(&self, connector: &str) -> String {
        format!("{}/@/rpc/{}", self.prefix, sanitize_chunk(connector))
    }

    /// Split a record key back into `(connector, device)`.
    ///
    /// Returns `None` for control keys and keys outside this prefix.
    pub fn parse_record<'a>(&self, key: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let (connector, device) = rest.split_once('/')?;
        if connector == "@" || connector.is_empty() || device.is_empty() || device.contains('/')
        {
            return None;
        }
        Some((connector, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_keys() {
        let keys = StorageKeys::new("tagbridge/opcda/");

        assert_eq!(keys.prefix(), "tagbridge/opcda");
        assert_eq!(keys.status(), "tagbridge/opcda/@/status");
        assert_eq!(keys.health(), "tagbridge/opcda/@/health");
        assert_eq!(
            keys.attributes("plant A"),
            "tagbridge/opcda/@/attributes/plant_A"
        );
        assert_eq!(keys.rpc("plant A"), "tagbridge/opcda/@/rpc/plant_A");
        assert_eq!(keys.connector_wildcard("plant"), "tagbridge/opcda/plant/**");
    }

    #[test]
    fn test_parse_record() {
        let keys = StorageKeys::default();

        assert_eq!(
            keys.parse_record("tagbridge/plant/boiler"),
            Some(("plant", "boiler"))
        );
        assert_eq!(keys.parse_record("tagbridge/@/status"), None);
        assert_eq!(keys.parse_record("other/plant/boiler"), None);
        assert_eq!(keys.parse_record("tagbridge/plant/boiler/extra"), None);
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize_chunk(""), "_");
        assert_eq!(sanitize_chunk("a$b#c?"), "a_b_c_");
    }
}
