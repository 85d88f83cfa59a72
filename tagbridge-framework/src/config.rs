//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::{GatewayError, Result};
use crate::{Format, LoggingConfig, ZenohConfig};

/// Trait for gateway configuration types.
///
/// A connector binary implements this for its top-level configuration
/// struct to get JSON5 loading, validation and access to the settings the
/// runner needs (storage session, logging, key prefix).
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use tagbridge_framework::{GatewayConfig, LoggingConfig, ZenohConfig};
///
/// #[derive(Debug, Deserialize)]
/// pub struct MyGatewayConfig {
///     pub zenoh: ZenohConfig,
///     pub logging: LoggingConfig,
///     pub my_protocol: MyProtocolConfig,
/// }
///
/// impl GatewayConfig for MyGatewayConfig {
///     fn zenoh(&self) -> &ZenohConfig {
///         &self.zenoh
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn key_prefix(&self) -> &str {
///         &self.my_protocol.key_prefix
///     }
/// }
/// ```
pub trait GatewayConfig: Sized + DeserializeOwned {
    /// Get the Zenoh configuration of the storage session.
    fn zenoh(&self) -> &ZenohConfig;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Get the key expression prefix records are stored under.
    fn key_prefix(&self) -> &str;

    /// Payload encoding for stored records.
    fn serialization(&self) -> Format {
        Format::Json
    }

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a JSON5 file and validate it.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(GatewayError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let config: Self = tagbridge_common::load_config(path)?;
        config
            .zenoh()
            .validate()
            .map_err(|e| GatewayError::validation(e.to_string()))?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a JSON5 string and validate it.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = tagbridge_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        zenoh: ZenohConfig,
        #[serde(default)]
        logging: LoggingConfig,
        key_prefix: String,
    }

    impl GatewayConfig for TestConfig {
        fn zenoh(&self) -> &ZenohConfig {
            &self.zenoh
        }

        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn key_prefix(&self) -> &str {
            &self.key_prefix
        }

        fn validate(&self) -> Result<()> {
            if self.key_prefix.is_empty() {
                return Err(GatewayError::validation("key_prefix cannot be empty"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(GatewayError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_parse_runs_validation() {
        let ok = TestConfig::parse(r#"{ key_prefix: "tagbridge/test" }"#).unwrap();
        assert_eq!(ok.key_prefix(), "tagbridge/test");
        assert_eq!(ok.serialization(), Format::Json);

        let err = TestConfig::parse(r#"{ key_prefix: "" }"#).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigValidation(_)));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = TestConfig::parse("{ key_prefix: ").unwrap_err();
        assert!(matches!(err, GatewayError::ConfigParse(_)));
    }
}
