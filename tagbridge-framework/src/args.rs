//! CLI argument parsing for connector binaries.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all connector binaries.
#[derive(Parser, Debug, Clone)]
#[command(about = "TagBridge connector")]
pub struct GatewayArgs {
    /// Path to configuration file (JSON5).
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl GatewayArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default. Invalid
    /// arguments print clap's usage message and exit.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::parse_from_with_default(std::env::args_os(), default_config)
            .unwrap_or_else(|e| e.exit())
    }

    /// Parse an explicit argument list with a default config path.
    pub fn parse_from_with_default<I, T>(
        args: I,
        default_config: &'static str,
    ) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .try_get_matches_from(args)?;

        <Self as clap::FromArgMatches>::from_arg_matches(&matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_path() {
        let args = GatewayArgs::parse_from_with_default(["tagbridge-opcda"], "opcda.json5").unwrap();
        assert_eq!(args.config, PathBuf::from("opcda.json5"));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_explicit_args() {
        let args = GatewayArgs::parse_from_with_default(
            [
                "tagbridge-opcda",
                "--config",
                "/etc/tagbridge/plant.json5",
                "--log-level",
                "debug",
            ],
            "opcda.json5",
        )
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/tagbridge/plant.json5"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        let result =
            GatewayArgs::parse_from_with_default(["tagbridge-opcda", "--bogus"], "opcda.json5");
        assert!(result.is_err());
    }
}
