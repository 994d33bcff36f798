use anyhow::Result;
use clap::ArgMatches;
use config::{Config as ConfigBuilder, Environment};
use serde::{Deserialize, Serialize};

/// Command line configuration merged from defaults, `QUIRE_*` environment
/// variables and arguments.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QuireConfig {
    pub dev: DevConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DevConfig {
    /// Source directory of the site
    pub source: String,
    /// Host to bind to, empty for the platform default
    pub host: String,
    /// Base port, empty for the site config or the default
    pub port: String,
    /// Open browser automatically
    pub open: bool,
    /// Debug logging for quire crates
    pub debug: bool,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            source: ".".to_string(),
            host: String::new(),
            port: String::new(),
            open: false,
            debug: false,
        }
    }
}

impl DevConfig {
    pub fn host(&self) -> Option<String> {
        (!self.host.is_empty()).then(|| self.host.clone())
    }

    pub fn port(&self) -> Option<String> {
        (!self.port.is_empty()).then(|| self.port.clone())
    }
}

impl QuireConfig {
    /// Load configuration with cascading precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables (`QUIRE_DEV__PORT` and friends)
    /// 3. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        builder = builder.add_source(ConfigBuilder::try_from(&Self::default())?);

        builder = builder.add_source(
            Environment::with_prefix("QUIRE")
                .prefix_separator("_")
                .separator("__"),
        );

        // Only override with CLI args that are actually defined for this command
        for key in ["source", "host", "port"] {
            if let Some(value) = args.try_get_one::<String>(key).unwrap_or(None) {
                builder = builder.set_override(format!("dev.{key}"), value.as_str())?;
            }
        }
        for flag in ["open", "debug"] {
            if args.try_get_one::<bool>(flag).unwrap_or(None) == Some(&true) {
                builder = builder.set_override(format!("dev.{flag}"), true)?;
            }
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}
