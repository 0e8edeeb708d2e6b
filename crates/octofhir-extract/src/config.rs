use serde::{Deserialize, Serialize};

use crate::Result;
use crate::projector::UnsupportedTypePolicy;
use crate::registry::SchemaRegistry;
use crate::schema::SchemaDefinition;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Extra schemas registered on top of the built-in ones.
    /// A schema for an already supported type replaces the built-in one.
    #[serde(default)]
    pub schemas: Vec<SchemaDefinition>,
}

impl ExtractConfig {
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.pipeline.concurrency == 0 {
            return Err("pipeline.concurrency must be > 0".into());
        }
        if self.pipeline.page_size == 0 {
            return Err("pipeline.page_size must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        for schema in &self.schemas {
            if let Err(e) = schema.compile() {
                return Err(format!("schemas: {e}"));
            }
        }
        Ok(())
    }

    /// Built-in registry extended with the configured schemas.
    pub fn build_registry(&self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::builtin()?;
        registry.extend_from_definitions(&self.schemas)?;
        Ok(registry)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// What to emit for resource types without a schema.
    #[serde(default)]
    pub unsupported_types: UnsupportedTypePolicy,
    /// Maximum number of documents projected at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Documents requested from the source per fetch.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Add the derived `age` column to Patient records.
    #[serde(default = "default_true")]
    pub derive_age: bool,
}

fn default_concurrency() -> usize {
    8
}
fn default_page_size() -> usize {
    256
}
fn default_true() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            unsupported_types: UnsupportedTypePolicy::default(),
            concurrency: default_concurrency(),
            page_size: default_page_size(),
            derive_age: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::ExtractConfig;
    use crate::{Error, Result};
    use ::config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-extract.toml";

    pub fn load_config(path: Option<&str>) -> Result<ExtractConfig> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., OCTOFHIR_EXTRACT__PIPELINE__CONCURRENCY=4
        builder = builder.add_source(
            Environment::with_prefix("OCTOFHIR_EXTRACT")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder.build()?;
        let merged: ExtractConfig = cfg.try_deserialize()?;
        merged.validate().map_err(Error::Config)?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(path: Option<P>) -> Result<ExtractConfig> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
