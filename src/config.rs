use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::defaults::{self, ExecutionDefaults};
use crate::error::Error;
use crate::options::BulkCopyOptions;
use crate::provider::ProviderRegistry;

/// Overrides for [`ExecutionDefaults`]; unset fields keep their current value.
///
/// Signed integers so that non-positive values are reported instead of
/// failing to parse.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DefaultsSettings {
    pub batch_size: Option<i64>,
    /// Flags text form, e.g. `"KEEP_IDENTITY | TABLE_LOCK"`.
    pub bulk_copy_options: Option<BulkCopyOptions>,
    pub timeout_secs: Option<i64>,
    pub notify_after: Option<i64>,
}

/// Settings for bulkinsert, usually read from `bulkinsert.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub defaults: DefaultsSettings,
    /// Extra connection identities mapped to an already registered key.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overlay these settings onto `base`, validating every value.
    pub fn merged_defaults(&self, base: ExecutionDefaults) -> Result<ExecutionDefaults> {
        let d = &self.defaults;
        let mut out = base;
        if let Some(batch_size) = d.batch_size {
            if batch_size <= 0 {
                bail!("defaults.batch_size must be positive, got {}", batch_size);
            }
            out.batch_size = usize::try_from(batch_size).context("defaults.batch_size is too large")?;
        }
        if let Some(options) = d.bulk_copy_options {
            out.bulk_copy_options = options;
        }
        if let Some(timeout_secs) = d.timeout_secs {
            if timeout_secs < 0 {
                bail!("defaults.timeout_secs must not be negative, got {}", timeout_secs);
            }
            out.timeout_secs = timeout_secs as u64;
        }
        if let Some(notify_after) = d.notify_after {
            if notify_after < 0 {
                bail!("defaults.notify_after must not be negative, got {}", notify_after);
            }
            out.notify_after = notify_after as u64;
        }
        Ok(out)
    }

    /// Register the aliases on `registry`. Nothing is registered unless every
    /// target already is.
    pub fn apply_aliases(&self, registry: &ProviderRegistry) -> Result<()> {
        for (alias, target) in &self.aliases {
            if !registry.contains(target.as_str()) {
                return Err(Error::ProviderNotFound(target.as_str().into()))
                    .with_context(|| format!("aliasing '{}' to '{}'", alias, target));
            }
        }
        for (alias, target) in &self.aliases {
            registry
                .register_alias(alias.as_str(), target.as_str())
                .with_context(|| format!("aliasing '{}' to '{}'", alias, target))?;
        }
        Ok(())
    }

    /// Install the defaults and aliases process-wide.
    pub fn apply(&self) -> Result<()> {
        let merged = self.merged_defaults(defaults::defaults())?;
        self.apply_aliases(crate::provider::registry())?;
        defaults::set_defaults(merged);
        Ok(())
    }
}

/// Load settings from bulkinsert.toml in the working directory
pub fn load_settings() -> Result<Option<Settings>> {
    load_settings_from_path(Path::new("bulkinsert.toml"))
}

/// Load settings from a specific path
pub fn load_settings_from_path(path: &Path) -> Result<Option<Settings>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let settings = Settings::from_toml_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(settings))
}
