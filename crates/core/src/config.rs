//! Controller configuration, fixed for the lifetime of the process.

use std::path::Path;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::result::Result;
use crate::store::Propagation;
use crate::types::ResourceType;

/// Label values are limited to 63 characters by the API server.
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Retry backoff bounds for the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackoffConfig {
    /// Delay after the first failure, in milliseconds.
    pub base_ms: u64,
    /// Upper bound for any delay, in milliseconds.
    pub max_ms: u64,
}

impl BackoffConfig {
    pub const fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub const fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 5,
            max_ms: 300_000,
        }
    }
}

/// Configuration of one mirroring controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MirrorConfig {
    /// Resource type to mirror.
    pub resource: ResourceType,
    /// Plural resource name; discovered from the API server when absent.
    #[serde(default)]
    pub plural: Option<String>,
    /// Appended to every mirrored object's name.
    #[serde(default)]
    pub remote_resource_suffix: String,
    /// Appended to every source namespace to form the remote namespace.
    #[serde(default)]
    pub local_namespace_suffix: String,
    /// Namespaces not starting with this prefix are ignored. Empty matches all.
    #[serde(default)]
    pub namespace_prefix: String,
    /// Secrets mirrored from every active source namespace.
    #[serde(default)]
    pub secret_names: Vec<String>,
    /// Appended to mirrored secret names. Empty keeps names identical.
    #[serde(default)]
    pub secret_name_suffix: String,
    /// Deletion propagation for mirror deletes.
    #[serde(default)]
    pub propagation: Propagation,
    /// Number of concurrent reconcile workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Identity recorded in provenance; defaults to `Kind.version.group`.
    #[serde(default)]
    pub controller_id: Option<String>,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

const fn default_concurrency() -> usize {
    1
}

impl MirrorConfig {
    /// Configuration with defaults for the given resource type.
    pub fn new(resource: ResourceType) -> Self {
        Self {
            resource,
            plural: None,
            remote_resource_suffix: String::new(),
            local_namespace_suffix: String::new(),
            namespace_prefix: String::new(),
            secret_names: Vec::new(),
            secret_name_suffix: String::new(),
            propagation: Propagation::default(),
            concurrency: default_concurrency(),
            controller_id: None,
            backoff: BackoffConfig::default(),
        }
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TomlParseFailed`] or [`Error::InvalidConfig`].
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|e| Error::TomlParseFailed {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not a valid configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        Self::from_toml_str(&source)
    }

    /// Identity recorded in provenance metadata.
    pub fn controller_id(&self) -> String {
        self.controller_id
            .clone()
            .unwrap_or_else(|| self.resource.to_string())
    }

    /// Check the configuration for values the engine cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.resource.kind.trim().is_empty() {
            return Err(Error::invalid_config("resource kind is required"));
        }
        if self.resource.version.trim().is_empty() {
            return Err(Error::invalid_config("resource version is required"));
        }
        if self.concurrency == 0 {
            return Err(Error::invalid_config("concurrency must be at least 1"));
        }
        if self.backoff.base_ms == 0 || self.backoff.base_ms > self.backoff.max_ms {
            return Err(Error::invalid_config(
                "backoff base must be positive and not exceed the maximum",
            ));
        }

        check_dns_fragment("namespace prefix", &self.namespace_prefix)?;
        check_dns_fragment("local namespace suffix", &self.local_namespace_suffix)?;
        check_dns_fragment("remote resource suffix", &self.remote_resource_suffix)?;
        check_dns_fragment("secret name suffix", &self.secret_name_suffix)?;

        if let Some(name) = self.secret_names.iter().find(|n| n.trim().is_empty()) {
            return Err(Error::invalid_config(format!("secret name '{name}' is empty")));
        }
        if let Some(name) = self.secret_names.iter().duplicates().next() {
            return Err(Error::invalid_config(format!(
                "secret name '{name}' is listed more than once"
            )));
        }

        let controller_id = self.controller_id();
        let valid_label = controller_id.len() <= MAX_LABEL_VALUE_LEN
            && controller_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && controller_id.starts_with(|c: char| c.is_ascii_alphanumeric())
            && controller_id.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !valid_label {
            return Err(Error::invalid_config(format!(
                "controller id '{controller_id}' is not a valid label value"
            )));
        }

        Ok(())
    }
}

fn check_dns_fragment(field: &str, value: &str) -> Result<()> {
    let valid = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_config(format!(
            "{field} '{value}' may only contain lowercase letters, digits and '-'"
        )))
    }
}
