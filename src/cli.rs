//! CLI definitions using clap.

use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use kubemirror_core::{Error, MirrorConfig, ResourceType, Result};

/// kubemirror - mirror one resource type into a remote cluster
#[derive(Parser, Debug)]
#[command(name = "kubemirror")]
#[command(disable_version_flag = true)]
#[command(about = "Mirror one namespaced resource type, and selected secrets, into a remote cluster")]
#[command(
    long_about = "Watches a namespaced resource type in the cluster it runs in and keeps a copy of every in-scope object in a remote cluster, together with a fixed set of secrets from each source namespace."
)]
pub struct Cli {
    /// TOML configuration file; replaces the resource and naming flags
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// API group of the mirrored type; empty for the core group
    #[arg(long, default_value = "")]
    pub group: String,

    /// API version of the mirrored type (not the binary's version)
    #[arg(long, required_unless_present = "config")]
    pub version: Option<String>,

    /// Kind of the mirrored type
    #[arg(long, required_unless_present = "config")]
    pub kind: Option<String>,

    /// Plural resource name; discovered from the API server when omitted
    #[arg(long)]
    pub plural: Option<String>,

    /// Suffix appended to every mirrored object's name
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub remote_resource_suffix: String,

    /// Suffix appended to the namespace of every mirrored object
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub local_namespace_suffix: String,

    /// Only namespaces starting with this prefix are mirrored
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub namespace_prefix: String,

    /// Secret to mirror from every source namespace (repeatable)
    #[arg(long = "local-secret-name")]
    pub secret_names: Vec<String>,

    /// Suffix appended to mirrored secret names
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub secret_name_suffix: String,

    /// Kubeconfig file for the remote cluster
    #[arg(long)]
    pub remote_kubeconfig: PathBuf,

    /// Address the health probe endpoint binds to
    #[arg(long, default_value = ":8081")]
    pub health_probe_bind_address: String,

    /// Number of concurrent reconcile workers
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Identity recorded on mirrored objects
    #[arg(long)]
    pub controller_id: Option<String>,
}

impl Cli {
    /// Build the controller configuration from the file or the flags.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be loaded or the result does not validate.
    pub fn mirror_config(&self) -> Result<MirrorConfig> {
        if let Some(path) = &self.config {
            return MirrorConfig::load(path);
        }

        let version = self
            .version
            .clone()
            .ok_or_else(|| Error::invalid_config("--version is required"))?;
        let kind = self
            .kind
            .clone()
            .ok_or_else(|| Error::invalid_config("--kind is required"))?;

        let mut config = MirrorConfig::new(ResourceType::new(self.group.clone(), version, kind));
        config.plural.clone_from(&self.plural);
        config.remote_resource_suffix.clone_from(&self.remote_resource_suffix);
        config.local_namespace_suffix.clone_from(&self.local_namespace_suffix);
        config.namespace_prefix.clone_from(&self.namespace_prefix);
        config.secret_names.clone_from(&self.secret_names);
        config.secret_name_suffix.clone_from(&self.secret_name_suffix);
        config.controller_id.clone_from(&self.controller_id);
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }

        config.validate()?;
        Ok(config)
    }

    /// Socket address for the health probes.
    ///
    /// # Errors
    ///
    /// Fails when the address does not parse.
    pub fn health_address(&self) -> std::result::Result<SocketAddr, AddrParseError> {
        parse_bind_address(&self.health_probe_bind_address)
    }
}

/// Parse a bind address; a bare `:port` binds every interface.
///
/// # Errors
///
/// Fails when the address does not parse.
pub fn parse_bind_address(raw: &str) -> std::result::Result<SocketAddr, AddrParseError> {
    if raw.starts_with(':') {
        format!("0.0.0.0{raw}").parse()
    } else {
        raw.parse()
    }
}
