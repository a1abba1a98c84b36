//! Client construction for the local and remote clusters.

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

use crate::error::{Error, Result};

/// Client for the cluster the controller runs in, inferred from the
/// environment (in-cluster service account or the default kubeconfig).
///
/// # Errors
///
/// Fails when no configuration can be inferred.
pub async fn local_client() -> Result<Client> {
    let client = Client::try_default()
        .await
        .map_err(|e| Error::client(e.to_string()))?;
    info!(cluster = "local", "Connected");
    Ok(client)
}

/// Client for the remote cluster, from an explicit kubeconfig file.
///
/// # Errors
///
/// Fails when the file cannot be read or does not describe a usable
/// context.
pub async fn remote_client(kubeconfig: &Path) -> Result<Client> {
    let parsed = Kubeconfig::read_from(kubeconfig).map_err(|e| Error::kubeconfig(kubeconfig, e.to_string()))?;
    let config = Config::from_custom_kubeconfig(parsed, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::kubeconfig(kubeconfig, e.to_string()))?;
    let client = Client::try_from(config).map_err(|e| Error::client(e.to_string()))?;
    info!(cluster = "remote", kubeconfig = %kubeconfig.display(), "Connected");
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_kubeconfig_is_reported() {
        let dir = tempfile::tempdir();
        assert!(dir.is_ok());
        let path = dir.map(|d| d.path().join("absent.yaml")).unwrap_or_default();

        let result = remote_client(&path).await;
        assert!(matches!(result, Err(Error::Kubeconfig { .. })));
    }

    #[tokio::test]
    async fn test_malformed_kubeconfig_is_reported() {
        let file = tempfile::NamedTempFile::new();
        assert!(file.is_ok());
        if let Ok(file) = file {
            assert!(std::fs::write(file.path(), "clusters: [").is_ok());
            let result = remote_client(file.path()).await;
            assert!(matches!(result, Err(Error::Kubeconfig { .. })));
        }
    }
}
