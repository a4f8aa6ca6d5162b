use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{MigrateError, Result};

/// Tunables for a migration run, loaded from TOML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// CSI driver whose volumes are eligible.
    pub csi_driver_name: String,
    /// Name of the cluster-scoped `Infrastructure` object.
    pub infrastructure_name: String,
    /// Namespace of the cloud-config ConfigMap.
    pub cloud_config_namespace: String,
    /// Namespace of the vCenter credentials Secret.
    pub credentials_namespace: String,
    /// Name of the vCenter credentials Secret.
    pub credentials_secret: String,
    /// Volumes requested per catalog page.
    pub query_page_limit: u64,
    /// Delay between task status polls, in milliseconds.
    pub task_poll_interval_ms: u64,
    /// Give up waiting for a relocation task after this many seconds.
    pub task_timeout_secs: u64,
    /// Per-request HTTP timeout, in seconds.
    pub request_timeout_secs: u64,
    /// User agent sent to vCenter.
    pub user_agent: String,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            csi_driver_name: String::from("csi.vsphere.vmware.com"),
            infrastructure_name: String::from("cluster"),
            cloud_config_namespace: String::from("openshift-config"),
            credentials_namespace: String::from("openshift-cluster-csi-drivers"),
            credentials_secret: String::from("vmware-vsphere-cloud-credentials"),
            query_page_limit: 100,
            task_poll_interval_ms: 1000,
            task_timeout_secs: 3600,
            request_timeout_secs: 60,
            user_agent: String::from("cns-migrator"),
        }
    }
}

impl MigrateConfig {
    /// Reads a `.toml` or `.json` file and validates it.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: MigrateConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)
                .map_err(|e| MigrateError::Config(format!("{}: {}", path.display(), e)))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| MigrateError::Config(format!("{}: {}", path.display(), e)))?,
            _ => {
                return Err(MigrateError::Config(format!(
                    "unsupported config file extension: {}",
                    ext
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values a run cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.csi_driver_name.trim().is_empty() {
            return Err(MigrateError::Config("csi_driver_name must not be empty".into()));
        }
        if self.query_page_limit == 0 {
            return Err(MigrateError::Config("query_page_limit must be positive".into()));
        }
        if self.task_poll_interval_ms == 0 {
            return Err(MigrateError::Config(
                "task_poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// `task_poll_interval_ms` as a duration.
    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }

    /// `task_timeout_secs` as a duration.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// `request_timeout_secs` as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
