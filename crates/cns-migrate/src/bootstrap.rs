//! Resolving vCenter connection settings and credentials from the cluster.
//!
//! The infrastructure object points at a ConfigMap holding the vSphere cloud
//! config (gcfg/INI text); the credentials live in a Secret keyed by
//! `<server>.username` and `<server>.password`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cluster::ClusterClient;
use crate::config::MigrateConfig;
use crate::error::{MigrateError, Result};
use crate::storage::StorageClient;
use crate::vcenter::VcenterClient;

/// Subset of the vSphere cloud config the migration needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VsphereCloudConfig {
    /// vCenter host name.
    pub server: String,
    /// HTTPS port, 443 unless overridden.
    pub port: u16,
    /// Datacenter the cluster's datastores live in.
    pub datacenter: String,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

/// Parsed gcfg sections: `(section, subsection)` -> key -> value.
type Sections = HashMap<(String, Option<String>), HashMap<String, String>>;

fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
}

fn parse_sections(text: &str) -> Result<Sections> {
    let mut sections: Sections = HashMap::new();
    let mut current: Option<(String, Option<String>)> = None;

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let header = header.trim();
            let (name, sub) = match header.split_once(char::is_whitespace) {
                Some((name, sub)) => (name, Some(unquote(sub).to_string())),
                None => (header, None),
            };
            let key = (name.to_lowercase(), sub);
            sections.entry(key.clone()).or_default();
            current = Some(key);
            continue;
        }
        let Some(section) = current.as_ref() else {
            return Err(MigrateError::Config(format!(
                "cloud config line {}: key outside of any section",
                lineno + 1
            )));
        };
        let Some((k, v)) = line.split_once('=') else {
            return Err(MigrateError::Config(format!(
                "cloud config line {}: expected key = value",
                lineno + 1
            )));
        };
        sections
            .entry(section.clone())
            .or_default()
            .insert(k.trim().to_lowercase(), unquote(v).to_string());
    }
    Ok(sections)
}

fn truthy(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

impl VsphereCloudConfig {
    /// Parses the gcfg text stored in the cloud-config ConfigMap.
    pub fn parse(text: &str) -> Result<Self> {
        let sections = parse_sections(text)?;
        let get = |section: &str, sub: Option<&str>, key: &str| -> Option<String> {
            sections
                .get(&(section.to_string(), sub.map(str::to_string)))
                .and_then(|s| s.get(key))
                .filter(|v| !v.is_empty())
                .cloned()
        };

        let server = get("workspace", None, "server")
            .or_else(|| {
                sections
                    .keys()
                    .find(|(name, sub)| name == "virtualcenter" && sub.is_some())
                    .and_then(|(_, sub)| sub.clone())
            })
            .ok_or_else(|| MigrateError::Config("cloud config names no vCenter server".into()))?;

        let datacenter = get("workspace", None, "datacenter")
            .or_else(|| {
                get("virtualcenter", Some(server.as_str()), "datacenters")
                    .and_then(|dcs| dcs.split(',').next().map(|d| d.trim().to_string()))
            })
            .or_else(|| get("global", None, "datacenters"))
            .ok_or_else(|| MigrateError::Config("cloud config names no datacenter".into()))?;

        let port = match get("virtualcenter", Some(server.as_str()), "port").or_else(|| get("global", None, "port")) {
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| MigrateError::Config(format!("invalid vCenter port {:?}", p)))?,
            None => 443,
        };

        let insecure = get("virtualcenter", Some(server.as_str()), "insecure-flag")
            .or_else(|| get("global", None, "insecure-flag"))
            .map(|v| truthy(&v))
            .unwrap_or(false);

        Ok(Self {
            server,
            port,
            datacenter,
            insecure,
        })
    }

    /// Base URL of the vCenter web services endpoint.
    pub fn sdk_url(&self) -> String {
        if self.port == 443 {
            format!("https://{}", self.server)
        } else {
            format!("https://{}:{}", self.server, self.port)
        }
    }
}

/// vCenter login credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// vCenter user name.
    pub username: String,
    /// vCenter password.
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Picks `<server>.username` / `<server>.password` out of secret data.
    pub fn from_secret(secret_name: &str, server: &str, data: &BTreeMap<String, Vec<u8>>) -> Result<Self> {
        let field = |suffix: &str| -> Result<String> {
            let key = format!("{}.{}", server, suffix);
            let raw = data.get(&key).ok_or_else(|| {
                MigrateError::Config(format!(
                    "error parsing secret {:?}: key {:?} not found",
                    secret_name, key
                ))
            })?;
            String::from_utf8(raw.clone()).map_err(|_| {
                MigrateError::Config(format!(
                    "error parsing secret {:?}: key {:?} is not UTF-8",
                    secret_name, key
                ))
            })
        };
        Ok(Self {
            username: field("username")?,
            password: field("password")?,
        })
    }
}

/// Everything needed to open a storage session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Parsed cloud config.
    pub cloud_config: VsphereCloudConfig,
    /// Login credentials for the cloud config's server.
    pub credentials: Credentials,
}

/// An authenticated storage session.
pub struct Session {
    /// Logged-in storage platform client.
    pub storage: Arc<dyn StorageClient>,
    /// Datacenter to resolve datastores in.
    pub datacenter: String,
}

/// Resolves connection settings from the cluster and logs in to vCenter.
pub struct SessionBootstrap<'a> {
    cluster: &'a dyn ClusterClient,
    config: &'a MigrateConfig,
}

impl<'a> SessionBootstrap<'a> {
    /// Bootstrap reading from `cluster` with names taken from `config`.
    pub fn new(cluster: &'a dyn ClusterClient, config: &'a MigrateConfig) -> Self {
        Self { cluster, config }
    }

    /// Resolves the cloud config and credentials without contacting vCenter.
    pub async fn resolve(&self) -> Result<SessionSettings> {
        let cfg_ref = self
            .cluster
            .get_cloud_config_ref(&self.config.infrastructure_name)
            .await?;
        debug!(configmap = %cfg_ref.name, key = %cfg_ref.key, "reading cloud config");

        let text = self
            .cluster
            .get_config_map_value(&self.config.cloud_config_namespace, &cfg_ref.name, &cfg_ref.key)
            .await?
            .ok_or_else(|| {
                MigrateError::Config(format!(
                    "cloud config {}/{} does not contain key {:?}",
                    self.config.cloud_config_namespace, cfg_ref.name, cfg_ref.key
                ))
            })?;
        let cloud_config = VsphereCloudConfig::parse(&text)?;

        let data = self
            .cluster
            .get_secret_data(&self.config.credentials_namespace, &self.config.credentials_secret)
            .await?;
        let credentials =
            Credentials::from_secret(&self.config.credentials_secret, &cloud_config.server, &data)?;

        Ok(SessionSettings {
            cloud_config,
            credentials,
        })
    }

    /// Resolves settings and logs in to vCenter.
    pub async fn connect(&self, datacenter_override: Option<&str>) -> Result<Session> {
        let settings = self.resolve().await?;
        let datacenter = datacenter_override
            .map(str::to_string)
            .unwrap_or_else(|| settings.cloud_config.datacenter.clone());
        let client = VcenterClient::connect(&settings, self.config)
            .await
            .map_err(MigrateError::auth)?;
        info!(server = %settings.cloud_config.server, %datacenter, "logged in to vCenter");
        Ok(Session {
            storage: Arc::new(client),
            datacenter,
        })
    }
}
