//! Cluster API abstraction and its Kubernetes implementation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, PersistentVolume, PersistentVolumeClaim, Pod, Secret,
};
use kube::api::{Api, DynamicObject, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config, ResourceExt};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::types::{ClaimInfo, ClaimKey, PersistentVolumeRef, PodInfo};

/// Location of the storage platform's cloud config inside the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfigRef {
    /// ConfigMap name.
    pub name: String,
    /// Key inside the ConfigMap holding the INI text.
    pub key: String,
}

/// Read-only view of the cluster used by a migration run.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// All persistent volumes in the cluster.
    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolumeRef>>;

    /// All persistent volume claims, across namespaces.
    async fn list_claims(&self) -> Result<Vec<ClaimInfo>>;

    /// All pods, across namespaces.
    async fn list_pods(&self) -> Result<Vec<PodInfo>>;

    /// Looks up a PV by name; `Ok(None)` when it does not exist.
    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolumeRef>>;

    /// Reads `spec.cloudConfig` from the named infrastructure object.
    async fn get_cloud_config_ref(&self, infrastructure: &str) -> Result<CloudConfigRef>;

    /// Reads one key of a ConfigMap; `Ok(None)` when the key is absent.
    async fn get_config_map_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>>;

    /// Reads all data of a Secret.
    async fn get_secret_data(&self, namespace: &str, name: &str)
        -> Result<BTreeMap<String, Vec<u8>>>;
}

/// Builds a Kubernetes client from `kubeconfig`, or from the environment
/// (`KUBECONFIG`, `~/.kube/config`, in-cluster service account) when `None`.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "loading kubeconfig");
            let kc = Kubeconfig::read_from(path).map_err(|e| {
                MigrateError::Config(format!("error reading kubeconfig {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .map_err(|e| MigrateError::Config(format!("error building kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| MigrateError::Config(format!("error building kubeconfig: {}", e)))?,
    };
    Client::try_from(config)
        .map_err(|e| MigrateError::Config(format!("error building kubernetes client: {}", e)))
}

/// [`ClusterClient`] backed by a live Kubernetes API server.
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wraps a connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn infrastructure_resource() -> ApiResource {
        ApiResource {
            group: "config.openshift.io".to_string(),
            version: "v1".to_string(),
            api_version: "config.openshift.io/v1".to_string(),
            kind: "Infrastructure".to_string(),
            plural: "infrastructures".to_string(),
        }
    }
}

fn pv_ref(pv: PersistentVolume) -> PersistentVolumeRef {
    let name = pv.name_any();
    let spec = pv.spec.unwrap_or_default();
    let claim = spec.claim_ref.and_then(|r| match (r.namespace, r.name) {
        (Some(ns), Some(n)) => Some(ClaimKey::new(ns, n)),
        _ => None,
    });
    let (driver, volume_handle) = match spec.csi {
        Some(csi) => (Some(csi.driver), Some(csi.volume_handle)),
        None => (None, None),
    };
    PersistentVolumeRef {
        name,
        volume_handle,
        driver,
        claim,
    }
}

fn claim_info(pvc: PersistentVolumeClaim) -> ClaimInfo {
    let key = ClaimKey::new(pvc.namespace().unwrap_or_default(), pvc.name_any());
    let volume_name = pvc.spec.and_then(|s| s.volume_name);
    ClaimInfo { key, volume_name }
}

/// Claims mounted by a pod. A generic ephemeral volume is backed by a claim
/// named `<pod>-<volume>`.
fn pod_info(pod: Pod) -> PodInfo {
    let namespace = pod.namespace().unwrap_or_default();
    let name = pod.name_any();
    let claim_names = pod
        .spec
        .and_then(|s| s.volumes)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match (v.persistent_volume_claim, v.ephemeral) {
            (Some(claim), _) => Some(claim.claim_name),
            (None, Some(_)) => Some(format!("{}-{}", name, v.name)),
            (None, None) => None,
        })
        .collect();
    let phase = pod.status.and_then(|s| s.phase);
    PodInfo {
        namespace,
        name,
        claim_names,
        phase,
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolumeRef>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(pv_ref).collect())
    }

    async fn list_claims(&self) -> Result<Vec<ClaimInfo>> {
        let api: Api<PersistentVolumeClaim> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(claim_info).collect())
    }

    async fn list_pods(&self) -> Result<Vec<PodInfo>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items.into_iter().map(pod_info).collect())
    }

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolumeRef>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(pv) => Ok(Some(pv_ref(pv))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cloud_config_ref(&self, infrastructure: &str) -> Result<CloudConfigRef> {
        let ar = Self::infrastructure_resource();
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let infra = api.get(infrastructure).await.map_err(|e| {
            MigrateError::Config(format!(
                "error getting infrastructure object {}: {}",
                infrastructure, e
            ))
        })?;
        let cloud_config = infra
            .data
            .get("spec")
            .and_then(|s| s.get("cloudConfig"))
            .ok_or_else(|| {
                MigrateError::Config(format!(
                    "infrastructure {} has no spec.cloudConfig",
                    infrastructure
                ))
            })?;
        let field = |key: &str| {
            cloud_config
                .get(key)
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    MigrateError::Config(format!(
                        "infrastructure {} has no spec.cloudConfig.{}",
                        infrastructure, key
                    ))
                })
        };
        Ok(CloudConfigRef {
            name: field("name")?,
            key: field("key")?,
        })
    }

    async fn get_config_map_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<Option<String>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = api.get(name).await.map_err(|e| {
            MigrateError::Config(format!("failed to get cloud config {}/{}: {}", namespace, name, e))
        })?;
        Ok(cm.data.and_then(|mut d| d.remove(key)))
    }

    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await.map_err(|e| {
            MigrateError::Config(format!("failed to get secret {}/{}: {}", namespace, name, e))
        })?;
        let mut data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        for (k, v) in secret.string_data.unwrap_or_default() {
            data.entry(k).or_insert_with(|| v.into_bytes());
        }
        Ok(data)
    }
}
