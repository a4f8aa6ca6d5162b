//! In-memory cluster and storage fakes for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use cns_migrate::bootstrap::Session;
use cns_migrate::cluster::{CloudConfigRef, ClusterClient};
use cns_migrate::error::{MigrateError, Result};
use cns_migrate::storage::{
    self, BackendRef, Fault, FaultCategory, QueryCursor, StorageClient, StorageError, TaskHandle,
    TaskResult, VolumeOperationResult, VolumePage, VolumeQuery,
};
use cns_migrate::types::{ClaimInfo, ClaimKey, PersistentVolumeRef, PodInfo, StorageVolume};

pub const DRIVER: &str = "csi.vsphere.vmware.com";
pub const DATACENTER: &str = "DC1";
pub const SOURCE: &str = "bronze";
pub const DESTINATION: &str = "gold";

pub fn source_ds() -> BackendRef {
    BackendRef::datastore("datastore-10", SOURCE)
}

pub fn destination_ds() -> BackendRef {
    BackendRef::datastore("datastore-20", DESTINATION)
}

pub fn csi_pv(name: &str, handle: &str) -> PersistentVolumeRef {
    PersistentVolumeRef {
        name: name.to_string(),
        volume_handle: Some(handle.to_string()),
        driver: Some(DRIVER.to_string()),
        claim: None,
    }
}

pub fn bound_pv(name: &str, handle: &str, namespace: &str, claim: &str) -> PersistentVolumeRef {
    PersistentVolumeRef {
        claim: Some(ClaimKey::new(namespace, claim)),
        ..csi_pv(name, handle)
    }
}

pub fn running_pod(namespace: &str, name: &str, claims: &[&str]) -> PodInfo {
    PodInfo {
        namespace: namespace.to_string(),
        name: name.to_string(),
        claim_names: claims.iter().map(|c| c.to_string()).collect(),
        phase: Some("Running".to_string()),
    }
}

/// Cluster fake holding PVs, claims and pods in memory.
#[derive(Default)]
pub struct FakeCluster {
    pub pvs: HashMap<String, PersistentVolumeRef>,
    pub claims: Vec<ClaimInfo>,
    pub pods: Vec<PodInfo>,
    /// PV names whose lookup fails with a server error.
    pub broken: Vec<String>,
    pub lookups: Mutex<Vec<String>>,
    pub bootstrap_calls: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pv(mut self, pv: PersistentVolumeRef) -> Self {
        self.pvs.insert(pv.name.clone(), pv);
        self
    }

    pub fn with_pod(mut self, pod: PodInfo) -> Self {
        self.pods.push(pod);
        self
    }

    pub fn with_broken(mut self, name: &str) -> Self {
        self.broken.push(name.to_string());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolumeRef>> {
        Ok(self.pvs.values().cloned().collect())
    }

    async fn list_claims(&self) -> Result<Vec<ClaimInfo>> {
        Ok(self.claims.clone())
    }

    async fn list_pods(&self) -> Result<Vec<PodInfo>> {
        Ok(self.pods.clone())
    }

    async fn get_persistent_volume(&self, name: &str) -> Result<Option<PersistentVolumeRef>> {
        self.lookups.lock().unwrap().push(name.to_string());
        if self.broken.iter().any(|b| b == name) {
            return Err(MigrateError::Cluster(kube::Error::Api(
                kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "etcdserver: request timed out".to_string(),
                    reason: "InternalError".to_string(),
                    code: 500,
                },
            )));
        }
        Ok(self.pvs.get(name).cloned())
    }

    async fn get_cloud_config_ref(&self, _infrastructure: &str) -> Result<CloudConfigRef> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        Err(MigrateError::Config("no infrastructure in fake cluster".into()))
    }

    async fn get_config_map_value(&self, _: &str, _: &str, _: &str) -> Result<Option<String>> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn get_secret_data(&self, _: &str, _: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        self.bootstrap_calls.fetch_add(1, Ordering::SeqCst);
        Ok(BTreeMap::new())
    }
}

/// How the fake storage answers a relocation of one volume.
#[derive(Debug, Clone)]
pub enum Relocation {
    Succeeds,
    CallFault(Fault),
    CallError(String),
    TaskFault(Fault),
    WaitFault(Fault),
}

/// Storage fake serving a paginated source catalog and scripted relocations.
pub struct FakeStorage {
    pub resident: Vec<String>,
    pub scripted: HashMap<String, Relocation>,
    pub relocations: Mutex<Vec<String>>,
    pub queries: AtomicUsize,
    pub cancel_on_relocate: Option<CancellationToken>,
}

impl FakeStorage {
    pub fn new(resident: &[&str]) -> Self {
        Self {
            resident: resident.iter().map(|s| s.to_string()).collect(),
            scripted: HashMap::new(),
            relocations: Mutex::new(Vec::new()),
            queries: AtomicUsize::new(0),
            cancel_on_relocate: None,
        }
    }

    pub fn script(mut self, volume_id: &str, relocation: Relocation) -> Self {
        self.scripted.insert(volume_id.to_string(), relocation);
        self
    }

    pub fn relocations(&self) -> Vec<String> {
        self.relocations.lock().unwrap().clone()
    }

    fn behaviour(&self, volume_id: &str) -> Relocation {
        self.scripted
            .get(volume_id)
            .cloned()
            .unwrap_or(Relocation::Succeeds)
    }
}

pub fn already_exists() -> Fault {
    Fault::new(
        FaultCategory::AlreadyExists,
        "The specified key, name, or identifier already exists.",
    )
}

#[async_trait]
impl StorageClient for FakeStorage {
    async fn resolve_backend(&self, datacenter: &str, name: &str) -> storage::Result<BackendRef> {
        if datacenter != DATACENTER {
            return Err(StorageError::NotFound(format!("can't find datacenter {}", datacenter)));
        }
        match name {
            SOURCE => Ok(source_ds()),
            DESTINATION => Ok(destination_ds()),
            other => Err(StorageError::NotFound(format!("datastore {}", other))),
        }
    }

    async fn query_volumes(&self, query: &VolumeQuery) -> storage::Result<VolumePage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let offset = query.cursor.map(|c| c.offset).unwrap_or(0) as usize;
        let end = (offset + query.page_limit as usize).min(self.resident.len());
        let volumes: Vec<StorageVolume> = self.resident[offset.min(end)..end]
            .iter()
            .map(|id| StorageVolume::new(id.as_str(), query.backend.clone()))
            .collect();
        Ok(VolumePage {
            volumes,
            cursor: QueryCursor {
                offset: end as u64,
                limit: query.page_limit,
                total_records: self.resident.len() as u64,
            },
        })
    }

    async fn relocate_volume(&self, volume_id: &str, destination: &BackendRef) -> storage::Result<TaskHandle> {
        assert_eq!(destination, &destination_ds());
        self.relocations.lock().unwrap().push(volume_id.to_string());
        if let Some(token) = &self.cancel_on_relocate {
            token.cancel();
        }
        match self.behaviour(volume_id) {
            Relocation::CallFault(fault) => Err(StorageError::Fault(fault)),
            Relocation::CallError(msg) => Err(StorageError::Transport(msg)),
            _ => Ok(TaskHandle {
                id: format!("task-{}", volume_id),
            }),
        }
    }

    async fn wait_for_task(&self, task: &TaskHandle) -> storage::Result<TaskResult> {
        let volume_id = task.id.trim_start_matches("task-");
        match self.behaviour(volume_id) {
            Relocation::TaskFault(fault) => Ok(TaskResult {
                volume_results: vec![VolumeOperationResult {
                    volume_id: Some(volume_id.to_string()),
                    fault: Some(fault),
                }],
            }),
            Relocation::WaitFault(fault) => Err(StorageError::Fault(fault)),
            _ => Ok(TaskResult {
                volume_results: vec![VolumeOperationResult {
                    volume_id: Some(volume_id.to_string()),
                    fault: None,
                }],
            }),
        }
    }
}

pub fn session(storage: Arc<FakeStorage>) -> Session {
    Session {
        storage,
        datacenter: DATACENTER.to_string(),
    }
}
