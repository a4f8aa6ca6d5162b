use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::{BackendRef, Fault, FaultCategory};

/// A volume as reported by the storage platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageVolume {
    /// CNS volume id, equal to the PV's CSI volume handle.
    pub id: String,
    /// Backend the volume lives on.
    pub backend: BackendRef,
}

impl StorageVolume {
    /// Volume `id` on `backend`.
    pub fn new(id: impl Into<String>, backend: BackendRef) -> Self {
        Self {
            id: id.into(),
            backend,
        }
    }
}

/// Namespace-qualified name of a persistent volume claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimKey {
    /// Claim namespace.
    pub namespace: String,
    /// Claim name.
    pub name: String,
}

impl ClaimKey {
    /// Key for `namespace/name`.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The parts of a cluster persistent volume the migration needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistentVolumeRef {
    /// PV name.
    pub name: String,
    /// CSI volume handle; `None` when the PV has no CSI source.
    pub volume_handle: Option<String>,
    /// CSI driver that provisioned the volume.
    pub driver: Option<String>,
    /// Claim the PV is bound to, from `spec.claimRef`.
    pub claim: Option<ClaimKey>,
}

impl PersistentVolumeRef {
    /// Volume handle of this PV if it was provisioned by `driver_name`.
    pub fn handle_for_driver(&self, driver_name: &str) -> Option<&str> {
        match self.driver.as_deref() {
            Some(driver) if driver == driver_name => self.volume_handle.as_deref(),
            _ => None,
        }
    }
}

/// A persistent volume claim and the PV it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimInfo {
    /// Namespace and name.
    pub key: ClaimKey,
    /// PV named in `spec.volumeName`.
    pub volume_name: Option<String>,
}

/// A pod and the claims it mounts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PodInfo {
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
    /// Claims the pod mounts, in its own namespace.
    pub claim_names: Vec<String>,
    /// `status.phase`, e.g. `Running` or `Succeeded`.
    pub phase: Option<String>,
}

impl PodInfo {
    /// Pods that finished no longer hold their volumes.
    pub fn is_terminated(&self) -> bool {
        matches!(self.phase.as_deref(), Some("Succeeded") | Some("Failed"))
    }
}

/// A (claim, pod) pair consuming a storage volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageBinding {
    /// Claim bound to the volume.
    pub claim: ClaimKey,
    /// Pod mounting the claim.
    pub pod: String,
}

/// Final state of one requested persistent volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutcomeState {
    /// Relocated to the destination.
    Migrated,
    /// Skipped because a pod mounts it.
    SkippedInUse,
    /// Skipped; see the skip reason.
    SkippedNotEligible,
    /// Already on the destination.
    AlreadyAtDestination,
    /// Lookup or relocation failed.
    Failed,
}

impl OutcomeState {
    /// `true` when the volume ends up on the destination backend.
    pub fn is_success(&self) -> bool {
        matches!(self, OutcomeState::Migrated | OutcomeState::AlreadyAtDestination)
    }
}

impl fmt::Display for OutcomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeState::Migrated => "migrated",
            OutcomeState::SkippedInUse => "skippedInUse",
            OutcomeState::SkippedNotEligible => "skippedNotEligible",
            OutcomeState::AlreadyAtDestination => "alreadyAtDestination",
            OutcomeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a volume was skipped as not eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// No PV with this name exists in the cluster.
    NotFound,
    /// The PV is not provisioned by the configured CSI driver.
    ForeignDriver,
    /// The PV names the driver but carries no volume handle.
    MissingVolumeHandle,
    /// The volume is not resident on the source backend.
    NotOnSource,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::NotFound => "persistent volume not found",
            SkipReason::ForeignDriver => "not provisioned by the CSI driver",
            SkipReason::MissingVolumeHandle => "no volume handle",
            SkipReason::NotOnSource => "volume not on source datastore",
        };
        f.write_str(s)
    }
}

/// Per-volume relocation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocationFault {
    /// The platform says the volume already lives on the destination.
    AlreadyAtDestination(Fault),
    /// Anything else: call errors, per-volume task faults, wait failures.
    OtherFault(String),
}

impl RelocationFault {
    /// Classifies a platform fault.
    pub fn from_fault(fault: Fault) -> Self {
        match fault.category {
            FaultCategory::AlreadyExists => RelocationFault::AlreadyAtDestination(fault),
            _ => RelocationFault::OtherFault(fault.to_string()),
        }
    }
}

/// What happened to one requested persistent volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    /// PV name from the input list.
    pub pv_name: String,
    /// Final state.
    pub state: OutcomeState,
    /// CNS volume id, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<String>,
    /// Why the volume was not eligible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// Consumer that kept the volume in place.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<UsageBinding>,
    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MigrationOutcome {
    fn new(pv_name: &str, state: OutcomeState, volume_id: Option<&str>) -> Self {
        Self {
            pv_name: pv_name.to_string(),
            state,
            volume_id: volume_id.map(str::to_string),
            skip_reason: None,
            binding: None,
            error: None,
        }
    }

    /// Volume relocated.
    pub fn migrated(pv_name: &str, volume_id: &str) -> Self {
        Self::new(pv_name, OutcomeState::Migrated, Some(volume_id))
    }

    /// Volume already on the destination.
    pub fn already_at_destination(pv_name: &str, volume_id: &str) -> Self {
        Self::new(pv_name, OutcomeState::AlreadyAtDestination, Some(volume_id))
    }

    /// Volume skipped as not eligible.
    pub fn not_eligible(pv_name: &str, volume_id: Option<&str>, reason: SkipReason) -> Self {
        Self {
            skip_reason: Some(reason),
            ..Self::new(pv_name, OutcomeState::SkippedNotEligible, volume_id)
        }
    }

    /// Volume skipped because `binding` uses it.
    pub fn in_use(pv_name: &str, volume_id: &str, binding: UsageBinding) -> Self {
        Self {
            binding: Some(binding),
            ..Self::new(pv_name, OutcomeState::SkippedInUse, Some(volume_id))
        }
    }

    /// Volume failed with `error`.
    pub fn failed(pv_name: &str, volume_id: Option<&str>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(pv_name, OutcomeState::Failed, volume_id)
        }
    }

    /// One-line human readable detail for the summary.
    pub fn detail(&self) -> String {
        match self.state {
            OutcomeState::SkippedInUse => match &self.binding {
                Some(b) => format!("used by pod {} via claim {}", b.pod, b.claim),
                None => String::new(),
            },
            OutcomeState::SkippedNotEligible => self
                .skip_reason
                .map(|r| r.to_string())
                .unwrap_or_default(),
            OutcomeState::Failed => self.error.clone().unwrap_or_default(),
            OutcomeState::Migrated | OutcomeState::AlreadyAtDestination => String::new(),
        }
    }
}
