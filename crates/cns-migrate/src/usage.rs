//! In-use index joining volumes to the pods that mount them.
//!
//! The index is a two-hop join built from a point-in-time listing:
//! volume handle -> claim (from PV `claimRef` or PVC `volumeName`), then
//! claim -> pod (from pod volumes referencing the claim). It is rebuilt for
//! every run and never updated afterwards.

use std::collections::HashMap;
use tracing::debug;

use crate::types::{ClaimInfo, ClaimKey, PersistentVolumeRef, PodInfo, UsageBinding};

/// Which pod, through which claim, uses each storage volume.
#[derive(Debug, Clone, Default)]
pub struct UsageIndex {
    volume_claims: HashMap<String, ClaimKey>,
    claim_pods: HashMap<ClaimKey, Vec<String>>,
}

impl UsageIndex {
    /// Joins PVs, claims and pods into an index. Pods that finished are ignored.
    pub fn build(
        persistent_volumes: &[PersistentVolumeRef],
        claims: &[ClaimInfo],
        pods: &[PodInfo],
    ) -> Self {
        let mut index = UsageIndex::default();

        let claims_by_volume: HashMap<&str, &ClaimKey> = claims
            .iter()
            .filter_map(|c| c.volume_name.as_deref().map(|v| (v, &c.key)))
            .collect();

        for pv in persistent_volumes {
            let Some(handle) = pv.volume_handle.as_deref() else {
                continue;
            };
            let claim = pv
                .claim
                .clone()
                .or_else(|| claims_by_volume.get(pv.name.as_str()).map(|k| (*k).clone()));
            if let Some(claim) = claim {
                index.volume_claims.insert(handle.to_string(), claim);
            }
        }

        for pod in pods.iter().filter(|p| !p.is_terminated()) {
            for claim_name in &pod.claim_names {
                let key = ClaimKey::new(pod.namespace.as_str(), claim_name.as_str());
                index.claim_pods.entry(key).or_default().push(pod.name.clone());
            }
        }

        debug!(
            bound_volumes = index.volume_claims.len(),
            mounted_claims = index.claim_pods.len(),
            "built usage index"
        );
        index
    }

    /// First (claim, pod) pair consuming `volume_id`, if any pod mounts it.
    pub fn binding(&self, volume_id: &str) -> Option<UsageBinding> {
        let claim = self.volume_claims.get(volume_id)?;
        let pod = self.claim_pods.get(claim)?.first()?;
        Some(UsageBinding {
            claim: claim.clone(),
            pod: pod.clone(),
        })
    }

    /// Returns `(claim name, pod name, in use)` for `volume_id`.
    ///
    /// Names are empty when the volume is not in use.
    pub fn is_in_use(&self, volume_id: &str) -> (String, String, bool) {
        match self.binding(volume_id) {
            Some(b) => (b.claim.name, b.pod, true),
            None => (String::new(), String::new(), false),
        }
    }

    /// Every (claim, pod) pair consuming `volume_id`.
    pub fn bindings(&self, volume_id: &str) -> Vec<UsageBinding> {
        let Some(claim) = self.volume_claims.get(volume_id) else {
            return Vec::new();
        };
        self.claim_pods
            .get(claim)
            .map(|pods| {
                pods.iter()
                    .map(|pod| UsageBinding {
                        claim: claim.clone(),
                        pod: pod.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
