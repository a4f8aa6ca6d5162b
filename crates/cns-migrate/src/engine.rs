//! Per-volume migration state machine.
//!
//! Each requested persistent volume moves through
//! `Pending -> Matched -> Eligible -> Relocating` and ends in one of the
//! terminal states. Volumes are processed strictly one after another; the
//! catalog and usage index in [`MigrationContext`] are read-only for the whole
//! run, and the engine's only mutation is appending one outcome per volume.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::VolumeCatalog;
use crate::cluster::ClusterClient;
use crate::report::MigrationReport;
use crate::storage::{BackendRef, StorageClient, StorageError};
use crate::types::{MigrationOutcome, RelocationFault, SkipReason};
use crate::usage::UsageIndex;

/// State machine misuse.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested transition is not allowed from the current state.
    #[error("Cannot transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the volume was in
        from: VolumeState,
        /// State that was requested
        to: VolumeState,
    },
}

/// Where one volume is in the migration state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VolumeState {
    /// Not looked at yet.
    Pending,
    /// PV found and provisioned by the CSI driver.
    Matched,
    /// On the source backend and not in use.
    Eligible,
    /// Relocation requested.
    Relocating,
    /// Relocation finished cleanly.
    Succeeded,
    /// The platform reported the volume already on the destination.
    AlreadyAtDestination,
    /// Ended with an error; carries the detail.
    Failed(String),
    /// PV missing or not a CSI volume of the configured driver.
    NotMatched,
    /// Not on the source backend, or in use.
    Ineligible,
}

impl VolumeState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VolumeState::Succeeded
                | VolumeState::AlreadyAtDestination
                | VolumeState::Failed(_)
                | VolumeState::NotMatched
                | VolumeState::Ineligible
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: &VolumeState) -> bool {
        match (self, next) {
            (VolumeState::Pending, VolumeState::Matched) => true,
            (VolumeState::Pending, VolumeState::NotMatched) => true,
            // cluster lookup failed outright
            (VolumeState::Pending, VolumeState::Failed(_)) => true,

            (VolumeState::Matched, VolumeState::Eligible) => true,
            (VolumeState::Matched, VolumeState::Ineligible) => true,

            (VolumeState::Eligible, VolumeState::Relocating) => true,

            (VolumeState::Relocating, VolumeState::Succeeded) => true,
            (VolumeState::Relocating, VolumeState::AlreadyAtDestination) => true,
            (VolumeState::Relocating, VolumeState::Failed(_)) => true,

            _ => false,
        }
    }
}

/// Tracks one volume through the state machine.
#[derive(Debug, Clone)]
pub struct VolumeMigration {
    /// Persistent volume name from the input list.
    pub pv_name: String,
    /// Current state.
    pub state: VolumeState,
}

impl VolumeMigration {
    /// Starts `pv_name` in [`VolumeState::Pending`].
    pub fn new(pv_name: &str) -> Self {
        Self {
            pv_name: pv_name.to_string(),
            state: VolumeState::Pending,
        }
    }

    /// Moves to `state`, or fails without changing anything.
    pub fn transition_to(&mut self, state: VolumeState) -> Result<(), EngineError> {
        if !self.state.can_transition_to(&state) {
            return Err(EngineError::InvalidTransition {
                from: self.state.clone(),
                to: state,
            });
        }
        debug!(pv = %self.pv_name, from = ?self.state, to = ?state, "volume state change");
        self.state = state;
        Ok(())
    }
}

/// Everything the engine reads during a run.
pub struct MigrationContext {
    /// Cluster API.
    pub cluster: Arc<dyn ClusterClient>,
    /// Logged-in storage platform.
    pub storage: Arc<dyn StorageClient>,
    /// Volumes resident on the source backend.
    pub catalog: VolumeCatalog,
    /// Volume to pod bindings.
    pub usage: UsageIndex,
    /// Resolved destination backend.
    pub destination: BackendRef,
    /// CSI driver whose PVs are eligible.
    pub driver_name: String,
}

fn classify(err: StorageError) -> RelocationFault {
    match err {
        StorageError::Fault(fault) => RelocationFault::from_fault(fault),
        other => RelocationFault::OtherFault(other.to_string()),
    }
}

/// Drives every requested volume through [`VolumeState`] in input order.
pub struct MigrationEngine {
    ctx: MigrationContext,
    outcomes: Vec<MigrationOutcome>,
}

impl MigrationEngine {
    /// Engine over a fully built context.
    pub fn new(ctx: MigrationContext) -> Self {
        Self {
            ctx,
            outcomes: Vec::new(),
        }
    }

    /// Processes `pv_names` in order, one outcome per name.
    ///
    /// Cancellation is checked before each volume starts; a relocation that is
    /// already in flight always runs to completion.
    pub async fn run(mut self, pv_names: &[String], cancel: &CancellationToken) -> MigrationReport {
        let mut report = MigrationReport::new(
            self.ctx
                .catalog
                .backend()
                .map(|b| b.name.clone())
                .unwrap_or_default(),
            self.ctx.destination.name.clone(),
            pv_names.len(),
        );

        for pv_name in pv_names {
            if cancel.is_cancelled() {
                warn!(
                    processed = self.outcomes.len(),
                    requested = pv_names.len(),
                    "migration cancelled, not starting further volumes"
                );
                report.cancelled = true;
                break;
            }
            let outcome = self.migrate_one(pv_name).await;
            self.outcomes.push(outcome);
        }

        report.finish(self.outcomes);
        report
    }

    /// Drives a single persistent volume to a terminal state.
    pub async fn migrate_one(&self, pv_name: &str) -> MigrationOutcome {
        info!(pv = %pv_name, "starting migration for pv");
        let mut job = VolumeMigration::new(pv_name);
        match self.drive(&mut job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(pv = %pv_name, error = %e, "volume state machine error");
                MigrationOutcome::failed(pv_name, None, e.to_string())
            }
        }
    }

    async fn drive(&self, job: &mut VolumeMigration) -> Result<MigrationOutcome, EngineError> {
        let pv_name = job.pv_name.clone();
        let pv_name = pv_name.as_str();

        let pv = match self.ctx.cluster.get_persistent_volume(pv_name).await {
            Ok(Some(pv)) => pv,
            Ok(None) => {
                info!(pv = %pv_name, "persistent volume not found");
                job.transition_to(VolumeState::NotMatched)?;
                return Ok(MigrationOutcome::not_eligible(pv_name, None, SkipReason::NotFound));
            }
            Err(e) => {
                error!(pv = %pv_name, error = %e, "error finding pv");
                let detail = format!("error finding pv {}: {}", pv_name, e);
                job.transition_to(VolumeState::Failed(detail.clone()))?;
                return Ok(MigrationOutcome::failed(pv_name, None, detail));
            }
        };

        if pv.driver.as_deref() != Some(self.ctx.driver_name.as_str()) {
            info!(pv = %pv_name, driver = ?pv.driver, "pv is not of expected type");
            job.transition_to(VolumeState::NotMatched)?;
            return Ok(MigrationOutcome::not_eligible(pv_name, None, SkipReason::ForeignDriver));
        }
        let Some(volume_id) = pv
            .handle_for_driver(&self.ctx.driver_name)
            .filter(|h| !h.is_empty())
        else {
            info!(pv = %pv_name, "pv has no volume handle");
            job.transition_to(VolumeState::NotMatched)?;
            return Ok(MigrationOutcome::not_eligible(
                pv_name,
                None,
                SkipReason::MissingVolumeHandle,
            ));
        };
        job.transition_to(VolumeState::Matched)?;

        if !self.ctx.catalog.contains(volume_id) {
            info!(pv = %pv_name, volume = %volume_id, "volume not found on source datastore");
            job.transition_to(VolumeState::Ineligible)?;
            return Ok(MigrationOutcome::not_eligible(
                pv_name,
                Some(volume_id),
                SkipReason::NotOnSource,
            ));
        }
        if let Some(binding) = self.ctx.usage.binding(volume_id) {
            info!(
                pv = %pv_name,
                volume = %volume_id,
                pod = %binding.pod,
                claim = %binding.claim,
                "volume is in use, skipping"
            );
            job.transition_to(VolumeState::Ineligible)?;
            return Ok(MigrationOutcome::in_use(pv_name, volume_id, binding));
        }
        job.transition_to(VolumeState::Eligible)?;

        job.transition_to(VolumeState::Relocating)?;
        match self.relocate(volume_id).await {
            Ok(()) => {
                info!(pv = %pv_name, volume = %volume_id, "successfully migrated pv");
                job.transition_to(VolumeState::Succeeded)?;
                Ok(MigrationOutcome::migrated(pv_name, volume_id))
            }
            Err(RelocationFault::AlreadyAtDestination(fault)) => {
                info!(pv = %pv_name, volume = %volume_id, %fault, "volume already on destination datastore");
                job.transition_to(VolumeState::AlreadyAtDestination)?;
                Ok(MigrationOutcome::already_at_destination(pv_name, volume_id))
            }
            Err(RelocationFault::OtherFault(detail)) => {
                error!(pv = %pv_name, volume = %volume_id, error = %detail, "error migrating volume");
                job.transition_to(VolumeState::Failed(detail.clone()))?;
                Ok(MigrationOutcome::failed(pv_name, Some(volume_id), detail))
            }
        }
    }

    async fn relocate(&self, volume_id: &str) -> Result<(), RelocationFault> {
        let storage = &self.ctx.storage;
        let task = storage
            .relocate_volume(volume_id, &self.ctx.destination)
            .await
            .map_err(classify)?;
        debug!(volume = %volume_id, task = %task.id, "relocation task started");

        let result = storage.wait_for_task(&task).await.map_err(|e| match classify(e) {
            RelocationFault::OtherFault(detail) => {
                RelocationFault::OtherFault(format!("error waiting for relocation task: {}", detail))
            }
            exists => exists,
        })?;

        match result.first_fault() {
            Some(fault) => {
                warn!(volume = %volume_id, %fault, "fault encountered while relocating volume");
                Err(RelocationFault::from_fault(fault.clone()))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = VolumeMigration::new("pv-1");
        for state in [
            VolumeState::Matched,
            VolumeState::Eligible,
            VolumeState::Relocating,
            VolumeState::Succeeded,
        ] {
            job.transition_to(state).unwrap();
        }
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_early_terminal_states() {
        assert!(VolumeState::Pending.can_transition_to(&VolumeState::NotMatched));
        assert!(VolumeState::Matched.can_transition_to(&VolumeState::Ineligible));
        assert!(VolumeState::NotMatched.is_terminal());
        assert!(VolumeState::Ineligible.is_terminal());
    }

    #[test]
    fn test_cannot_relocate_before_eligible() {
        assert!(!VolumeState::Pending.can_transition_to(&VolumeState::Relocating));
        assert!(!VolumeState::Matched.can_transition_to(&VolumeState::Relocating));
        let mut job = VolumeMigration::new("pv-1");
        let err = job.transition_to(VolumeState::Relocating).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(job.state, VolumeState::Pending);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            VolumeState::Succeeded,
            VolumeState::AlreadyAtDestination,
            VolumeState::Failed("x".into()),
            VolumeState::NotMatched,
            VolumeState::Ineligible,
        ] {
            assert!(!terminal.can_transition_to(&VolumeState::Relocating));
            assert!(!terminal.can_transition_to(&VolumeState::Pending));
        }
    }

    #[test]
    fn test_already_exists_only_after_relocating() {
        assert!(VolumeState::Relocating.can_transition_to(&VolumeState::AlreadyAtDestination));
        assert!(!VolumeState::Eligible.can_transition_to(&VolumeState::AlreadyAtDestination));
    }

    #[test]
    fn test_classify_storage_errors() {
        use crate::storage::{Fault, FaultCategory};
        let exists = StorageError::Fault(Fault::new(FaultCategory::AlreadyExists, "dup"));
        assert!(matches!(classify(exists), RelocationFault::AlreadyAtDestination(_)));
        let transport = StorageError::Transport("reset".into());
        assert_eq!(
            classify(transport),
            RelocationFault::OtherFault("transport error: reset".to_string())
        );
    }
}
