//! One end-to-end migration run.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bootstrap::{Session, SessionBootstrap};
use crate::catalog::VolumeCatalog;
use crate::cluster::ClusterClient;
use crate::config::MigrateConfig;
use crate::engine::{MigrationContext, MigrationEngine};
use crate::error::{MigrateError, Result};
use crate::input::read_volume_list;
use crate::report::MigrationReport;
use crate::usage::UsageIndex;

/// What the caller asked to migrate.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Source datastore name.
    pub source: String,
    /// Destination datastore name.
    pub destination: String,
    /// File listing PV names, one per line.
    pub volume_file: PathBuf,
    /// Overrides the datacenter named in the cloud config.
    pub datacenter: Option<String>,
}

impl RunRequest {
    /// Rejects empty names and identical source and destination.
    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(MigrateError::Config("specify source datastore".into()));
        }
        if self.destination.trim().is_empty() {
            return Err(MigrateError::Config("specify destination datastore".into()));
        }
        if self.source == self.destination {
            return Err(MigrateError::Config(format!(
                "source and destination datastore are both {}",
                self.source
            )));
        }
        Ok(())
    }
}

/// Reads the input, logs in to the storage platform, and migrates.
///
/// The volume list is read first so a bad input file aborts the run before
/// any storage platform call is made.
pub async fn execute(
    cluster: Arc<dyn ClusterClient>,
    config: &MigrateConfig,
    request: &RunRequest,
    cancel: &CancellationToken,
) -> Result<MigrationReport> {
    request.validate()?;
    let pv_names = read_volume_list(&request.volume_file)?;
    info!(volumes = pv_names.len(), file = %request.volume_file.display(), "read volume list");

    let session = SessionBootstrap::new(cluster.as_ref(), config)
        .connect(request.datacenter.as_deref())
        .await?;
    migrate(cluster, session, config, request, &pv_names, cancel).await
}

/// Builds the catalog and usage index, then runs the engine over `pv_names`.
pub async fn migrate(
    cluster: Arc<dyn ClusterClient>,
    session: Session,
    config: &MigrateConfig,
    request: &RunRequest,
    pv_names: &[String],
    cancel: &CancellationToken,
) -> Result<MigrationReport> {
    let storage = session.storage;
    let datacenter = session.datacenter;

    let destination = storage
        .resolve_backend(&datacenter, &request.destination)
        .await
        .map_err(|e| MigrateError::BackendResolution {
            name: request.destination.clone(),
            datacenter: datacenter.clone(),
            reason: e.to_string(),
        })?;

    let catalog = VolumeCatalog::load(
        storage.as_ref(),
        &datacenter,
        &request.source,
        config.query_page_limit,
    )
    .await?;
    if catalog.is_empty() {
        warn!(source = %request.source, "source datastore holds no volumes");
    }

    let persistent_volumes = cluster.list_persistent_volumes().await?;
    let claims = cluster.list_claims().await?;
    let pods = cluster.list_pods().await?;
    let usage = UsageIndex::build(&persistent_volumes, &claims, &pods);
    info!(
        pvs = persistent_volumes.len(),
        claims = claims.len(),
        pods = pods.len(),
        "built usage index"
    );

    let engine = MigrationEngine::new(MigrationContext {
        cluster,
        storage,
        catalog,
        usage,
        destination,
        driver_name: config.csi_driver_name.clone(),
    });
    Ok(engine.run(pv_names, cancel).await)
}
