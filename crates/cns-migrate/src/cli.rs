use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cluster::{self, KubeClusterClient};
use crate::config::MigrateConfig;
use crate::error::MigrateError;
use crate::report::MigrationReport;
use crate::run::{self, RunRequest};

/// Format of the printed summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable table.
    Text,
    /// Pretty-printed JSON report.
    Json,
}

/// Command-line arguments of `cns-migrate`.
#[derive(Parser)]
#[command(name = "cns-migrate")]
#[command(about = "Relocate CNS volumes between vSphere datastores", long_about = None)]
pub struct Cli {
    /// Path to the kubeconfig file; defaults to KUBECONFIG, ~/.kube/config, or in-cluster config
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Name of source datastore
    #[arg(short, long)]
    pub source: String,

    /// Name of destination datastore
    #[arg(short, long)]
    pub destination: String,

    /// File listing one persistent volume name per line
    #[arg(short = 'f', long)]
    pub volume_file: PathBuf,

    /// Optional TOML or JSON config file
    #[arg(short, long, env = "CNS_MIGRATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Datacenter to resolve datastores in, instead of the cloud config's
    #[arg(long)]
    pub datacenter: Option<String>,

    /// Summary format printed to stdout.
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

impl Cli {
    /// Run parameters taken from the arguments.
    pub fn request(&self) -> RunRequest {
        RunRequest {
            source: self.source.clone(),
            destination: self.destination.clone(),
            volume_file: self.volume_file.clone(),
            datacenter: self.datacenter.clone(),
        }
    }

    /// Loads `--config`, or the defaults when none was given.
    pub fn load_config(&self) -> Result<MigrateConfig> {
        match &self.config {
            Some(path) => Ok(MigrateConfig::from_file(path)?),
            None => Ok(MigrateConfig::default()),
        }
    }

    /// Runs the migration and prints the summary.
    ///
    /// Fatal errors return before anything is printed. A cancelled run still
    /// prints what it finished and then reports the cancellation as an error.
    pub async fn run(self, cancel: CancellationToken) -> Result<MigrationReport> {
        let config = self.load_config()?;
        let request = self.request();
        request.validate()?;

        let client = cluster::connect(self.kubeconfig.as_deref()).await?;
        let cluster = Arc::new(KubeClusterClient::new(client));
        let report = run::execute(cluster, &config, &request, &cancel).await?;

        self.print(&report)?;
        if report.cancelled {
            return Err(MigrateError::Cancelled {
                processed: report.processed(),
                requested: report.requested,
            }
            .into());
        }
        Ok(report)
    }

    fn print(&self, report: &MigrationReport) -> Result<()> {
        match self.output {
            OutputFormat::Text => print!("{}", report.render_text()),
            OutputFormat::Json => println!("{}", report.to_json()?),
        }
        Ok(())
    }
}
