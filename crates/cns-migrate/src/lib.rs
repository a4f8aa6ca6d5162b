#![warn(missing_docs)]

//! cns-migrate: relocates CSI-provisioned vSphere CNS volumes from one datastore to another

pub mod bootstrap;
pub mod catalog;
/// Command-line surface.
pub mod cli;
pub mod cluster;
/// Run configuration.
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
/// Run summary.
pub mod report;
pub mod run;
pub mod soap;
pub mod storage;
/// Domain records shared across modules.
pub mod types;
pub mod usage;
pub mod vcenter;

pub use catalog::VolumeCatalog;
pub use config::MigrateConfig;
pub use engine::{MigrationContext, MigrationEngine};
pub use error::MigrateError;
pub use report::MigrationReport;
pub use usage::UsageIndex;
