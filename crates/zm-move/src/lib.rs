//! Cross-zone relocation of instances and their persistent disks.
//!
//! A move runs as a strictly ordered sequence of steps. Every step issues its
//! mutating requests, waits for the resulting operations and verifies them
//! before the next step starts:
//!
//! ```text
//! select & validate -> destination zone check -> quota check
//!   -> deprecation check -> confirm -> write move log
//!   -> disable auto-delete -> delete instances -> snapshot disks
//!   -> delete disks -> recreate disks -> recreate instances
//!   -> delete snapshots -> delete move log
//! ```
//!
//! The move log is written before the first destructive step. If anything
//! fails afterwards the log stays on disk and [`resume::resume_move`] picks up
//! the remaining work from it.

pub mod config;
pub mod control_plane;
pub mod deprecation;
pub mod movelog;
pub mod operations;
pub mod orchestrator;
pub mod preconditions;
pub mod prompt;
pub mod quota;
pub mod resume;

#[cfg(test)]
pub(crate) mod fake;

use std::path::PathBuf;

use async_trait::async_trait;
use compute_api::{
    AddressAggregatedList, CreateDiskRequest, CreateSnapshotRequest, Disk, Instance,
    LinkedResource, MachineType, Operation, Project, Region, Snapshot, Zone,
};

pub use config::MoveConfig;
pub use control_plane::ControlPlane;
pub use orchestrator::{MoveContext, MoveRequest, move_instances};
pub use prompt::{AssumeYes, Confirmer};
pub use resume::{ResumeRequest, resume_move};

/// At most this many instances, and this many disks, move in one invocation.
pub const MAX_INSTANCES_TO_MOVE: usize = 100;
pub const MAX_DISKS_TO_MOVE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Api(#[from] compute_api::Error),

    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    Precondition(String),

    #[error(
        "You do not have enough quota for {metric} in {region} for your project \
         ({available} available, {required} needed.)"
    )]
    Quota {
        metric: String,
        region: String,
        available: f64,
        required: f64,
    },

    #[error("{0}")]
    Deprecation(String),

    #[error("Aborting due to errors while {step}:\n{}", list_strings(.errors))]
    Step {
        step: &'static str,
        errors: Vec<String>,
    },

    #[error("Encountered errors:\n{}", list_strings(.0))]
    Operations(Vec<String>),

    #[error("Timeout reached while waiting for snapshots to be ready.")]
    SnapshotTimeout,

    #[error("Move aborted.")]
    Aborted,

    #[error("invalid instance name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("File not found: {}", .0.display())]
    LogNotFound(PathBuf),

    #[error("The log file did not contain a '{0}' key.")]
    LogMissingKey(&'static str),

    #[error("move log {}: {source}", path.display())]
    LogIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("move log {}: {source}", path.display())]
    LogFormat {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("missing env var: {0}")]
    MissingEnv(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Render a list one item per line, indented, the way every multi-item
/// message of this crate is shown.
pub(crate) fn list_strings<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| format!("  {}", s.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The control-plane calls a move depends on.
///
/// Every mutating call returns the [`Operation`] tracking it; the caller is
/// responsible for waiting on and verifying it (see [`operations`]).
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Project every call is scoped to.
    fn project(&self) -> &str;

    /// Base URL resource links are rendered under.
    fn base_url(&self) -> &str;

    async fn get_project(&self) -> compute_api::Result<Project>;
    async fn list_addresses(&self) -> compute_api::Result<AddressAggregatedList>;
    async fn get_zone(&self, zone: &str) -> compute_api::Result<Zone>;
    async fn get_region(&self, region: &str) -> compute_api::Result<Region>;

    async fn list_instances(&self, zone: &str) -> compute_api::Result<Vec<Instance>>;
    async fn insert_instance(&self, zone: &str, instance: &Instance)
    -> compute_api::Result<Operation>;
    async fn delete_instance(&self, zone: &str, name: &str) -> compute_api::Result<Operation>;
    async fn set_disk_auto_delete(
        &self,
        zone: &str,
        instance: &str,
        device_name: &str,
        auto_delete: bool,
    ) -> compute_api::Result<Operation>;

    async fn list_disks(&self, zone: &str) -> compute_api::Result<Vec<Disk>>;
    async fn insert_disk(&self, zone: &str, req: &CreateDiskRequest)
    -> compute_api::Result<Operation>;
    async fn delete_disk(&self, zone: &str, name: &str) -> compute_api::Result<Operation>;
    async fn create_snapshot(
        &self,
        zone: &str,
        disk: &str,
        req: &CreateSnapshotRequest,
    ) -> compute_api::Result<Operation>;

    async fn list_snapshots(&self) -> compute_api::Result<Vec<Snapshot>>;
    async fn delete_snapshot(&self, name: &str) -> compute_api::Result<Operation>;

    async fn list_machine_types(&self, zone: &str) -> compute_api::Result<Vec<MachineType>>;

    /// Re-read an operation to observe its progress.
    async fn get_operation(&self, op: &Operation) -> compute_api::Result<Operation>;

    /// GET an arbitrary resource by its absolute URL.
    async fn fetch(&self, url: &str) -> compute_api::Result<LinkedResource>;
}
