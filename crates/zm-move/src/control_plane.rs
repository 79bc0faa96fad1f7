use async_trait::async_trait;
use compute_api::{
    AddressAggregatedList, ComputeClient, CreateDiskRequest, CreateSnapshotRequest, Disk,
    Instance, LinkedResource, MachineType, Operation, Project, Region, Snapshot, Zone,
};
use tracing::debug;

use crate::{ComputeApi, Error, Result};

/// Compute control plane reached over REST.
///
/// Delegates to `compute_api::ComputeClient` for all HTTP calls.
pub struct ControlPlane {
    client: ComputeClient,
}

impl ControlPlane {
    pub fn new(client: ComputeClient) -> Self {
        Self { client }
    }

    /// Create from env vars: `COMPUTE_API_TOKEN` (required), `COMPUTE_PROJECT`
    /// (required unless `project` is given), `COMPUTE_API_URL`.
    pub fn from_env(project: Option<String>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let token = std::env::var("COMPUTE_API_TOKEN")
            .map_err(|_| Error::MissingEnv("COMPUTE_API_TOKEN".into()))?;
        let project = match project {
            Some(p) => p,
            None => std::env::var("COMPUTE_PROJECT")
                .map_err(|_| Error::MissingEnv("COMPUTE_PROJECT".into()))?,
        };
        let base_url = std::env::var("COMPUTE_API_URL")
            .unwrap_or_else(|_| compute_api::DEFAULT_BASE_URL.into());

        debug!(%project, %base_url, "compute control plane configured");

        Ok(Self::new(ComputeClient::with_base_url(token, project, base_url)))
    }
}

#[async_trait]
impl ComputeApi for ControlPlane {
    fn project(&self) -> &str {
        self.client.project()
    }

    fn base_url(&self) -> &str {
        self.client.base_url()
    }

    async fn get_project(&self) -> compute_api::Result<Project> {
        self.client.get_project().await
    }

    async fn list_addresses(&self) -> compute_api::Result<AddressAggregatedList> {
        self.client.aggregated_list_addresses().await
    }

    async fn get_zone(&self, zone: &str) -> compute_api::Result<Zone> {
        self.client.get_zone(zone).await
    }

    async fn get_region(&self, region: &str) -> compute_api::Result<Region> {
        self.client.get_region(region).await
    }

    async fn list_instances(&self, zone: &str) -> compute_api::Result<Vec<Instance>> {
        self.client.list_instances(zone).await
    }

    async fn insert_instance(
        &self,
        zone: &str,
        instance: &Instance,
    ) -> compute_api::Result<Operation> {
        self.client.insert_instance(zone, instance).await
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> compute_api::Result<Operation> {
        self.client.delete_instance(zone, name).await
    }

    async fn set_disk_auto_delete(
        &self,
        zone: &str,
        instance: &str,
        device_name: &str,
        auto_delete: bool,
    ) -> compute_api::Result<Operation> {
        self.client
            .set_disk_auto_delete(zone, instance, device_name, auto_delete)
            .await
    }

    async fn list_disks(&self, zone: &str) -> compute_api::Result<Vec<Disk>> {
        self.client.list_disks(zone).await
    }

    async fn insert_disk(
        &self,
        zone: &str,
        req: &CreateDiskRequest,
    ) -> compute_api::Result<Operation> {
        self.client.insert_disk(zone, req).await
    }

    async fn delete_disk(&self, zone: &str, name: &str) -> compute_api::Result<Operation> {
        self.client.delete_disk(zone, name).await
    }

    async fn create_snapshot(
        &self,
        zone: &str,
        disk: &str,
        req: &CreateSnapshotRequest,
    ) -> compute_api::Result<Operation> {
        self.client.create_snapshot(zone, disk, req).await
    }

    async fn list_snapshots(&self) -> compute_api::Result<Vec<Snapshot>> {
        self.client.list_snapshots().await
    }

    async fn delete_snapshot(&self, name: &str) -> compute_api::Result<Operation> {
        self.client.delete_snapshot(name).await
    }

    async fn list_machine_types(&self, zone: &str) -> compute_api::Result<Vec<MachineType>> {
        self.client.list_machine_types(zone).await
    }

    async fn get_operation(&self, op: &Operation) -> compute_api::Result<Operation> {
        self.client.get_operation(op).await
    }

    async fn fetch(&self, url: &str) -> compute_api::Result<LinkedResource> {
        self.client.fetch(url).await
    }
}
