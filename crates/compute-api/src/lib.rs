//! Typed Rust client for the compute control-plane REST API.
//!
//! Covers the subset needed to relocate instances between zones:
//! instances, disks, snapshots, machine types, zones, regions, projects,
//! reserved addresses and long-running operations.

pub mod links;
mod types;

pub use links::{LinkError, ResourceLink, Scope, resource_name};
pub use types::*;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("compute api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("compute api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("compute api {endpoint}: resource not found")]
    NotFound { endpoint: &'static str },

    #[error("compute api {endpoint} returned an unreadable body: {source}")]
    Decode {
        endpoint: &'static str,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the compute REST API, bound to a single project.
#[derive(Clone)]
pub struct ComputeClient {
    token: String,
    project: String,
    base_url: String,
    http: reqwest::Client,
}

impl ComputeClient {
    pub fn new(token: impl Into<String>, project: impl Into<String>) -> Self {
        Self::with_base_url(token, project, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        token: impl Into<String>,
        project: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            project: project.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/projects/{}{path}", self.base_url, self.project)
    }

    fn zonal(&self, zone: &str, path: &str) -> String {
        self.url(&format!("/zones/{zone}{path}"))
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound { endpoint });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response, endpoint: &'static str) -> Result<T> {
        let bytes = Self::check(resp, endpoint).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Decode { endpoint, source })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        endpoint: &'static str,
    ) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .header("Authorization", self.auth())
            .query(query)
            .send()
            .await?;

        Self::decode(resp, endpoint).await
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &B,
        endpoint: &'static str,
    ) -> Result<Operation> {
        let resp = self
            .http
            .post(url)
            .header("Authorization", self.auth())
            .query(query)
            .json(body)
            .send()
            .await?;

        Self::decode(resp, endpoint).await
    }

    async fn delete(&self, url: &str, endpoint: &'static str) -> Result<Operation> {
        let resp = self
            .http
            .delete(url)
            .header("Authorization", self.auth())
            .send()
            .await?;

        Self::decode(resp, endpoint).await
    }

    /// Follow `nextPageToken` until the collection is exhausted.
    async fn list_all<T: DeserializeOwned>(&self, url: &str, endpoint: &'static str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page: ListResponse<T> = self
                .get_json(url, &page_query(page_token.as_deref()), endpoint)
                .await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(items),
            }
        }
    }

    // ── Instances ────────────────────────────────────────────────────

    pub async fn list_instances(&self, zone: &str) -> Result<Vec<Instance>> {
        self.list_all(&self.zonal(zone, "/instances"), "list instances")
            .await
    }

    pub async fn insert_instance(&self, zone: &str, instance: &Instance) -> Result<Operation> {
        self.post_json(&self.zonal(zone, "/instances"), &[], instance, "insert instance")
            .await
    }

    pub async fn delete_instance(&self, zone: &str, name: &str) -> Result<Operation> {
        self.delete(&self.zonal(zone, &format!("/instances/{name}")), "delete instance")
            .await
    }

    pub async fn set_disk_auto_delete(
        &self,
        zone: &str,
        instance: &str,
        device_name: &str,
        auto_delete: bool,
    ) -> Result<Operation> {
        let query = [
            ("deviceName", device_name.to_string()),
            ("autoDelete", auto_delete.to_string()),
        ];
        self.post_json(
            &self.zonal(zone, &format!("/instances/{instance}/setDiskAutoDelete")),
            &query,
            &serde_json::Value::Null,
            "set disk auto-delete",
        )
        .await
    }

    // ── Disks ────────────────────────────────────────────────────────

    pub async fn list_disks(&self, zone: &str) -> Result<Vec<Disk>> {
        self.list_all(&self.zonal(zone, "/disks"), "list disks")
            .await
    }

    pub async fn insert_disk(&self, zone: &str, req: &CreateDiskRequest) -> Result<Operation> {
        self.post_json(&self.zonal(zone, "/disks"), &[], req, "insert disk")
            .await
    }

    pub async fn delete_disk(&self, zone: &str, name: &str) -> Result<Operation> {
        self.delete(&self.zonal(zone, &format!("/disks/{name}")), "delete disk")
            .await
    }

    pub async fn create_snapshot(
        &self,
        zone: &str,
        disk: &str,
        req: &CreateSnapshotRequest,
    ) -> Result<Operation> {
        self.post_json(
            &self.zonal(zone, &format!("/disks/{disk}/createSnapshot")),
            &[],
            req,
            "create snapshot",
        )
        .await
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        self.list_all(&self.url("/global/snapshots"), "list snapshots")
            .await
    }

    pub async fn delete_snapshot(&self, name: &str) -> Result<Operation> {
        self.delete(&self.url(&format!("/global/snapshots/{name}")), "delete snapshot")
            .await
    }

    // ── Machine types, zones, regions, projects ──────────────────────

    pub async fn list_machine_types(&self, zone: &str) -> Result<Vec<MachineType>> {
        self.list_all(&self.zonal(zone, "/machineTypes"), "list machine types")
            .await
    }

    pub async fn get_zone(&self, zone: &str) -> Result<Zone> {
        self.get_json(&self.url(&format!("/zones/{zone}")), &[], "get zone")
            .await
    }

    pub async fn get_region(&self, region: &str) -> Result<Region> {
        self.get_json(&self.url(&format!("/regions/{region}")), &[], "get region")
            .await
    }

    pub async fn get_project(&self) -> Result<Project> {
        self.get_json(&self.url(""), &[], "get project").await
    }

    // ── Addresses ────────────────────────────────────────────────────

    /// All reserved addresses of the project, merged across pages.
    pub async fn aggregated_list_addresses(&self) -> Result<AddressAggregatedList> {
        let url = self.url("/aggregated/addresses");
        let mut merged = AddressAggregatedList::default();
        let mut page_token: Option<String> = None;
        loop {
            let page: AddressAggregatedList = self
                .get_json(&url, &page_query(page_token.as_deref()), "aggregated list addresses")
                .await?;
            for (scope, list) in page.items {
                merged
                    .items
                    .entry(scope)
                    .or_default()
                    .addresses
                    .extend(list.addresses);
            }
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(merged),
            }
        }
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Re-read an operation using the scope encoded in its self link.
    pub async fn get_operation(&self, op: &Operation) -> Result<Operation> {
        let url = match ResourceLink::parse(&op.self_link) {
            Ok(link) => link.to_url(&self.base_url),
            Err(_) => match &op.zone {
                Some(zone) => self.zonal(resource_name(zone), &format!("/operations/{}", op.name)),
                None => self.url(&format!("/global/operations/{}", op.name)),
            },
        };
        self.get_json(&url, &[], "get operation").await
    }

    // ── Arbitrary resources ──────────────────────────────────────────

    /// GET an absolute resource URL (images, machine types, ...).
    pub async fn fetch(&self, url: &str) -> Result<LinkedResource> {
        self.get_json(url, &[], "fetch resource").await
    }
}

fn page_query(page_token: Option<&str>) -> Vec<(&'static str, String)> {
    page_token
        .map(|t| vec![("pageToken", t.to_string())])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_query() {
        assert!(page_query(None).is_empty());
        assert_eq!(
            page_query(Some("next-1")),
            vec![("pageToken", "next-1".to_string())]
        );
    }
}
