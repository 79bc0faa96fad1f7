//! In-memory control plane for tests.
//!
//! Mutating calls take effect immediately and return a `DONE` operation,
//! unless a failure was injected for that call with [`FakeCompute::fail`].
//! Operations are named `operation-<n>` in call order; one scheduled with
//! [`FakeCompute::finish_after_polls`] is returned `RUNNING` instead.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use compute_api::{
    Address, AddressAggregatedList, AttachedDisk, AttachedDiskType, CreateDiskRequest,
    CreateSnapshotRequest, Disk, Instance, LinkedResource, MachineType, Operation, OperationError,
    OperationErrorEntry, OperationStatus, Project, Quota, Region, Snapshot, SnapshotStatus, Zone,
    ZoneStatus,
};

use crate::{ComputeApi, Confirmer};

pub const BASE: &str = "https://compute.example.test/compute/v1";
pub const PROJECT: &str = "my-project";

pub fn url(path: &str) -> String {
    format!("{BASE}/projects/{PROJECT}/{path}")
}

pub fn op(name: &str, status: OperationStatus) -> Operation {
    Operation {
        name: name.to_string(),
        status,
        self_link: String::new(),
        zone: None,
        target_link: None,
        operation_type: None,
        error: None,
    }
}

pub fn done(name: &str) -> Operation {
    op(name, OperationStatus::Done)
}

pub fn quota(metric: &str, limit: f64, usage: f64) -> Quota {
    Quota {
        metric: metric.to_string(),
        limit,
        usage,
    }
}

pub fn persistent(disk: &str, zone: &str) -> AttachedDisk {
    AttachedDisk {
        disk_type: AttachedDiskType::Persistent,
        source: Some(url(&format!("zones/{zone}/disks/{disk}"))),
        device_name: Some(disk.to_string()),
        boot: false,
        auto_delete: true,
        extra: Default::default(),
    }
}

pub fn instance(name: &str, zone: &str, machine_type: &str, disks: &[&str]) -> Instance {
    Instance {
        name: name.to_string(),
        self_link: url(&format!("zones/{zone}/instances/{name}")),
        zone: url(&format!("zones/{zone}")),
        machine_type: url(&format!("zones/{zone}/machineTypes/{machine_type}")),
        disks: disks.iter().map(|d| persistent(d, zone)).collect(),
        ..Instance::default()
    }
}

/// Confirmer that answers every prompt the same way and records what it
/// was shown.
#[derive(Default)]
pub struct Scripted {
    answer: bool,
    prompts: Mutex<Vec<String>>,
    presented: Mutex<Vec<String>>,
}

impl Scripted {
    pub fn yes() -> Self {
        Self {
            answer: true,
            ..Self::default()
        }
    }

    pub fn no() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn presented(&self) -> String {
        self.presented.lock().unwrap().join("\n")
    }
}

impl Confirmer for Scripted {
    fn present(&self, text: &str) {
        self.presented.lock().unwrap().push(text.to_string());
    }

    fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answer
    }
}

#[derive(Default)]
struct State {
    project_quotas: Vec<Quota>,
    addresses: AddressAggregatedList,
    zones: HashMap<String, Zone>,
    regions: HashMap<String, Region>,
    instances: BTreeMap<String, Vec<Instance>>,
    disks: BTreeMap<String, Vec<Disk>>,
    snapshots: Vec<Snapshot>,
    new_snapshot_status: Option<SnapshotStatus>,
    machine_types: HashMap<String, Vec<MachineType>>,
    resources: HashMap<String, LinkedResource>,
    finish_after: HashMap<String, u32>,
    polls: HashMap<String, u32>,
    failures: HashMap<String, String>,
    calls: Vec<String>,
    next_op: u64,
}

#[derive(Default)]
pub struct FakeCompute {
    state: Mutex<State>,
}

impl FakeCompute {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    // ── Setup ───────────────────────────────────────────────────────

    pub fn add_zone(&self, name: &str, region: &str) -> &Self {
        self.set_zone(Zone {
            name: name.to_string(),
            region: url(&format!("regions/{region}")),
            status: Some(ZoneStatus::Up),
            deprecated: None,
            maintenance_windows: Vec::new(),
        })
    }

    pub fn set_zone(&self, zone: Zone) -> &Self {
        self.with(|s| s.zones.insert(zone.name.clone(), zone));
        self
    }

    pub fn add_region(&self, name: &str, quotas: Vec<Quota>) -> &Self {
        self.with(|s| {
            s.regions.insert(
                name.to_string(),
                Region {
                    name: name.to_string(),
                    quotas,
                },
            )
        });
        self
    }

    pub fn set_project_quotas(&self, quotas: Vec<Quota>) -> &Self {
        self.with(|s| s.project_quotas = quotas);
        self
    }

    pub fn add_address(&self, region: &str, ip: &str) -> &Self {
        self.with(|s| {
            s.addresses
                .items
                .entry(format!("regions/{region}"))
                .or_default()
                .addresses
                .push(Address {
                    name: format!("addr-{ip}"),
                    address: ip.to_string(),
                    region: url(&format!("regions/{region}")),
                })
        });
        self
    }

    pub fn add_instance(&self, zone: &str, instance: Instance) -> &Self {
        self.with(|s| s.instances.entry(zone.to_string()).or_default().push(instance));
        self
    }

    pub fn add_disk(&self, zone: &str, name: &str, size_gb: u64) -> &Self {
        self.with(|s| {
            s.disks.entry(zone.to_string()).or_default().push(Disk {
                name: name.to_string(),
                zone: url(&format!("zones/{zone}")),
                size_gb,
                disk_type: url(&format!("zones/{zone}/diskTypes/pd-standard")),
                status: "READY".into(),
                self_link: url(&format!("zones/{zone}/disks/{name}")),
            })
        });
        self
    }

    pub fn add_snapshot(&self, name: &str, status: SnapshotStatus) -> &Self {
        self.with(|s| {
            s.snapshots.push(Snapshot {
                name: name.to_string(),
                status,
                self_link: url(&format!("global/snapshots/{name}")),
            })
        });
        self
    }

    /// Status given to snapshots created through the API (default `READY`).
    pub fn new_snapshots_are(&self, status: SnapshotStatus) -> &Self {
        self.with(|s| s.new_snapshot_status = Some(status));
        self
    }

    pub fn add_machine_type(&self, zone: &str, name: &str, cpus: u32) -> &Self {
        self.with(|s| {
            s.machine_types
                .entry(zone.to_string())
                .or_default()
                .push(MachineType {
                    name: name.to_string(),
                    self_link: url(&format!("zones/{zone}/machineTypes/{name}")),
                    guest_cpus: cpus,
                    zone: url(&format!("zones/{zone}")),
                    deprecated: None,
                })
        });
        self
    }

    pub fn add_resource(&self, resource: LinkedResource) -> &Self {
        self.with(|s| s.resources.insert(resource.self_link.clone(), resource));
        self
    }

    /// Operations named `name` report `RUNNING` until polled `polls` times.
    pub fn finish_after_polls(&self, name: &str, polls: u32) -> &Self {
        self.with(|s| s.finish_after.insert(name.to_string(), polls));
        self
    }

    /// Make the call identified by `key` (e.g. `delete_disk:root`) return a
    /// failed operation without taking effect.
    pub fn fail(&self, key: &str, message: &str) -> &Self {
        self.with(|s| s.failures.insert(key.to_string(), message.to_string()));
        self
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn polls(&self, name: &str) -> u32 {
        self.with(|s| s.polls.get(name).copied().unwrap_or(0))
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    /// Calls whose key starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    pub fn instances_in(&self, zone: &str) -> Vec<Instance> {
        self.with(|s| s.instances.get(zone).cloned().unwrap_or_default())
    }

    pub fn disk_names_in(&self, zone: &str) -> Vec<String> {
        self.with(|s| {
            s.disks
                .get(zone)
                .map(|ds| ds.iter().map(|d| d.name.clone()).collect())
                .unwrap_or_default()
        })
    }

    pub fn disk_in(&self, zone: &str, name: &str) -> Option<Disk> {
        self.with(|s| {
            s.disks
                .get(zone)
                .and_then(|ds| ds.iter().find(|d| d.name == name).cloned())
        })
    }

    pub fn snapshot_names(&self) -> Vec<String> {
        self.with(|s| s.snapshots.iter().map(|s| s.name.clone()).collect())
    }

    // ── Internals ───────────────────────────────────────────────────

    /// Record the call, then either apply `effect` or fail it as injected.
    fn mutate(
        &self,
        key: String,
        effect: impl FnOnce(&mut State) -> Result<(), compute_api::Error>,
    ) -> compute_api::Result<Operation> {
        self.with(|s| {
            s.calls.push(key.clone());
            s.next_op += 1;
            let name = format!("operation-{}", s.next_op);

            if let Some(message) = s.failures.get(&key) {
                return Ok(Operation {
                    error: Some(OperationError {
                        errors: vec![OperationErrorEntry {
                            code: Some("INJECTED".into()),
                            message: Some(message.clone()),
                        }],
                    }),
                    ..done(&name)
                });
            }

            effect(s)?;
            if s.finish_after.contains_key(&name) {
                return Ok(op(&name, OperationStatus::Running));
            }
            Ok(done(&name))
        })
    }

    fn read<R>(&self, key: String, f: impl FnOnce(&State) -> R) -> R {
        self.with(|s| {
            s.calls.push(key);
            f(s)
        })
    }
}

fn not_found(endpoint: &'static str) -> compute_api::Error {
    compute_api::Error::NotFound { endpoint }
}

#[async_trait]
impl ComputeApi for FakeCompute {
    fn project(&self) -> &str {
        PROJECT
    }

    fn base_url(&self) -> &str {
        BASE
    }

    async fn get_project(&self) -> compute_api::Result<Project> {
        Ok(self.read("get_project".into(), |s| Project {
            name: PROJECT.to_string(),
            quotas: s.project_quotas.clone(),
        }))
    }

    async fn list_addresses(&self) -> compute_api::Result<AddressAggregatedList> {
        Ok(self.read("list_addresses".into(), |s| s.addresses.clone()))
    }

    async fn get_zone(&self, zone: &str) -> compute_api::Result<Zone> {
        self.read(format!("get_zone:{zone}"), |s| s.zones.get(zone).cloned())
            .ok_or_else(|| not_found("get zone"))
    }

    async fn get_region(&self, region: &str) -> compute_api::Result<Region> {
        self.read(format!("get_region:{region}"), |s| s.regions.get(region).cloned())
            .ok_or_else(|| not_found("get region"))
    }

    async fn list_instances(&self, zone: &str) -> compute_api::Result<Vec<Instance>> {
        Ok(self.read(format!("list_instances:{zone}"), |s| {
            s.instances.get(zone).cloned().unwrap_or_default()
        }))
    }

    async fn insert_instance(
        &self,
        zone: &str,
        instance: &Instance,
    ) -> compute_api::Result<Operation> {
        let zone = zone.to_string();
        let body = instance.clone();
        self.mutate(format!("insert_instance:{}", instance.name), move |s| {
            s.instances.entry(zone).or_default().push(body);
            Ok(())
        })
    }

    async fn delete_instance(&self, zone: &str, name: &str) -> compute_api::Result<Operation> {
        self.mutate(format!("delete_instance:{name}"), |s| {
            let list = s
                .instances
                .get_mut(zone)
                .ok_or_else(|| not_found("delete instance"))?;
            let before = list.len();
            list.retain(|i| i.name != name);
            if list.len() == before {
                return Err(not_found("delete instance"));
            }
            Ok(())
        })
    }

    async fn set_disk_auto_delete(
        &self,
        zone: &str,
        instance: &str,
        device_name: &str,
        auto_delete: bool,
    ) -> compute_api::Result<Operation> {
        self.mutate(
            format!("set_disk_auto_delete:{instance}/{device_name}={auto_delete}"),
            |s| {
                let disk = s
                    .instances
                    .get_mut(zone)
                    .and_then(|list| list.iter_mut().find(|i| i.name == instance))
                    .and_then(|i| {
                        i.disks
                            .iter_mut()
                            .find(|d| d.device_name.as_deref() == Some(device_name))
                    })
                    .ok_or_else(|| not_found("set disk auto-delete"))?;
                disk.auto_delete = auto_delete;
                Ok(())
            },
        )
    }

    async fn list_disks(&self, zone: &str) -> compute_api::Result<Vec<Disk>> {
        Ok(self.read(format!("list_disks:{zone}"), |s| {
            s.disks.get(zone).cloned().unwrap_or_default()
        }))
    }

    async fn insert_disk(
        &self,
        zone: &str,
        req: &CreateDiskRequest,
    ) -> compute_api::Result<Operation> {
        let zone = zone.to_string();
        let req = req.clone();
        self.mutate(format!("insert_disk:{}", req.name), move |s| {
            let snapshot = compute_api::resource_name(&req.source_snapshot);
            if !s.snapshots.iter().any(|sn| sn.name == snapshot) {
                return Err(not_found("insert disk"));
            }
            s.disks.entry(zone.clone()).or_default().push(Disk {
                name: req.name.clone(),
                zone: url(&format!("zones/{zone}")),
                size_gb: 10,
                disk_type: req.disk_type.clone().unwrap_or_default(),
                status: "READY".into(),
                self_link: url(&format!("zones/{zone}/disks/{}", req.name)),
            });
            Ok(())
        })
    }

    async fn delete_disk(&self, zone: &str, name: &str) -> compute_api::Result<Operation> {
        self.mutate(format!("delete_disk:{name}"), |s| {
            let list = s.disks.get_mut(zone).ok_or_else(|| not_found("delete disk"))?;
            let before = list.len();
            list.retain(|d| d.name != name);
            if list.len() == before {
                return Err(not_found("delete disk"));
            }
            Ok(())
        })
    }

    async fn create_snapshot(
        &self,
        zone: &str,
        disk: &str,
        req: &CreateSnapshotRequest,
    ) -> compute_api::Result<Operation> {
        let name = req.name.clone();
        self.mutate(format!("create_snapshot:{disk}"), move |s| {
            let exists = s
                .disks
                .get(zone)
                .is_some_and(|ds| ds.iter().any(|d| d.name == disk));
            if !exists {
                return Err(not_found("create snapshot"));
            }
            let status = s.new_snapshot_status.unwrap_or(SnapshotStatus::Ready);
            s.snapshots.push(Snapshot {
                self_link: url(&format!("global/snapshots/{name}")),
                name,
                status,
            });
            Ok(())
        })
    }

    async fn list_snapshots(&self) -> compute_api::Result<Vec<Snapshot>> {
        Ok(self.read("list_snapshots".into(), |s| s.snapshots.clone()))
    }

    async fn delete_snapshot(&self, name: &str) -> compute_api::Result<Operation> {
        let before = self.with(|s| s.snapshots.len());
        let op = self.mutate(format!("delete_snapshot:{name}"), |s| {
            s.snapshots.retain(|sn| sn.name != name);
            Ok(())
        })?;
        if op.error.is_none() && self.with(|s| s.snapshots.len()) == before {
            return Err(not_found("delete snapshot"));
        }
        Ok(op)
    }

    async fn list_machine_types(&self, zone: &str) -> compute_api::Result<Vec<MachineType>> {
        Ok(self.read(format!("list_machine_types:{zone}"), |s| {
            s.machine_types.get(zone).cloned().unwrap_or_default()
        }))
    }

    async fn get_operation(&self, op: &Operation) -> compute_api::Result<Operation> {
        let status = self.with(|s| {
            let polls = s.polls.entry(op.name.clone()).or_insert(0);
            *polls += 1;
            match s.finish_after.get(&op.name) {
                Some(needed) if *polls < *needed => OperationStatus::Running,
                _ => OperationStatus::Done,
            }
        });
        Ok(Operation {
            status,
            ..op.clone()
        })
    }

    async fn fetch(&self, url: &str) -> compute_api::Result<LinkedResource> {
        self.read(format!("fetch:{url}"), |s| s.resources.get(url).cloned())
            .ok_or_else(|| not_found("fetch resource"))
    }
}
