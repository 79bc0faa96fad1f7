//! The destructive step sequence of a move, shared by `moveinstances` and
//! `resumemove`.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::Utc;
use compute_api::{
    AddressAggregatedList, CreateDiskRequest, CreateSnapshotRequest, Instance, Project,
    ResourceLink, resource_name,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::MoveConfig;
use crate::deprecation::check_deprecated_resources;
use crate::movelog::{MoveLog, delete_log, generate_log_path};
use crate::operations::{run_step, wait_for_snapshots};
use crate::preconditions::{
    check_destination_zone, check_disk_preconditions, check_instance_preconditions,
    combine_patterns, persistent_disk_names, select_instances, validate_move_args,
};
use crate::quota::check_quotas;
use crate::{ComputeApi, Confirmer, Error, Result, list_strings};

/// Everything one invocation needs: the control plane, the prompt strategy,
/// the knobs, and the project state read once up front.
pub struct MoveContext<'a> {
    pub api: &'a dyn ComputeApi,
    pub confirmer: &'a dyn Confirmer,
    pub config: MoveConfig,
    project: Project,
    addresses: AddressAggregatedList,
}

impl<'a> MoveContext<'a> {
    /// Read the project (for quota) and its reserved addresses.
    pub async fn load(
        api: &'a dyn ComputeApi,
        confirmer: &'a dyn Confirmer,
        config: MoveConfig,
    ) -> Result<Self> {
        let project = api.get_project().await?;
        let addresses = api.list_addresses().await?;
        Ok(Self {
            api,
            confirmer,
            config,
            project,
            addresses,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// The command that picks up a failed move from `log_path`.
    pub fn resume_command(&self, log_path: &Path) -> String {
        format!(
            "zonemove --project={} resumemove {}",
            self.api.project(),
            log_path.display()
        )
    }

    // ── Planning ────────────────────────────────────────────────────

    /// Show the plan and ask to proceed.
    ///
    /// Returns the region both zones share, or `None` when they differ and
    /// reserved addresses cannot follow the instances.
    pub async fn confirm(
        &self,
        to_move: &[Instance],
        to_ignore: &[Instance],
        disks: &[String],
        src_zone: &str,
        dest_zone: &str,
    ) -> Result<Option<String>> {
        let mut plan = Vec::new();
        if !to_ignore.is_empty() {
            plan.push(format!(
                "These instances are already in {dest_zone} and will not be moved:"
            ));
            plan.push(list_strings(to_ignore.iter().map(|i| i.name.as_str())));
        }
        plan.push(format!("The following instances will be moved to {dest_zone}:"));
        plan.push(list_strings(to_move.iter().map(|i| i.name.as_str())));
        if !disks.is_empty() {
            plan.push(format!("The following disks will be moved to {dest_zone}:"));
            plan.push(list_strings(disks));
        }

        let src = self.api.get_zone(src_zone).await?;
        let dest = self.api.get_zone(dest_zone).await?;
        let common_region = if src.region == dest.region {
            Some(resource_name(&src.region).to_string())
        } else {
            warn!(
                src_region = resource_name(&src.region),
                dest_region = resource_name(&dest.region),
                "source and destination regions differ"
            );
            plan.push(
                "WARNING: The regions for source and destination zones do not match. \
                 If you are using reserved external IPs, they will not be preserved."
                    .into(),
            );
            None
        };

        plan.push("WARNING: Do not attempt to move instances to zones that cannot".into());
        plan.push("  support the current instances (e.g. Moving instances using SSDs".into());
        plan.push("  to zones that do not support SSD, Windows to non-Windows, etc.)".into());
        plan.push("*** Be prepared to recover manually in the event of failure ***".into());
        self.confirmer.present(&plan.join("\n"));

        if !self.confirmer.confirm("Proceed") {
            return Err(Error::Aborted);
        }
        Ok(common_region)
    }

    /// Disk name to its disk type rewritten into the destination zone.
    pub async fn disk_type_mappings(
        &self,
        disks: &[String],
        src_zone: &str,
        dest_zone: &str,
    ) -> Result<BTreeMap<String, String>> {
        let wanted: HashSet<&str> = disks.iter().map(String::as_str).collect();
        let from = format!("/zones/{src_zone}/");
        let to = format!("/zones/{dest_zone}/");
        Ok(self
            .api
            .list_disks(src_zone)
            .await?
            .into_iter()
            .filter(|d| wanted.contains(d.name.as_str()))
            .map(|d| (d.name, d.disk_type.replace(&from, &to)))
            .collect())
    }

    fn reserved_addresses(&self, common_region: Option<&str>) -> HashSet<String> {
        common_region
            .map(|region| {
                self.addresses
                    .in_region(region)
                    .iter()
                    .map(|a| a.address.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Steps ───────────────────────────────────────────────────────

    /// Keep the disks alive when their instances are deleted.
    pub async fn turn_off_auto_delete(&self, instances: &[Instance], zone: &str) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }
        info!("turning off auto delete for disks in the instances");

        let api = self.api;
        let requests = instances
            .iter()
            .flat_map(|i| {
                i.persistent_disks()
                    .filter_map(|d| d.device_name.as_deref())
                    .map(move |device| api.set_disk_auto_delete(zone, &i.name, device, false))
            })
            .collect();
        run_step(api, "turning off auto delete", requests, &self.config).await
    }

    pub async fn delete_instances(&self, instances: &[Instance], zone: &str) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }
        info!(count = instances.len(), "deleting instances");

        let requests = instances
            .iter()
            .map(|i| self.api.delete_instance(zone, &i.name))
            .collect();
        run_step(self.api, "deleting instances", requests, &self.config).await
    }

    /// Snapshot every disk in `mappings` and wait until all are `READY`.
    pub async fn create_snapshots(
        &self,
        mappings: &BTreeMap<String, String>,
        src_zone: &str,
        dest_zone: &str,
    ) -> Result<()> {
        if mappings.is_empty() {
            return Ok(());
        }
        info!(count = mappings.len(), "snapshotting disks");

        let bodies: Vec<(&str, CreateSnapshotRequest)> = mappings
            .iter()
            .map(|(disk, snapshot)| {
                (
                    disk.as_str(),
                    CreateSnapshotRequest {
                        name: snapshot.clone(),
                        description: Some(format!(
                            "Snapshot for moving disk {disk} from {src_zone} to {dest_zone}."
                        )),
                    },
                )
            })
            .collect();
        let requests = bodies
            .iter()
            .map(|(disk, body)| self.api.create_snapshot(src_zone, disk, body))
            .collect();
        run_step(self.api, "creating snapshots", requests, &self.config).await?;

        let names: HashSet<String> = mappings.values().cloned().collect();
        wait_for_snapshots(self.api, &names, &self.config).await
    }

    pub async fn delete_disks(&self, disks: &[String], zone: &str) -> Result<()> {
        if disks.is_empty() {
            return Ok(());
        }
        info!(count = disks.len(), "deleting disks");

        let requests = disks
            .iter()
            .map(|d| self.api.delete_disk(zone, d))
            .collect();
        run_step(self.api, "deleting disks", requests, &self.config).await
    }

    /// Create each disk of `mappings` in `dest_zone` from its snapshot,
    /// keeping its disk type.
    pub async fn create_disks_from_snapshots(
        &self,
        mappings: &BTreeMap<String, String>,
        disktype_mappings: &BTreeMap<String, String>,
        dest_zone: &str,
    ) -> Result<()> {
        if mappings.is_empty() {
            return Ok(());
        }
        info!(count = mappings.len(), "recreating disks from snapshots");

        let bodies: Vec<CreateDiskRequest> = mappings
            .iter()
            .map(|(disk, snapshot)| CreateDiskRequest {
                name: disk.clone(),
                disk_type: disktype_mappings.get(disk).cloned(),
                source_snapshot: ResourceLink::global(self.api.project(), "snapshots", snapshot)
                    .to_url(self.api.base_url()),
            })
            .collect();
        let requests = bodies
            .iter()
            .map(|body| self.api.insert_disk(dest_zone, body))
            .collect();
        run_step(self.api, "re-creating disks", requests, &self.config).await
    }

    /// Insert the instances into `dest_zone`, re-pointed at the destination
    /// and stripped of addresses that cannot follow them.
    pub async fn create_instances(
        &self,
        instances: &[Instance],
        src_zone: &str,
        dest_zone: &str,
        common_region: Option<&str>,
    ) -> Result<()> {
        if instances.is_empty() {
            return Ok(());
        }
        info!(count = instances.len(), zone = dest_zone, "recreating instances");

        let reserved = self.reserved_addresses(common_region);
        let bodies: Vec<Instance> = instances
            .iter()
            .map(|i| {
                let mut body = i.clone();
                set_ips(&mut body, &reserved);
                rewrite_for_zone(
                    &mut body,
                    self.api.project(),
                    self.api.base_url(),
                    src_zone,
                    dest_zone,
                );
                body
            })
            .collect();
        let requests = bodies
            .iter()
            .map(|body| self.api.insert_instance(dest_zone, body))
            .collect();
        run_step(self.api, "creating instances", requests, &self.config).await
    }

    /// Remove the transport snapshots unless they are to be kept.
    pub async fn delete_snapshots(&self, names: &[String]) -> Result<()> {
        if names.is_empty() || self.config.keep_snapshots {
            return Ok(());
        }
        info!(count = names.len(), "deleting snapshots");

        let requests = names.iter().map(|n| self.api.delete_snapshot(n)).collect();
        run_step(self.api, "deleting snapshots", requests, &self.config).await
    }
}

/// One fresh snapshot name per disk.
pub fn generate_snapshot_names(disks: &[String]) -> BTreeMap<String, String> {
    disks
        .iter()
        .map(|d| (d.clone(), format!("snapshot-{}", Uuid::new_v4())))
        .collect()
}

/// Drop every `natIP` that is not one of `reserved`.
pub fn set_ips(instance: &mut Instance, reserved: &HashSet<String>) {
    for config in instance
        .network_interfaces
        .iter_mut()
        .flat_map(|n| n.access_configs.iter_mut())
    {
        if config.nat_ip.as_ref().is_some_and(|ip| !reserved.contains(ip)) {
            config.nat_ip = None;
        }
    }
}

/// Point the zone, the machine type and the disk sources at `dest_zone`.
pub fn rewrite_for_zone(
    instance: &mut Instance,
    project: &str,
    base_url: &str,
    src_zone: &str,
    dest_zone: &str,
) {
    instance.zone = ResourceLink::global(project, "zones", dest_zone).to_url(base_url);
    instance.machine_type = ResourceLink::zonal(
        project,
        dest_zone,
        "machineTypes",
        resource_name(&instance.machine_type),
    )
    .to_url(base_url);

    let from = format!("zones/{src_zone}/");
    let to = format!("zones/{dest_zone}/");
    for disk in &mut instance.disks {
        if let Some(source) = &mut disk.source {
            *source = source.replace(&from, &to);
        }
    }
}

/// Name patterns selecting instances of `src_zone` to move to `dest_zone`.
#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub src_zone: String,
    pub dest_zone: String,
    pub patterns: Vec<String>,
}

/// Move the matching instances and their disks from `src_zone` to
/// `dest_zone`.
///
/// All checks run before the move log is written. After that, a failure
/// leaves the log in place and the returned error is preceded by a logged
/// resume command.
pub async fn move_instances(ctx: &MoveContext<'_>, req: &MoveRequest) -> Result<()> {
    validate_move_args(&req.src_zone, &req.dest_zone, &req.patterns)?;
    let src_zone = req.src_zone.as_str();
    let dest_zone = resource_name(&req.dest_zone);
    let api = ctx.api;

    check_destination_zone(api, dest_zone, Utc::now(), ctx.confirmer).await?;

    info!(
        zone = src_zone,
        patterns = %req.patterns.join(" "),
        "retrieving matching instances"
    );
    let matcher = combine_patterns(&req.patterns)?;
    let selection = select_instances(api.list_instances(src_zone).await?, &matcher);
    let in_dest = api.list_instances(dest_zone).await?;
    check_instance_preconditions(&selection.to_move, &in_dest)?;

    info!("checking disk preconditions");
    let disks = persistent_disk_names(&selection.to_move);
    check_disk_preconditions(&selection.to_ignore, &disks)?;

    check_quotas(
        api,
        ctx.project(),
        &selection.to_move,
        &disks,
        src_zone,
        dest_zone,
        None,
    )
    .await?;

    let to_move =
        check_deprecated_resources(api, selection.to_move, ctx.config.replace_deprecated).await?;

    let common_region = ctx
        .confirm(&to_move, &[], &disks, src_zone, dest_zone)
        .await?;

    let log_path = generate_log_path(ctx.config.log_dir.as_deref(), Utc::now())?;
    let snapshot_mappings = generate_snapshot_names(&disks);
    let disktype_mappings = ctx.disk_type_mappings(&disks, src_zone, dest_zone).await?;

    let log = MoveLog::new(
        src_zone,
        dest_zone,
        to_move,
        snapshot_mappings,
        disktype_mappings,
    );

    let result = execute_move(ctx, &log, &log_path, &disks, common_region.as_deref()).await;

    if let Err(e) = &result {
        error!(
            error = %e,
            resume = %ctx.resume_command(&log_path),
            "Sorry, we encountered an error while moving your instances. \
             Please try to resume the move using the resume command"
        );
    } else {
        info!("the move completed successfully");
    }
    result
}

/// The destructive half of a fresh move, from writing the log on.
async fn execute_move(
    ctx: &MoveContext<'_>,
    log: &MoveLog,
    log_path: &Path,
    disks: &[String],
    common_region: Option<&str>,
) -> Result<()> {
    let (src_zone, dest_zone) = (log.src_zone.as_str(), log.dest_zone.as_str());

    log.write(log_path)?;
    info!(
        resume = %ctx.resume_command(log_path),
        "if the move fails, you can re-attempt it with the resume command"
    );

    ctx.turn_off_auto_delete(&log.instances, src_zone).await?;
    ctx.delete_instances(&log.instances, src_zone).await?;
    ctx.create_snapshots(&log.snapshot_mappings, src_zone, dest_zone)
        .await?;
    ctx.delete_disks(disks, src_zone).await?;
    ctx.create_disks_from_snapshots(&log.snapshot_mappings, &log.disktype_mappings, dest_zone)
        .await?;
    ctx.create_instances(&log.instances, src_zone, dest_zone, common_region)
        .await?;

    let snapshots: Vec<String> = log.snapshot_mappings.values().cloned().collect();
    ctx.delete_snapshots(&snapshots).await?;

    delete_log(log_path)
}
