//! Quota headroom check run before any mutation.

use std::collections::{BTreeMap, HashMap, HashSet};

use compute_api::{Instance, Project, Quota, resource_name};
use tracing::{debug, info};

use crate::{ComputeApi, Error, Result};

pub const INSTANCES: &str = "INSTANCES";
pub const CPUS: &str = "CPUS";
pub const DISKS: &str = "DISKS";
pub const DISKS_TOTAL_GB: &str = "DISKS_TOTAL_GB";
pub const SNAPSHOTS: &str = "SNAPSHOTS";

/// Quota metric name to amount.
pub type QuotaMap = BTreeMap<String, f64>;

/// What a move consumes, per metric.
///
/// `snapshots_to_create` defaults to one snapshot per disk; a resume passes
/// only the snapshots that do not exist yet.
pub async fn requirements(
    api: &dyn ComputeApi,
    instances: &[Instance],
    disks: &[String],
    src_zone: &str,
    snapshots_to_create: Option<usize>,
) -> Result<QuotaMap> {
    let cpus = total_cpus(api, instances, src_zone).await?;
    let disk_gb = total_disk_size_gb(api, disks, src_zone).await?;

    Ok(QuotaMap::from([
        (INSTANCES.to_string(), instances.len() as f64),
        (CPUS.to_string(), cpus),
        (DISKS.to_string(), disks.len() as f64),
        (DISKS_TOTAL_GB.to_string(), disk_gb),
        (
            SNAPSHOTS.to_string(),
            snapshots_to_create.unwrap_or(disks.len()) as f64,
        ),
    ]))
}

async fn total_cpus(api: &dyn ComputeApi, instances: &[Instance], zone: &str) -> Result<f64> {
    let machine_types = api.list_machine_types(zone).await?;
    let by_link: HashMap<&str, u32> = machine_types
        .iter()
        .map(|m| (m.self_link.as_str(), m.guest_cpus))
        .collect();
    let by_name: HashMap<&str, u32> = machine_types
        .iter()
        .map(|m| (m.name.as_str(), m.guest_cpus))
        .collect();

    let mut total = 0.0;
    for instance in instances {
        let cpus = by_link
            .get(instance.machine_type.as_str())
            .or_else(|| by_name.get(resource_name(&instance.machine_type)))
            .ok_or_else(|| {
                Error::Precondition(format!(
                    "Machine type {} of instance {} does not exist in {zone}.",
                    instance.machine_type, instance.name
                ))
            })?;
        total += f64::from(*cpus);
    }
    Ok(total)
}

async fn total_disk_size_gb(api: &dyn ComputeApi, disks: &[String], zone: &str) -> Result<f64> {
    let wanted: HashSet<&str> = disks.iter().map(String::as_str).collect();
    Ok(api
        .list_disks(zone)
        .await?
        .iter()
        .filter(|d| wanted.contains(d.name.as_str()))
        .map(|d| d.size_gb as f64)
        .sum())
}

/// Available quota for every metric in `requirements`.
///
/// Project headroom counts the resources being moved as free, since they are
/// deleted before their replacements are created. `SNAPSHOTS` is the
/// exception: transport snapshots are net-new. The result is then capped by
/// the region's headroom. Values may be negative.
pub fn extract_available_quota(
    project_quota: &[Quota],
    region_quota: &[Quota],
    requirements: &QuotaMap,
) -> QuotaMap {
    let mut available = QuotaMap::new();

    for quota in project_quota {
        let Some(required) = requirements.get(&quota.metric) else {
            continue;
        };
        let mut headroom = quota.limit - quota.usage;
        if quota.metric != SNAPSHOTS {
            headroom += required;
        }
        available.insert(quota.metric.clone(), headroom);
    }

    for quota in region_quota {
        if !requirements.contains_key(&quota.metric) {
            continue;
        }
        let headroom = quota.limit - quota.usage;
        available
            .entry(quota.metric.clone())
            .and_modify(|a| *a = a.min(headroom))
            .or_insert(headroom);
    }

    available
}

/// Fail if the destination lacks headroom for the move.
///
/// Within one region only `SNAPSHOTS` is checked: the other resources are
/// deleted and recreated in the same regional pool. That holds only while
/// quota is pooled per region.
pub async fn check_quotas(
    api: &dyn ComputeApi,
    project: &Project,
    instances: &[Instance],
    disks: &[String],
    src_zone: &str,
    dest_zone: &str,
    snapshots_to_create: Option<usize>,
) -> Result<()> {
    info!("checking quotas");

    let mut requirements = requirements(api, instances, disks, src_zone, snapshots_to_create).await?;

    let dest = api.get_zone(dest_zone).await?;
    let src = api.get_zone(src_zone).await?;
    let region_name = resource_name(&dest.region).to_string();
    let region = api.get_region(&region_name).await?;

    if src.region == dest.region {
        requirements.retain(|metric, _| metric == SNAPSHOTS);
    }

    let available = extract_available_quota(&project.quotas, &region.quotas, &requirements);
    debug!(?requirements, ?available, "quota for move");

    for (metric, required) in &requirements {
        if let Some(available) = available.get(metric) {
            if available - required < 0.0 {
                return Err(Error::Quota {
                    metric: metric.clone(),
                    region: region_name,
                    available: *available,
                    required: *required,
                });
            }
        }
    }
    Ok(())
}
