//! Continuing an interrupted move from its log.
//!
//! Which steps remain is derived from what currently exists: instances
//! already in the destination are done, disks still in the source need
//! moving, and snapshots that exist need not be taken again.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use compute_api::Instance;
use tracing::info;

use crate::movelog::{MoveLog, delete_log};
use crate::orchestrator::MoveContext;
use crate::quota::check_quotas;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ResumeRequest {
    pub log_path: PathBuf,
    /// Leave the log on disk after a successful resume.
    pub keep_log_file: bool,
}

fn names(instances: &[Instance]) -> HashSet<&str> {
    instances.iter().map(|i| i.name.as_str()).collect()
}

/// Resume the move recorded at `req.log_path`.
pub async fn resume_move(ctx: &MoveContext<'_>, req: &ResumeRequest) -> Result<()> {
    let log = MoveLog::read(&req.log_path)?;
    let (src_zone, dest_zone) = (log.src_zone.as_str(), log.dest_zone.as_str());
    info!(src_zone, dest_zone, "resuming move");

    let api = ctx.api;
    let in_dest = api.list_instances(dest_zone).await?;
    let in_src = api.list_instances(src_zone).await?;

    // Matched by name: the same instance may have a different body now.
    let dest_names = names(&in_dest);
    let (to_ignore, to_move): (Vec<Instance>, Vec<Instance>) = log
        .instances
        .iter()
        .cloned()
        .partition(|i| dest_names.contains(i.name.as_str()));
    if to_move.is_empty() {
        return Err(Error::Precondition(format!(
            "All instances are already in {dest_zone}."
        )));
    }

    let disks_in_dest: HashSet<String> = api
        .list_disks(dest_zone)
        .await?
        .into_iter()
        .map(|d| d.name)
        .collect();
    let disks_in_src: HashSet<String> = api
        .list_disks(src_zone)
        .await?
        .into_iter()
        .map(|d| d.name)
        .collect();
    let disks_to_move: Vec<String> = log
        .snapshot_mappings
        .keys()
        .filter(|d| disks_in_src.contains(*d))
        .cloned()
        .collect();

    // Current bodies of the instances still waiting for deletion.
    let move_names = names(&to_move);
    let to_delete: Vec<Instance> = in_src
        .iter()
        .filter(|i| move_names.contains(i.name.as_str()))
        .cloned()
        .collect();

    let mut snapshots_to_create = BTreeMap::new();
    if !disks_to_move.is_empty() {
        let existing = snapshot_names(ctx).await?;
        snapshots_to_create = log
            .snapshot_mappings
            .iter()
            .filter(|(disk, snapshot)| disks_to_move.contains(*disk) && !existing.contains(*snapshot))
            .map(|(d, s)| (d.clone(), s.clone()))
            .collect();
    }

    check_quotas(
        api,
        ctx.project(),
        &to_move,
        &disks_to_move,
        src_zone,
        dest_zone,
        Some(snapshots_to_create.len()),
    )
    .await?;
    let common_region = ctx
        .confirm(&to_move, &to_ignore, &disks_to_move, src_zone, dest_zone)
        .await?;

    ctx.turn_off_auto_delete(&to_delete, src_zone).await?;
    ctx.delete_instances(&to_delete, src_zone).await?;
    ctx.create_snapshots(&snapshots_to_create, src_zone, dest_zone)
        .await?;
    ctx.delete_disks(&disks_to_move, src_zone).await?;

    let existing = snapshot_names(ctx).await?;
    let disks_to_create: BTreeMap<String, String> = log
        .snapshot_mappings
        .iter()
        .filter(|(disk, snapshot)| existing.contains(*snapshot) && !disks_in_dest.contains(*disk))
        .map(|(d, s)| (d.clone(), s.clone()))
        .collect();
    ctx.create_disks_from_snapshots(&disks_to_create, &log.disktype_mappings, dest_zone)
        .await?;

    ctx.create_instances(&to_move, src_zone, dest_zone, common_region.as_deref())
        .await?;

    let snapshots: Vec<String> = disks_to_create.values().cloned().collect();
    ctx.delete_snapshots(&snapshots).await?;

    if !req.keep_log_file {
        delete_log(&req.log_path)?;
    }
    info!("the move completed successfully");
    Ok(())
}

async fn snapshot_names(ctx: &MoveContext<'_>) -> Result<HashSet<String>> {
    Ok(ctx
        .api
        .list_snapshots()
        .await?
        .into_iter()
        .map(|s| s.name)
        .collect())
}
