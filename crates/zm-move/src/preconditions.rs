//! Checks that run before any mutation. A failure here leaves the project
//! untouched.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use compute_api::{AttachedDiskType, Instance, Zone, ZoneStatus};
use regex::Regex;
use tracing::info;

use crate::{
    ComputeApi, Confirmer, Error, MAX_DISKS_TO_MOVE, MAX_INSTANCES_TO_MOVE, Result, list_strings,
};

/// Validate the zones and name patterns of a `moveinstances` invocation.
pub fn validate_move_args(src_zone: &str, dest_zone: &str, patterns: &[String]) -> Result<()> {
    if src_zone.is_empty() {
        return Err(Error::Usage(
            "You must specify a source zone through the --source_zone flag.".into(),
        ));
    }
    if dest_zone.is_empty() {
        return Err(Error::Usage(
            "You must specify a destination zone through the --destination_zone flag.".into(),
        ));
    }
    if src_zone == dest_zone {
        return Err(Error::Usage(
            "The destination and source zones cannot be equal.".into(),
        ));
    }
    if patterns.iter().all(|p| p.trim().is_empty()) {
        return Err(Error::Usage(
            "You must specify at least one regex for instances to move.".into(),
        ));
    }
    Ok(())
}

/// One regex matching a name iff any pattern matches all of it.
///
/// Names cannot contain whitespace, so each pattern is further split on it:
/// `"[a-z]+ [0-9]+"` is two patterns.
pub fn combine_patterns(patterns: &[String]) -> Result<Regex> {
    let alternatives: Vec<&str> = patterns.iter().flat_map(|p| p.split_whitespace()).collect();
    Ok(Regex::new(&format!("^(?:{})$", alternatives.join("|")))?)
}

/// Instances of the source zone split by whether their name matches.
#[derive(Debug, Default)]
pub struct Selection {
    pub to_move: Vec<Instance>,
    /// Instances staying behind; their disks must not move.
    pub to_ignore: Vec<Instance>,
}

pub fn select_instances(instances: Vec<Instance>, matcher: &Regex) -> Selection {
    let (to_move, to_ignore): (Vec<_>, Vec<_>) = instances
        .into_iter()
        .partition(|i| matcher.is_match(&i.name));
    Selection { to_move, to_ignore }
}

pub fn check_instance_preconditions(to_move: &[Instance], in_dest: &[Instance]) -> Result<()> {
    if to_move.is_empty() {
        return Err(Error::Precondition("No matching instances were found.".into()));
    }
    if to_move.len() > MAX_INSTANCES_TO_MOVE {
        return Err(Error::Precondition(format!(
            "At most {MAX_INSTANCES_TO_MOVE} instances can be moved at a time. \
             Refine your query and try again."
        )));
    }

    let dest_names: HashSet<&str> = in_dest.iter().map(|i| i.name.as_str()).collect();
    let collisions: BTreeSet<&str> = to_move
        .iter()
        .map(|i| i.name.as_str())
        .filter(|n| dest_names.contains(n))
        .collect();
    if !collisions.is_empty() {
        return Err(Error::Precondition(format!(
            "Encountered name collisions. Instances with the following names exist in \
             both the source and destination zones: \n{}",
            list_strings(collisions)
        )));
    }
    Ok(())
}

/// Names of the persistent disks attached to `instances`, in attachment
/// order. A disk attached to several of them is listed once.
pub fn persistent_disk_names(instances: &[Instance]) -> Vec<String> {
    let mut seen = HashSet::new();
    instances
        .iter()
        .flat_map(Instance::persistent_disks)
        .filter_map(|d| d.source_name())
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// Instances among `instances` that have any of `disk_names` attached, with
/// those disks. Sorted by instance name.
pub fn disks_in_use_by(instances: &[Instance], disk_names: &[String]) -> Vec<(String, Vec<String>)> {
    let wanted: HashSet<&str> = disk_names.iter().map(String::as_str).collect();
    let mut in_use: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for instance in instances {
        for disk in &instance.disks {
            if disk.disk_type != AttachedDiskType::Persistent {
                continue;
            }
            if let Some(name) = disk.source_name().filter(|n| wanted.contains(n)) {
                in_use
                    .entry(instance.name.clone())
                    .or_default()
                    .push(name.to_string());
            }
        }
    }
    in_use.into_iter().collect()
}

/// Fail if too many disks are selected or any is shared with an instance
/// that stays behind.
pub fn check_disk_preconditions(to_ignore: &[Instance], disk_names: &[String]) -> Result<()> {
    if disk_names.len() > MAX_DISKS_TO_MOVE {
        return Err(Error::Precondition(format!(
            "At most {MAX_DISKS_TO_MOVE} disks can be moved at a time. \
             Refine your query and try again."
        )));
    }

    let shared = disks_in_use_by(to_ignore, disk_names);
    if !shared.is_empty() {
        let offending = shared
            .iter()
            .map(|(instance, disks)| format!("{instance}: {}", disks.join(", ")));
        return Err(Error::Precondition(format!(
            "Some of the instances you'd like to move have disks that are in use by \
             other instances: (Offending instance: disks attached)\n{}",
            list_strings(offending)
        )));
    }
    Ok(())
}

/// Start of the earliest maintenance window that has not already ended.
pub fn next_maintenance_start(zone: &Zone, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    zone.maintenance_windows
        .iter()
        .filter(|w| w.end_time.is_none_or(|end| end >= now))
        .filter_map(|w| w.begin_time)
        .min()
}

/// `Zone z will enter maintenance in 3 days and 4 hours`.
pub fn maintenance_warning(zone: &str, until: Duration) -> String {
    let days = until.num_days();
    let seconds = (until - Duration::days(days)).num_seconds();

    let mut warning = format!("Zone {zone} will enter maintenance in");
    if days != 0 {
        warning.push_str(&format!(" {days} day{}", if days == 1 { "" } else { "s" }));
    }
    if seconds != 0 {
        if days != 0 {
            warning.push_str(" and");
        }
        let hours = seconds / 3600;
        warning.push_str(&format!(" {hours} hour{}", if hours == 1 { "" } else { "s" }));
    }
    warning
}

/// Fail unless the destination zone can take new resources.
///
/// Maintenance starting within two weeks is not fatal but needs
/// confirmation.
pub async fn check_destination_zone(
    api: &dyn ComputeApi,
    zone_name: &str,
    now: DateTime<Utc>,
    confirmer: &dyn Confirmer,
) -> Result<()> {
    info!(zone = zone_name, "checking destination zone");
    let zone = api.get_zone(zone_name).await?;

    if zone.status != Some(ZoneStatus::Up) {
        return Err(Error::Precondition(format!(
            "Destination zone {zone_name} is not available."
        )));
    }

    if let Some(start) = next_maintenance_start(&zone, now) {
        if start <= now {
            return Err(Error::Precondition(format!(
                "Destination zone {zone_name} is in maintenance."
            )));
        }
        let until = start - now;
        if until < Duration::weeks(2) {
            let warning = maintenance_warning(zone_name, until);
            if !confirmer.confirm(&format!("{warning}. Proceed")) {
                return Err(Error::Aborted);
            }
        }
    }

    if zone.deprecated.as_ref().is_some_and(|d| d.will_cause_error()) {
        return Err(Error::Precondition(format!(
            "Destination zone {zone_name} is deprecated."
        )));
    }
    Ok(())
}
