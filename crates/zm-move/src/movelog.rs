//! The on-disk checkpoint of a move.
//!
//! Written before the first destructive step and removed only after the
//! whole move succeeded, so its presence means a move needs resuming.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use compute_api::Instance;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

pub const LOG_FILE_PREFIX: &str = ".zonemove.move.";

/// Keys a log must carry to be resumable, in the order they are checked.
const REQUIRED_KEYS: [&str; 5] = [
    "src_zone",
    "dest_zone",
    "snapshot_mappings",
    "disktype_mappings",
    "instances",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveLog {
    #[serde(default)]
    pub version: String,
    pub dest_zone: String,
    pub src_zone: String,
    /// Full bodies of the instances to move, captured before deletion.
    pub instances: Vec<Instance>,
    /// Disk name to the name of its transport snapshot.
    pub snapshot_mappings: BTreeMap<String, String>,
    /// Disk name to its disk type in the destination zone.
    pub disktype_mappings: BTreeMap<String, String>,
}

impl MoveLog {
    pub fn new(
        src_zone: impl Into<String>,
        dest_zone: impl Into<String>,
        instances: Vec<Instance>,
        snapshot_mappings: BTreeMap<String, String>,
        disktype_mappings: BTreeMap<String, String>,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            dest_zone: dest_zone.into(),
            src_zone: src_zone.into(),
            instances,
            snapshot_mappings,
            disktype_mappings,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string(self).map_err(|source| Error::LogFormat {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, body).map_err(|source| Error::LogIo {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), instances = self.instances.len(), "move log written");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::LogNotFound(path.to_path_buf()));
        }
        info!(path = %path.display(), "parsing log file");

        let format_err = |source: serde_json::Error| Error::LogFormat {
            path: path.to_path_buf(),
            source,
        };
        let raw = fs::read_to_string(path).map_err(|source| Error::LogIo {
            path: path.to_path_buf(),
            source,
        })?;
        let value: serde_json::Value = serde_json::from_str(&raw).map_err(format_err)?;

        for key in REQUIRED_KEYS {
            if value.get(key).is_none_or(serde_json::Value::is_null) {
                return Err(Error::LogMissingKey(key));
            }
        }
        serde_json::from_value(value).map_err(format_err)
    }
}

/// `<dir>/.zonemove.move.<YYYYmmddHHMMSS>`, where `dir` defaults to the
/// home directory.
pub fn generate_log_path(dir: Option<&Path>, now: DateTime<Utc>) -> Result<PathBuf> {
    let dir = match dir {
        Some(d) => d.to_path_buf(),
        None => dirs::home_dir().ok_or_else(|| {
            Error::Usage("Cannot find a home directory for the move log; set ZONEMOVE_LOG_DIR.".into())
        })?,
    };
    Ok(dir.join(format!("{LOG_FILE_PREFIX}{}", now.format("%Y%m%d%H%M%S"))))
}

pub fn delete_log(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|source| Error::LogIo {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "move log deleted");
    Ok(())
}
