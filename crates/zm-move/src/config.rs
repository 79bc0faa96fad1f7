use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SLEEP_BETWEEN_POLLS: Duration = Duration::from_secs(10);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(7200);

/// Knobs shared by `moveinstances` and `resumemove`.
#[derive(Debug, Clone)]
pub struct MoveConfig {
    /// Pause between two polls of an operation or of snapshot state.
    pub sleep_between_polls: Duration,
    /// How long to wait for the operations of one step.
    pub operation_timeout: Duration,
    /// How long to wait for snapshots to become `READY`.
    pub snapshot_timeout: Duration,
    /// Leave the transport snapshots in place after the move.
    pub keep_snapshots: bool,
    /// Swap `OBSOLETE`/`DELETED` images and machine types for their replacements.
    pub replace_deprecated: bool,
    /// Directory the move log is written to. Defaults to the home directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            sleep_between_polls: DEFAULT_SLEEP_BETWEEN_POLLS,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
            keep_snapshots: false,
            replace_deprecated: false,
            log_dir: None,
        }
    }
}

impl MoveConfig {
    /// Defaults overridden by env vars:
    ///
    /// - `ZONEMOVE_SLEEP_BETWEEN_POLLS_SECS`
    /// - `ZONEMOVE_MAX_WAIT_TIME_SECS`
    /// - `ZONEMOVE_SNAPSHOT_TIMEOUT_SECS`
    /// - `ZONEMOVE_LOG_DIR`
    ///
    /// Unparseable values fall back to the default with a warning.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Self {
            sleep_between_polls: secs_from_env(
                "ZONEMOVE_SLEEP_BETWEEN_POLLS_SECS",
                defaults.sleep_between_polls,
            ),
            operation_timeout: secs_from_env(
                "ZONEMOVE_MAX_WAIT_TIME_SECS",
                defaults.operation_timeout,
            ),
            snapshot_timeout: secs_from_env(
                "ZONEMOVE_SNAPSHOT_TIMEOUT_SECS",
                defaults.snapshot_timeout,
            ),
            log_dir: env::var("ZONEMOVE_LOG_DIR").ok().map(PathBuf::from),
            ..defaults
        }
    }
}

fn secs_from_env(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring invalid duration, using default");
                default
            }
        },
        Err(_) => default,
    }
}
