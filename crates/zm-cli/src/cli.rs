use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use zm_move::MoveConfig;

#[derive(Parser, Debug)]
#[command(name = "zonemove", about = "Move instances and their disks between zones")]
pub struct Cli {
    /// Project to operate on. Defaults to COMPUTE_PROJECT.
    #[arg(long, global = true)]
    pub project: Option<String>,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Move instances matching the given name regexes, with their persistent
    /// disks, from one zone to another.
    ///
    /// Do not modify the project while a move runs. Instances lose all
    /// transient state (scratch disks, ephemeral IPs, memory).
    #[command(name = "moveinstances")]
    MoveInstances {
        /// [Required] The zone instances are moved from.
        #[arg(long = "source_zone")]
        source_zone: Option<String>,

        /// [Required] The zone instances are moved to.
        #[arg(long = "destination_zone")]
        destination_zone: Option<String>,

        #[command(flatten)]
        common: CommonArgs,

        /// Instance name regexes; an instance moves if any matches its whole name.
        #[arg(value_name = "NAME_REGEX")]
        patterns: Vec<String>,
    },

    /// Resume a move that failed, from the log it left behind.
    #[command(name = "resumemove")]
    ResumeMove {
        /// Keep the log file after the resume succeeds.
        #[arg(long = "keep_log_file")]
        keep_log_file: bool,

        #[command(flatten)]
        common: CommonArgs,

        #[arg(value_name = "LOG_PATH")]
        log_path: PathBuf,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Skip confirmation prompts.
    #[arg(long)]
    pub force: bool,

    /// Do not delete the snapshots created to transport the disks.
    #[arg(long = "keep_snapshots")]
    pub keep_snapshots: bool,

    /// Replace deprecated images and machine types with their replacements.
    #[arg(long = "replace_deprecated")]
    pub replace_deprecated: bool,

    /// Seconds to wait for the operations of each step.
    #[arg(long = "max_wait_time", value_name = "SECS")]
    pub max_wait_time: Option<u64>,

    /// Seconds between two polls of an operation.
    #[arg(long = "sleep_between_polls", value_name = "SECS")]
    pub sleep_between_polls: Option<u64>,
}

impl CommonArgs {
    /// Flags layered over `base`, which holds the environment's settings.
    pub fn apply(&self, base: MoveConfig) -> MoveConfig {
        let mut config = base;
        config.keep_snapshots |= self.keep_snapshots;
        config.replace_deprecated |= self.replace_deprecated;
        if let Some(secs) = self.max_wait_time {
            config.operation_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.sleep_between_polls {
            config.sleep_between_polls = Duration::from_secs(secs);
        }
        config
    }
}
