mod cli;
mod confirm;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use zm_move::preconditions::validate_move_args;
use zm_move::{
    AssumeYes, Confirmer, ControlPlane, MoveConfig, MoveContext, MoveRequest, ResumeRequest,
    move_instances, resume_move,
};

use crate::cli::{Cli, Cmd, CommonArgs};
use crate::confirm::TerminalConfirmer;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => {
            println!("The move completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> zm_move::Result<()> {
    // Usage problems are reported before anything talks to the control plane.
    if let Cmd::MoveInstances {
        source_zone,
        destination_zone,
        patterns,
        ..
    } = &cli.cmd
    {
        validate_move_args(
            source_zone.as_deref().unwrap_or_default(),
            destination_zone.as_deref().unwrap_or_default(),
            patterns,
        )?;
    }

    let api = ControlPlane::from_env(cli.project)?;

    match cli.cmd {
        Cmd::MoveInstances {
            source_zone,
            destination_zone,
            common,
            patterns,
        } => {
            let confirmer = confirmer(&common);
            let ctx = MoveContext::load(&api, confirmer.as_ref(), config(&common)).await?;
            let req = MoveRequest {
                src_zone: source_zone.unwrap_or_default(),
                dest_zone: destination_zone.unwrap_or_default(),
                patterns,
            };
            move_instances(&ctx, &req).await
        }
        Cmd::ResumeMove {
            keep_log_file,
            common,
            log_path,
        } => {
            let confirmer = confirmer(&common);
            let ctx = MoveContext::load(&api, confirmer.as_ref(), config(&common)).await?;
            let req = ResumeRequest {
                log_path,
                keep_log_file,
            };
            resume_move(&ctx, &req).await
        }
    }
}

fn config(common: &CommonArgs) -> MoveConfig {
    common.apply(MoveConfig::from_env())
}

fn confirmer(common: &CommonArgs) -> Box<dyn Confirmer> {
    if common.force {
        Box::new(AssumeYes)
    } else {
        Box::new(TerminalConfirmer)
    }
}
