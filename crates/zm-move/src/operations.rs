//! Waiting on and verifying long-running operations.
//!
//! No step of a move may start until every operation of the previous step
//! has reached `DONE` without errors. [`run_step`] is the single gate every
//! mutating step goes through.

use std::collections::HashSet;
use std::future::Future;

use compute_api::{Operation, SnapshotStatus};
use futures_util::future::join_all;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::MoveConfig;
use crate::{ComputeApi, Error, Result};

/// Requests issued together before waiting for any of them.
pub const BATCH_SIZE: usize = 10;

/// Messages describing why `op` failed, or `None` if it carries no error.
pub fn failure_messages(op: &Operation) -> Option<Vec<String>> {
    let errors = &op.error.as_ref()?.errors;
    if errors.is_empty() {
        return None;
    }

    let name = if op.name.is_empty() { "<unknown name>" } else { &op.name };
    let messages = errors
        .iter()
        .map(|e| match (&e.message, &e.code) {
            (Some(message), _) if !message.is_empty() => message.clone(),
            (_, Some(code)) if !code.is_empty() => format!("Operation failed with code {code}."),
            _ => format!("Operation {name} failed, server returned no error"),
        })
        .collect();
    Some(messages)
}

/// A message if `op` has not reached `DONE`.
pub fn unfinished_message(op: &Operation) -> Option<String> {
    if op.is_done() {
        return None;
    }
    let name = if op.name.is_empty() { "<unknown name>" } else { &op.name };
    Some(format!(
        "Operation {name} did not complete. Its status is {}.",
        op.status.as_str()
    ))
}

/// Fail if any operation carries an error or is not `DONE`.
///
/// Every problem found is reported, not just the first.
pub fn verify_operations(ops: &[Operation]) -> Result<()> {
    let mut problems = Vec::new();
    for op in ops {
        if let Some(messages) = failure_messages(op) {
            problems.extend(messages);
            continue;
        }
        if let Some(message) = unfinished_message(op) {
            problems.push(message);
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(Error::Operations(problems))
    }
}

/// Poll every operation until it is `DONE` or the timeout elapses.
///
/// On timeout the last observed state is returned; [`verify_operations`]
/// decides whether that is fatal.
pub async fn wait_for_operations(
    api: &dyn ComputeApi,
    ops: Vec<Operation>,
    config: &MoveConfig,
) -> Result<Vec<Operation>> {
    let start = Instant::now();
    let mut finished = Vec::with_capacity(ops.len());

    for mut op in ops {
        while !op.is_done() {
            if start.elapsed() >= config.operation_timeout {
                warn!(
                    operation = %op.name,
                    status = op.status.as_str(),
                    target = op.target_link.as_deref().unwrap_or("<unknown>"),
                    "timeout reached, operation has not completed"
                );
                break;
            }
            info!(
                operation = %op.name,
                sleep_secs = config.sleep_between_polls.as_secs(),
                "waiting for operation"
            );
            tokio::time::sleep(config.sleep_between_polls).await;
            op = api.get_operation(&op).await?;
        }
        finished.push(op);
    }

    Ok(finished)
}

/// Issue a step's requests in batches, then wait for and verify every
/// resulting operation.
///
/// Request failures are collected across all batches and reported together
/// with any failed operation, after every accepted operation has settled.
pub async fn run_step<F>(
    api: &dyn ComputeApi,
    step: &'static str,
    requests: Vec<F>,
    config: &MoveConfig,
) -> Result<()>
where
    F: Future<Output = compute_api::Result<Operation>>,
{
    let mut ops = Vec::with_capacity(requests.len());
    let mut errors = Vec::new();

    let mut pending = requests.into_iter();
    loop {
        let batch: Vec<F> = pending.by_ref().take(BATCH_SIZE).collect();
        if batch.is_empty() {
            break;
        }
        for result in join_all(batch).await {
            match result {
                Ok(op) => ops.push(op),
                Err(e) => errors.push(e.to_string()),
            }
        }
    }

    // Accepted operations are waited on even when siblings were rejected,
    // so nothing is still in flight once the step reports failure.
    let ops = wait_for_operations(api, ops, config).await?;
    match verify_operations(&ops) {
        Ok(()) if errors.is_empty() => Ok(()),
        Ok(()) => Err(Error::Step { step, errors }),
        Err(Error::Operations(problems)) if !errors.is_empty() => {
            errors.extend(problems);
            Err(Error::Step { step, errors })
        }
        Err(e) => Err(e),
    }
}

/// Poll the snapshot list until every named snapshot is `READY`.
///
/// Snapshot readiness is a resource state, separate from the operation that
/// created it, and has its own timeout.
pub async fn wait_for_snapshots(
    api: &dyn ComputeApi,
    names: &HashSet<String>,
    config: &MoveConfig,
) -> Result<()> {
    let start = Instant::now();
    loop {
        if start.elapsed() > config.snapshot_timeout {
            return Err(Error::SnapshotTimeout);
        }

        let not_ready = api
            .list_snapshots()
            .await?
            .into_iter()
            .filter(|s| names.contains(&s.name) && s.status != SnapshotStatus::Ready)
            .count();
        if not_ready == 0 {
            info!("snapshots created and READY");
            return Ok(());
        }

        info!(
            not_ready,
            sleep_secs = config.sleep_between_polls.as_secs(),
            "waiting for snapshots to be READY"
        );
        tokio::time::sleep(config.sleep_between_polls).await;
    }
}
