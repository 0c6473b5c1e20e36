//! Execution engine - runs the operation graph across hosts
//!
//! Operations run strictly one after another in the graph's global order.
//! Within one operation every qualifying host gets one unit of work on a
//! bounded rayon pool, and the operation fully drains before the next one is
//! dispatched.
//!
//! The failure threshold is checked once per operation, after it drains, over
//! the hosts that were activated when execution started.

use crate::conditional::evaluate_all;
use crate::config::Config;
use crate::context::ProgressCallback;
use crate::error::{Error, Result};
use crate::graph::{HostOperation, OperationGraph};
use crate::inventory::{Host, Inventory};
use crate::operation::{Command, OperationBody};
use crate::types::{DeploySummary, OperationOutcome};
use crate::connectors::CommandOptions;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Worker threads; 0 means one per activated host
    pub parallel: usize,
    /// Abort once more than this percentage of hosts failed
    pub fail_percent: Option<u8>,
}

impl ExecuteOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            parallel: config.parallel(),
            fail_percent: config.fail_percent(),
        }
    }
}

/// Result of one (operation, host) unit.
struct UnitResult {
    host: String,
    outcome: OperationOutcome,
    /// The host could not be reached; its later units are errored too
    unreachable: bool,
}

/// Execute the graph over the inventory's activated hosts
///
/// `unreachable` lists hosts that already failed to connect; they count as
/// failed from the start. On abort the outcomes recorded so far stay in the
/// graph's operation metas.
pub fn execute<P: ProgressCallback>(
    inventory: &Inventory,
    graph: &OperationGraph,
    opts: &ExecuteOptions,
    unreachable: &BTreeSet<String>,
    progress: &mut P,
) -> Result<DeploySummary> {
    let order = graph.op_order()?;
    let hosts: Vec<&Host> = inventory.activated_hosts().collect();
    let attempted = hosts.len();

    let mut unreachable: BTreeSet<String> = unreachable.clone();
    let mut failed: BTreeSet<String> = unreachable.clone();
    let mut summary = DeploySummary::default();

    let jobs = if opts.parallel == 0 {
        attempted.max(1)
    } else {
        opts.parallel
    };
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .map_err(|e| Error::config(format!("failed to create thread pool: {e}")))?;

    for hash in &order {
        let Some(meta) = graph.meta(hash) else {
            continue;
        };
        let name = meta.display_name();

        let mut units: Vec<(&Host, &HostOperation)> = Vec::new();
        for host in &hosts {
            let Some(node) = graph.host_operation(host.name(), hash) else {
                continue;
            };
            if unreachable.contains(host.name()) {
                let outcome = OperationOutcome::Errored {
                    error: format!("{} is unreachable", host.name()),
                    ignored: false,
                };
                summary.add_outcome(&outcome);
                meta.record(host.name(), outcome);
            } else if !failed.contains(host.name()) {
                units.push((host, node));
            }
        }

        progress.on_operation_start(&name, units.len());
        log::info!("{name}: {} host(s)", units.len());

        let results: Mutex<Vec<UnitResult>> = Mutex::new(Vec::with_capacity(units.len()));
        pool.install(|| {
            units.par_iter().for_each(|(host, node)| {
                let result = run_unit(host, node);
                meta.record(&result.host, result.outcome.clone());
                match results.lock() {
                    Ok(mut list) => list.push(result),
                    Err(poisoned) => poisoned.into_inner().push(result),
                }
            });
        });
        meta.mark_executed();

        let mut results = match results.into_inner() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Report in inventory order, not completion order
        results.sort_by_key(|r| hosts.iter().position(|h| h.name() == r.host));

        for result in &results {
            summary.add_outcome(&result.outcome);
            progress.on_host_complete(&name, &result.host, &result.outcome);
            if let OperationOutcome::Errored { error, ignored } = &result.outcome {
                if *ignored {
                    log::warn!("{}: {name} failed (ignored): {error}", result.host);
                } else {
                    log::warn!("{}: {name} failed: {error}", result.host);
                }
            }
            if result.outcome.fails_host() {
                failed.insert(result.host.clone());
            }
            if result.unreachable {
                unreachable.insert(result.host.clone());
            }
        }
        progress.on_operation_complete(&name);

        if let Some(err) = threshold_breach(&name, failed.len(), attempted, opts.fail_percent) {
            summary.failed_hosts = ordered(&hosts, &failed);
            log::error!("{err}");
            return Err(err);
        }
    }

    summary.failed_hosts = ordered(&hosts, &failed);
    Ok(summary)
}

fn ordered(hosts: &[&Host], names: &BTreeSet<String>) -> Vec<String> {
    hosts
        .iter()
        .filter(|h| names.contains(h.name()))
        .map(|h| h.name().to_string())
        .collect()
}

/// `Some(DeployAborted)` when no host is left or the fail percent is exceeded.
fn threshold_breach(
    operation: &str,
    failed: usize,
    attempted: usize,
    fail_percent: Option<u8>,
) -> Option<Error> {
    if failed == 0 {
        return None;
    }
    let over_percent = fail_percent.is_some_and(|p| failed * 100 > usize::from(p) * attempted);
    if failed >= attempted || over_percent {
        return Some(Error::DeployAborted {
            operation: operation.to_string(),
            failed,
            attempted,
            threshold: fail_percent,
        });
    }
    None
}

/// Run one operation on one host and classify what happened.
fn run_unit(host: &Host, node: &HostOperation) -> UnitResult {
    let ignore_errors = node.global_args.ignore_errors;
    let result = |outcome: OperationOutcome, unreachable: bool| UnitResult {
        host: host.name().to_string(),
        outcome,
        unreachable,
    };
    let errored = |error: Error| {
        let unreachable = error.is_connection();
        result(
            OperationOutcome::Errored {
                error: error.to_string(),
                ignored: ignore_errors && !unreachable,
            },
            unreachable,
        )
    };

    match evaluate_all(&node.conditions, host) {
        Ok(true) => {}
        Ok(false) => return result(OperationOutcome::NotRun, false),
        Err(e) => return errored(e),
    }

    if let Err(e) = host.ensure_connected() {
        return errored(e);
    }

    let commands = match &node.body {
        OperationBody::Commands(commands) => commands.clone(),
        OperationBody::Deferred(body) => match body(host) {
            Ok(commands) => commands,
            Err(e) => return errored(e),
        },
    };

    if commands.is_empty() {
        return result(OperationOutcome::NoChange, false);
    }

    for command in &commands {
        if let Err(e) = run_command(host, command, &node.global_args.options) {
            return errored(e);
        }
    }

    // Later reads must see the state this operation left behind
    host.clear_facts();
    result(OperationOutcome::Changed, false)
}

fn run_command(host: &Host, command: &Command, options: &CommandOptions) -> Result<()> {
    log::debug!("{}: {command}", host.name());
    match command {
        Command::Shell(shell) => {
            let output = host.run_shell(shell, options)?;
            if !output.success() {
                let mut stderr = output.stderr.join("\n");
                if output.timed_out {
                    stderr = format!("timed out. {stderr}");
                }
                return Err(Error::Command {
                    host: host.name().to_string(),
                    command: shell.clone(),
                    exit_code: output.exit_code,
                    stderr,
                });
            }
            Ok(())
        }
        Command::PutFile { data, dest } => host.put_file(data, dest, options),
        Command::GetFile { src, dest } => {
            let data = host.get_file(src, options)?;
            if let Some(parent) = dest.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(dest, data)?;
            Ok(())
        }
        Command::Function { func, .. } => func(host),
    }
}

/// Simple execution without callbacks
pub fn execute_simple(inventory: &Inventory, graph: &OperationGraph, config: &Config) -> Result<DeploySummary> {
    use crate::context::NoProgress;

    execute(
        inventory,
        graph,
        &ExecuteOptions::from_config(config),
        &BTreeSet::new(),
        &mut NoProgress,
    )
}
