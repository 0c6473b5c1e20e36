//! Deploy state: the explicit context a deploy is built and run in
//!
//! A deploy script is a closure evaluated once per activated host against a
//! [`HostDeploy`]. It reads facts, opens `when` and config scopes, and adds
//! operations to the shared graph. Nothing runs on the hosts until
//! [`DeployState::run`] walks the graph.

use crate::conditional::{ConditionalStack, Predicate};
use crate::config::Config;
use crate::context::{ConfirmCallback, NoProgress, ProgressCallback};
use crate::error::{Error, Result};
use crate::executor::{self, ExecuteOptions};
use crate::facts::{Fact, ShortFact};
use crate::graph::{OperationGraph, SummaryRow};
use crate::inventory::{Host, Inventory};
use crate::operation::{GlobalArgs, Operation, OperationHandle};
use crate::types::DeploySummary;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Inventory, base config and operation graph of one deploy.
#[derive(Debug)]
pub struct DeployState {
    inventory: Inventory,
    config: Config,
    graph: OperationGraph,
    unreachable: BTreeSet<String>,
}

impl DeployState {
    pub fn new(inventory: Inventory, config: Config) -> Self {
        Self {
            inventory,
            config,
            graph: OperationGraph::new(),
            unreachable: BTreeSet::new(),
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &OperationGraph {
        &self.graph
    }

    /// Hosts that could not be reached so far.
    pub fn unreachable(&self) -> &BTreeSet<String> {
        &self.unreachable
    }

    /// Connect to every activated host in parallel.
    ///
    /// Each connector's pre-flight check runs first. Failures are recorded,
    /// not returned: those hosts are skipped by deploy scripts and count as
    /// failed when the deploy runs.
    pub fn connect_all(&mut self) -> Result<usize> {
        let hosts: Vec<&Host> = self.inventory.activated_hosts().collect();
        let jobs = match self.config.parallel() {
            0 => hosts.len().max(1),
            n => n,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| Error::config(format!("failed to create thread pool: {e}")))?;

        let failures: Mutex<Vec<String>> = Mutex::new(Vec::new());
        pool.install(|| {
            hosts.par_iter().for_each(|host| {
                let outcome = if host.check_can_connect() {
                    host.ensure_connected()
                } else {
                    Err(Error::connection(host.name(), "pre-flight check failed"))
                };
                if let Err(e) = outcome {
                    log::warn!("{e}");
                    match failures.lock() {
                        Ok(mut list) => list.push(host.name().to_string()),
                        Err(poisoned) => poisoned.into_inner().push(host.name().to_string()),
                    }
                }
            });
        });

        let failures = match failures.into_inner() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        };
        let connected = hosts.len() - failures.len();
        self.unreachable.extend(failures);
        log::info!("connected to {connected} of {} hosts", hosts.len());
        Ok(connected)
    }

    /// Evaluate a deploy script once per activated, reachable host.
    ///
    /// A host that turns out to be unreachable while the script reads its
    /// facts is marked failed and skipped. Other errors stop the build.
    pub fn add_deploy<F>(&mut self, mut script: F) -> Result<()>
    where
        F: FnMut(&mut HostDeploy<'_>) -> Result<()>,
    {
        let Self {
            inventory,
            graph,
            unreachable,
            ..
        } = self;

        for host in inventory.activated_hosts() {
            if unreachable.contains(host.name()) {
                continue;
            }
            let mut ctx = HostDeploy {
                host,
                graph: &mut *graph,
                conditions: ConditionalStack::default(),
            };
            match script(&mut ctx) {
                Ok(()) => {}
                Err(e) if e.is_connection() => {
                    log::warn!("{e}");
                    unreachable.insert(host.name().to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Confirm, then execute the graph.
    ///
    /// Declining returns an empty summary without touching any host.
    pub fn run<P, C>(&self, progress: &mut P, confirm: &mut C) -> Result<DeploySummary>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        if self.graph.is_empty() {
            return Ok(DeploySummary::default());
        }
        let prompt = format!(
            "Run {} operation(s) on {} host(s)?",
            self.graph.len(),
            self.inventory.activated_count()
        );
        if !confirm.confirm(&prompt)? {
            return Ok(DeploySummary::default());
        }
        self.execute(progress)
    }

    /// Execute the graph without asking.
    pub fn execute<P: ProgressCallback>(&self, progress: &mut P) -> Result<DeploySummary> {
        executor::execute(
            &self.inventory,
            &self.graph,
            &ExecuteOptions::from_config(&self.config),
            &self.unreachable,
            progress,
        )
    }

    pub fn execute_simple(&self) -> Result<DeploySummary> {
        self.execute(&mut NoProgress)
    }

    /// Per-operation result counts, in execution order.
    pub fn summary_rows(&self) -> Result<Vec<SummaryRow>> {
        self.graph.summary_rows()
    }

    /// Disconnect every host, logging failures.
    pub fn disconnect_all(&self) {
        for host in self.inventory.hosts() {
            if let Err(e) = host.disconnect() {
                log::warn!("{e}");
            }
        }
    }
}

/// The view a deploy script has of one host.
pub struct HostDeploy<'a> {
    host: &'a Host,
    graph: &'a mut OperationGraph,
    conditions: ConditionalStack,
}

impl HostDeploy<'_> {
    pub fn host(&self) -> &Host {
        self.host
    }

    /// Read a fact as it was *before* this deploy.
    ///
    /// Operations added earlier in the script have not run yet, so their
    /// effects are not visible here. Read facts inside a deferred operation
    /// to see them.
    pub fn get_fact(&self, fact: &dyn Fact, args: &[&str]) -> Result<Value> {
        self.host.get_fact(fact, args)
    }

    pub fn get_short_fact(&self, fact: &dyn ShortFact, args: &[&str]) -> Result<Value> {
        self.host.get_short_fact(fact, args)
    }

    /// Add an operation for this host.
    ///
    /// Privilege settings and `IGNORE_ERRORS` are captured from the host's
    /// config now, together with the enclosing `when` predicates.
    pub fn add_op(&mut self, operation: Operation) -> OperationHandle {
        let global_args = GlobalArgs::from_config(&self.host.config());
        self.graph.add(
            self.host.name(),
            operation,
            global_args,
            self.conditions.snapshot(),
        )
    }

    /// Operations added inside `body` only run where `predicate` holds.
    pub fn when<R, F>(&mut self, predicate: Predicate, body: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
    {
        self.conditions.push(predicate);
        let result = body(self);
        self.conditions.pop();
        result
    }

    /// Operations added inside `body` use `overrides` on top of the host's config.
    pub fn with_config<I, K, R, F>(&mut self, overrides: I, body: F) -> Result<R>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
        F: FnOnce(&mut Self) -> Result<R>,
    {
        {
            let mut config = self.host.config();
            config.lock_current_state();
            for (key, value) in overrides {
                if let Err(e) = config.set(key.as_ref(), value) {
                    config.reset_locked_state()?;
                    return Err(e);
                }
            }
        }
        let result = body(self);
        self.host.config().reset_locked_state()?;
        result
    }

    /// Script-assigned host data.
    pub fn set_data(&self, key: &str, value: Value) {
        self.host.set_data(key, value);
    }
}
