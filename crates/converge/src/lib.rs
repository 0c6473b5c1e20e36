//! # Converge
//!
//! An agentless infrastructure automation engine.
//!
//! A deploy is declared per host: a script reads facts about the host and
//! adds operations, each planning a list of commands that would bring the
//! host to the wanted state. Identical declarations on different hosts merge
//! into one operation node. The engine then walks the merged graph in one
//! global order and runs every operation on its hosts in parallel, one
//! operation at a time.
//!
//! ## Core Concepts
//!
//! - **Inventory**: hosts, groups and their data, each host bound to a connector
//! - **Connector**: how commands and files reach a host (local, ssh, docker, chroot)
//! - **Fact**: a command whose parsed output describes the host, cached per host
//! - **Operation**: identity, arguments and the commands that converge the host
//! - **OperationGraph**: per-host operation chains merged into one execution order
//! - **Executor**: dispatches operations over a bounded pool and tracks failures
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Config, ConnectorRegistry, DeployState, Inventory, NoProgress};
//! use converge::operations::{files, server};
//!
//! let config = Config::default();
//! let inventory = Inventory::builder()
//!     .host("@local", Default::default())
//!     .build(&ConnectorRegistry::builtin(), &config)?;
//!
//! let mut state = DeployState::new(inventory, config);
//! state.add_deploy(|ctx| {
//!     let motd = files::put_content(ctx.host(), "/tmp/motd", "managed\n")?;
//!     let handle = ctx.add_op(motd);
//!     ctx.when(handle.did_change_predicate(), |ctx| {
//!         ctx.add_op(server::shell(&["echo motd updated"]));
//!         Ok(())
//!     })
//! })?;
//! let summary = state.execute(&mut NoProgress)?;
//! ```
//!
//! ## Callback Traits
//!
//! - [`ProgressCallback`]: receives per-operation and per-host progress
//! - [`ConfirmCallback`]: asks before anything runs
//!
//! Front ends plug their terminal UI in through these.

pub mod conditional;
pub mod config;
pub mod connectors;
pub mod context;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod facts;
pub mod graph;
pub mod inventory;
pub mod operation;
pub mod operations;
pub mod requirements;
pub mod types;

// Re-export main types at crate root
pub use conditional::{Predicate, predicate};
pub use config::{Config, ConfigKey};
pub use connectors::{CommandOptions, CommandOutput, Connector, ConnectorPlugin, ConnectorRegistry};
pub use context::{AutoConfirm, AutoDecline, ConfirmCallback, NoProgress, ProgressCallback};
pub use deploy::{DeployState, HostDeploy};
pub use error::{Error, Result};
pub use executor::{ExecuteOptions, execute, execute_simple};
pub use facts::{Fact, FactCache, ShortFact};
pub use graph::{OperationGraph, SummaryRow};
pub use inventory::{Group, Host, Inventory, InventoryBuilder};
pub use operation::{Command, OpHash, Operation, OperationHandle, OperationMeta};
pub use types::{DeploySummary, OperationOutcome};
