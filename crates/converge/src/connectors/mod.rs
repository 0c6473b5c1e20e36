//! Connectors: how the engine reaches a host
//!
//! A [`ConnectorPlugin`] is registered under a stable name. Execution-capable
//! plugins produce a [`Connector`] per host; inventory-only plugins
//! (`terraform`, `vagrant`) only expand a host spec into concrete hosts while
//! the inventory is being built and are never consulted again.
//!
//! Host specs look like `web1` (ssh), `@local`, or `@connector/argument`.

mod chroot;
mod docker;
mod local;
mod ssh;
mod terraform;
pub mod util;
mod vagrant;

#[cfg(test)]
pub(crate) mod mock;

pub use chroot::ChrootConnector;
pub use docker::DockerConnector;
pub use local::LocalConnector;
pub use ssh::{SshConnector, SshShell, SshTarget};
pub use terraform::parse_terraform_output;
pub use vagrant::{parse_vagrant_ssh_config, parse_vagrant_status};

use crate::config::Config;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Result of one command on a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout lines.
    pub fn ok<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exit_code: 0,
            stdout: lines.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Failed output with a single stderr line.
    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code,
            stderr: vec![stderr.to_string()],
            ..Self::default()
        }
    }

    pub fn from_bytes(exit_code: i32, stdout: &[u8], stderr: &[u8], timed_out: bool) -> Self {
        Self {
            exit_code,
            stdout: split_lines(stdout),
            stderr: split_lines(stderr),
            timed_out,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::to_string)
        .collect()
}

/// Privilege and shell settings applied to a command.
///
/// Captured from a host's config when an operation is declared, so a scoped
/// override stays attached to the operations declared inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOptions {
    pub sudo: bool,
    pub sudo_user: Option<String>,
    pub use_sudo_login: bool,
    pub preserve_sudo_env: bool,
    pub sudo_password: Option<String>,
    pub su_user: Option<String>,
    pub use_su_login: bool,
    pub preserve_su_env: bool,
    pub su_shell: Option<String>,
    pub doas: bool,
    pub doas_user: Option<String>,
    pub shell: String,
    pub env: BTreeMap<String, String>,
    /// Per-command timeout in seconds
    pub timeout: Option<u64>,
    pub temp_dir: String,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CommandOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            sudo: config.sudo(),
            sudo_user: config.sudo_user().map(str::to_string),
            use_sudo_login: config.use_sudo_login(),
            preserve_sudo_env: config.preserve_sudo_env(),
            sudo_password: config.sudo_password().map(str::to_string),
            su_user: config.su_user().map(str::to_string),
            use_su_login: config.use_su_login(),
            preserve_su_env: config.preserve_su_env(),
            su_shell: config.su_shell().map(str::to_string),
            doas: config.doas(),
            doas_user: config.doas_user().map(str::to_string),
            shell: config.shell().to_string(),
            env: config.env().clone(),
            timeout: config.timeout(),
            temp_dir: config.temp_dir().to_string(),
        }
    }
}

/// A live transport to one host.
pub trait Connector: Send + fmt::Debug {
    /// Short connector name (`ssh`, `docker`, ...).
    fn name(&self) -> &'static str;

    /// Establish the connection. Calling this on a connected instance is a no-op.
    fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Tear the connection down. Safe to call when not connected.
    fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// Run a shell command with the given privilege/shell settings.
    fn run_command(&mut self, command: &str, options: &CommandOptions) -> Result<CommandOutput>;

    /// Write `data` to `remote_path` on the host.
    fn put_file(&mut self, data: &[u8], remote_path: &str, options: &CommandOptions) -> Result<()>;

    /// Read `remote_path` from the host.
    fn get_file(&mut self, remote_path: &str, options: &CommandOptions) -> Result<Vec<u8>>;

    /// Whether the transport believes the target is reachable (pre-flight).
    fn check_can_connect(&self) -> bool;
}

/// A host produced by expanding a host spec.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryHost {
    pub name: String,
    pub data: Map<String, Value>,
    pub groups: Vec<String>,
    /// Execution connector that will serve this host
    pub connector: String,
}

impl InventoryHost {
    pub fn new(name: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: Map::new(),
            groups: Vec::new(),
            connector: connector.into(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }
}

/// A connector implementation registered by name.
pub trait ConnectorPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether hosts can be served by this plugin during execution.
    fn handles_execution(&self) -> bool;

    /// Expand the argument of `@name/argument` (or a bare host name) into hosts.
    fn make_names_data(&self, argument: Option<&str>) -> Result<Vec<InventoryHost>>;

    /// Build a connector for a host, given its fully merged data.
    fn make_connector(&self, host_name: &str, data: &Map<String, Value>)
    -> Result<Box<dyn Connector>>;
}

/// Name → plugin lookup table.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    plugins: BTreeMap<String, Arc<dyn ConnectorPlugin>>,
}

impl fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.plugins.keys()).finish()
    }
}

impl ConnectorRegistry {
    /// Registry with every stock connector.
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(local::LocalPlugin));
        registry.register(Arc::new(ssh::SshPlugin));
        registry.register(Arc::new(docker::DockerPlugin));
        registry.register(Arc::new(docker::DockerSshPlugin));
        registry.register(Arc::new(chroot::ChrootPlugin));
        registry.register(Arc::new(terraform::TerraformPlugin));
        registry.register(Arc::new(vagrant::VagrantPlugin));
        registry
    }

    /// Add or replace a plugin.
    pub fn register(&mut self, plugin: Arc<dyn ConnectorPlugin>) {
        self.plugins.insert(plugin.name().to_string(), plugin);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn ConnectorPlugin>> {
        self.plugins
            .get(name)
            .ok_or_else(|| Error::config(format!("unknown connector: {name}")))
    }

    /// Look up a plugin that can serve hosts during execution.
    pub fn get_execution(&self, name: &str) -> Result<&Arc<dyn ConnectorPlugin>> {
        let plugin = self.get(name)?;
        if !plugin.handles_execution() {
            return Err(Error::config(format!(
                "connector {name} is inventory-only and cannot execute commands"
            )));
        }
        Ok(plugin)
    }

    /// Expand a host spec into concrete hosts.
    pub fn resolve(&self, spec: &str) -> Result<Vec<InventoryHost>> {
        let (connector, argument) = parse_host_spec(spec);
        let hosts = self.get(connector)?.make_names_data(argument)?;
        for host in &hosts {
            self.get_execution(&host.connector)?;
        }
        Ok(hosts)
    }

    /// Build the execution connector for a resolved host.
    pub fn make_connector(
        &self,
        connector: &str,
        host_name: &str,
        data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        self.get_execution(connector)?
            .make_connector(host_name, data)
    }
}

/// Split `@connector/argument` into its parts; bare names go to ssh.
pub fn parse_host_spec(spec: &str) -> (&str, Option<&str>) {
    match spec.strip_prefix('@') {
        Some(rest) => match rest.split_once('/') {
            Some((connector, argument)) => (connector, Some(argument)),
            None => (rest, None),
        },
        None => ("ssh", Some(spec)),
    }
}

/// Read a string value from host data.
pub(crate) fn data_str<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str)
}

pub(crate) fn require_argument<'a>(connector: &str, argument: Option<&'a str>) -> Result<&'a str> {
    argument
        .filter(|a| !a.is_empty())
        .ok_or_else(|| Error::config(format!("connector {connector} requires an argument (@{connector}/...)")))
}
