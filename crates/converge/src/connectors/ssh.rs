//! Remote hosts over the system `ssh` client
//!
//! Connection options come from host data: `ssh_hostname`, `ssh_port`,
//! `ssh_user`, `ssh_key`. The client runs in batch mode so an interactive
//! prompt turns into a failed connect instead of a hang.

use super::util::{self, RawOutput, ShellTransport};
use super::{
    CommandOptions, CommandOutput, Connector, ConnectorPlugin, InventoryHost, data_str,
    require_argument,
};
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::process::Command;
use std::time::Duration;

/// ssh exits with this status when the connection itself failed.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Where and how to reach an ssh host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub hostname: String,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub key: Option<String>,
}

impl SshTarget {
    pub fn from_data(host_name: &str, data: &Map<String, Value>) -> Result<Self> {
        let port = match data.get("ssh_port") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|p| u16::try_from(p).ok())
                    .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                    .ok_or_else(|| Error::config(format!("invalid ssh_port for {host_name}")))?,
            ),
        };
        Ok(Self {
            hostname: data_str(data, "ssh_hostname")
                .unwrap_or(host_name)
                .to_string(),
            port,
            user: data_str(data, "ssh_user").map(str::to_string),
            key: data_str(data, "ssh_key").map(|k| shellexpand::tilde(k).into_owned()),
        })
    }

    /// Arguments for the `ssh` client, up to and including the destination.
    pub fn ssh_args(&self, connect_timeout: Duration) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(key) = &self.key {
            args.push("-i".to_string());
            args.push(key.clone());
        }
        args.push(match &self.user {
            Some(user) => format!("{user}@{}", self.hostname),
            None => self.hostname.clone(),
        });
        args
    }
}

/// A shell on a remote host, one `ssh` invocation per command.
#[derive(Debug, Clone)]
pub struct SshShell {
    target: SshTarget,
    connect_timeout: Duration,
}

impl SshShell {
    pub fn new(target: SshTarget) -> Self {
        Self {
            target,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }
}

impl ShellTransport for SshShell {
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<RawOutput> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.target.ssh_args(self.connect_timeout));
        cmd.arg(command);
        let raw = util::run_process(cmd, stdin, timeout)
            .map_err(|e| Error::connection("", format!("failed to run ssh: {e}")))?;
        if raw.status == Some(SSH_CONNECTION_FAILURE) {
            return Err(Error::connection(
                "",
                String::from_utf8_lossy(&raw.stderr).trim().to_string(),
            ));
        }
        Ok(raw)
    }
}

#[derive(Debug)]
pub struct SshConnector {
    shell: SshShell,
    connected: bool,
}

impl SshConnector {
    pub fn new(target: SshTarget) -> Self {
        Self {
            shell: SshShell::new(target),
            connected: false,
        }
    }
}

impl Connector for SshConnector {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        self.shell.set_connect_timeout(timeout);
        let raw = self.shell.exec("true", None, Some(timeout * 2))?;
        if raw.timed_out {
            return Err(Error::connection(
                "",
                format!("timed out connecting to {}", self.shell.target().hostname),
            ));
        }
        log::debug!("connected to {}", self.shell.target().hostname);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn run_command(&mut self, command: &str, options: &CommandOptions) -> Result<CommandOutput> {
        util::run_with_options(&mut self.shell, command, options)
    }

    fn put_file(&mut self, data: &[u8], remote_path: &str, options: &CommandOptions) -> Result<()> {
        util::put_file_via_shell(&mut self.shell, data, remote_path, options)
    }

    fn get_file(&mut self, remote_path: &str, options: &CommandOptions) -> Result<Vec<u8>> {
        util::get_file_via_shell(&mut self.shell, remote_path, options)
    }

    fn check_can_connect(&self) -> bool {
        !self.shell.target().hostname.is_empty()
    }
}

pub(super) struct SshPlugin;

impl ConnectorPlugin for SshPlugin {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn handles_execution(&self) -> bool {
        true
    }

    fn make_names_data(&self, argument: Option<&str>) -> Result<Vec<InventoryHost>> {
        let hostname = require_argument("ssh", argument)?;
        Ok(vec![InventoryHost::new(hostname, "ssh")])
    }

    fn make_connector(
        &self,
        host_name: &str,
        data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        Ok(Box::new(SshConnector::new(SshTarget::from_data(
            host_name, data,
        )?)))
    }
}
