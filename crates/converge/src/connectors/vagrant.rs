//! Running Vagrant machines (inventory-only)
//!
//! `@vagrant` lists every running machine of the Vagrantfile in the current
//! directory; `@vagrant/<filter>` keeps machines whose name contains the
//! filter. Each machine becomes an ssh host configured from
//! `vagrant ssh-config`.

use super::util::{LocalShell, ShellTransport, shell_quote};
use super::{Connector, ConnectorPlugin, InventoryHost};
use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Names of running machines from `vagrant status --machine-readable`.
///
/// Lines look like `timestamp,target,type,data`.
pub fn parse_vagrant_status(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.splitn(4, ',');
            let _timestamp = fields.next()?;
            let target = fields.next()?;
            let kind = fields.next()?;
            let data = fields.next()?;
            (kind == "state" && data.trim() == "running").then(|| target.to_string())
        })
        .collect()
}

/// Hosts from `vagrant ssh-config` output, one per `Host` block.
pub fn parse_vagrant_ssh_config(output: &str) -> Vec<InventoryHost> {
    let mut hosts: Vec<InventoryHost> = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        if key == "Host" {
            hosts.push(InventoryHost::new(format!("@vagrant/{value}"), "ssh").with_group("@vagrant"));
            continue;
        }
        let Some(host) = hosts.last_mut() else {
            continue;
        };
        match key {
            "HostName" => host.data.insert("ssh_hostname".into(), value.into()),
            "User" => host.data.insert("ssh_user".into(), value.into()),
            "Port" => host.data.insert(
                "ssh_port".into(),
                value.parse::<u64>().map_or_else(|_| value.into(), Value::from),
            ),
            "IdentityFile" => host.data.insert("ssh_key".into(), value.into()),
            _ => None,
        };
    }
    hosts
}

pub(super) struct VagrantPlugin;

impl VagrantPlugin {
    fn run(command: &str) -> Result<String> {
        let raw = LocalShell.exec(command, None, None)?;
        if !raw.success() {
            return Err(Error::config(format!(
                "{command} failed: {}",
                String::from_utf8_lossy(&raw.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&raw.stdout).into_owned())
    }
}

impl ConnectorPlugin for VagrantPlugin {
    fn name(&self) -> &'static str {
        "vagrant"
    }

    fn handles_execution(&self) -> bool {
        false
    }

    fn make_names_data(&self, argument: Option<&str>) -> Result<Vec<InventoryHost>> {
        let running: Vec<String> = parse_vagrant_status(&Self::run(
            "vagrant status --machine-readable",
        )?)
        .into_iter()
        .filter(|name| argument.is_none_or(|filter| name.contains(filter)))
        .collect();

        if running.is_empty() {
            log::warn!("no running vagrant machines matched");
            return Ok(Vec::new());
        }

        let names: Vec<String> = running.iter().map(|n| shell_quote(n)).collect();
        let config = Self::run(&format!("vagrant ssh-config {}", names.join(" ")))?;
        Ok(parse_vagrant_ssh_config(&config))
    }

    fn make_connector(
        &self,
        host_name: &str,
        _data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        Err(Error::config(format!(
            "{host_name}: vagrant connector cannot execute commands"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_keeps_running_machines() {
        let output = "\
1700000000,web,metadata,provider,virtualbox
1700000000,web,state,running
1700000000,db,state,poweroff
1700000000,cache,state,running
1700000000,,ui,info,done";
        assert_eq!(parse_vagrant_status(output), vec!["web", "cache"]);
    }

    #[test]
    fn test_parse_ssh_config_blocks() {
        let output = "\
Host web
  HostName 127.0.0.1
  User vagrant
  Port 2222
  IdentityFile \"/home/me/.vagrant/web/private_key\"
  StrictHostKeyChecking no

Host cache
  HostName 127.0.0.1
  Port 2200
";
        let hosts = parse_vagrant_ssh_config(output);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].name, "@vagrant/web");
        assert_eq!(hosts[0].connector, "ssh");
        assert_eq!(hosts[0].groups, vec!["@vagrant"]);
        assert_eq!(hosts[0].data["ssh_port"], 2222);
        assert_eq!(hosts[0].data["ssh_key"], "/home/me/.vagrant/web/private_key");
        assert_eq!(hosts[1].data["ssh_port"], 2200);
        assert!(!hosts[1].data.contains_key("ssh_user"));
    }
}
