//! Hosts listed in a Terraform output (inventory-only)
//!
//! `@terraform/<output key>` reads `terraform output -json` in the current
//! directory. The key may be dotted to reach into nested objects. Each list
//! item is either a hostname or an object with `name` or `ssh_hostname` plus
//! extra host data.

use super::util::{LocalShell, ShellTransport};
use super::{Connector, ConnectorPlugin, InventoryHost, require_argument};
use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Extract hosts from `terraform output -json` text.
pub fn parse_terraform_output(json: &str, key: &str) -> Result<Vec<InventoryHost>> {
    let outputs: Value = serde_json::from_str(json)?;

    let mut parts = key.split('.');
    let first = parts.next().unwrap_or_default();
    let mut value = outputs
        .get(first)
        .and_then(|output| output.get("value"))
        .ok_or_else(|| Error::config(format!("no terraform output named {first}")))?;
    for part in parts {
        value = value
            .get(part)
            .ok_or_else(|| Error::config(format!("terraform output {key} has no {part}")))?;
    }

    let items = value
        .as_array()
        .ok_or_else(|| Error::config(format!("terraform output {key} is not a list")))?;

    items
        .iter()
        .map(|item| match item {
            Value::String(name) => Ok(InventoryHost::new(name.clone(), "ssh")),
            Value::Object(object) => host_from_object(key, object),
            other => Err(Error::config(format!(
                "terraform output {key} contains unsupported item {other}"
            ))),
        })
        .collect()
}

fn host_from_object(key: &str, object: &Map<String, Value>) -> Result<InventoryHost> {
    let name = object
        .get("name")
        .or_else(|| object.get("ssh_hostname"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::config(format!(
                "terraform output {key} item needs a name or ssh_hostname"
            ))
        })?;
    let mut host = InventoryHost::new(name, "ssh");
    for (k, v) in object {
        if k != "name" {
            host.data.insert(k.clone(), v.clone());
        }
    }
    Ok(host)
}

pub(super) struct TerraformPlugin;

impl ConnectorPlugin for TerraformPlugin {
    fn name(&self) -> &'static str {
        "terraform"
    }

    fn handles_execution(&self) -> bool {
        false
    }

    fn make_names_data(&self, argument: Option<&str>) -> Result<Vec<InventoryHost>> {
        let key = require_argument("terraform", argument)?;
        let raw = LocalShell.exec("terraform output -json", None, None)?;
        if !raw.success() {
            return Err(Error::config(format!(
                "terraform output failed: {}",
                String::from_utf8_lossy(&raw.stderr).trim()
            )));
        }
        let hosts = parse_terraform_output(&String::from_utf8_lossy(&raw.stdout), key)?;
        log::debug!("terraform output {key} produced {} hosts", hosts.len());
        Ok(hosts
            .into_iter()
            .map(|host| host.with_group("@terraform"))
            .collect())
    }

    fn make_connector(
        &self,
        host_name: &str,
        _data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        Err(Error::config(format!(
            "{host_name}: terraform connector cannot execute commands"
        )))
    }
}
