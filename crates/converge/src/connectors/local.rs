//! The machine running the engine

use super::util::{self, LocalShell};
use super::{CommandOptions, CommandOutput, Connector, ConnectorPlugin, InventoryHost};
use crate::error::Result;
use serde_json::{Map, Value};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct LocalConnector {
    shell: LocalShell,
    connected: bool,
}

impl Connector for LocalConnector {
    fn name(&self) -> &'static str {
        "local"
    }

    fn connect(&mut self, _timeout: Duration) -> Result<()> {
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
        true
    }
}

pub(super) struct LocalPlugin;

impl ConnectorPlugin for LocalPlugin {
    fn name(&self) -> &'static str {
        "local"
    }

    fn handles_execution(&self) -> bool {
        true
    }

    fn make_names_data(&self, _argument: Option<&str>) -> Result<Vec<InventoryHost>> {
        Ok(vec![InventoryHost::new("@local", "local")])
    }

    fn make_connector(
        &self,
        _host_name: &str,
        _data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        Ok(Box::new(LocalConnector::default()))
    }
}
