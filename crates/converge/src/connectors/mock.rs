//! In-memory connector for engine tests
//!
//! Hosts are declared as `@mock/<name>`. All mock hosts share one
//! [`MockBackend`] that records every command, keeps uploaded files per host
//! and answers commands through a responder closure.

use super::{CommandOptions, CommandOutput, Connector, ConnectorPlugin, ConnectorRegistry, InventoryHost, require_argument};
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Files = BTreeMap<(String, String), Vec<u8>>;
type Responder = Box<dyn Fn(&str, &str, &Files) -> CommandOutput + Send + Sync>;

pub struct MockBackend {
    files: Mutex<Files>,
    log: Mutex<Vec<(String, String)>>,
    responder: Responder,
    unreachable: BTreeSet<String>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(Files::new()),
            log: Mutex::new(Vec::new()),
            responder: Box::new(default_response),
            unreachable: BTreeSet::new(),
        }
    }

    /// Answer commands with `f(host, command, files)`.
    pub fn with_responder<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str, &Files) -> CommandOutput + Send + Sync + 'static,
    {
        self.responder = Box::new(f);
        self
    }

    pub fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    /// A builtin registry with this backend registered as `mock`.
    pub fn registry(self: &Arc<Self>) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::builtin();
        registry.register(Arc::new(MockPlugin {
            backend: Arc::clone(self),
        }));
        registry
    }

    pub fn commands(&self, host: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn all_commands(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().clone()
    }

    pub fn count(&self, host: &str, needle: &str) -> usize {
        self.commands(host)
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }

    pub fn file(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }
}

/// Emulates `stat` for uploaded files and `false`; everything else succeeds.
pub fn default_response(host: &str, command: &str, files: &Files) -> CommandOutput {
    if command.contains("stat -c") {
        let path = command.split_whitespace().last().unwrap_or_default();
        return match files.get(&(host.to_string(), path.to_string())) {
            Some(data) => CommandOutput::ok([format!(
                "root|root|644|{}|regular file",
                data.len()
            )]),
            None => CommandOutput::ok(Vec::<String>::new()),
        };
    }
    if command == "false" || command.starts_with("false ") {
        return CommandOutput::failed(1, "false");
    }
    CommandOutput::ok(Vec::<String>::new())
}

#[derive(Debug)]
pub struct MockConnector {
    host: String,
    backend: Arc<MockBackend>,
    connected: bool,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend").finish_non_exhaustive()
    }
}

impl Connector for MockConnector {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn connect(&mut self, _timeout: Duration) -> Result<()> {
        if self.backend.unreachable.contains(&self.host) {
            return Err(Error::connection(&self.host, "host unreachable"));
        }
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

    fn run_command(&mut self, command: &str, _options: &CommandOptions) -> Result<CommandOutput> {
        self.backend
            .log
            .lock()
            .unwrap()
            .push((self.host.clone(), command.to_string()));
        let files = self.backend.files.lock().unwrap();
        Ok((self.backend.responder)(&self.host, command, &files))
    }

    fn put_file(&mut self, data: &[u8], remote_path: &str, _options: &CommandOptions) -> Result<()> {
        self.backend
            .log
            .lock()
            .unwrap()
            .push((self.host.clone(), format!("put {remote_path}")));
        self.backend
            .files
            .lock()
            .unwrap()
            .insert((self.host.clone(), remote_path.to_string()), data.to_vec());
        Ok(())
    }

    fn get_file(&mut self, remote_path: &str, _options: &CommandOptions) -> Result<Vec<u8>> {
        self.backend
            .file(&self.host, remote_path)
            .ok_or_else(|| Error::Command {
                host: self.host.clone(),
                command: format!("download {remote_path}"),
                exit_code: 1,
                stderr: "no such file".into(),
            })
    }

    fn check_can_connect(&self) -> bool {
        !self.backend.unreachable.contains(&self.host)
    }
}

struct MockPlugin {
    backend: Arc<MockBackend>,
}

impl ConnectorPlugin for MockPlugin {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn handles_execution(&self) -> bool {
        true
    }

    fn make_names_data(&self, argument: Option<&str>) -> Result<Vec<InventoryHost>> {
        let name = require_argument("mock", argument)?;
        Ok(vec![InventoryHost::new(name, "mock")])
    }

    fn make_connector(
        &self,
        host_name: &str,
        _data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        Ok(Box::new(MockConnector {
            host: host_name.to_string(),
            backend: Arc::clone(&self.backend),
            connected: false,
        }))
    }
}
