//! Inventory: hosts, groups and the data attached to them
//!
//! Host data is merged once, at build time, in this order (later wins):
//! global data, each group the host belongs to (in group declaration order),
//! data produced by the host's connector, the host's own data. Values set by
//! a deploy script through [`Host::set_data`] win over all of them.
//!
//! Data keys starting with `_` are config overrides for that host, e.g.
//! `_sudo = true` sets `SUDO` in the host's own copy of the config.

use crate::config::Config;
use crate::connectors::{CommandOptions, CommandOutput, Connector, ConnectorRegistry};
use crate::error::{Error, Result};
use crate::facts::{Fact, FactCache, FactRef, ShortFact};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Duration;

/// A target machine (or container, or chroot).
pub struct Host {
    name: String,
    groups: Vec<String>,
    data: RwLock<Map<String, Value>>,
    connector_name: String,
    connector: Mutex<Box<dyn Connector>>,
    facts: FactCache,
    config: Mutex<Config>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("groups", &self.groups)
            .field("connector", &self.connector_name)
            .finish_non_exhaustive()
    }
}

fn relock<T>(result: std::sync::LockResult<T>) -> T {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Host {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    pub fn connector_name(&self) -> &str {
        &self.connector_name
    }

    /// A copy of the merged data.
    pub fn data(&self) -> Map<String, Value> {
        relock(self.data.read()).clone()
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        relock(self.data.read()).get(key).cloned()
    }

    /// Script-assigned data, overriding every inventory source.
    pub fn set_data(&self, key: &str, value: Value) {
        relock(self.data.write()).insert(key.to_string(), value);
    }

    /// Exclusive access to this host's config.
    pub fn config(&self) -> MutexGuard<'_, Config> {
        relock(self.config.lock())
    }

    /// Privilege/shell settings as currently configured for this host.
    pub fn command_options(&self) -> CommandOptions {
        CommandOptions::from_config(&self.config())
    }

    fn connector(&self) -> MutexGuard<'_, Box<dyn Connector>> {
        relock(self.connector.lock())
    }

    pub fn is_connected(&self) -> bool {
        self.connector().is_connected()
    }

    pub fn check_can_connect(&self) -> bool {
        self.connector().check_can_connect()
    }

    /// Connect if not connected yet, bounded by `CONNECT_TIMEOUT`.
    pub fn ensure_connected(&self) -> Result<()> {
        let timeout = Duration::from_secs(self.config().connect_timeout());
        let mut connector = self.connector();
        if connector.is_connected() {
            return Ok(());
        }
        log::debug!("{}: connecting via {}", self.name, self.connector_name);
        connector
            .connect(timeout)
            .map_err(|e| into_connection_error(e, &self.name))
    }

    pub fn disconnect(&self) -> Result<()> {
        self.connector()
            .disconnect()
            .map_err(|e| e.on_host(&self.name))
    }

    pub fn run_shell(&self, command: &str, options: &CommandOptions) -> Result<CommandOutput> {
        self.ensure_connected()?;
        self.connector()
            .run_command(command, options)
            .map_err(|e| e.on_host(&self.name))
    }

    pub fn put_file(&self, data: &[u8], remote_path: &str, options: &CommandOptions) -> Result<()> {
        self.ensure_connected()?;
        self.connector()
            .put_file(data, remote_path, options)
            .map_err(|e| e.on_host(&self.name))
    }

    pub fn get_file(&self, remote_path: &str, options: &CommandOptions) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        self.connector()
            .get_file(remote_path, options)
            .map_err(|e| e.on_host(&self.name))
    }

    /// Read a fact, gathering it on first use.
    ///
    /// During deploy construction this is the host's state *before* the
    /// deploy: changes made by operations declared earlier are not visible.
    pub fn get_fact(&self, fact: &dyn Fact, args: &[&str]) -> Result<Value> {
        let args: Vec<String> = args.iter().map(|a| (*a).to_string()).collect();
        let options = self.command_options();
        self.facts
            .get_or_gather(fact, &args, |command| self.run_shell(command, &options))
            .map_err(|e| e.on_host(&self.name))
    }

    pub fn get_short_fact(&self, fact: &dyn ShortFact, args: &[&str]) -> Result<Value> {
        let data = self.get_fact(fact.base(), args)?;
        Ok(fact.process_data(data))
    }

    pub fn get_fact_ref(&self, fact: FactRef, args: &[&str]) -> Result<Value> {
        match fact {
            FactRef::Fact(fact) => self.get_fact(fact, args),
            FactRef::Short(fact) => self.get_short_fact(fact, args),
        }
    }

    pub fn facts(&self) -> &FactCache {
        &self.facts
    }

    pub fn clear_facts(&self) {
        self.facts.clear();
    }
}

fn into_connection_error(error: Error, host: &str) -> Error {
    match error.on_host(host) {
        err @ Error::Connection { .. } => err,
        other => Error::connection(host, other.to_string()),
    }
}

/// A named set of hosts with shared data.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub name: String,
    pub data: Map<String, Value>,
}

/// The resolved set of hosts for a deploy.
#[derive(Debug)]
pub struct Inventory {
    hosts: Vec<Host>,
    groups: Vec<Group>,
    data: Map<String, Value>,
    activated: Vec<usize>,
}

impl Inventory {
    pub fn builder() -> InventoryBuilder {
        InventoryBuilder::default()
    }

    /// Parse an inventory file (see [`InventoryBuilder::from_toml_str`]).
    pub fn from_toml_str(content: &str) -> Result<InventoryBuilder> {
        InventoryBuilder::from_toml_str(content)
    }

    pub fn load(path: &Path) -> Result<InventoryBuilder> {
        let content = std::fs::read_to_string(path)?;
        InventoryBuilder::from_toml_str(&content)
    }

    /// Every host, in inventory order.
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    /// Hosts not excluded by the limit.
    pub fn activated_hosts(&self) -> impl Iterator<Item = &Host> {
        self.activated.iter().map(|&i| &self.hosts[i])
    }

    pub fn activated_count(&self) -> usize {
        self.activated.len()
    }

    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[derive(Debug, Clone)]
struct HostEntry {
    spec: String,
    data: Map<String, Value>,
}

/// Collects hosts, groups and data, then resolves them into an [`Inventory`].
#[derive(Debug, Clone, Default)]
pub struct InventoryBuilder {
    data: Map<String, Value>,
    groups: Vec<(Group, Vec<String>)>,
    hosts: Vec<HostEntry>,
    limit: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InventoryFile {
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    groups: Vec<GroupFile>,
    #[serde(default)]
    hosts: Vec<HostFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupFile {
    name: String,
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostFile {
    name: String,
    #[serde(default)]
    data: Map<String, Value>,
}

impl InventoryBuilder {
    /// Parse an inventory file:
    ///
    /// ```toml
    /// [data]
    /// env = "prod"
    ///
    /// [[groups]]
    /// name = "web"
    /// hosts = ["web1", "web2"]
    /// data = { http_port = 80 }
    ///
    /// [[hosts]]
    /// name = "web1"
    /// data = { ssh_user = "deploy", _sudo = true }
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: InventoryFile = toml::from_str(content)?;
        let mut builder = Self::default().data(file.data);
        for host in file.hosts {
            builder = builder.host(&host.name, host.data);
        }
        for group in file.groups {
            builder = builder.group(&group.name, group.data, &group.hosts);
        }
        Ok(builder)
    }

    /// Global data, shared by every host.
    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data.extend(data);
        self
    }

    /// Declare a group with its data and members (host specs).
    pub fn group<S: AsRef<str>>(mut self, name: &str, data: Map<String, Value>, members: &[S]) -> Self {
        self.groups.push((
            Group {
                name: name.to_string(),
                data,
            },
            members.iter().map(|m| m.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Declare a host by spec with its own data.
    pub fn host(mut self, spec: &str, data: Map<String, Value>) -> Self {
        match self.hosts.iter_mut().find(|h| h.spec == spec) {
            Some(entry) => entry.data.extend(data),
            None => self.hosts.push(HostEntry {
                spec: spec.to_string(),
                data,
            }),
        }
        self
    }

    /// Only activate hosts whose name, or one of whose groups, is listed.
    pub fn limit<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.limit = Some(names.iter().map(|n| n.as_ref().to_string()).collect());
        self
    }

    /// Resolve every spec through `registry` and build per-host configs from `base`.
    pub fn build(self, registry: &ConnectorRegistry, base: &Config) -> Result<Inventory> {
        // Hosts listed only as group members are added after explicit hosts.
        let mut entries = self.hosts.clone();
        for (_, members) in &self.groups {
            for member in members {
                if !entries.iter().any(|h| &h.spec == member) {
                    entries.push(HostEntry {
                        spec: member.clone(),
                        data: Map::new(),
                    });
                }
            }
        }

        let mut hosts = Vec::new();
        let mut seen = BTreeSet::new();
        for entry in &entries {
            let group_names: Vec<&Group> = self
                .groups
                .iter()
                .filter(|(_, members)| members.contains(&entry.spec))
                .map(|(group, _)| group)
                .collect();

            for resolved in registry.resolve(&entry.spec)? {
                if !seen.insert(resolved.name.clone()) {
                    return Err(Error::config(format!(
                        "host {} is declared more than once",
                        resolved.name
                    )));
                }

                let mut groups: Vec<String> = group_names.iter().map(|g| g.name.clone()).collect();
                for extra in &resolved.groups {
                    if !groups.contains(extra) {
                        groups.push(extra.clone());
                    }
                }

                let mut data = self.data.clone();
                for group in &group_names {
                    data.extend(group.data.clone());
                }
                data.extend(resolved.data.clone());
                data.extend(entry.data.clone());

                let config = base.copy(config_overrides(&data))?;
                let connector = registry.make_connector(&resolved.connector, &resolved.name, &data)?;

                log::debug!(
                    "inventory: {} via {} in groups {:?}",
                    resolved.name,
                    resolved.connector,
                    groups
                );
                hosts.push(Host {
                    name: resolved.name,
                    groups,
                    data: RwLock::new(data),
                    connector_name: resolved.connector,
                    connector: Mutex::new(connector),
                    facts: FactCache::default(),
                    config: Mutex::new(config),
                });
            }
        }

        let activated = match &self.limit {
            None => (0..hosts.len()).collect(),
            Some(limit) => hosts
                .iter()
                .enumerate()
                .filter(|(_, host)| {
                    limit
                        .iter()
                        .any(|l| l == &host.name || host.groups.contains(l))
                })
                .map(|(i, _)| i)
                .collect(),
        };

        Ok(Inventory {
            hosts,
            groups: self.groups.into_iter().map(|(group, _)| group).collect(),
            data: self.data,
            activated,
        })
    }
}

/// `_key` data entries as `(KEY, value)` config overrides.
fn config_overrides(data: &Map<String, Value>) -> BTreeMap<String, Value> {
    data.iter()
        .filter_map(|(key, value)| {
            key.strip_prefix('_')
                .map(|k| (k.to_ascii_uppercase(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::mock::MockBackend;
    use crate::facts::files::File;
    use serde_json::json;
    use std::sync::Arc;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn build(builder: InventoryBuilder) -> (Inventory, Arc<MockBackend>) {
        let backend = Arc::new(MockBackend::new());
        let inventory = builder
            .build(&backend.registry(), &Config::default())
            .unwrap();
        (inventory, backend)
    }

    #[test]
    fn test_data_merge_order() {
        let (inventory, _) = build(
            Inventory::builder()
                .data(map(json!({"env": "prod", "port": 1, "tier": "global"})))
                .host("@mock/web1", map(json!({"port": 3})))
                .group("web", map(json!({"port": 2, "tier": "web"})), &["@mock/web1"])
                .group("eu", map(json!({"tier": "eu"})), &["@mock/web1"]),
        );

        let host = inventory.get_host("web1").unwrap();
        assert_eq!(host.groups(), ["web", "eu"]);
        assert_eq!(host.get_data("env"), Some(json!("prod")));
        assert_eq!(host.get_data("port"), Some(json!(3)));
        assert_eq!(host.get_data("tier"), Some(json!("eu")));

        host.set_data("port", json!(4));
        assert_eq!(host.get_data("port"), Some(json!(4)));
    }

    #[test]
    fn test_group_members_become_hosts() {
        let (inventory, _) = build(
            Inventory::builder()
                .host("@mock/a", Map::new())
                .group("db", Map::new(), &["@mock/b", "@mock/a"]),
        );
        let names: Vec<&str> = inventory.hosts().map(Host::name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(inventory.get_host("a").unwrap().in_group("db"));
    }

    #[test]
    fn test_limit_by_host_or_group() {
        let (inventory, _) = build(
            Inventory::builder()
                .group("web", Map::new(), &["@mock/web1", "@mock/web2"])
                .group("db", Map::new(), &["@mock/db1"])
                .limit(&["db", "web2"]),
        );
        let active: Vec<&str> = inventory.activated_hosts().map(Host::name).collect();
        assert_eq!(active, vec!["web2", "db1"]);
        assert_eq!(inventory.len(), 3);
    }

    #[test]
    fn test_underscore_data_overrides_host_config() {
        let (inventory, _) = build(
            Inventory::builder()
                .host("@mock/a", map(json!({"_sudo": true, "_sudo_user": "app"})))
                .host("@mock/b", Map::new()),
        );
        assert!(inventory.get_host("a").unwrap().config().sudo());
        assert_eq!(
            inventory.get_host("a").unwrap().config().sudo_user(),
            Some("app")
        );
        assert!(!inventory.get_host("b").unwrap().config().sudo());
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let backend = Arc::new(MockBackend::new());
        let err = Inventory::builder()
            .host("@mock/a", map(json!({"_not_a_key": 1})))
            .build(&backend.registry(), &Config::default())
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_duplicate_host_rejected() {
        let backend = Arc::new(MockBackend::new());
        let err = Inventory::builder()
            .host("@mock/a", Map::new())
            .host("@ssh/a", Map::new())
            .build(&backend.registry(), &Config::default())
            .unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn test_unknown_connector_fails_build() {
        let backend = Arc::new(MockBackend::new());
        let err = Inventory::builder()
            .host("@nope/a", Map::new())
            .build(&backend.registry(), &Config::default())
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_fact_is_gathered_once() {
        let (inventory, backend) = build(Inventory::builder().host("@mock/a", Map::new()));
        let host = inventory.get_host("a").unwrap();

        let first = host.get_fact(&File, &["/etc/motd"]).unwrap();
        let second = host.get_fact(&File, &["/etc/motd"]).unwrap();
        assert_eq!(first, Value::Null);
        assert_eq!(first, second);
        assert_eq!(backend.count("a", "stat -c"), 1);

        host.clear_facts();
        host.get_fact(&File, &["/etc/motd"]).unwrap();
        assert_eq!(backend.count("a", "stat -c"), 2);
    }

    #[test]
    fn test_unreachable_host_reports_connection_error() {
        let backend = Arc::new(MockBackend::new().unreachable("down"));
        let inventory = Inventory::builder()
            .host("@mock/down", Map::new())
            .build(&backend.registry(), &Config::default())
            .unwrap();
        let err = inventory
            .get_host("down")
            .unwrap()
            .get_fact(&File, &["/x"])
            .unwrap_err();
        assert!(err.is_connection());
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_from_toml_str() {
        let builder = Inventory::from_toml_str(
            r#"
            [data]
            env = "staging"

            [[groups]]
            name = "web"
            hosts = ["@mock/web1"]
            data = { http_port = 8080 }

            [[hosts]]
            name = "@mock/web1"
            data = { _sudo = true }
            "#,
        )
        .unwrap();
        let (inventory, _) = build(builder);
        let host = inventory.get_host("web1").unwrap();
        assert_eq!(host.get_data("http_port"), Some(json!(8080)));
        assert_eq!(host.get_data("env"), Some(json!("staging")));
        assert!(host.config().sudo());
        assert_eq!(inventory.get_group("web").unwrap().data["http_port"], 8080);
    }

    #[test]
    fn test_from_toml_rejects_unknown_sections() {
        assert!(Inventory::from_toml_str("[servers]\na = 1\n").is_err());
    }
}
