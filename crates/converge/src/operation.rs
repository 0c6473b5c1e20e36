//! Operations and their shared per-hash records
//!
//! An operation is planned in two phases. Declaring it yields either a fixed
//! list of [`Command`]s, decided from facts read at declaration time, or a
//! deferred body that produces the list at dispatch time. The executor then
//! runs the list through the host's connector.

use crate::conditional::{Predicate, predicate};
use crate::config::Config;
use crate::connectors::CommandOptions;
use crate::error::{Error, Result};
use crate::inventory::Host;
use crate::types::OperationOutcome;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process step run as part of an operation.
pub type HostFn = Arc<dyn Fn(&Host) -> Result<()> + Send + Sync>;

/// Deferred body: computes the command list when the operation is dispatched.
pub type DeferredFn = Arc<dyn Fn(&Host) -> Result<Vec<Command>> + Send + Sync>;

/// One step of an operation.
#[derive(Clone)]
pub enum Command {
    Shell(String),
    PutFile { data: Vec<u8>, dest: String },
    GetFile { src: String, dest: PathBuf },
    Function { name: String, func: HostFn },
}

impl Command {
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(command.into())
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(command) => write!(f, "Shell({command:?})"),
            Self::PutFile { data, dest } => write!(f, "PutFile({} bytes -> {dest})", data.len()),
            Self::GetFile { src, dest } => write!(f, "GetFile({src} -> {})", dest.display()),
            Self::Function { name, .. } => write!(f, "Function({name})"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(command) => f.write_str(command),
            Self::PutFile { dest, .. } => write!(f, "upload {dest}"),
            Self::GetFile { src, .. } => write!(f, "download {src}"),
            Self::Function { name, .. } => write!(f, "call {name}"),
        }
    }
}

#[derive(Clone)]
pub enum OperationBody {
    Commands(Vec<Command>),
    Deferred(DeferredFn),
}

impl fmt::Debug for OperationBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commands(commands) => f.debug_tuple("Commands").field(commands).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

/// A planned operation for one host, not yet added to a deploy.
#[derive(Debug, Clone)]
pub struct Operation {
    identity: String,
    name: Option<String>,
    args: Value,
    body: OperationBody,
}

impl Operation {
    /// Operation with a fixed command list; empty means nothing to do.
    pub fn new(identity: &str, args: Value, commands: Vec<Command>) -> Self {
        Self {
            identity: identity.to_string(),
            name: None,
            args,
            body: OperationBody::Commands(commands),
        }
    }

    /// Operation whose commands are computed at dispatch time.
    pub fn deferred<F>(identity: &str, args: Value, body: F) -> Self
    where
        F: Fn(&Host) -> Result<Vec<Command>> + Send + Sync + 'static,
    {
        Self {
            identity: identity.to_string(),
            name: None,
            args,
            body: OperationBody::Deferred(Arc::new(body)),
        }
    }

    /// Operation that is already satisfied.
    pub fn noop(identity: &str, args: Value) -> Self {
        Self::new(identity, args, Vec::new())
    }

    /// Display name shown in progress and results.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn body(&self) -> &OperationBody {
        &self.body
    }

    pub(crate) fn into_parts(self) -> (String, Option<String>, Value, OperationBody) {
        (self.identity, self.name, self.args, self.body)
    }
}

/// Settings captured from the host's config when an operation is declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalArgs {
    pub options: CommandOptions,
    pub ignore_errors: bool,
}

impl GlobalArgs {
    pub fn from_config(config: &Config) -> Self {
        Self {
            options: CommandOptions::from_config(config),
            ignore_errors: config.ignore_errors(),
        }
    }
}

/// Stable identity of an operation node, shared by hosts declaring it alike.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpHash(String);

impl OpHash {
    /// Hash of identity, canonical arguments and per-host occurrence.
    pub fn compute(identity: &str, args: &Value, occurrence: usize) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(identity.as_bytes());
        hasher.update(b"\0");
        // serde_json maps are ordered, so this serialization is canonical
        hasher.update(args.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(&(occurrence as u64).to_le_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OpHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12])
    }
}

fn relock<T>(result: std::sync::LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Cross-host record of one operation: names, arguments, per-host outcomes.
#[derive(Debug)]
pub struct OperationMeta {
    hash: OpHash,
    identity: String,
    args: Value,
    names: Mutex<Vec<String>>,
    hosts: Mutex<Vec<String>>,
    outcomes: Mutex<BTreeMap<String, OperationOutcome>>,
    executed: AtomicBool,
}

impl OperationMeta {
    pub(crate) fn new(hash: OpHash, identity: &str, args: Value) -> Self {
        Self {
            hash,
            identity: identity.to_string(),
            args,
            names: Mutex::new(Vec::new()),
            hosts: Mutex::new(Vec::new()),
            outcomes: Mutex::new(BTreeMap::new()),
            executed: AtomicBool::new(false),
        }
    }

    pub fn hash(&self) -> &OpHash {
        &self.hash
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    pub fn names(&self) -> Vec<String> {
        relock(self.names.lock()).clone()
    }

    /// Hosts that declared this operation, in declaration order.
    pub fn hosts(&self) -> Vec<String> {
        relock(self.hosts.lock()).clone()
    }

    pub(crate) fn add_declaration(&self, host: &str, name: &str) {
        let mut names = relock(self.names.lock());
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        drop(names);
        let mut hosts = relock(self.hosts.lock());
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
    }

    /// First declared name, followed by the arguments.
    pub fn display_name(&self) -> String {
        let name = relock(self.names.lock())
            .first()
            .cloned()
            .unwrap_or_else(|| self.identity.clone());
        match pretty_args(&self.args) {
            Some(args) => format!("{name} ({args})"),
            None => name,
        }
    }

    pub(crate) fn record(&self, host: &str, outcome: OperationOutcome) {
        relock(self.outcomes.lock()).insert(host.to_string(), outcome);
    }

    pub(crate) fn mark_executed(&self) {
        self.executed.store(true, Ordering::SeqCst);
    }

    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn outcome(&self, host: &str) -> Option<OperationOutcome> {
        relock(self.outcomes.lock()).get(host).cloned()
    }

    /// Every recorded outcome, by host name.
    pub fn outcomes(&self) -> BTreeMap<String, OperationOutcome> {
        relock(self.outcomes.lock()).clone()
    }

    fn ensure_executed(&self) -> Result<()> {
        if self.is_executed() {
            Ok(())
        } else {
            Err(Error::OperationNotExecuted {
                name: self.display_name(),
            })
        }
    }

    /// Whether the operation changed `host`.
    pub fn did_change(&self, host: &str) -> Result<bool> {
        self.ensure_executed()?;
        Ok(self.outcome(host).is_some_and(|o| o.is_change()))
    }

    /// Whether the operation completed on `host` without error.
    pub fn did_succeed(&self, host: &str) -> Result<bool> {
        self.ensure_executed()?;
        Ok(self.outcome(host).is_some_and(|o| o.is_success()))
    }
}

fn pretty_args(args: &Value) -> Option<String> {
    let render = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let parts: Vec<String> = match args {
        Value::Null => return None,
        Value::Array(items) => items.iter().map(render).collect(),
        Value::Object(map) => map
            .values()
            .filter(|v| !v.is_null())
            .map(render)
            .collect(),
        other => vec![render(other)],
    };
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// What declaring an operation returns: queries on its outcome for one host.
#[derive(Debug, Clone)]
pub struct OperationHandle {
    meta: Arc<OperationMeta>,
    host: String,
}

impl OperationHandle {
    pub(crate) fn new(meta: Arc<OperationMeta>, host: &str) -> Self {
        Self {
            meta,
            host: host.to_string(),
        }
    }

    pub fn meta(&self) -> &Arc<OperationMeta> {
        &self.meta
    }

    pub fn hash(&self) -> &OpHash {
        self.meta.hash()
    }

    /// Errors with `OperationNotExecuted` until the operation has run.
    pub fn did_change(&self) -> Result<bool> {
        self.meta.did_change(&self.host)
    }

    pub fn did_succeed(&self) -> Result<bool> {
        self.meta.did_succeed(&self.host)
    }

    /// A predicate true on hosts this operation changed.
    ///
    /// Evaluated for the host being dispatched, so it can gate later
    /// operations declared anywhere in the deploy.
    pub fn did_change_predicate(&self) -> Predicate {
        let meta = Arc::clone(&self.meta);
        predicate(move |host| meta.did_change(host.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_depends_on_args_and_occurrence() {
        let a = OpHash::compute("server.shell", &json!({"commands": ["uptime"]}), 0);
        let b = OpHash::compute("server.shell", &json!({"commands": ["uptime"]}), 0);
        let c = OpHash::compute("server.shell", &json!({"commands": ["date"]}), 0);
        let d = OpHash::compute("server.shell", &json!({"commands": ["uptime"]}), 1);
        let e = OpHash::compute("files.line", &json!({"commands": ["uptime"]}), 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_ne!(a, e);
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a = OpHash::compute("x", &json!({"a": 1, "b": 2}), 0);
        let b = OpHash::compute("x", &json!({"b": 2, "a": 1}), 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_meta_queries_require_execution() {
        let meta = OperationMeta::new(OpHash::compute("x", &Value::Null, 0), "x", Value::Null);
        meta.add_declaration("web1", "Restart");
        meta.record("web1", OperationOutcome::Changed);

        let err = meta.did_change("web1").unwrap_err();
        assert!(matches!(err, Error::OperationNotExecuted { .. }));

        meta.mark_executed();
        assert!(meta.did_change("web1").unwrap());
        assert!(meta.did_succeed("web1").unwrap());
        assert!(!meta.did_change("web2").unwrap());
        assert!(!meta.did_succeed("web2").unwrap());
    }

    #[test]
    fn test_names_and_hosts_union() {
        let meta = OperationMeta::new(
            OpHash::compute("files.line", &json!({"path": "/etc/hosts", "line": "x"}), 0),
            "files.line",
            json!({"line": "x", "path": "/etc/hosts"}),
        );
        meta.add_declaration("a", "Add line");
        meta.add_declaration("b", "Add hosts line");
        meta.add_declaration("a", "Add line");
        assert_eq!(meta.hosts(), vec!["a", "b"]);
        assert_eq!(meta.names(), vec!["Add line", "Add hosts line"]);
        assert_eq!(meta.display_name(), "Add line (x, /etc/hosts)");
    }

    #[test]
    fn test_display_without_args() {
        let meta = OperationMeta::new(OpHash::compute("x", &Value::Null, 0), "server.noop", Value::Null);
        assert_eq!(meta.display_name(), "server.noop");
    }

    #[test]
    fn test_operation_builders() {
        let op = Operation::new("server.shell", json!(["id"]), vec![Command::shell("id")]).named("Who");
        assert_eq!(op.name(), Some("Who"));
        assert!(matches!(op.body(), OperationBody::Commands(c) if c.len() == 1));

        let op = Operation::deferred("server.call", Value::Null, |_| Ok(Vec::new()));
        assert!(matches!(op.body(), OperationBody::Deferred(_)));
        assert_eq!(Command::shell("ls").to_string(), "ls");
    }
}
