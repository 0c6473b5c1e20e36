//! Facts: cached, read-only queries against host state
//!
//! A [`Fact`] turns its arguments into a shell command and parses the
//! command's stdout lines into a JSON value. Each host keeps a [`FactCache`]
//! keyed by (fact name, arguments); a fact is gathered at most once until the
//! cache is cleared. The executor clears a host's whole cache after every
//! operation that reports a change on that host.
//!
//! Facts read while a deploy is being built reflect the host *before* any
//! operation runs. An operation that needs the state left behind by earlier
//! operations must read its facts inside a deferred body, at dispatch time.

pub mod docker;
pub mod files;
pub mod rpm;
pub mod zfs;

use crate::connectors::CommandOutput;
use crate::connectors::util::shell_quote;
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// A query against host state.
pub trait Fact: Send + Sync {
    /// Stable name, part of the cache key.
    fn name(&self) -> &'static str;

    /// Shell command gathering the fact for `args`.
    fn command(&self, args: &[String]) -> Result<String>;

    /// Binary that must exist for the command to make sense.
    ///
    /// When it is missing the command prints nothing and the fact falls back
    /// to its default.
    fn requires_command(&self) -> Option<&'static str> {
        None
    }

    /// Parse stdout lines; `None` when nothing usable came back.
    fn process(&self, output: &[String]) -> Option<Value>;

    /// Value used when the command fails or prints nothing parseable.
    fn default(&self) -> Option<Value> {
        None
    }
}

/// A fact derived from another fact's value.
pub trait ShortFact: Send + Sync {
    fn name(&self) -> &'static str;

    fn base(&self) -> &dyn Fact;

    fn process_data(&self, data: Value) -> Value;
}

/// The command actually sent to the host, guarded by `requires_command`.
pub fn full_command(fact: &dyn Fact, args: &[String]) -> Result<String> {
    let command = fact.command(args)?;
    Ok(match fact.requires_command() {
        Some(binary) => format!(
            "! command -v {} >/dev/null || ({command})",
            shell_quote(binary)
        ),
        None => command,
    })
}

/// Turn raw command output into a fact value.
pub fn process_output(fact: &dyn Fact, command: &str, output: &CommandOutput) -> Result<Value> {
    if !output.success() {
        return fact.default().ok_or_else(|| Error::Command {
            host: String::new(),
            command: command.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr.join("\n"),
        });
    }
    Ok(fact
        .process(&output.stdout)
        .or_else(|| fact.default())
        .unwrap_or(Value::Null))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FactKey {
    name: &'static str,
    args: Vec<String>,
}

/// Per-host memo of gathered facts.
#[derive(Debug, Default)]
pub struct FactCache {
    entries: Mutex<HashMap<FactKey, Value>>,
}

impl FactCache {
    /// Cached value for `fact(args)`, gathering it with `run` on a miss.
    ///
    /// The lock is not held while `run` executes; two racing misses both
    /// gather and the first stored value wins.
    pub fn get_or_gather<F>(&self, fact: &dyn Fact, args: &[String], run: F) -> Result<Value>
    where
        F: FnOnce(&str) -> Result<CommandOutput>,
    {
        let key = FactKey {
            name: fact.name(),
            args: args.to_vec(),
        };
        if let Some(value) = self.lock().get(&key) {
            return Ok(value.clone());
        }

        let command = full_command(fact, args)?;
        let output = run(&command)?;
        let value = process_output(fact, &command, &output)?;

        Ok(self.lock().entry(key).or_insert(value).clone())
    }

    /// Forget every cached fact.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Forget every cached value of one fact.
    pub fn clear_fact(&self, name: &str) {
        self.lock().retain(|key, _| key.name != name);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<FactKey, Value>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A stock fact found by name.
#[derive(Clone, Copy)]
pub enum FactRef {
    Fact(&'static dyn Fact),
    Short(&'static dyn ShortFact),
}

static FACTS: &[FactRef] = &[
    FactRef::Fact(&files::File),
    FactRef::Fact(&files::Sha256File),
    FactRef::Fact(&files::FindInFile),
    FactRef::Fact(&rpm::RpmPackages),
    FactRef::Fact(&rpm::RpmPackage),
    FactRef::Fact(&rpm::RpmPackageProvides),
    FactRef::Fact(&zfs::ZfsPools),
    FactRef::Fact(&zfs::ZfsDatasets),
    FactRef::Short(&zfs::ZfsFilesystems),
    FactRef::Short(&zfs::ZfsSnapshots),
    FactRef::Short(&zfs::ZfsVolumes),
    FactRef::Fact(&docker::DockerContainers),
    FactRef::Fact(&docker::DockerImages),
    FactRef::Fact(&docker::DockerVolumes),
    FactRef::Fact(&docker::DockerNetworks),
];

impl FactRef {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fact(fact) => fact.name(),
            Self::Short(fact) => fact.name(),
        }
    }
}

/// Every stock fact, in a stable order.
pub fn all() -> &'static [FactRef] {
    FACTS
}

/// Look a stock fact up by name (case-insensitive).
pub fn by_name(name: &str) -> Option<FactRef> {
    FACTS
        .iter()
        .copied()
        .find(|f| f.name().eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Uptime;

    impl Fact for Uptime {
        fn name(&self) -> &'static str {
            "Uptime"
        }

        fn command(&self, _args: &[String]) -> Result<String> {
            Ok("cut -d. -f1 /proc/uptime".into())
        }

        fn process(&self, output: &[String]) -> Option<Value> {
            output.first()?.trim().parse::<u64>().ok().map(Value::from)
        }
    }

    struct Tool;

    impl Fact for Tool {
        fn name(&self) -> &'static str {
            "Tool"
        }

        fn command(&self, args: &[String]) -> Result<String> {
            Ok(format!("tool list {}", args.join(" ")))
        }

        fn requires_command(&self) -> Option<&'static str> {
            Some("tool")
        }

        fn process(&self, output: &[String]) -> Option<Value> {
            (!output.is_empty()).then(|| Value::from(output.to_vec()))
        }

        fn default(&self) -> Option<Value> {
            Some(Value::Array(Vec::new()))
        }
    }

    #[test]
    fn test_gathers_once_per_key() {
        let cache = FactCache::default();
        let calls = Cell::new(0);
        let run = |_: &str| {
            calls.set(calls.get() + 1);
            Ok(CommandOutput::ok(["4242"]))
        };

        assert_eq!(cache.get_or_gather(&Uptime, &[], run).unwrap(), 4242);
        assert_eq!(cache.get_or_gather(&Uptime, &[], run).unwrap(), 4242);
        assert_eq!(calls.get(), 1);

        cache.clear();
        cache.get_or_gather(&Uptime, &[], run).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_args_are_part_of_the_key() {
        let cache = FactCache::default();
        let calls = Cell::new(0);
        let run = |cmd: &str| {
            calls.set(calls.get() + 1);
            Ok(CommandOutput::ok([cmd.to_string()]))
        };
        cache.get_or_gather(&Tool, &["a".into()], run).unwrap();
        cache.get_or_gather(&Tool, &["b".into()], run).unwrap();
        cache.get_or_gather(&Tool, &["a".into()], run).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.len(), 2);

        cache.clear_fact("Tool");
        assert!(cache.is_empty());
    }

    #[test]
    fn test_requires_command_guard() {
        let command = full_command(&Tool, &["x".into()]).unwrap();
        assert_eq!(command, "! command -v tool >/dev/null || (tool list x)");
    }

    #[test]
    fn test_failure_uses_default_or_errors() {
        let cache = FactCache::default();
        let failing = |_: &str| Ok(CommandOutput::failed(127, "not found"));

        let value = cache.get_or_gather(&Tool, &[], failing).unwrap();
        assert_eq!(value, Value::Array(Vec::new()));

        let err = cache.get_or_gather(&Uptime, &[], failing).unwrap_err();
        assert!(matches!(err, Error::Command { exit_code: 127, .. }));
        // failures are not memoized
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_unparseable_output_is_null_without_default() {
        let cache = FactCache::default();
        let value = cache
            .get_or_gather(&Uptime, &[], |_| Ok(CommandOutput::ok(["garbage"])))
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(by_name("file").unwrap().name(), "File");
        assert!(matches!(by_name("ZfsVolumes"), Some(FactRef::Short(_))));
        assert!(by_name("Nope").is_none());
        let names: Vec<&str> = all().iter().map(FactRef::name).collect();
        assert!(names.contains(&"DockerNetworks"));
    }
}
