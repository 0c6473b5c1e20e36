//! Execution settings with validated assignment and scoped save/restore
//!
//! The set of keys is fixed. Every assignment goes through [`Config::set`],
//! which rejects unknown keys and ill-typed values and runs the key's checker
//! (see [`CHECKERS`]) before the value is stored.
//!
//! Scoped overrides use the lock/reset pair:
//!
//! ```ignore
//! config.lock_current_state();
//! config.set("SUDO", json!(true))?;
//! // ... declare operations ...
//! config.reset_locked_state()?;
//! ```

use crate::error::{Error, Result};
use crate::requirements::{
    PackageEnvironment, PackageRequirements, StaticEnvironment, check_package_requirements,
    check_version_requirement,
};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Every recognized configuration key, in snapshot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigKey {
    FailPercent,
    ConnectTimeout,
    TempDir,
    DefaultTempDir,
    Parallel,
    RequireVersion,
    RequirePackages,
    SuUser,
    UseSuLogin,
    SuShell,
    PreserveSuEnv,
    Sudo,
    SudoUser,
    PreserveSudoEnv,
    UseSudoLogin,
    SudoPassword,
    Doas,
    DoasUser,
    IgnoreErrors,
    Shell,
    Timeout,
    Env,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 22] = [
        Self::FailPercent,
        Self::ConnectTimeout,
        Self::TempDir,
        Self::DefaultTempDir,
        Self::Parallel,
        Self::RequireVersion,
        Self::RequirePackages,
        Self::SuUser,
        Self::UseSuLogin,
        Self::SuShell,
        Self::PreserveSuEnv,
        Self::Sudo,
        Self::SudoUser,
        Self::PreserveSudoEnv,
        Self::UseSudoLogin,
        Self::SudoPassword,
        Self::Doas,
        Self::DoasUser,
        Self::IgnoreErrors,
        Self::Shell,
        Self::Timeout,
        Self::Env,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailPercent => "FAIL_PERCENT",
            Self::ConnectTimeout => "CONNECT_TIMEOUT",
            Self::TempDir => "TEMP_DIR",
            Self::DefaultTempDir => "DEFAULT_TEMP_DIR",
            Self::Parallel => "PARALLEL",
            Self::RequireVersion => "REQUIRE_VERSION",
            Self::RequirePackages => "REQUIRE_PACKAGES",
            Self::SuUser => "SU_USER",
            Self::UseSuLogin => "USE_SU_LOGIN",
            Self::SuShell => "SU_SHELL",
            Self::PreserveSuEnv => "PRESERVE_SU_ENV",
            Self::Sudo => "SUDO",
            Self::SudoUser => "SUDO_USER",
            Self::PreserveSudoEnv => "PRESERVE_SUDO_ENV",
            Self::UseSudoLogin => "USE_SUDO_LOGIN",
            Self::SudoPassword => "SUDO_PASSWORD",
            Self::Doas => "DOAS",
            Self::DoasUser => "DOAS_USER",
            Self::IgnoreErrors => "IGNORE_ERRORS",
            Self::Shell => "SHELL",
            Self::Timeout => "TIMEOUT",
            Self::Env => "ENV",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == upper)
            .ok_or_else(|| Error::config(format!("unknown config key: {s}")))
    }
}

/// A checker validates a value before it is stored.
pub type Checker = fn(&Value, &dyn PackageEnvironment) -> Result<()>;

/// Keys whose assignment runs a checker.
pub const CHECKERS: &[(ConfigKey, Checker)] = &[
    (ConfigKey::RequireVersion, check_require_version),
    (ConfigKey::RequirePackages, check_require_packages),
];

fn checker_for(key: ConfigKey) -> Option<Checker> {
    CHECKERS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, checker)| *checker)
}

fn check_require_version(value: &Value, env: &dyn PackageEnvironment) -> Result<()> {
    match value.as_str() {
        Some(spec) => check_version_requirement(spec, env),
        None => Ok(()),
    }
}

fn check_require_packages(value: &Value, env: &dyn PackageEnvironment) -> Result<()> {
    match to_package_requirements(ConfigKey::RequirePackages, value)? {
        Some(requirements) => check_package_requirements(&requirements, env),
        None => Ok(()),
    }
}

/// Ordered `(key, value)` pairs covering every recognized key.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigState(Vec<(ConfigKey, Value)>);

impl ConfigState {
    pub fn get(&self, key: ConfigKey) -> Option<&Value> {
        self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(ConfigKey, Value)> {
        self.0.iter()
    }
}

/// Execution settings for a deploy (one base store, one copy per host).
#[derive(Debug, Clone)]
pub struct Config {
    fail_percent: Option<u8>,
    connect_timeout: u64,
    temp_dir: Option<String>,
    default_temp_dir: String,
    parallel: usize,
    require_version: Option<String>,
    require_packages: Option<PackageRequirements>,
    su_user: Option<String>,
    use_su_login: bool,
    su_shell: Option<String>,
    preserve_su_env: bool,
    sudo: bool,
    sudo_user: Option<String>,
    preserve_sudo_env: bool,
    use_sudo_login: bool,
    sudo_password: Option<String>,
    doas: bool,
    doas_user: Option<String>,
    ignore_errors: bool,
    shell: String,
    timeout: Option<u64>,
    env: BTreeMap<String, String>,

    environment: Arc<dyn PackageEnvironment>,
    locked: Vec<ConfigState>,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_environment(Arc::new(StaticEnvironment::engine()))
    }
}

impl Config {
    /// Defaults, with requirement checks resolved against `environment`.
    pub fn with_environment(environment: Arc<dyn PackageEnvironment>) -> Self {
        Self {
            fail_percent: None,
            connect_timeout: 10,
            temp_dir: None,
            default_temp_dir: "/tmp".to_string(),
            parallel: 0,
            require_version: None,
            require_packages: None,
            su_user: None,
            use_su_login: false,
            su_shell: None,
            preserve_su_env: false,
            sudo: false,
            sudo_user: None,
            preserve_sudo_env: false,
            use_sudo_login: false,
            sudo_password: None,
            doas: false,
            doas_user: None,
            ignore_errors: false,
            shell: "sh".to_string(),
            timeout: None,
            env: BTreeMap::new(),
            environment,
            locked: Vec::new(),
        }
    }

    /// Build a config from a TOML table of keys (case-insensitive).
    pub fn from_toml_str(content: &str, environment: Arc<dyn PackageEnvironment>) -> Result<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut config = Self::with_environment(environment);
        for (key, value) in table {
            config.set(&key, serde_json::to_value(value)?)?;
        }
        Ok(config)
    }

    /// Load a TOML config file.
    pub fn load(path: &Path, environment: Arc<dyn PackageEnvironment>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content, environment)
    }

    /// Assign a value by key name.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.set_key(key.parse()?, value)
    }

    /// Assign a value, running the key's checker first.
    pub fn set_key(&mut self, key: ConfigKey, value: Value) -> Result<()> {
        if let Some(checker) = checker_for(key) {
            checker(&value, self.environment.as_ref())?;
        }

        match key {
            ConfigKey::FailPercent => {
                self.fail_percent = match to_opt_u64(key, &value)? {
                    Some(p) if p > 100 => {
                        return Err(Error::config(format!("{key} must be between 0 and 100")));
                    }
                    p => p.map(|p| p as u8),
                }
            }
            ConfigKey::ConnectTimeout => self.connect_timeout = to_u64(key, &value)?,
            ConfigKey::TempDir => self.temp_dir = to_opt_string(key, &value)?,
            ConfigKey::DefaultTempDir => self.default_temp_dir = to_string(key, &value)?,
            ConfigKey::Parallel => self.parallel = to_u64(key, &value)? as usize,
            ConfigKey::RequireVersion => self.require_version = to_opt_string(key, &value)?,
            ConfigKey::RequirePackages => {
                self.require_packages = to_package_requirements(key, &value)?;
            }
            ConfigKey::SuUser => self.su_user = to_opt_string(key, &value)?,
            ConfigKey::UseSuLogin => self.use_su_login = to_bool(key, &value)?,
            ConfigKey::SuShell => {
                self.su_shell = match value {
                    Value::Bool(false) => None,
                    ref other => to_opt_string(key, other)?,
                }
            }
            ConfigKey::PreserveSuEnv => self.preserve_su_env = to_bool(key, &value)?,
            ConfigKey::Sudo => self.sudo = to_bool(key, &value)?,
            ConfigKey::SudoUser => self.sudo_user = to_opt_string(key, &value)?,
            ConfigKey::PreserveSudoEnv => self.preserve_sudo_env = to_bool(key, &value)?,
            ConfigKey::UseSudoLogin => self.use_sudo_login = to_bool(key, &value)?,
            ConfigKey::SudoPassword => self.sudo_password = to_opt_string(key, &value)?,
            ConfigKey::Doas => self.doas = to_bool(key, &value)?,
            ConfigKey::DoasUser => self.doas_user = to_opt_string(key, &value)?,
            ConfigKey::IgnoreErrors => self.ignore_errors = to_bool(key, &value)?,
            ConfigKey::Shell => self.shell = to_string(key, &value)?,
            ConfigKey::Timeout => self.timeout = to_opt_u64(key, &value)?,
            ConfigKey::Env => self.env = to_env(key, &value)?,
        }
        Ok(())
    }

    /// Current value of a key.
    pub fn get(&self, key: ConfigKey) -> Value {
        match key {
            ConfigKey::FailPercent => json!(self.fail_percent),
            ConfigKey::ConnectTimeout => json!(self.connect_timeout),
            ConfigKey::TempDir => json!(self.temp_dir),
            ConfigKey::DefaultTempDir => json!(self.default_temp_dir),
            ConfigKey::Parallel => json!(self.parallel),
            ConfigKey::RequireVersion => json!(self.require_version),
            ConfigKey::RequirePackages => match &self.require_packages {
                None => Value::Null,
                Some(PackageRequirements::List(items)) => json!(items),
                Some(PackageRequirements::File(path)) => json!(path),
            },
            ConfigKey::SuUser => json!(self.su_user),
            ConfigKey::UseSuLogin => json!(self.use_su_login),
            ConfigKey::SuShell => json!(self.su_shell),
            ConfigKey::PreserveSuEnv => json!(self.preserve_su_env),
            ConfigKey::Sudo => json!(self.sudo),
            ConfigKey::SudoUser => json!(self.sudo_user),
            ConfigKey::PreserveSudoEnv => json!(self.preserve_sudo_env),
            ConfigKey::UseSudoLogin => json!(self.use_sudo_login),
            ConfigKey::SudoPassword => json!(self.sudo_password),
            ConfigKey::Doas => json!(self.doas),
            ConfigKey::DoasUser => json!(self.doas_user),
            ConfigKey::IgnoreErrors => json!(self.ignore_errors),
            ConfigKey::Shell => json!(self.shell),
            ConfigKey::Timeout => json!(self.timeout),
            ConfigKey::Env => json!(self.env),
        }
    }

    /// Snapshot of every key, in [`ConfigKey::ALL`] order.
    pub fn get_current_state(&self) -> ConfigState {
        ConfigState(
            ConfigKey::ALL
                .into_iter()
                .map(|key| (key, self.get(key)))
                .collect(),
        )
    }

    /// Reapply every value of a snapshot (checkers run again).
    pub fn set_current_state(&mut self, state: &ConfigState) -> Result<()> {
        for (key, value) in state.iter() {
            self.set_key(*key, value.clone())?;
        }
        Ok(())
    }

    /// Save the current state; the matching [`Config::reset_locked_state`] restores it.
    ///
    /// Locks nest: each reset restores the most recent lock.
    pub fn lock_current_state(&mut self) {
        self.locked.push(self.get_current_state());
    }

    pub fn reset_locked_state(&mut self) -> Result<()> {
        let state = self
            .locked
            .pop()
            .ok_or_else(|| Error::config("no locked config state to reset to"))?;
        self.set_current_state(&state)
    }

    /// An independent store seeded from this one, then `overrides` applied.
    pub fn copy<I, K>(&self, overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut copy = Self::with_environment(Arc::clone(&self.environment));
        copy.set_current_state(&self.get_current_state())?;
        for (key, value) in overrides {
            copy.set(key.as_ref(), value)?;
        }
        Ok(copy)
    }

    pub fn environment(&self) -> &Arc<dyn PackageEnvironment> {
        &self.environment
    }

    pub fn fail_percent(&self) -> Option<u8> {
        self.fail_percent
    }

    pub fn connect_timeout(&self) -> u64 {
        self.connect_timeout
    }

    /// Remote temp directory: `TEMP_DIR` if set, else `DEFAULT_TEMP_DIR`.
    pub fn temp_dir(&self) -> &str {
        self.temp_dir.as_deref().unwrap_or(&self.default_temp_dir)
    }

    pub fn parallel(&self) -> usize {
        self.parallel
    }

    pub fn su_user(&self) -> Option<&str> {
        self.su_user.as_deref()
    }

    pub fn use_su_login(&self) -> bool {
        self.use_su_login
    }

    pub fn su_shell(&self) -> Option<&str> {
        self.su_shell.as_deref()
    }

    pub fn preserve_su_env(&self) -> bool {
        self.preserve_su_env
    }

    pub fn sudo(&self) -> bool {
        self.sudo
    }

    pub fn sudo_user(&self) -> Option<&str> {
        self.sudo_user.as_deref()
    }

    pub fn preserve_sudo_env(&self) -> bool {
        self.preserve_sudo_env
    }

    pub fn use_sudo_login(&self) -> bool {
        self.use_sudo_login
    }

    pub fn sudo_password(&self) -> Option<&str> {
        self.sudo_password.as_deref()
    }

    pub fn doas(&self) -> bool {
        self.doas
    }

    pub fn doas_user(&self) -> Option<&str> {
        self.doas_user.as_deref()
    }

    pub fn ignore_errors(&self) -> bool {
        self.ignore_errors
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }
}

// ============================================================================
// Value conversion
// ============================================================================

fn type_error(key: ConfigKey, expected: &str, value: &Value) -> Error {
    Error::config(format!("{key} expects {expected}, got {value}"))
}

fn to_bool(key: ConfigKey, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| type_error(key, "a boolean", value))
}

fn to_u64(key: ConfigKey, value: &Value) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| type_error(key, "a non-negative integer", value))
}

fn to_opt_u64(key: ConfigKey, value: &Value) -> Result<Option<u64>> {
    match value {
        Value::Null => Ok(None),
        other => to_u64(key, other).map(Some),
    }
}

fn to_string(key: ConfigKey, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| type_error(key, "a string", value))
}

fn to_opt_string(key: ConfigKey, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        other => to_string(key, other).map(Some),
    }
}

fn to_package_requirements(key: ConfigKey, value: &Value) -> Result<Option<PackageRequirements>> {
    match value {
        Value::Null => Ok(None),
        Value::String(path) if path.is_empty() => Ok(None),
        Value::String(path) => Ok(Some(PackageRequirements::File(path.clone()))),
        Value::Array(items) => items
            .iter()
            .map(|item| to_string(key, item))
            .collect::<Result<Vec<_>>>()
            .map(|items| Some(PackageRequirements::List(items))),
        other => Err(type_error(key, "a list of requirements or a file path", other)),
    }
}

fn to_env(key: ConfigKey, value: &Value) -> Result<BTreeMap<String, String>> {
    let empty = Map::new();
    let map = match value {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => return Err(type_error(key, "a mapping", other)),
    };
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => return Err(type_error(key, "scalar values", other)),
            };
            Ok((k.clone(), v))
        })
        .collect()
}
