use anyhow::{Context, Result};
use converge::{Config, ConnectorRegistry, Inventory, InventoryBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::TargetArgs;

const PROJECT_FILE: &str = "rollout.toml";

/// Get the user config directory path
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join("rollout"))
}

/// A `rollout.toml` project file.
///
/// ```toml
/// inventory = "inventory.toml"
///
/// [config]
/// parallel = 10
/// fail_percent = 20
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    /// Inventory path, relative to the project file
    #[serde(default)]
    pub inventory: Option<String>,

    /// Engine settings by key name
    #[serde(default)]
    pub config: toml::Table,

    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl ProjectFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let mut project: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid project file {}", path.display()))?;
        project.base_dir = path.parent().map(Path::to_path_buf);
        Ok(project)
    }

    /// Explicit path, `./rollout.toml`, the user config dir, or nothing.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            return Self::load(Path::new(&expanded));
        }

        let local = PathBuf::from(PROJECT_FILE);
        if local.is_file() {
            return Self::load(&local);
        }
        if let Ok(dir) = config_dir() {
            let global = dir.join("config.toml");
            if global.is_file() {
                return Self::load(&global);
            }
        }
        Ok(Self::default())
    }

    /// Resolved inventory path, if one is configured
    pub fn inventory_path(&self) -> Option<PathBuf> {
        self.inventory.as_deref().map(|raw| self.resolve(raw))
    }

    /// Expand `~` and anchor relative paths at the project file's directory
    fn resolve(&self, raw: &str) -> PathBuf {
        let path = PathBuf::from(shellexpand::tilde(raw).as_ref());
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        }
    }

    /// Engine config with project settings and command-line overrides applied
    pub fn engine_config(&self, args: &TargetArgs) -> Result<Config> {
        let mut config = Config::default();
        for (key, value) in &self.config {
            let mut value = serde_json::to_value(value)?;
            // A requirements file is named relative to the project
            if key.eq_ignore_ascii_case("require_packages")
                && let Value::String(path) = &value
                && !path.is_empty()
            {
                value = Value::String(self.resolve(path).to_string_lossy().into_owned());
            }
            config
                .set(key, value)
                .with_context(|| format!("Invalid setting {key} in project file"))?;
        }

        let mut overrides: Vec<(&str, Value)> = Vec::new();
        if let Some(parallel) = args.parallel {
            overrides.push(("PARALLEL", parallel.into()));
        }
        if let Some(percent) = args.fail_percent {
            overrides.push(("FAIL_PERCENT", percent.into()));
        }
        if args.sudo {
            overrides.push(("SUDO", true.into()));
        }
        if let Some(user) = &args.sudo_user {
            overrides.push(("SUDO", true.into()));
            overrides.push(("SUDO_USER", user.as_str().into()));
        }
        if let Some(user) = &args.su_user {
            overrides.push(("SU_USER", user.as_str().into()));
        }
        if args.doas {
            overrides.push(("DOAS", true.into()));
        }
        for (key, value) in overrides {
            config.set(key, value)?;
        }
        Ok(config)
    }
}

/// Build the inventory from files and `--host` specs.
pub fn load_inventory(args: &TargetArgs, project: &ProjectFile, config: &Config) -> Result<Inventory> {
    let path = args.inventory.clone().or_else(|| project.inventory_path());

    let mut builder = match &path {
        Some(path) => Inventory::load(path)
            .with_context(|| format!("Could not load inventory {}", path.display()))?,
        None => InventoryBuilder::default(),
    };
    for spec in &args.hosts {
        builder = builder.host(spec, serde_json::Map::new());
    }
    if path.is_none() && args.hosts.is_empty() {
        anyhow::bail!("No hosts: pass --inventory, --host, or set `inventory` in {PROJECT_FILE}");
    }
    if !args.limit.is_empty() {
        builder = builder.limit(&args.limit);
    }

    let inventory = builder.build(&ConnectorRegistry::builtin(), config)?;
    log::info!(
        "{} hosts, {} activated",
        inventory.len(),
        inventory.activated_count()
    );
    Ok(inventory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use converge::ConfigKey;

    #[test]
    fn test_project_file_settings_and_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PROJECT_FILE);
        fs::write(
            &path,
            "inventory = \"hosts.toml\"\n\n[config]\nparallel = 4\nfail_percent = 10\n",
        )
        .unwrap();

        let project = ProjectFile::load(&path).unwrap();
        assert_eq!(project.inventory_path(), Some(dir.path().join("hosts.toml")));

        let args = TargetArgs {
            fail_percent: Some(30),
            sudo_user: Some("deploy".into()),
            ..TargetArgs::default()
        };
        let config = project.engine_config(&args).unwrap();
        assert_eq!(config.parallel(), 4);
        assert_eq!(config.fail_percent(), Some(30));
        assert!(config.sudo());
        assert_eq!(config.sudo_user(), Some("deploy"));
    }

    #[test]
    fn test_requirements_file_is_relative_to_project() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "# nothing pinned yet\n").unwrap();
        let path = dir.path().join(PROJECT_FILE);
        fs::write(&path, "[config]\nrequire_packages = \"requirements.txt\"\n").unwrap();

        let project = ProjectFile::load(&path).unwrap();
        let config = project.engine_config(&TargetArgs::default()).unwrap();
        let expected = dir.path().join("requirements.txt");
        assert_eq!(
            config.get(ConfigKey::RequirePackages),
            Value::String(expected.to_string_lossy().into_owned())
        );
    }

    #[test]
    fn test_unknown_setting_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(PROJECT_FILE);
        fs::write(&path, "[config]\nparalel = 4\n").unwrap();
        let project = ProjectFile::load(&path).unwrap();
        assert!(project.engine_config(&TargetArgs::default()).is_err());

        fs::write(&path, "hosts = []\n").unwrap();
        assert!(ProjectFile::load(&path).is_err());
    }

    #[test]
    fn test_inventory_from_file_and_hosts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.toml");
        fs::write(
            &path,
            "[[groups]]\nname = \"web\"\nhosts = [\"@local\"]\n",
        )
        .unwrap();

        let args = TargetArgs {
            inventory: Some(path),
            ..TargetArgs::default()
        };
        let inventory = load_inventory(&args, &ProjectFile::default(), &Config::default()).unwrap();
        assert_eq!(inventory.len(), 1);
        assert!(inventory.get_host("@local").unwrap().in_group("web"));

        let none = load_inventory(&TargetArgs::default(), &ProjectFile::default(), &Config::default());
        assert!(none.is_err());
    }
}
