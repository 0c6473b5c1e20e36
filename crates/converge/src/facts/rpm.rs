//! RPM package facts

use super::Fact;
use crate::connectors::util::shell_quote;
use crate::error::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static RPM_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+) (\S+)$").expect("valid rpm regex"));

const QUERY_FORMAT: &str = "%{NAME} %{VERSION}-%{RELEASE}\\n";

fn parse_line(line: &str) -> Option<(&str, &str)> {
    let captures = RPM_LINE.captures(line.trim())?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

/// Installed packages: `{"name": ["version", ...]}`.
pub struct RpmPackages;

impl Fact for RpmPackages {
    fn name(&self) -> &'static str {
        "RpmPackages"
    }

    fn command(&self, _args: &[String]) -> Result<String> {
        Ok(format!("rpm --queryformat {} -qa", shell_quote(QUERY_FORMAT)))
    }

    fn requires_command(&self) -> Option<&'static str> {
        Some("rpm")
    }

    fn process(&self, output: &[String]) -> Option<Value> {
        let mut packages: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (name, version) in output.iter().filter_map(|l| parse_line(l)) {
            packages.entry(name).or_default().insert(version);
        }
        Some(json!(packages))
    }

    fn default(&self) -> Option<Value> {
        Some(Value::Object(Map::new()))
    }
}

/// Name and version of an installed package or a local `.rpm` file.
pub struct RpmPackage;

impl Fact for RpmPackage {
    fn name(&self) -> &'static str {
        "RpmPackage"
    }

    fn command(&self, args: &[String]) -> Result<String> {
        let [package] = args else {
            return Err(Error::config("RpmPackage takes one package argument"));
        };
        let format = shell_quote(QUERY_FORMAT);
        let package = shell_quote(package);
        Ok(format!(
            "rpm --queryformat {format} -q {package} || \
             ! test -e {package} || \
             rpm --queryformat {format} -qp {package} 2> /dev/null"
        ))
    }

    fn requires_command(&self) -> Option<&'static str> {
        Some("rpm")
    }

    fn process(&self, output: &[String]) -> Option<Value> {
        output
            .iter()
            .find_map(|line| parse_line(line))
            .map(|(name, version)| json!({"name": name, "version": version}))
    }
}

/// Packages providing a capability: `[["name", "version"], ...]`.
pub struct RpmPackageProvides;

impl Fact for RpmPackageProvides {
    fn name(&self) -> &'static str {
        "RpmPackageProvides"
    }

    fn command(&self, args: &[String]) -> Result<String> {
        let [capability] = args else {
            return Err(Error::config("RpmPackageProvides takes one argument"));
        };
        // unknown capabilities are not an error
        Ok(format!(
            "repoquery --queryformat {} --whatprovides {} || true",
            shell_quote(QUERY_FORMAT),
            shell_quote(capability)
        ))
    }

    fn requires_command(&self) -> Option<&'static str> {
        Some("repoquery")
    }

    fn process(&self, output: &[String]) -> Option<Value> {
        let packages: Vec<Value> = output
            .iter()
            .filter_map(|line| parse_line(line))
            .map(|(name, version)| json!([name, version]))
            .collect();
        Some(Value::Array(packages))
    }

    fn default(&self) -> Option<Value> {
        Some(Value::Array(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &str) -> Vec<String> {
        raw.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_packages_group_versions() {
        let output = lines(
            "kernel 5.14.0-1.el9\nkernel 5.14.0-2.el9\nbash 5.1.8-6.el9\nnot a package line",
        );
        let value = RpmPackages.process(&output).unwrap();
        assert_eq!(
            value,
            json!({
                "bash": ["5.1.8-6.el9"],
                "kernel": ["5.14.0-1.el9", "5.14.0-2.el9"],
            })
        );
    }

    #[test]
    fn test_package_takes_first_match() {
        let value = RpmPackage
            .process(&lines("warning: junk here\nnginx 1.20.1-10.el9"))
            .unwrap();
        assert_eq!(value, json!({"name": "nginx", "version": "1.20.1-10.el9"}));
        assert!(RpmPackage.process(&[]).is_none());
    }

    #[test]
    fn test_package_command_quotes() {
        let command = RpmPackage.command(&["/tmp/my pkg.rpm".into()]).unwrap();
        assert!(command.contains("-q '/tmp/my pkg.rpm'"));
        assert!(command.contains("! test -e '/tmp/my pkg.rpm'"));
    }

    #[test]
    fn test_provides() {
        let value = RpmPackageProvides
            .process(&lines("vim-enhanced 8.2-1.el9\ngvim 8.2-1.el9"))
            .unwrap();
        assert_eq!(
            value,
            json!([["vim-enhanced", "8.2-1.el9"], ["gvim", "8.2-1.el9"]])
        );
        assert_eq!(RpmPackageProvides.default(), Some(json!([])));
    }
}
