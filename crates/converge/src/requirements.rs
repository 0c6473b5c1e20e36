//! Version and package requirement checks
//!
//! Backs the `REQUIRE_VERSION` and `REQUIRE_PACKAGES` config checkers.
//! Requirements use the familiar `name[extras] specifiers; marker` syntax:
//!
//! ```text
//! converge >=0.1, <2
//! docker-compose[ssh] ~=1.29 ; platform_system == "Linux"
//! ```
//!
//! Versions are compared with `semver`. Release numbers shorter than three
//! components are padded (`1.2` is `1.2.0`), and `1.0rc1` style pre-releases
//! are read as `1.0.0-rc.1`.

use crate::error::{Error, Result};
use regex::Regex;
use semver::{Prerelease, Version};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v?(\d+(?:\.\d+){0,2})(?:[-.]?(a|b|c|rc|alpha|beta|pre|preview|dev)\.?(\d+)?)?$")
        .expect("static regex")
});

static SPECIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(===|~=|==|!=|<=|>=|<|>)\s*(\S+)$").expect("static regex")
});

static REQUIREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*([A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?:\[([^\]]*)\])?\s*(?:@\s*\S+)?\s*\(?([^;()]*)\)?\s*(?:;\s*(.*))?$",
    )
    .expect("static regex")
});

static MARKER_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s*(\(|\)|===|==|!=|~=|<=|>=|<|>|'[^']*'|"[^"]*"|[A-Za-z_][A-Za-z0-9_.]*)"#)
        .expect("static regex")
});

/// Parse a version string leniently into a semver version.
pub fn parse_version(raw: &str) -> Option<Version> {
    let caps = VERSION_RE.captures(raw.trim())?;
    let mut parts: Vec<u64> = caps[1]
        .split('.')
        .map(str::parse)
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    parts.resize(3, 0);

    let mut version = Version::new(parts[0], parts[1], parts[2]);
    if let Some(tag) = caps.get(2) {
        let tag = match tag.as_str() {
            "a" => "alpha",
            "b" => "beta",
            "c" | "pre" | "preview" => "rc",
            other => other,
        };
        let number = caps.get(3).map_or("0", |m| m.as_str());
        version.pre = Prerelease::new(&format!("{tag}.{number}")).ok()?;
    }
    Some(version)
}

/// Number of explicit release components in a version string (`1.4` is 2).
fn release_len(raw: &str) -> usize {
    raw.trim_start_matches('v')
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .next()
        .map_or(0, |release| release.split('.').filter(|p| !p.is_empty()).count())
}

fn release_prefix_matches(version: &Version, target: &Version, len: usize) -> bool {
    let have = [version.major, version.minor, version.patch];
    let want = [target.major, target.minor, target.patch];
    have[..len.min(3)] == want[..len.min(3)]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Arbitrary,
    Compatible,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    Less,
    Greater,
}

/// A single version constraint such as `>=1.2` or `==1.4.*`.
#[derive(Debug, Clone)]
struct Specifier {
    op: Op,
    raw: String,
    version: Version,
    wildcard: bool,
    release_len: usize,
}

impl Specifier {
    fn parse(raw: &str) -> Result<Self> {
        let caps = SPECIFIER_RE
            .captures(raw.trim())
            .ok_or_else(|| Error::config(format!("invalid version specifier: {raw}")))?;
        let op = match &caps[1] {
            "===" => Op::Arbitrary,
            "~=" => Op::Compatible,
            "==" => Op::Equal,
            "!=" => Op::NotEqual,
            "<=" => Op::LessEqual,
            ">=" => Op::GreaterEqual,
            "<" => Op::Less,
            _ => Op::Greater,
        };
        let value = caps[2].to_string();
        let wildcard = value.ends_with(".*");
        if wildcard && !matches!(op, Op::Equal | Op::NotEqual) {
            return Err(Error::config(format!("wildcard not allowed in specifier: {raw}")));
        }
        let bare = value.trim_end_matches(".*");
        let version = match op {
            Op::Arbitrary => parse_version(bare).unwrap_or_else(|| Version::new(0, 0, 0)),
            _ => parse_version(bare)
                .ok_or_else(|| Error::config(format!("invalid version in specifier: {raw}")))?,
        };
        let release_len = release_len(bare);
        if op == Op::Compatible && release_len < 2 {
            return Err(Error::config(format!(
                "compatible release needs at least two components: {raw}"
            )));
        }

        Ok(Self {
            op,
            raw: value,
            version,
            wildcard,
            release_len,
        })
    }

    fn contains(&self, raw: &str, version: &Version) -> bool {
        let ordering = version.cmp_precedence(&self.version);
        match self.op {
            Op::Arbitrary => raw == self.raw,
            Op::Equal if self.wildcard => {
                release_prefix_matches(version, &self.version, self.release_len)
            }
            Op::NotEqual if self.wildcard => {
                !release_prefix_matches(version, &self.version, self.release_len)
            }
            Op::Equal => ordering == Ordering::Equal,
            Op::NotEqual => ordering != Ordering::Equal,
            Op::LessEqual => ordering != Ordering::Greater,
            Op::GreaterEqual => ordering != Ordering::Less,
            Op::Less => ordering == Ordering::Less,
            Op::Greater => ordering == Ordering::Greater,
            Op::Compatible => {
                ordering != Ordering::Less
                    && release_prefix_matches(version, &self.version, self.release_len - 1)
            }
        }
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Op::Arbitrary => "===",
            Op::Compatible => "~=",
            Op::Equal => "==",
            Op::NotEqual => "!=",
            Op::LessEqual => "<=",
            Op::GreaterEqual => ">=",
            Op::Less => "<",
            Op::Greater => ">",
        };
        write!(f, "{op}{}", self.raw)
    }
}

/// A comma separated set of specifiers, all of which must hold.
#[derive(Debug, Clone, Default)]
pub struct SpecifierSet {
    specifiers: Vec<Specifier>,
}

impl SpecifierSet {
    /// Whether `version` satisfies every specifier. An empty set matches anything.
    pub fn contains(&self, version: &str) -> bool {
        if self.specifiers.is_empty() {
            return true;
        }
        let Some(parsed) = parse_version(version) else {
            return self
                .specifiers
                .iter()
                .all(|s| s.op == Op::Arbitrary && s.raw == version);
        };
        self.specifiers.iter().all(|s| s.contains(version, &parsed))
    }

    pub fn is_empty(&self) -> bool {
        self.specifiers.is_empty()
    }
}

impl FromStr for SpecifierSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let specifiers = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Specifier::parse)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { specifiers })
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.specifiers.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join(","))
    }
}

// ============================================================================
// Markers
// ============================================================================

/// Values markers are evaluated against (`platform_system`, `extra`, ...).
#[derive(Debug, Clone, Default)]
pub struct MarkerEnvironment {
    values: HashMap<String, String>,
}

impl MarkerEnvironment {
    /// Describe the machine the engine runs on.
    pub fn current() -> Self {
        let os = std::env::consts::OS;
        let platform_system = match os {
            "linux" => "Linux",
            "macos" => "Darwin",
            "windows" => "Windows",
            "freebsd" => "FreeBSD",
            other => other,
        };
        let sys_platform = match os {
            "macos" => "darwin",
            "windows" => "win32",
            other => other,
        };

        Self::default()
            .with("os_name", if cfg!(windows) { "nt" } else { "posix" })
            .with("sys_platform", sys_platform)
            .with("platform_system", platform_system)
            .with("platform_machine", std::env::consts::ARCH)
            .with("implementation_name", "converge")
            .with("engine_version", env!("CARGO_PKG_VERSION"))
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    fn get(&self, key: &str) -> &str {
        self.values.get(key).map_or("", String::as_str)
    }
}

#[derive(Debug, Clone)]
enum MarkerExpr {
    Compare {
        left: MarkerValue,
        op: String,
        right: MarkerValue,
    },
    And(Box<MarkerExpr>, Box<MarkerExpr>),
    Or(Box<MarkerExpr>, Box<MarkerExpr>),
}

#[derive(Debug, Clone)]
enum MarkerValue {
    Variable(String),
    Literal(String),
}

impl MarkerValue {
    fn resolve<'a>(&'a self, env: &'a MarkerEnvironment) -> &'a str {
        match self {
            Self::Variable(name) => env.get(name),
            Self::Literal(value) => value,
        }
    }
}

/// A parsed environment marker such as `platform_system == "Linux" and extra == "ssh"`.
#[derive(Debug, Clone)]
pub struct Marker {
    raw: String,
    expr: MarkerExpr,
}

impl Marker {
    pub fn evaluate(&self, env: &MarkerEnvironment) -> bool {
        eval_marker(&self.expr, env)
    }
}

fn eval_marker(expr: &MarkerExpr, env: &MarkerEnvironment) -> bool {
    match expr {
        MarkerExpr::And(a, b) => eval_marker(a, env) && eval_marker(b, env),
        MarkerExpr::Or(a, b) => eval_marker(a, env) || eval_marker(b, env),
        MarkerExpr::Compare { left, op, right } => {
            let left = left.resolve(env);
            let right = right.resolve(env);
            match op.as_str() {
                "in" => right.contains(left),
                "not in" => !right.contains(left),
                "===" => left == right,
                _ => compare_marker_values(left, op, right),
            }
        }
    }
}

fn compare_marker_values(left: &str, op: &str, right: &str) -> bool {
    if let (Some(_), Ok(set)) = (parse_version(left), format!("{op}{right}").parse::<SpecifierSet>())
    {
        return set.contains(left);
    }
    match op {
        "==" => left == right,
        "!=" => left != right,
        "<" => left < right,
        "<=" => left <= right,
        ">" => left > right,
        ">=" => left >= right,
        _ => false,
    }
}

struct MarkerParser {
    tokens: Vec<String>,
    pos: usize,
}

impl MarkerParser {
    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Option<String> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<MarkerExpr> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some("or") {
            self.pos += 1;
            expr = MarkerExpr::Or(Box::new(expr), Box::new(self.parse_and()?));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<MarkerExpr> {
        let mut expr = self.parse_atom()?;
        while self.peek() == Some("and") {
            self.pos += 1;
            expr = MarkerExpr::And(Box::new(expr), Box::new(self.parse_atom()?));
        }
        Ok(expr)
    }

    fn parse_atom(&mut self) -> Result<MarkerExpr> {
        if self.peek() == Some("(") {
            self.pos += 1;
            let expr = self.parse_or()?;
            if self.next().as_deref() != Some(")") {
                return Err(Error::config("unbalanced parenthesis in marker"));
            }
            return Ok(expr);
        }

        let left = self.parse_value()?;
        let op = match self.next() {
            Some(op) if op == "not" => {
                if self.next().as_deref() != Some("in") {
                    return Err(Error::config("expected 'in' after 'not' in marker"));
                }
                "not in".to_string()
            }
            Some(op) => op,
            None => return Err(Error::config("incomplete marker comparison")),
        };
        let right = self.parse_value()?;
        Ok(MarkerExpr::Compare { left, op, right })
    }

    fn parse_value(&mut self) -> Result<MarkerValue> {
        let token = self
            .next()
            .ok_or_else(|| Error::config("unexpected end of marker"))?;
        let quoted = (token.starts_with('"') && token.ends_with('"'))
            || (token.starts_with('\'') && token.ends_with('\''));
        if quoted && token.len() >= 2 {
            Ok(MarkerValue::Literal(token[1..token.len() - 1].to_string()))
        } else {
            Ok(MarkerValue::Variable(token))
        }
    }
}

impl FromStr for Marker {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut rest = s.trim();
        while !rest.is_empty() {
            let caps = MARKER_TOKEN_RE
                .captures(rest)
                .filter(|c| c.get(0).is_some_and(|m| m.start() == 0))
                .ok_or_else(|| Error::config(format!("invalid marker: {s}")))?;
            tokens.push(caps[1].to_string());
            rest = rest[caps[0].len()..].trim_start();
        }

        let mut parser = MarkerParser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::config(format!("trailing tokens in marker: {s}")));
        }
        Ok(Self {
            raw: s.trim().to_string(),
            expr,
        })
    }
}

// ============================================================================
// Requirements
// ============================================================================

/// A package requirement: name, requested extras, version constraints, marker.
#[derive(Debug, Clone)]
pub struct Requirement {
    pub name: String,
    pub extras: Vec<String>,
    pub specifier: SpecifierSet,
    pub marker: Option<Marker>,
}

impl Requirement {
    /// Canonical identity used to deduplicate traversal.
    fn key(&self) -> String {
        self.to_string()
    }
}

/// Normalize a distribution name (`Foo_Bar.baz` and `foo-bar-baz` are the same).
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

impl FromStr for Requirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let caps = REQUIREMENT_RE
            .captures(s)
            .ok_or_else(|| Error::config(format!("invalid requirement: {s}")))?;

        let mut extras: Vec<String> = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        extras.sort();

        let specifier = caps
            .get(3)
            .map(|m| m.as_str().parse::<SpecifierSet>())
            .transpose()?
            .unwrap_or_default();
        let marker = caps
            .get(4)
            .map(|m| m.as_str().trim())
            .filter(|m| !m.is_empty())
            .map(str::parse::<Marker>)
            .transpose()?;

        Ok(Self {
            name: normalize_name(&caps[1]),
            extras,
            specifier,
            marker,
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if !self.specifier.is_empty() {
            write!(f, "{}", self.specifier)?;
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {}", marker.raw)?;
        }
        Ok(())
    }
}

/// An installed distribution: its version and declared dependencies.
#[derive(Debug, Clone)]
pub struct Distribution {
    pub name: String,
    pub version: String,
    pub requires: Vec<String>,
}

impl Distribution {
    pub fn new(name: &str, version: &str, requires: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            requires: requires.iter().map(ToString::to_string).collect(),
        }
    }
}

/// The set of installed distributions requirements are resolved against.
pub trait PackageEnvironment: Send + Sync + fmt::Debug {
    /// Look up an installed distribution by (normalized) name
    fn distribution(&self, name: &str) -> Option<Distribution>;

    /// Values used to evaluate dependency markers
    fn marker_environment(&self) -> MarkerEnvironment {
        MarkerEnvironment::current()
    }

    /// Version of the running engine, checked by `REQUIRE_VERSION`
    fn engine_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

/// An environment backed by a fixed table of distributions.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    distributions: HashMap<String, Distribution>,
    markers: Option<MarkerEnvironment>,
    engine_version: Option<String>,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// The engine itself, nothing else.
    pub fn engine() -> Self {
        Self::new().with(Distribution::new(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            &[],
        ))
    }

    pub fn with(mut self, dist: Distribution) -> Self {
        self.distributions.insert(normalize_name(&dist.name), dist);
        self
    }

    pub fn with_markers(mut self, markers: MarkerEnvironment) -> Self {
        self.markers = Some(markers);
        self
    }

    pub fn with_engine_version(mut self, version: &str) -> Self {
        self.engine_version = Some(version.to_string());
        self
    }
}

impl PackageEnvironment for StaticEnvironment {
    fn distribution(&self, name: &str) -> Option<Distribution> {
        self.distributions.get(&normalize_name(name)).cloned()
    }

    fn marker_environment(&self) -> MarkerEnvironment {
        self.markers.clone().unwrap_or_else(MarkerEnvironment::current)
    }

    fn engine_version(&self) -> String {
        self.engine_version
            .clone()
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
    }
}

/// Check that each requirement, and recursively each dependency of the
/// distributions satisfying them, is installed at an acceptable version.
///
/// Returns the requirements that were not satisfied, empty when everything
/// resolved. Every requirement is looked up at most once, so cyclic
/// dependency graphs terminate.
pub fn check_requirements(
    requirements: impl IntoIterator<Item = Requirement>,
    env: &dyn PackageEnvironment,
) -> Vec<Requirement> {
    let mut to_check: BTreeMap<String, Requirement> = requirements
        .into_iter()
        .map(|r| (r.key(), r))
        .collect();
    let mut satisfied: HashSet<String> = HashSet::new();
    let mut not_satisfied: BTreeMap<String, Requirement> = BTreeMap::new();
    let markers = env.marker_environment();

    while let Some((key, req)) = to_check.pop_first() {
        let Some(dist) = env.distribution(&req.name) else {
            log::debug!("requirement {key} not installed");
            not_satisfied.insert(key, req);
            continue;
        };

        if !req.specifier.contains(&dist.version) {
            log::debug!("requirement {key} not met by installed {}", dist.version);
            not_satisfied.insert(key, req);
            continue;
        }

        satisfied.insert(key);

        for dep in &dist.requires {
            let dep: Requirement = match dep.parse() {
                Ok(dep) => dep,
                Err(e) => {
                    log::warn!("ignoring unparseable dependency of {}: {e}", dist.name);
                    continue;
                }
            };
            let dep_key = dep.key();
            if satisfied.contains(&dep_key)
                || not_satisfied.contains_key(&dep_key)
                || to_check.contains_key(&dep_key)
            {
                continue;
            }

            let applies = match &dep.marker {
                None => true,
                Some(marker) if req.extras.is_empty() => marker.evaluate(&markers),
                Some(marker) => req
                    .extras
                    .iter()
                    .any(|extra| marker.evaluate(&markers.clone().with("extra", extra))),
            };
            if applies {
                to_check.insert(dep_key, dep);
            }
        }
    }

    not_satisfied.into_values().collect()
}

/// Fail unless the running engine version satisfies `spec`. Empty is a no-op.
pub fn check_version_requirement(spec: &str, env: &dyn PackageEnvironment) -> Result<()> {
    if spec.trim().is_empty() {
        return Ok(());
    }
    let running = env.engine_version();
    let required: SpecifierSet = spec.parse()?;
    if !required.contains(&running) {
        return Err(Error::config(format!(
            "engine version requirement not met (requires {spec}, running {running})"
        )));
    }
    Ok(())
}

/// Source of `REQUIRE_PACKAGES`: inline requirement strings or a requirements file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageRequirements {
    List(Vec<String>),
    File(String),
}

impl PackageRequirements {
    fn load(&self) -> Result<Vec<String>> {
        match self {
            Self::List(items) => Ok(items.clone()),
            Self::File(path) => {
                let expanded = shellexpand::tilde(path);
                let content = std::fs::read_to_string(Path::new(expanded.as_ref()))?;
                Ok(parse_requirements_file(&content))
            }
        }
    }
}

impl fmt::Display for PackageRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(items) => write!(f, "{}", items.join(", ")),
            Self::File(path) => write!(f, "{path}"),
        }
    }
}

/// Requirement lines of a requirements file, comments and `#egg=` prefixes stripped.
pub fn parse_requirements_file(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.rsplit("#egg=").next().unwrap_or(line))
        .map(|line| line.split(" #").next().unwrap_or(line).trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .map(ToString::to_string)
        .collect()
}

/// Fail naming every unsatisfied requirement.
pub fn check_package_requirements(
    requirements: &PackageRequirements,
    env: &dyn PackageEnvironment,
) -> Result<()> {
    let lines = requirements.load()?;
    if lines.is_empty() {
        return Ok(());
    }
    let parsed = lines
        .iter()
        .map(|line| line.parse::<Requirement>())
        .collect::<Result<Vec<_>>>()?;

    let missing = check_requirements(parsed, env);
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
        return Err(Error::config(format!(
            "deploy requirements ({requirements}) not met: missing {}",
            names.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Environment that counts lookups per name
    #[derive(Debug, Default)]
    struct CountingEnv {
        inner: StaticEnvironment,
        lookups: Mutex<HashMap<String, usize>>,
    }

    impl PackageEnvironment for CountingEnv {
        fn distribution(&self, name: &str) -> Option<Distribution> {
            *self
                .lookups
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default() += 1;
            self.inner.distribution(name)
        }

        fn marker_environment(&self) -> MarkerEnvironment {
            self.inner.marker_environment()
        }
    }

    fn reqs(items: &[&str]) -> Vec<Requirement> {
        items.iter().map(|r| r.parse().unwrap()).collect()
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_version("v3"), Some(Version::new(3, 0, 0)));
        assert_eq!(parse_version("1.0rc1").unwrap().pre.as_str(), "rc.1");
        assert!(parse_version("not-a-version").is_none());
    }

    #[test]
    fn test_specifier_operators() {
        let set: SpecifierSet = ">=1.2, <2".parse().unwrap();
        assert!(set.contains("1.2.0"));
        assert!(set.contains("1.9.9"));
        assert!(!set.contains("2.0"));
        assert!(!set.contains("1.1"));

        let wildcard: SpecifierSet = "==1.4.*".parse().unwrap();
        assert!(wildcard.contains("1.4.7"));
        assert!(!wildcard.contains("1.5.0"));

        let compatible: SpecifierSet = "~=2.2".parse().unwrap();
        assert!(compatible.contains("2.3"));
        assert!(!compatible.contains("3.0"));
        assert!(!compatible.contains("2.1"));

        let excluded: SpecifierSet = "!=1.0".parse().unwrap();
        assert!(!excluded.contains("1.0.0"));
        assert!(excluded.contains("1.0.1"));
    }

    #[test]
    fn test_invalid_specifier_is_configuration_error() {
        let err = "=>1.0".parse::<SpecifierSet>().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!("~=1".parse::<SpecifierSet>().is_err());
    }

    #[test]
    fn test_requirement_parsing() {
        let req: Requirement = "Docker_Compose[ssh,tls] >=1.29, <2 ; platform_system == \"Linux\""
            .parse()
            .unwrap();
        assert_eq!(req.name, "docker-compose");
        assert_eq!(req.extras, vec!["ssh", "tls"]);
        assert!(req.specifier.contains("1.29.2"));
        assert!(req.marker.is_some());
        assert_eq!(
            req.to_string(),
            "docker-compose[ssh,tls]>=1.29,<2; platform_system == \"Linux\""
        );
    }

    #[test]
    fn test_marker_evaluation() {
        let env = MarkerEnvironment::default()
            .with("platform_system", "Linux")
            .with("engine_version", "0.4.0");
        let marker: Marker = "platform_system == 'Linux' and (engine_version >= '0.3' or extra == 'x')"
            .parse()
            .unwrap();
        assert!(marker.evaluate(&env));

        let marker: Marker = "platform_system != \"Linux\"".parse().unwrap();
        assert!(!marker.evaluate(&env));

        let marker: Marker = "'inux' in platform_system".parse().unwrap();
        assert!(marker.evaluate(&env));
    }

    #[test]
    fn test_check_requirements_all_satisfied() {
        let env = StaticEnvironment::new()
            .with(Distribution::new("app", "1.0.0", &["lib>=0.2"]))
            .with(Distribution::new("lib", "0.3.1", &[]));
        assert!(check_requirements(reqs(&["app"]), &env).is_empty());
    }

    #[test]
    fn test_check_requirements_reports_transitive_failures() {
        let env = StaticEnvironment::new()
            .with(Distribution::new("app", "1.0.0", &["lib>=0.5", "missing"]))
            .with(Distribution::new("lib", "0.3.1", &[]));
        let missing: Vec<String> = check_requirements(reqs(&["app"]), &env)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(missing, vec!["lib>=0.5", "missing"]);
    }

    #[test]
    fn test_check_requirements_cycle_terminates_without_rechecking() {
        let env = CountingEnv {
            inner: StaticEnvironment::new()
                .with(Distribution::new("a", "1.0", &["b"]))
                .with(Distribution::new("b", "1.0", &["a"])),
            ..Default::default()
        };
        assert!(check_requirements(reqs(&["a"]), &env).is_empty());

        let lookups = env.lookups.lock().unwrap();
        assert_eq!(lookups.get("a"), Some(&1));
        assert_eq!(lookups.get("b"), Some(&1));
    }

    #[test]
    fn test_markers_gate_dependency_edges() {
        let env = StaticEnvironment::new()
            .with_markers(MarkerEnvironment::default().with("platform_system", "Linux"))
            .with(Distribution::new(
                "app",
                "1.0",
                &[
                    "winonly ; platform_system == 'Windows'",
                    "sshlib ; extra == 'ssh'",
                ],
            ));

        assert!(check_requirements(reqs(&["app"]), &env).is_empty());

        let missing = check_requirements(reqs(&["app[ssh]"]), &env);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "sshlib");
    }

    #[test]
    fn test_version_requirement() {
        let env = StaticEnvironment::engine().with_engine_version("0.4.2");
        assert!(check_version_requirement("", &env).is_ok());
        assert!(check_version_requirement(">=0.4,<1", &env).is_ok());
        let err = check_version_requirement(">=1.0", &env).unwrap_err();
        assert!(err.to_string().contains("requires >=1.0, running 0.4.2"));
    }

    #[test]
    fn test_requirements_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requirements.txt");
        std::fs::write(
            &path,
            "# deploy deps\napp>=1.0\n\ngit+https://example.com/repo.git#egg=lib\n",
        )
        .unwrap();

        let env = StaticEnvironment::new()
            .with(Distribution::new("app", "1.2", &[]))
            .with(Distribution::new("lib", "0.1", &[]));
        let source = PackageRequirements::File(path.to_string_lossy().into_owned());
        assert!(check_package_requirements(&source, &env).is_ok());

        let env = StaticEnvironment::new().with(Distribution::new("app", "0.9", &[]));
        let err = check_package_requirements(&source, &env).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("app>=1.0"));
        assert!(message.contains("lib"));
    }
}
