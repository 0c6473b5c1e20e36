//! File facts

use super::Fact;
use crate::connectors::util::shell_quote;
use crate::error::{Error, Result};
use serde_json::{Value, json};

fn single_path<'a>(fact: &str, args: &'a [String]) -> Result<&'a str> {
    match args {
        [path] => Ok(path),
        _ => Err(Error::config(format!("{fact} takes exactly one path argument"))),
    }
}

/// Metadata of a path, `null` when it does not exist.
///
/// ```json
/// {"user": "root", "group": "root", "mode": 644, "size": 12, "type": "file"}
/// ```
pub struct File;

impl Fact for File {
    fn name(&self) -> &'static str {
        "File"
    }

    fn command(&self, args: &[String]) -> Result<String> {
        let path = shell_quote(single_path(self.name(), args)?);
        Ok(format!(
            "! test -e {path} || stat -c '%U|%G|%a|%s|%F' {path}"
        ))
    }

    fn process(&self, output: &[String]) -> Option<Value> {
        let line = output.first()?;
        let fields: Vec<&str> = line.trim().splitn(5, '|').collect();
        let [user, group, mode, size, kind] = fields.as_slice() else {
            return None;
        };
        let kind = match *kind {
            "directory" => "directory",
            "symbolic link" => "link",
            k if k.starts_with("regular") => "file",
            other => other,
        };
        Some(json!({
            "user": user,
            "group": group,
            "mode": mode.parse::<u64>().ok(),
            "size": size.parse::<u64>().ok(),
            "type": kind,
        }))
    }
}

/// Hex SHA-256 of a file, `null` when it does not exist.
pub struct Sha256File;

impl Fact for Sha256File {
    fn name(&self) -> &'static str {
        "Sha256File"
    }

    fn command(&self, args: &[String]) -> Result<String> {
        let path = shell_quote(single_path(self.name(), args)?);
        Ok(format!(
            "! test -e {path} || (sha256sum {path} 2>/dev/null || shasum -a 256 {path})"
        ))
    }

    fn process(&self, output: &[String]) -> Option<Value> {
        let digest = output.first()?.split_whitespace().next()?;
        (digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()))
            .then(|| Value::from(digest.to_ascii_lowercase()))
    }
}

/// Lines of a file matching a pattern (extended regex); empty when absent.
pub struct FindInFile;

impl Fact for FindInFile {
    fn name(&self) -> &'static str {
        "FindInFile"
    }

    fn command(&self, args: &[String]) -> Result<String> {
        let [path, pattern] = args else {
            return Err(Error::config("FindInFile takes a path and a pattern"));
        };
        let path = shell_quote(path);
        Ok(format!(
            "! test -e {path} || grep -E -e {} {path} || true",
            shell_quote(pattern)
        ))
    }

    fn process(&self, output: &[String]) -> Option<Value> {
        Some(Value::from(output.to_vec()))
    }

    fn default(&self) -> Option<Value> {
        Some(Value::Array(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_file_command_and_parse() {
        let command = File.command(&["/etc/motd".into()]).unwrap();
        assert_eq!(
            command,
            "! test -e /etc/motd || stat -c '%U|%G|%a|%s|%F' /etc/motd"
        );

        let value = File
            .process(&lines(&["root|wheel|644|12|regular file"]))
            .unwrap();
        assert_eq!(value["user"], "root");
        assert_eq!(value["group"], "wheel");
        assert_eq!(value["mode"], 644);
        assert_eq!(value["size"], 12);
        assert_eq!(value["type"], "file");

        let value = File.process(&lines(&["www|www|755|4096|directory"])).unwrap();
        assert_eq!(value["type"], "directory");
    }

    #[test]
    fn test_missing_file_is_none() {
        assert!(File.process(&[]).is_none());
        assert!(File.default().is_none());
        assert!(File.command(&[]).is_err());
    }

    #[test]
    fn test_sha256_parse() {
        let digest = "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855";
        let value = Sha256File
            .process(&lines(&[&format!("{digest}  /tmp/empty")]))
            .unwrap();
        assert_eq!(value, digest.to_ascii_lowercase());
        assert!(Sha256File.process(&lines(&["not-a-digest file"])).is_none());
    }

    #[test]
    fn test_find_in_file() {
        let command = FindInFile
            .command(&["/etc/hosts".into(), "^127".into()])
            .unwrap();
        assert!(command.contains("grep -E -e '^127' /etc/hosts"));
        assert_eq!(
            FindInFile.process(&lines(&["127.0.0.1 localhost"])).unwrap(),
            serde_json::json!(["127.0.0.1 localhost"])
        );
    }
}
