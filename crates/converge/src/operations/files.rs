//! File operations

use crate::connectors::util::shell_quote;
use crate::error::{Error, Result};
use crate::facts::files::{File, FindInFile, Sha256File};
use crate::inventory::Host;
use crate::operation::{Command, Operation};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

/// Upload `content` to `dest` unless the remote file already has the same digest.
pub fn put_content(host: &Host, dest: &str, content: impl AsRef<[u8]>) -> Result<Operation> {
    let content = content.as_ref();
    let digest = hex::encode(Sha256::digest(content));
    let args = json!({ "dest": dest, "sha256": digest });

    let remote = host.get_fact(&Sha256File, &[dest])?;
    if remote.as_str() == Some(digest.as_str()) {
        log::debug!("{}: {dest} is up to date", host.name());
        return Ok(Operation::noop("files.put", args));
    }

    Ok(Operation::new(
        "files.put",
        args,
        vec![Command::PutFile {
            data: content.to_vec(),
            dest: dest.to_string(),
        }],
    ))
}

/// Ensure `path` contains `line` exactly, appending it otherwise.
pub fn line(host: &Host, path: &str, line: &str) -> Result<Operation> {
    if line.contains('\n') {
        return Err(Error::config("files.line takes a single line"));
    }
    let args = json!({ "path": path, "line": line });
    let pattern = format!("^{}$", regex::escape(line));
    let matches = host.get_fact(&FindInFile, &[path, &pattern])?;

    if matches.as_array().is_some_and(|m| !m.is_empty()) {
        return Ok(Operation::noop("files.line", args));
    }

    Ok(Operation::new(
        "files.line",
        args,
        vec![Command::shell(format!(
            "echo {} >> {}",
            shell_quote(line),
            shell_quote(path)
        ))],
    ))
}

/// Ensure a regular file exists at `path`, or that nothing does.
pub fn file(host: &Host, path: &str, present: bool) -> Result<Operation> {
    let args = json!({ "path": path, "present": present });
    let info = host.get_fact(&File, &[path])?;
    let kind = info.get("type").and_then(Value::as_str);

    let commands = match (present, kind) {
        (true, None) => vec![Command::shell(format!("touch {}", shell_quote(path)))],
        (true, Some("file")) | (false, None) => Vec::new(),
        (true, Some(other)) => {
            return Err(Error::config(format!(
                "{}: {path} exists and is a {other}, not a file",
                host.name()
            )));
        }
        (false, Some(_)) => vec![Command::shell(format!("rm -f {}", shell_quote(path)))],
    };
    Ok(Operation::new("files.file", args, commands))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::connectors::CommandOutput;
    use crate::connectors::mock::{MockBackend, default_response};
    use crate::inventory::Inventory;
    use crate::operation::OperationBody;
    use serde_json::Map;
    use std::sync::Arc;

    fn host_inventory(backend: &Arc<MockBackend>) -> Inventory {
        Inventory::builder()
            .host("@mock/web", Map::new())
            .build(&backend.registry(), &Config::default())
            .unwrap()
    }

    fn commands(op: &Operation) -> Vec<String> {
        match op.body() {
            OperationBody::Commands(c) => c.iter().map(ToString::to_string).collect(),
            OperationBody::Deferred(_) => panic!("expected commands"),
        }
    }

    #[test]
    fn test_put_content_skips_matching_digest() {
        // sha256("hello")
        let digest = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let backend = Arc::new(MockBackend::new().with_responder(move |host, cmd, files| {
            if cmd.contains("sha256sum /etc/motd") {
                CommandOutput::ok([format!("{digest}  /etc/motd")])
            } else {
                default_response(host, cmd, files)
            }
        }));
        let inventory = host_inventory(&backend);
        let host = inventory.get_host("web").unwrap();

        let op = put_content(host, "/etc/motd", "hello").unwrap();
        assert!(commands(&op).is_empty());
        assert_eq!(op.args()["sha256"], digest);

        let op = put_content(host, "/etc/motd", "hello, world").unwrap();
        assert_eq!(commands(&op), vec!["upload /etc/motd"]);
    }

    #[test]
    fn test_line_appends_when_missing() {
        let backend = Arc::new(MockBackend::new().with_responder(|host, cmd, files| {
            if cmd.contains("grep -E") && cmd.contains("/etc/present") {
                CommandOutput::ok(["PermitRootLogin no"])
            } else {
                default_response(host, cmd, files)
            }
        }));
        let inventory = host_inventory(&backend);
        let host = inventory.get_host("web").unwrap();

        let op = line(host, "/etc/present", "PermitRootLogin no").unwrap();
        assert!(commands(&op).is_empty());

        let op = line(host, "/etc/absent", "PermitRootLogin no").unwrap();
        assert_eq!(
            commands(&op),
            vec!["echo 'PermitRootLogin no' >> /etc/absent"]
        );

        assert!(line(host, "/etc/absent", "a\nb").is_err());
    }

    #[test]
    fn test_file_present_and_absent() {
        let backend = Arc::new(MockBackend::new().with_responder(|host, cmd, files| {
            if cmd.contains("stat -c") && cmd.ends_with("/srv") {
                CommandOutput::ok(["root|root|755|4096|directory"])
            } else if cmd.contains("stat -c") && cmd.ends_with("/srv/app.conf") {
                CommandOutput::ok(["root|root|644|10|regular file"])
            } else {
                default_response(host, cmd, files)
            }
        }));
        let inventory = host_inventory(&backend);
        let host = inventory.get_host("web").unwrap();

        assert_eq!(commands(&file(host, "/srv/new", true).unwrap()), vec!["touch /srv/new"]);
        assert!(commands(&file(host, "/srv/new", false).unwrap()).is_empty());
        assert!(commands(&file(host, "/srv/app.conf", true).unwrap()).is_empty());
        assert_eq!(
            commands(&file(host, "/srv/app.conf", false).unwrap()),
            vec!["rm -f /srv/app.conf"]
        );
        let err = file(host, "/srv", true).unwrap_err();
        assert!(err.to_string().contains("directory"));
    }
}
