//! Server operations: raw shell and in-process callbacks

use crate::error::Result;
use crate::inventory::Host;
use crate::operation::{Command, Operation};
use serde_json::{Value, json};

/// Run shell commands in order. Always reports a change.
pub fn shell<S: AsRef<str>>(commands: &[S]) -> Operation {
    let commands: Vec<String> = commands.iter().map(|c| c.as_ref().to_string()).collect();
    let args = Value::from(commands.clone());
    Operation::new(
        "server.shell",
        args,
        commands.into_iter().map(Command::Shell).collect(),
    )
}

/// Call `callback` when the operation is dispatched.
///
/// The callback sees the host as it is at that point of the deploy, so facts
/// it reads reflect earlier operations. The commands it returns run
/// afterwards; returning none reports no change.
pub fn call<F>(name: &str, callback: F) -> Operation
where
    F: Fn(&Host) -> Result<Vec<Command>> + Send + Sync + 'static,
{
    Operation::deferred("server.call", json!({ "function": name }), callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationBody;

    #[test]
    fn test_shell_commands_in_order() {
        let op = shell(&["apt-get update", "apt-get -y upgrade"]);
        assert_eq!(op.identity(), "server.shell");
        assert_eq!(op.args(), &json!(["apt-get update", "apt-get -y upgrade"]));
        let OperationBody::Commands(commands) = op.body() else {
            panic!("expected commands");
        };
        let rendered: Vec<String> = commands.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["apt-get update", "apt-get -y upgrade"]);
    }

    #[test]
    fn test_call_is_deferred() {
        let op = call("reload", |_| Ok(vec![Command::shell("systemctl reload nginx")]));
        assert!(matches!(op.body(), OperationBody::Deferred(_)));
        assert_eq!(op.args()["function"], "reload");
    }
}
