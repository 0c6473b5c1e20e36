//! Docker facts, parsed from `docker ... inspect` JSON

use super::Fact;
use crate::error::Result;
use serde_json::Value;

fn inspect_command(kind: &str) -> String {
    format!("ids=$(docker {kind} ls -q) && [ -n \"$ids\" ] && docker {kind} inspect $ids || true")
}

fn parse_inspect(output: &[String]) -> Option<Value> {
    let joined = output.join("\n");
    if joined.trim().is_empty() {
        return Some(Value::Array(Vec::new()));
    }
    match serde_json::from_str::<Value>(&joined) {
        Ok(value @ Value::Array(_)) => Some(value),
        Ok(_) => None,
        Err(e) => {
            log::warn!("unparseable docker inspect output: {e}");
            None
        }
    }
}

macro_rules! docker_fact {
    ($ty:ident, $name:literal, $command:expr) => {
        pub struct $ty;

        impl Fact for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn command(&self, _args: &[String]) -> Result<String> {
                Ok($command)
            }

            fn requires_command(&self) -> Option<&'static str> {
                Some("docker")
            }

            fn process(&self, output: &[String]) -> Option<Value> {
                parse_inspect(output)
            }

            fn default(&self) -> Option<Value> {
                Some(Value::Array(Vec::new()))
            }
        }
    };
}

docker_fact!(
    DockerContainers,
    "DockerContainers",
    "ids=$(docker container ls -qa) && [ -n \"$ids\" ] && docker container inspect $ids || true"
        .to_string()
);
docker_fact!(DockerImages, "DockerImages", inspect_command("image"));
docker_fact!(DockerVolumes, "DockerVolumes", inspect_command("volume"));
docker_fact!(DockerNetworks, "DockerNetworks", inspect_command("network"));

/// Find an inspected object by its `Name`, ignoring docker's leading `/`.
pub fn find_named<'a>(items: &'a Value, name: &str) -> Option<&'a Value> {
    items.as_array()?.iter().find(|item| {
        item.get("Name")
            .and_then(Value::as_str)
            .is_some_and(|n| n.trim_start_matches('/') == name)
    })
}
