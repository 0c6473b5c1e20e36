//! Docker operations: containers, images, volumes, networks

use crate::connectors::util::shell_quote;
use crate::error::Result;
use crate::facts::docker::{DockerContainers, DockerNetworks, DockerVolumes, find_named};
use crate::inventory::Host;
use crate::operation::{Command, Operation};
use serde::Serialize;
use serde_json::{Value, json};

fn docker(words: &[&str]) -> Command {
    let rendered: Vec<String> = words.iter().map(|w| shell_quote(w)).collect();
    Command::shell(format!("docker {}", rendered.join(" ")))
}

fn repeated(flag: &str, values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|v| [flag.to_string(), v.clone()])
        .collect()
}

fn words(parts: &[String]) -> Vec<&str> {
    parts.iter().map(String::as_str).collect()
}

/// Desired state of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSpec {
    pub container: String,
    pub image: String,
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub volumes: Vec<String>,
    pub env_vars: Vec<String>,
    pub pull_always: bool,
    /// Whether the container should exist.
    pub present: bool,
    /// Recreate an existing container.
    pub force: bool,
    /// Whether it should be running.
    pub start: bool,
}

impl ContainerSpec {
    pub fn new(container: &str, image: &str) -> Self {
        Self {
            container: container.to_string(),
            image: image.to_string(),
            ports: Vec::new(),
            networks: Vec::new(),
            volumes: Vec::new(),
            env_vars: Vec::new(),
            pull_always: false,
            present: true,
            force: false,
            start: true,
        }
    }

    fn create_commands(&self) -> Vec<Command> {
        let mut parts = vec![
            "container".to_string(),
            "create".to_string(),
            "--name".to_string(),
            self.container.clone(),
        ];
        parts.extend(repeated("-p", &self.ports));
        parts.extend(repeated("-v", &self.volumes));
        parts.extend(repeated("-e", &self.env_vars));
        if self.pull_always {
            parts.extend(["--pull".to_string(), "always".to_string()]);
        }
        parts.push(self.image.clone());

        let mut commands = vec![docker(&words(&parts))];
        for network in &self.networks {
            commands.push(docker(&["network", "connect", network, &self.container]));
        }
        if self.start {
            commands.push(docker(&["container", "start", &self.container]));
        }
        commands
    }
}

/// Converge a container against `DockerContainers`.
pub fn container(host: &Host, spec: &ContainerSpec) -> Result<Operation> {
    let args = serde_json::to_value(spec)?;
    let containers = host.get_fact(&DockerContainers, &[])?;
    let existing = find_named(&containers, &spec.container);
    let running = existing
        .and_then(|c| c.pointer("/State/Status"))
        .and_then(Value::as_str)
        == Some("running");
    let name = spec.container.as_str();

    let mut commands = Vec::new();
    match (existing.is_some(), spec.present) {
        (true, false) => commands.push(docker(&["container", "rm", "-f", name])),
        (false, false) => {}
        (false, true) => commands.extend(spec.create_commands()),
        (true, true) if spec.force => {
            commands.push(docker(&["container", "rm", "-f", name]));
            commands.extend(spec.create_commands());
        }
        (true, true) => {
            if spec.start && !running {
                commands.push(docker(&["container", "start", name]));
            } else if !spec.start && running {
                commands.push(docker(&["container", "stop", name]));
            }
        }
    }
    Ok(Operation::new("docker.container", args, commands))
}

/// Pull or remove an image. Pulling always runs, tags move.
pub fn image(image: &str, present: bool) -> Operation {
    let args = json!({ "image": image, "present": present });
    let command = if present {
        docker(&["image", "pull", image])
    } else {
        docker(&["image", "rm", image])
    };
    Operation::new("docker.image", args, vec![command])
}

/// Desired state of a named volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSpec {
    pub volume: String,
    pub driver: Option<String>,
    pub labels: Vec<String>,
    pub present: bool,
}

impl VolumeSpec {
    pub fn new(volume: &str) -> Self {
        Self {
            volume: volume.to_string(),
            driver: None,
            labels: Vec::new(),
            present: true,
        }
    }
}

pub fn volume(host: &Host, spec: &VolumeSpec) -> Result<Operation> {
    let args = serde_json::to_value(spec)?;
    let volumes = host.get_fact(&DockerVolumes, &[])?;
    let exists = find_named(&volumes, &spec.volume).is_some();

    let commands = match (exists, spec.present) {
        (false, true) => {
            let mut parts = vec!["volume".to_string(), "create".to_string()];
            if let Some(driver) = &spec.driver {
                parts.extend(["--driver".to_string(), driver.clone()]);
            }
            parts.extend(repeated("--label", &spec.labels));
            parts.push(spec.volume.clone());
            vec![docker(&words(&parts))]
        }
        (true, false) => vec![docker(&["volume", "rm", &spec.volume])],
        _ => Vec::new(),
    };
    Ok(Operation::new("docker.volume", args, commands))
}

/// Desired state of a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NetworkSpec {
    pub network: String,
    pub driver: Option<String>,
    pub gateway: Option<String>,
    pub ip_range: Option<String>,
    pub ipam_driver: Option<String>,
    pub subnet: Option<String>,
    pub scope: Option<String>,
    pub opts: Vec<String>,
    pub ipam_opts: Vec<String>,
    pub labels: Vec<String>,
    pub ingress: bool,
    pub attachable: bool,
    pub present: bool,
}

impl NetworkSpec {
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            present: true,
            ..Self::default()
        }
    }

    fn create_command(&self) -> Command {
        let mut parts = vec!["network".to_string(), "create".to_string()];
        let valued = [
            ("--driver", &self.driver),
            ("--gateway", &self.gateway),
            ("--ip-range", &self.ip_range),
            ("--ipam-driver", &self.ipam_driver),
            ("--subnet", &self.subnet),
            ("--scope", &self.scope),
        ];
        for (flag, value) in valued {
            if let Some(value) = value {
                parts.extend([flag.to_string(), value.clone()]);
            }
        }
        parts.extend(repeated("--opt", &self.opts));
        parts.extend(repeated("--ipam-opt", &self.ipam_opts));
        parts.extend(repeated("--label", &self.labels));
        if self.ingress {
            parts.push("--ingress".to_string());
        }
        if self.attachable {
            parts.push("--attachable".to_string());
        }
        parts.push(self.network.clone());
        docker(&words(&parts))
    }
}

pub fn network(host: &Host, spec: &NetworkSpec) -> Result<Operation> {
    let args = serde_json::to_value(spec)?;
    let networks = host.get_fact(&DockerNetworks, &[])?;
    let exists = find_named(&networks, &spec.network).is_some();

    let commands = match (exists, spec.present) {
        (false, true) => vec![spec.create_command()],
        (true, false) => vec![docker(&["network", "rm", &spec.network])],
        _ => Vec::new(),
    };
    Ok(Operation::new("docker.network", args, commands))
}

/// `docker system prune`. Always runs.
pub fn prune(all: bool, volumes: bool, filter: Option<&str>) -> Operation {
    let args = json!({ "all": all, "volumes": volumes, "filter": filter });
    let mut parts = vec!["system", "prune", "-f"];
    if all {
        parts.push("-a");
    }
    if volumes {
        parts.push("--volumes");
    }
    if let Some(filter) = filter {
        parts.extend(["--filter", filter]);
    }
    Operation::new("docker.prune", args, vec![docker(&parts)])
}
