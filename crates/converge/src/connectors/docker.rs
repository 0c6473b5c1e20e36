//! Docker containers, on this machine (`docker`) or behind ssh (`dockerssh`)
//!
//! `@docker/<image>` starts a throwaway container from the image on connect
//! and commits it to a new image on disconnect. `@docker/<container id>` with
//! `docker_container_id` set in host data attaches to an existing container
//! and leaves it running.

use super::ssh::{SshShell, SshTarget};
use super::util::{self, LocalShell, RawOutput, ShellTransport, shell_quote};
use super::{
    CommandOptions, CommandOutput, Connector, ConnectorPlugin, InventoryHost, data_str,
    require_argument,
};
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Runs commands inside a container through an outer shell.
#[derive(Debug)]
struct ContainerShell<T> {
    outer: T,
    container_id: Option<String>,
}

impl<T: ShellTransport> ShellTransport for ContainerShell<T> {
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<RawOutput> {
        let Some(id) = &self.container_id else {
            return Err(Error::connection("", "container is not running"));
        };
        let docker = format!(
            "docker exec -i {} sh -c {}",
            shell_quote(id),
            shell_quote(command)
        );
        self.outer.exec(&docker, stdin, timeout)
    }
}

/// A container reached through `T` (a local shell or an ssh shell).
pub struct DockerConnector<T> {
    shell: ContainerShell<T>,
    image: String,
    /// Whether this connector started the container (and must clean it up)
    started: bool,
    name: &'static str,
}

impl<T> fmt::Debug for DockerConnector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerConnector")
            .field("connector", &self.name)
            .field("image", &self.image)
            .field("container", &self.shell.container_id)
            .finish()
    }
}

impl<T: ShellTransport> DockerConnector<T> {
    fn new(
        name: &'static str,
        outer: T,
        image: String,
        container_id: Option<String>,
    ) -> Self {
        Self {
            shell: ContainerShell {
                outer,
                container_id,
            },
            image,
            started: false,
            name,
        }
    }

    fn outer_run(&mut self, command: &str) -> Result<CommandOutput> {
        let raw = self.shell.outer.exec(command, None, None)?;
        let output = raw.into_output();
        if !output.success() {
            return Err(Error::connection(
                "",
                format!("{command}: {}", output.stderr.join(" ")),
            ));
        }
        Ok(output)
    }
}

impl<T: ShellTransport> Connector for DockerConnector<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn connect(&mut self, _timeout: Duration) -> Result<()> {
        if self.shell.container_id.is_some() {
            return Ok(());
        }
        let output = self.outer_run(&format!(
            "docker run -d {} tail -f /dev/null",
            shell_quote(&self.image)
        ))?;
        let id = output
            .stdout
            .last()
            .map(|line| line.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::connection("", "docker run printed no container id"))?;
        log::info!("started container {id} from {}", self.image);
        self.shell.container_id = Some(id);
        self.started = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        let Some(id) = self.shell.container_id.take() else {
            return Ok(());
        };
        self.started = false;

        let commit = self.outer_run(&format!("docker commit {}", shell_quote(&id)))?;
        if let Some(image) = commit.stdout.last() {
            log::info!("container {id} committed to image {image}");
        }
        self.outer_run(&format!("docker rm -f {}", shell_quote(&id)))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shell.container_id.is_some()
    }

    fn run_command(&mut self, command: &str, options: &CommandOptions) -> Result<CommandOutput> {
        util::run_with_options(&mut self.shell, command, options)
    }

    fn put_file(&mut self, data: &[u8], remote_path: &str, options: &CommandOptions) -> Result<()> {
        util::put_file_via_shell(&mut self.shell, data, remote_path, options)
    }

    fn get_file(&mut self, remote_path: &str, options: &CommandOptions) -> Result<Vec<u8>> {
        util::get_file_via_shell(&mut self.shell, remote_path, options)
    }

    fn check_can_connect(&self) -> bool {
        !self.image.is_empty() || self.shell.container_id.is_some()
    }
}

/// `docker_container_id` wins; otherwise the identifier is an image to start.
fn image_and_container(identifier: &str, data: &Map<String, Value>) -> (String, Option<String>) {
    let image = data_str(data, "docker_image").unwrap_or(identifier).to_string();
    let container = data_str(data, "docker_container_id").map(str::to_string);
    (image, container)
}

pub(super) struct DockerPlugin;

impl ConnectorPlugin for DockerPlugin {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn handles_execution(&self) -> bool {
        true
    }

    fn make_names_data(&self, argument: Option<&str>) -> Result<Vec<InventoryHost>> {
        let identifier = require_argument("docker", argument)?;
        Ok(vec![
            InventoryHost::new(format!("@docker/{identifier}"), "docker")
                .with_data("docker_identifier", identifier),
        ])
    }

    fn make_connector(
        &self,
        host_name: &str,
        data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        let identifier = data_str(data, "docker_identifier").unwrap_or(host_name);
        let (image, container) = image_and_container(identifier, data);
        Ok(Box::new(DockerConnector::new(
            "docker", LocalShell, image, container,
        )))
    }
}

pub(super) struct DockerSshPlugin;

impl ConnectorPlugin for DockerSshPlugin {
    fn name(&self) -> &'static str {
        "dockerssh"
    }

    fn handles_execution(&self) -> bool {
        true
    }

    /// `@dockerssh/<ssh host>:<image>`
    fn make_names_data(&self, argument: Option<&str>) -> Result<Vec<InventoryHost>> {
        let argument = require_argument("dockerssh", argument)?;
        let (hostname, image) = argument.split_once(':').ok_or_else(|| {
            Error::config(format!(
                "dockerssh expects @dockerssh/<host>:<image>, got {argument}"
            ))
        })?;
        Ok(vec![
            InventoryHost::new(format!("@dockerssh/{argument}"), "dockerssh")
                .with_data("ssh_hostname", hostname)
                .with_data("docker_identifier", image),
        ])
    }

    fn make_connector(
        &self,
        host_name: &str,
        data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        let identifier = data_str(data, "docker_identifier")
            .ok_or_else(|| Error::config(format!("{host_name}: missing docker_identifier")))?;
        let (image, container) = image_and_container(identifier, data);
        let target = SshTarget::from_data(host_name, data)?;
        Ok(Box::new(DockerConnector::new(
            "dockerssh",
            SshShell::new(target),
            image,
            container,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records outer commands and answers `docker run` with a fake id.
    #[derive(Debug, Default)]
    struct RecordingShell {
        commands: Vec<String>,
    }

    impl ShellTransport for RecordingShell {
        fn exec(
            &mut self,
            command: &str,
            _stdin: Option<&[u8]>,
            _timeout: Option<Duration>,
        ) -> Result<RawOutput> {
            self.commands.push(command.to_string());
            let stdout = if command.starts_with("docker run") {
                b"abc123\n".to_vec()
            } else {
                Vec::new()
            };
            Ok(RawOutput {
                status: Some(0),
                stdout,
                stderr: Vec::new(),
                timed_out: false,
            })
        }
    }

    #[test]
    fn test_started_container_lifecycle() {
        let mut connector =
            DockerConnector::new("docker", RecordingShell::default(), "alpine".into(), None);
        assert!(!connector.is_connected());

        connector.connect(Duration::from_secs(1)).unwrap();
        connector.connect(Duration::from_secs(1)).unwrap();
        connector
            .run_command("apk add curl", &CommandOptions::default())
            .unwrap();
        connector.disconnect().unwrap();

        let commands = &connector.shell.outer.commands;
        assert_eq!(commands[0], "docker run -d alpine tail -f /dev/null");
        assert_eq!(commands.len(), 4);
        assert!(commands[1].starts_with("docker exec -i abc123 sh -c "));
        assert!(commands[1].contains("apk add curl"));
        assert_eq!(commands[2], "docker commit abc123");
        assert_eq!(commands[3], "docker rm -f abc123");
        assert!(!connector.is_connected());
    }

    #[test]
    fn test_existing_container_is_left_running() {
        let mut connector = DockerConnector::new(
            "docker",
            RecordingShell::default(),
            "web".into(),
            Some("web".into()),
        );
        connector.connect(Duration::from_secs(1)).unwrap();
        connector.disconnect().unwrap();
        assert!(connector.shell.outer.commands.is_empty());
    }

    #[test]
    fn test_dockerssh_names_data() {
        let hosts = DockerSshPlugin
            .make_names_data(Some("build1:ubuntu"))
            .unwrap();
        assert_eq!(hosts[0].name, "@dockerssh/build1:ubuntu");
        assert_eq!(hosts[0].data["ssh_hostname"], "build1");
        assert_eq!(hosts[0].data["docker_identifier"], "ubuntu");

        assert!(DockerSshPlugin.make_names_data(Some("build1")).is_err());
    }
}
