//! A directory tree on this machine entered with `chroot`

use super::util::{self, LocalShell, RawOutput, ShellTransport, shell_quote};
use super::{
    CommandOptions, CommandOutput, Connector, ConnectorPlugin, InventoryHost, data_str,
    require_argument,
};
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

#[derive(Debug)]
struct ChrootShell {
    directory: String,
}

impl ShellTransport for ChrootShell {
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<RawOutput> {
        let chroot = format!(
            "chroot {} sh -c {}",
            shell_quote(&self.directory),
            shell_quote(command)
        );
        LocalShell.exec(&chroot, stdin, timeout)
    }
}

#[derive(Debug)]
pub struct ChrootConnector {
    shell: ChrootShell,
    connected: bool,
}

impl ChrootConnector {
    pub fn new(directory: impl Into<String>) -> Self {
        Self {
            shell: ChrootShell {
                directory: directory.into(),
            },
            connected: false,
        }
    }
}

impl Connector for ChrootConnector {
    fn name(&self) -> &'static str {
        "chroot"
    }

    fn connect(&mut self, _timeout: Duration) -> Result<()> {
        if self.connected {
            return Ok(());
        }
        if !self.check_can_connect() {
            return Err(Error::connection(
                "",
                format!("chroot directory {} does not exist", self.shell.directory),
            ));
        }
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
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
        Path::new(&self.shell.directory).is_dir()
    }
}

pub(super) struct ChrootPlugin;

impl ConnectorPlugin for ChrootPlugin {
    fn name(&self) -> &'static str {
        "chroot"
    }

    fn handles_execution(&self) -> bool {
        true
    }

    fn make_names_data(&self, argument: Option<&str>) -> Result<Vec<InventoryHost>> {
        let directory = require_argument("chroot", argument)?;
        Ok(vec![
            InventoryHost::new(format!("@chroot/{directory}"), "chroot")
                .with_data("chroot_directory", directory),
        ])
    }

    fn make_connector(
        &self,
        host_name: &str,
        data: &Map<String, Value>,
    ) -> Result<Box<dyn Connector>> {
        let directory = data_str(data, "chroot_directory")
            .ok_or_else(|| Error::config(format!("{host_name}: missing chroot_directory")))?;
        Ok(Box::new(ChrootConnector::new(directory)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_fails_to_connect() {
        let mut connector = ChrootConnector::new("/definitely/not/a/root");
        assert!(!connector.check_can_connect());
        let err = connector.connect(Duration::from_secs(1)).unwrap_err();
        assert!(err.is_connection());
    }

    #[test]
    fn test_existing_directory_connects() {
        let dir = tempfile::tempdir().unwrap();
        let mut connector = ChrootConnector::new(dir.path().to_string_lossy());
        connector.connect(Duration::from_secs(1)).unwrap();
        assert!(connector.is_connected());
    }

    #[test]
    fn test_names_data_carries_directory() {
        let hosts = ChrootPlugin.make_names_data(Some("/srv/image")).unwrap();
        assert_eq!(hosts[0].name, "@chroot//srv/image");
        assert_eq!(hosts[0].data["chroot_directory"], "/srv/image");
    }
}
