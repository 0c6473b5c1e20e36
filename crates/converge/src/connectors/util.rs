//! Shell plumbing shared by the process-backed connectors
//!
//! Every execution connector ends up handing a string to `sh -c` somewhere:
//! locally, over `ssh`, inside `docker exec` or `chroot`. The transports only
//! differ in how that string reaches a shell, which is what [`ShellTransport`]
//! abstracts. Privilege escalation and environment handling are applied once,
//! here, by [`make_unix_command`].

use super::{CommandOptions, CommandOutput};
use crate::error::{Error, Result};
use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Raw result of a transport-level execution.
#[derive(Debug)]
pub struct RawOutput {
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl RawOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0) && !self.timed_out
    }

    pub fn into_output(self) -> CommandOutput {
        CommandOutput::from_bytes(
            self.status.unwrap_or(-1),
            &self.stdout,
            &self.stderr,
            self.timed_out,
        )
    }
}

/// Something that can hand a command string to a POSIX shell on the target.
pub trait ShellTransport: Send + std::fmt::Debug {
    /// Run `command` through `sh -c` on the target, feeding `stdin` if given.
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<RawOutput>;
}

/// Quote a string for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// A command ready to hand to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedCommand {
    pub command: String,
    pub stdin: Option<Vec<u8>>,
}

/// Wrap `command` with environment, shell, `su` and `sudo`/`doas` as configured.
///
/// Layering, innermost first: `export` of `ENV`, `<shell> -c`, `su`, then
/// `sudo` or `doas`. A sudo password is fed on stdin (`sudo -S`).
pub fn make_unix_command(command: &str, options: &CommandOptions) -> PreparedCommand {
    let mut command = command.to_string();

    if !options.env.is_empty() {
        let exports: Vec<String> = options
            .env
            .iter()
            .map(|(k, v)| format!("{k}={}", shell_quote(v)))
            .collect();
        command = format!("export {}; {command}", exports.join(" "));
    }

    command = format!("{} -c {}", options.shell, shell_quote(&command));

    if let Some(user) = &options.su_user {
        let mut su = vec!["su".to_string()];
        if options.use_su_login {
            su.push("-l".to_string());
        }
        if options.preserve_su_env {
            su.push("-m".to_string());
        }
        if let Some(shell) = &options.su_shell {
            su.push(format!("-s {}", shell_quote(shell)));
        }
        su.push(shell_quote(user));
        command = format!("{} -c {}", su.join(" "), shell_quote(&command));
    }

    let mut stdin = None;
    if options.doas {
        let mut doas = vec!["doas -n".to_string()];
        if let Some(user) = &options.doas_user {
            doas.push(format!("-u {}", shell_quote(user)));
        }
        command = format!("{} {command}", doas.join(" "));
    } else if options.sudo {
        let mut sudo = vec!["sudo -H".to_string()];
        match &options.sudo_password {
            Some(password) => {
                sudo.push("-S -p ''".to_string());
                stdin = Some(format!("{password}\n").into_bytes());
            }
            None => sudo.push("-n".to_string()),
        }
        if options.use_sudo_login {
            sudo.push("-i".to_string());
        }
        if options.preserve_sudo_env {
            sudo.push("-E".to_string());
        }
        if let Some(user) = &options.sudo_user {
            sudo.push(format!("-u {}", shell_quote(user)));
        }
        command = format!("{} {command}", sudo.join(" "));
    }

    PreparedCommand { command, stdin }
}

fn timeout_of(options: &CommandOptions) -> Option<Duration> {
    options.timeout.map(Duration::from_secs)
}

/// Run a command through a transport with privilege/env wrapping applied.
pub fn run_with_options<T: ShellTransport + ?Sized>(
    transport: &mut T,
    command: &str,
    options: &CommandOptions,
) -> Result<CommandOutput> {
    let prepared = make_unix_command(command, options);
    log::debug!("running: {}", prepared.command);
    let raw = transport.exec(
        &prepared.command,
        prepared.stdin.as_deref(),
        timeout_of(options),
    )?;
    if raw.timed_out {
        log::warn!("command timed out: {command}");
    }
    Ok(raw.into_output())
}

fn needs_privilege(options: &CommandOptions) -> bool {
    options.sudo || options.doas || options.su_user.is_some()
}

fn temp_path_for(remote_path: &str, options: &CommandOptions) -> String {
    let digest = blake3::hash(remote_path.as_bytes()).to_hex();
    format!(
        "{}/converge-{}",
        options.temp_dir.trim_end_matches('/'),
        &digest.as_str()[..16]
    )
}

/// Upload by streaming `data` into `cat` on the target.
///
/// With privilege escalation the data lands in the temp directory first and
/// is moved into place by a wrapped `mv`.
pub fn put_file_via_shell<T: ShellTransport + ?Sized>(
    transport: &mut T,
    data: &[u8],
    remote_path: &str,
    options: &CommandOptions,
) -> Result<()> {
    let target = if needs_privilege(options) {
        temp_path_for(remote_path, options)
    } else {
        remote_path.to_string()
    };

    let raw = transport.exec(
        &format!("cat > {}", shell_quote(&target)),
        Some(data),
        timeout_of(options),
    )?;
    if !raw.success() {
        return Err(Error::Command {
            host: String::new(),
            command: format!("upload {remote_path}"),
            exit_code: raw.status.unwrap_or(-1),
            stderr: String::from_utf8_lossy(&raw.stderr).trim().to_string(),
        });
    }

    if target != remote_path {
        let mv = format!("mv {} {}", shell_quote(&target), shell_quote(remote_path));
        let output = run_with_options(transport, &mv, options)?;
        if !output.success() {
            return Err(Error::Command {
                host: String::new(),
                command: mv,
                exit_code: output.exit_code,
                stderr: output.stderr.join("\n"),
            });
        }
    }
    Ok(())
}

/// Download by reading the file with a (wrapped) `cat`.
pub fn get_file_via_shell<T: ShellTransport + ?Sized>(
    transport: &mut T,
    remote_path: &str,
    options: &CommandOptions,
) -> Result<Vec<u8>> {
    let prepared = make_unix_command(&format!("cat {}", shell_quote(remote_path)), options);
    let raw = transport.exec(
        &prepared.command,
        prepared.stdin.as_deref(),
        timeout_of(options),
    )?;
    if !raw.success() {
        return Err(Error::Command {
            host: String::new(),
            command: format!("download {remote_path}"),
            exit_code: raw.status.unwrap_or(-1),
            stderr: String::from_utf8_lossy(&raw.stderr).trim().to_string(),
        });
    }
    Ok(raw.stdout)
}

/// Spawn a local process, feed stdin, capture output, enforce a timeout.
///
/// Output is drained on reader threads and stdin is written on its own
/// thread, so a chatty command cannot deadlock on a full pipe. The child
/// leads its own process group; on timeout the whole group is killed and
/// the readers get a short grace period before their output is abandoned.
pub fn run_process(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Option<Duration>,
) -> std::io::Result<RawOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    let mut child = cmd.spawn()?;

    let stdout = spawn_reader(child.stdout.take());
    let stderr = spawn_reader(child.stderr.take());

    if let Some(input) = stdin
        && let Some(mut child_stdin) = child.stdin.take()
    {
        let input = input.to_vec();
        thread::spawn(move || {
            // The child may exit without reading; a broken pipe is not our failure.
            if let Err(e) = child_stdin.write_all(&input) {
                log::debug!("stdin write interrupted: {e}");
            }
        });
    }

    let mut timed_out = false;
    let status: ExitStatus = match timeout {
        Some(limit) => match child.wait_timeout(limit)? {
            Some(status) => status,
            None => {
                timed_out = true;
                kill_process_group(child.id());
                child.kill()?;
                child.wait()?
            }
        },
        None => child.wait()?,
    };

    // Descendants may still hold the pipes after a kill.
    let (stdout, stderr) = if timed_out {
        (
            stdout.recv_timeout(KILL_GRACE).unwrap_or_default(),
            stderr.recv_timeout(KILL_GRACE).unwrap_or_default(),
        )
    } else {
        (
            stdout.recv().unwrap_or_default(),
            stderr.recv().unwrap_or_default(),
        )
    };

    Ok(RawOutput {
        status: status.code(),
        stdout,
        stderr,
        timed_out,
    })
}

const KILL_GRACE: Duration = Duration::from_millis(200);

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone if the output was abandoned.
        let _ = tx.send(read_all(stream));
    });
    rx
}

fn kill_process_group(pid: u32) {
    let group = format!("-{pid}");
    let result = Command::new("kill")
        .args(["-KILL", "--", group.as_str()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        log::debug!("failed to kill process group {pid}: {e}");
    }
}

fn read_all<R: Read>(stream: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream
        && let Err(e) = stream.read_to_end(&mut buf)
    {
        log::debug!("failed reading child output: {e}");
    }
    buf
}

/// A shell on the machine running the engine.
#[derive(Debug, Default, Clone)]
pub struct LocalShell;

impl ShellTransport for LocalShell {
    fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Option<Duration>,
    ) -> Result<RawOutput> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        Ok(run_process(cmd, stdin, timeout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CommandOptions {
        CommandOptions::default()
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain/path-1.txt"), "plain/path-1.txt");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_plain_command_uses_shell() {
        let prepared = make_unix_command("echo hi", &options());
        assert_eq!(prepared.command, "sh -c 'echo hi'");
        assert!(prepared.stdin.is_none());
    }

    #[test]
    fn test_env_is_exported_inside_shell() {
        let mut opts = options();
        opts.env.insert("LANG".into(), "C.UTF-8".into());
        let prepared = make_unix_command("locale", &opts);
        assert_eq!(prepared.command, r"sh -c 'export LANG=C.UTF-8; locale'");
    }

    #[test]
    fn test_sudo_wrapping() {
        let mut opts = options();
        opts.sudo = true;
        opts.sudo_user = Some("postgres".into());
        opts.use_sudo_login = true;
        let prepared = make_unix_command("whoami", &opts);
        assert_eq!(prepared.command, "sudo -H -n -i -u postgres sh -c whoami");
    }

    #[test]
    fn test_sudo_password_goes_to_stdin() {
        let mut opts = options();
        opts.sudo = true;
        opts.sudo_password = Some("hunter2".into());
        let prepared = make_unix_command("id", &opts);
        assert!(prepared.command.starts_with("sudo -H -S -p ''"));
        assert_eq!(prepared.stdin.as_deref(), Some(b"hunter2\n".as_slice()));
    }

    #[test]
    fn test_su_inside_doas() {
        let mut opts = options();
        opts.doas = true;
        opts.su_user = Some("app".into());
        opts.use_su_login = true;
        let prepared = make_unix_command("id", &opts);
        assert_eq!(prepared.command, "doas -n su -l app -c 'sh -c id'");
    }

    #[test]
    fn test_local_shell_runs_and_times_out() {
        let mut shell = LocalShell;
        let raw = shell.exec("echo out; echo err >&2", None, None).unwrap();
        assert!(raw.success());
        let output = raw.into_output();
        assert_eq!(output.stdout, vec!["out"]);
        assert_eq!(output.stderr, vec!["err"]);

        let raw = shell
            .exec("sleep 5", None, Some(Duration::from_millis(100)))
            .unwrap();
        assert!(raw.timed_out);
        assert!(!raw.success());
    }

    #[test]
    fn test_timeout_kills_forked_commands() {
        let mut shell = LocalShell;
        let started = std::time::Instant::now();
        let raw = shell
            .exec("sleep 4; echo done", None, Some(Duration::from_millis(200)))
            .unwrap();
        assert!(raw.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!String::from_utf8_lossy(&raw.stdout).contains("done"));
    }

    #[test]
    fn test_large_stdin_with_chatty_output() {
        let mut shell = LocalShell;
        let input = vec![b'x'; 512 * 1024];
        let raw = shell
            .exec(
                "head -c 262144 /dev/zero; wc -c",
                Some(&input),
                Some(Duration::from_secs(10)),
            )
            .unwrap();
        assert!(raw.success());
        assert!(String::from_utf8_lossy(&raw.stdout).trim_end().ends_with("524288"));
    }

    #[test]
    fn test_put_and_get_via_local_shell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motd");
        let path = path.to_string_lossy();

        let mut shell = LocalShell;
        put_file_via_shell(&mut shell, b"hello\n", &path, &options()).unwrap();
        let data = get_file_via_shell(&mut shell, &path, &options()).unwrap();
        assert_eq!(data, b"hello\n");
    }
}
