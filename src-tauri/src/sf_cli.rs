use std::fs;
use std::path::{Path, PathBuf};
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

pub(crate) const SF_BIN_ENV: &str = "ORG_LIST_SF_BIN";
const COMMAND_TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const KILLED_PIPE_GRACE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && self.error.is_none()
    }

    fn spawn_failure(error: String) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error),
        }
    }
}

/// Something that can run `sf` subcommands. The desktop app uses [`SfCli`];
/// tests substitute a recorder that replays canned output.
pub trait OrgCli: Send + Sync {
    fn run(&self, args: &[String]) -> CommandResult;

    fn describe(&self) -> String;
}

pub struct SfCli {
    binary: PathBuf,
    cwd: PathBuf,
    timeout: Duration,
}

impl SfCli {
    pub fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self {
            binary,
            cwd: command_cwd(),
            timeout,
        }
    }
}

impl OrgCli for SfCli {
    fn run(&self, args: &[String]) -> CommandResult {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .current_dir(&self.cwd)
            .env("SF_AUTOUPDATE_DISABLE", "true")
            .env("SF_USE_PROGRESS_BAR", "false");

        let rendered = format!("{} {}", self.binary.display(), args.join(" "));
        tracing::debug!(command = %rendered, "running sf command");

        run_command_with_timeout(
            command,
            self.timeout,
            format!("Failed to execute {}", self.binary.display()),
            rendered,
        )
    }

    fn describe(&self) -> String {
        self.binary.display().to_string()
    }
}

fn command_cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
}

/// Reads a pipe to the end on its own thread. Draining while the child runs
/// keeps it from stalling on a full pipe buffer.
fn drain_pipe<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(error) = pipe.read_to_end(&mut buffer) {
                tracing::debug!(%error, "pipe read ended early");
            }
        }
        let _ = sender.send(buffer);
    });
    receiver
}

/// `grace` bounds the wait after a kill: a grandchild may still hold the
/// pipe open.
fn collect_pipe(receiver: &Receiver<Vec<u8>>, grace: Option<Duration>) -> String {
    let bytes = match grace {
        Some(grace) => receiver.recv_timeout(grace).unwrap_or_default(),
        None => receiver.recv().unwrap_or_default(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

enum ChildExit {
    Exited(ExitStatus),
    TimedOut,
    WaitFailed(std::io::Error),
}

fn wait_until(child: &mut Child, deadline: Instant) -> ChildExit {
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return ChildExit::Exited(status),
            Ok(None) if Instant::now() < deadline => thread::sleep(COMMAND_TIMEOUT_POLL_INTERVAL),
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return ChildExit::TimedOut;
            }
            Err(error) => {
                let _ = child.kill();
                let _ = child.wait();
                return ChildExit::WaitFailed(error);
            }
        }
    }
}

pub(crate) fn run_command_with_timeout(
    mut command: Command,
    timeout: Duration,
    spawn_error_context: String,
    timeout_context: String,
) -> CommandResult {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => {
            return CommandResult::spawn_failure(format!("{spawn_error_context}: {error}"));
        }
    };

    let stdout = drain_pipe(child.stdout.take());
    let stderr = drain_pipe(child.stderr.take());

    let (exit_code, error, grace) = match wait_until(&mut child, Instant::now() + timeout) {
        ChildExit::Exited(status) => (status.code(), None, None),
        ChildExit::TimedOut => (
            None,
            Some(format!(
                "Command {timeout_context} timed out after {} seconds and was terminated.",
                timeout.as_secs()
            )),
            Some(KILLED_PIPE_GRACE),
        ),
        ChildExit::WaitFailed(error) => (
            None,
            Some(format!("Failed while waiting for {timeout_context}: {error}")),
            Some(KILLED_PIPE_GRACE),
        ),
    };

    CommandResult {
        exit_code,
        stdout: collect_pipe(&stdout, grace),
        stderr: collect_pipe(&stderr, grace),
        error,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfBinaryResolution {
    pub path: PathBuf,
    pub source: String,
}

fn default_sf_binary_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "sf.cmd"
    } else {
        "sf"
    }
}

pub(crate) fn configured_sf_bin_path() -> Option<String> {
    std::env::var(SF_BIN_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Environment override wins over the settings file, which wins over `PATH`.
pub(crate) fn resolve_sf_binary(
    from_env: Option<&str>,
    from_settings: Option<&str>,
) -> SfBinaryResolution {
    if let Some(path) = from_env.map(str::trim).filter(|value| !value.is_empty()) {
        return SfBinaryResolution {
            path: PathBuf::from(path),
            source: "env".to_string(),
        };
    }

    if let Some(path) = from_settings.map(str::trim).filter(|value| !value.is_empty()) {
        return SfBinaryResolution {
            path: PathBuf::from(path),
            source: "settings".to_string(),
        };
    }

    SfBinaryResolution {
        path: PathBuf::from(default_sf_binary_name()),
        source: "path".to_string(),
    }
}

#[cfg(unix)]
fn has_execute_bit(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;

    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_execute_bit(_metadata: &fs::Metadata) -> bool {
    true
}

pub(crate) fn is_executable_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && has_execute_bit(&metadata))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SfBinaryStatus {
    pub effective_binary_path: String,
    pub effective_binary_source: String,
    pub has_issue: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A binary found through `PATH` is only checked by actually running it, so
/// explicit paths are the only ones that can be flagged up front.
pub(crate) fn evaluate_sf_binary_status(resolution: &SfBinaryResolution) -> SfBinaryStatus {
    let explicit = resolution.source != "path";
    let issue = if explicit && !is_executable_file(&resolution.path) {
        Some(format!(
            "The sf binary configured via {} ({}) is not an executable file.",
            resolution.source,
            resolution.path.display()
        ))
    } else {
        None
    };

    SfBinaryStatus {
        effective_binary_path: resolution.path.display().to_string(),
        effective_binary_source: resolution.source.clone(),
        has_issue: issue.is_some(),
        issue,
        version: None,
    }
}

pub(crate) fn first_non_empty_line(value: &str) -> Option<String> {
    value
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(ToOwned::to_owned)
}

/// `sf --json` reports failures as `{"status":1,"name":..,"message":..}` on
/// stdout; prefer that message over stderr noise.
pub(crate) fn cli_error_message(result: &CommandResult, fallback: &str) -> String {
    let json_message = serde_json::from_str::<serde_json::Value>(result.stdout.trim())
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|message| message.as_str())
                .map(str::trim)
                .filter(|message| !message.is_empty())
                .map(ToOwned::to_owned)
        });

    json_message
        .or_else(|| result.error.clone())
        .or_else(|| first_non_empty_line(&result.stderr))
        .unwrap_or_else(|| fallback.to_string())
}

pub(crate) fn cli_version(cli: &dyn OrgCli) -> Result<String, String> {
    let result = cli.run(&["--version".to_string()]);
    if !result.succeeded() {
        return Err(cli_error_message(&result, "sf --version failed."));
    }

    first_non_empty_line(&result.stdout).ok_or_else(|| "sf --version printed nothing.".to_string())
}
