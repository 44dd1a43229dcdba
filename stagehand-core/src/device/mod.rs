//! DeviceLink: the only I/O boundary to the attached device.
//!
//! Every other component reaches the device through [`DeviceLink`], which
//! sends commands over a [`DeviceTransport`] and turns exit statuses and
//! error text into typed failures. Nothing here retries; retry policy
//! belongs to callers.

pub mod adb;
pub mod content;

pub use adb::AdbTransport;
pub use content::{BindValue, Binding, ContentQuery, ContentRow};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Markers that mean the device refused the operation
const PERMISSION_MARKERS: &[&str] = &["Permission Denial", "SecurityException", "Permission denied"];

/// Markers that mean the command failed even if it exited 0
const ERROR_MARKERS: &[&str] = &[
    "Exception",
    "Error while accessing provider",
    "Unknown URI",
    "Error:",
];

/// Raw result of one transport invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes one command against the device.
///
/// Implementations return `Ok` for any completed command, whatever its exit
/// status, and `Err(DeviceUnresponsive)` when the deadline passes.
pub trait DeviceTransport: Send + Sync {
    fn execute(&self, args: &[String], timeout: Duration) -> Result<CommandOutput>;

    /// Serial of the targeted device, if pinned
    fn serial(&self) -> Option<&str> {
        None
    }
}

impl<T: DeviceTransport + ?Sized> DeviceTransport for std::sync::Arc<T> {
    fn execute(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        (**self).execute(args, timeout)
    }

    fn serial(&self) -> Option<&str> {
        (**self).serial()
    }
}

/// Typed command execution against one device
pub struct DeviceLink {
    transport: Box<dyn DeviceTransport>,
    timeout: Duration,
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("serial", &self.transport.serial())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DeviceLink {
    pub fn new(transport: impl DeviceTransport + 'static, timeout: Duration) -> Self {
        Self {
            transport: Box::new(transport),
            timeout,
        }
    }

    /// Link over `adb` as configured
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self::new(
            AdbTransport::new(&config.adb_path, config.serial.clone()),
            Duration::from_secs(config.command_timeout_secs),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn serial(&self) -> Option<&str> {
        self.transport.serial()
    }

    // ============================================
    // Raw execution
    // ============================================

    /// Run without interpreting the result. Only transport failures are errors.
    pub fn run_raw(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.transport.execute(&args, timeout)
    }

    /// Run with the default timeout; non-zero exit or error text is an error.
    pub fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        self.run_with_timeout(args, self.timeout)
    }

    pub fn run_with_timeout(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let output = self.run_raw(args, timeout)?;
        classify(&args.join(" "), output)
    }

    // ============================================
    // Shell helpers
    // ============================================

    /// Run a device shell command, returning stdout.
    pub fn shell(&self, command: &str) -> Result<String> {
        Ok(self.run(&["shell", command])?.stdout)
    }

    /// Run a device shell command without error classification.
    pub fn shell_unchecked(&self, command: &str) -> Result<CommandOutput> {
        self.run_raw(&["shell", command], self.timeout)
    }

    pub fn getprop(&self, key: &str) -> Result<String> {
        Ok(self.shell(&format!("getprop {}", key))?.trim().to_string())
    }

    /// All system properties from one `getprop` listing
    pub fn getprops(&self) -> Result<BTreeMap<String, String>> {
        Ok(parse_getprop(&self.shell("getprop")?))
    }

    /// Whether a regular file exists and is visible to the shell user
    pub fn file_exists(&self, path: &str) -> Result<bool> {
        let output = self.shell_unchecked(&format!(
            "test -f {} && echo exists",
            content::shell_quote(path)
        ))?;
        Ok(output.stdout.trim() == "exists")
    }

    // ============================================
    // Content provider
    // ============================================

    pub fn content_query(&self, query: &ContentQuery) -> Result<Vec<ContentRow>> {
        let stdout = self.shell(&query.to_command())?;
        Ok(content::parse_rows(&stdout, &query.projection))
    }

    /// Raw `content query` text, used for backups
    pub fn content_dump(&self, uri: &str) -> Result<String> {
        self.shell(&ContentQuery::new(uri).to_command())
    }

    pub fn content_insert(&self, uri: &str, bindings: &[Binding]) -> Result<()> {
        self.shell(&content::insert_command(uri, bindings))?;
        Ok(())
    }

    /// Copy a local file onto the device
    pub fn push(&self, local: &Path, remote: &str) -> Result<()> {
        let local = local.display().to_string();
        self.run(&["push", &local, remote])?;
        Ok(())
    }
}

/// Turn a completed command into success or a typed failure.
///
/// Query row lines are data, never error text.
pub fn classify(command: &str, output: CommandOutput) -> Result<CommandOutput> {
    let mut in_rows = false;
    let stdout_lines = output.stdout.lines().filter(|line| {
        if content::is_row_line(line) {
            in_rows = true;
        }
        !in_rows
    });
    let lines: Vec<&str> = stdout_lines.chain(output.stderr.lines()).collect();

    if let Some(line) = lines
        .iter()
        .find(|l| PERMISSION_MARKERS.iter().any(|m| l.contains(m)))
    {
        return Err(Error::PermissionDenied {
            command: command.to_string(),
            detail: line.trim().to_string(),
        });
    }

    let marker_line = lines
        .iter()
        .find(|l| ERROR_MARKERS.iter().any(|m| l.contains(m)));

    if !output.success() || marker_line.is_some() {
        let detail = match marker_line {
            Some(line) => line.trim().to_string(),
            None if !output.stderr.trim().is_empty() => output.stderr.trim().to_string(),
            None => output.stdout.trim().to_string(),
        };
        return Err(Error::CommandFailed {
            command: command.to_string(),
            status: output.status,
            stderr: detail,
        });
    }

    Ok(output)
}

/// Parse `[key]: [value]` lines of `getprop` output.
pub fn parse_getprop(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once("]: [")?;
            let key = key.strip_prefix('[')?;
            let value = value.strip_suffix(']')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
