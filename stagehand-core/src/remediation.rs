//! AutoRemediator: targeted fixes that make a device injectable.
//!
//! A fix counts as applied only when a follow-up probe confirms it. Every fix
//! is attempted and reported on its own; none of them stops the others.

use crate::device::DeviceLink;
use crate::diagnostics::{parse_granted_permissions, Device, DeviceDiagnostics, SelinuxMode};
use crate::error::Result;
use crate::provider::{ProviderBindings, DEFAULT_DATABASE_PATHS};
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Permissions the shell package needs for content-provider writes
pub const REQUIRED_PERMISSIONS: &[&str] = &[
    "android.permission.READ_CALL_LOG",
    "android.permission.WRITE_CALL_LOG",
    "android.permission.READ_SMS",
    "android.permission.WRITE_SMS",
    "android.permission.READ_CONTACTS",
    "android.permission.WRITE_CONTACTS",
];

/// Outcome of one remediation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemediationReport {
    pub fixes_applied: Vec<String>,
    pub failed_fixes: Vec<String>,
    pub warnings: Vec<String>,
    /// Some effects only take hold after the device session restarts
    pub needs_restart: bool,
    /// Files written by the pre-fix backup
    pub backup_files: Vec<PathBuf>,
}

impl RemediationReport {
    fn record(&mut self, label: String, outcome: Result<bool>) {
        match outcome {
            Ok(true) => {
                tracing::info!(fix = %label, "fix applied");
                self.fixes_applied.push(label);
            }
            Ok(false) => {
                tracing::warn!(fix = %label, "fix not confirmed");
                self.failed_fixes.push(label);
            }
            Err(e) => {
                tracing::warn!(fix = %label, error = %e, "fix failed");
                self.failed_fixes.push(label);
            }
        }
    }
}

/// Report plus the device as re-inspected after the fixes
#[derive(Debug, Clone)]
pub struct Remediation {
    pub report: RemediationReport,
    pub device: Device,
}

pub struct AutoRemediator<'a> {
    link: &'a DeviceLink,
    shell_package: &'a str,
    backup_dir: PathBuf,
    backup_attempted: bool,
}

impl<'a> AutoRemediator<'a> {
    pub fn new(link: &'a DeviceLink, shell_package: &'a str, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            link,
            shell_package,
            backup_dir: backup_dir.into(),
            backup_attempted: false,
        }
    }

    /// Apply every relevant fix, then re-run diagnostics.
    ///
    /// `bindings` selects which database files get their modes repaired; the
    /// stock paths are used when nothing is bound.
    pub fn remediate(
        &mut self,
        device: &Device,
        bindings: Option<&ProviderBindings>,
        diagnostics: &DeviceDiagnostics<'_>,
    ) -> Remediation {
        let mut report = RemediationReport::default();

        if !self.backup_attempted {
            self.backup_attempted = true;
            match self.backup() {
                Ok(files) => report.backup_files = files,
                Err(e) => {
                    tracing::error!(error = %e, "backup failed");
                    report.warnings.push(format!("Backup failed: {}", e));
                }
            }
        }

        if device.usb_debugging() == Some(false) {
            report.record("USB debugging enabled".to_string(), self.enable_usb_debugging());
        }

        if device.selinux() == Some(&SelinuxMode::Enforcing) {
            let outcome = self.set_selinux_permissive();
            if matches!(outcome, Ok(true)) {
                report.needs_restart = true;
            }
            report.record("SELinux set to permissive".to_string(), outcome);
        }

        for permission in REQUIRED_PERMISSIONS {
            report.record(
                format!("Permission: {}", permission),
                self.grant_permission(permission),
            );
        }

        let paths: Vec<String> = match bindings {
            Some(b) if !b.database_paths().is_empty() => b.database_paths(),
            _ => DEFAULT_DATABASE_PATHS.iter().map(|p| p.to_string()).collect(),
        };
        for path in &paths {
            report.record(
                format!("Database access: {}", path),
                self.repair_file_mode(path),
            );
        }

        tracing::info!(
            applied = report.fixes_applied.len(),
            failed = report.failed_fixes.len(),
            needs_restart = report.needs_restart,
            "remediation finished"
        );

        Remediation {
            report,
            device: diagnostics.inspect(),
        }
    }

    /// Dump call log and SMS content to local text files
    fn backup(&self) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.backup_dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut written = Vec::new();
        for (suffix, uri) in [("calls", "content://call_log/calls"), ("sms", "content://sms")] {
            let dump = self.link.content_dump(uri)?;
            let path = self
                .backup_dir
                .join(format!("backup_{}_{}.txt", stamp, suffix));
            std::fs::write(&path, dump)?;
            written.push(path);
        }
        tracing::info!(dir = %self.backup_dir.display(), files = written.len(), "backup created");
        Ok(written)
    }

    fn enable_usb_debugging(&self) -> Result<bool> {
        self.link
            .shell("settings put global development_settings_enabled 1")?;
        self.link.shell("settings put global adb_enabled 1")?;
        Ok(self.link.shell("settings get global adb_enabled")?.trim() == "1")
    }

    fn set_selinux_permissive(&self) -> Result<bool> {
        self.link.shell("setenforce 0")?;
        Ok(SelinuxMode::parse(&self.link.shell("getenforce")?) == SelinuxMode::Permissive)
    }

    fn grant_permission(&self, permission: &str) -> Result<bool> {
        self.link
            .shell(&format!("pm grant {} {}", self.shell_package, permission))?;
        let dumpsys = self
            .link
            .shell(&format!("dumpsys package {}", self.shell_package))?;
        Ok(parse_granted_permissions(&dumpsys).contains(permission))
    }

    fn repair_file_mode(&self, path: &str) -> Result<bool> {
        let quoted = crate::device::content::shell_quote(path);
        self.link.shell(&format!("chmod 666 {}", quoted))?;
        let listing = self.link.shell(&format!("ls -l {}", quoted))?;
        Ok(is_world_read_write(&listing))
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }
}

/// Whether an `ls -l` line grants read and write to owner, group and other.
fn is_world_read_write(listing: &str) -> bool {
    let Some(mode) = listing.split_whitespace().next() else {
        return false;
    };
    let bits: Vec<char> = mode.chars().collect();
    bits.len() >= 10
        && [1, 4, 7]
            .iter()
            .all(|&i| bits[i] == 'r' && bits[i + 1] == 'w')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiagnosticsConfig;
    use crate::device::testing::{link, ScriptedTransport};
    use crate::device::CommandOutput;

    #[test]
    fn test_world_read_write() {
        assert!(is_world_read_write(
            "-rw-rw-rw- 1 radio radio 4096 2024-01-01 12:00 mmssms.db"
        ));
        assert!(!is_world_read_write(
            "-rw-rw---- 1 radio radio 4096 2024-01-01 12:00 mmssms.db"
        ));
        assert!(!is_world_read_write(""));
    }

    #[test]
    fn test_unconfirmed_fixes_are_failures() {
        // Grants "succeed" but dumpsys never lists them; chmod is refused.
        let transport = ScriptedTransport::new()
            .on(
                "chmod 666",
                CommandOutput::failed(1, "chmod: Permission denied"),
            )
            .on("getenforce", CommandOutput::ok("Enforcing\n"))
            .on("settings get global adb_enabled", CommandOutput::ok("1\n"));
        let link = link(transport);
        let dir = tempfile::tempdir().unwrap();
        let config = DiagnosticsConfig::default();
        let diagnostics = DeviceDiagnostics::new(&link, &config, "com.android.shell");
        let device = diagnostics.inspect();

        let mut remediator = AutoRemediator::new(&link, "com.android.shell", dir.path());
        let outcome = remediator.remediate(&device, None, &diagnostics);
        let report = outcome.report;

        assert!(report.fixes_applied.is_empty());
        assert!(!report.needs_restart);
        // SELinux + 6 permissions + 2 default database paths
        assert_eq!(report.failed_fixes.len(), 9);
        assert_eq!(report.backup_files.len(), 2);
        assert!(report.backup_files.iter().all(|p| p.exists()));
    }

    #[test]
    fn test_backup_attempted_once() {
        let transport = ScriptedTransport::new().on(
            "content query --uri content://call_log/calls",
            CommandOutput::failed(255, "error: closed"),
        );
        let link = link(transport);
        let dir = tempfile::tempdir().unwrap();
        let config = DiagnosticsConfig::default();
        let diagnostics = DeviceDiagnostics::new(&link, &config, "com.android.shell");
        let device = diagnostics.inspect();

        let mut remediator = AutoRemediator::new(&link, "com.android.shell", dir.path());
        let first = remediator.remediate(&device, None, &diagnostics).report;
        assert_eq!(first.warnings.len(), 1);
        assert!(first.warnings[0].starts_with("Backup failed"));

        let second = remediator.remediate(&device, None, &diagnostics).report;
        assert!(second.warnings.is_empty());
    }
}
