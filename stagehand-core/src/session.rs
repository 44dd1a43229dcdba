//! Session context: everything one invocation shares across phases.
//!
//! Built once at startup and borrowed by each component. Nothing else in
//! the crate holds process-wide state.

use crate::config::Config;
use crate::db::Database;
use crate::device::DeviceLink;
use crate::diagnostics::DeviceDiagnostics;
use crate::directory::CharacterDirectory;
use crate::error::Result;
use crate::inject::RecordInjector;
use crate::provider::ProviderLocator;
use crate::remediation::AutoRemediator;
use crate::timeline::{resolve_offset, TimelineCompiler};
use crate::verify::IntegrityVerifier;
use chrono::{DateTime, FixedOffset, Local};
use std::path::PathBuf;
use uuid::Uuid;

/// Where a session writes its artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub database: PathBuf,
    pub reports: PathBuf,
    pub backups: PathBuf,
    pub exports: PathBuf,
}

impl ArtifactPaths {
    /// The XDG locations
    pub fn from_env() -> Self {
        Self {
            database: Config::database_path(),
            reports: Config::reports_dir(),
            backups: Config::backups_dir(),
            exports: Config::exports_dir(),
        }
    }

    /// Everything under one root (tests, scratch runs)
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            database: root.join("ledger.db"),
            reports: root.join("reports"),
            backups: root.join("backups"),
            exports: root.join("exports"),
        }
    }
}

pub struct SessionContext {
    pub id: Uuid,
    pub started_at: DateTime<Local>,
    pub config: Config,
    pub link: DeviceLink,
    /// Local offset used for waking hours, night windows and display
    pub offset: FixedOffset,
    pub paths: ArtifactPaths,
}

impl SessionContext {
    pub fn new(config: Config, link: DeviceLink, paths: ArtifactPaths) -> Self {
        let offset = resolve_offset(&config.timeline);
        Self {
            id: Uuid::new_v4(),
            started_at: Local::now(),
            config,
            link,
            offset,
            paths,
        }
    }

    /// Session talking to `adb` as configured, writing to the XDG locations
    pub fn from_config(config: Config) -> Self {
        let link = DeviceLink::from_config(&config.device);
        Self::new(config, link, ArtifactPaths::from_env())
    }

    /// `<YYYYmmdd-HHMMSS>-<id8>`, shared by every artifact of this session
    pub fn stamp(&self) -> String {
        let id = self.id.simple().to_string();
        format!("{}-{}", self.started_at.format("%Y%m%d-%H%M%S"), &id[..8])
    }

    pub fn report_file_name(&self) -> String {
        format!("verification-{}.json", self.stamp())
    }

    pub fn shell_package(&self) -> &str {
        &self.config.device.shell_package
    }

    // ============================================
    // Components
    // ============================================

    pub fn locator(&self) -> ProviderLocator<'_> {
        ProviderLocator::new(&self.link)
    }

    pub fn diagnostics(&self) -> DeviceDiagnostics<'_> {
        DeviceDiagnostics::new(&self.link, &self.config.diagnostics, self.shell_package())
    }

    pub fn remediator(&self) -> AutoRemediator<'_> {
        AutoRemediator::new(&self.link, self.shell_package(), self.paths.backups.clone())
    }

    pub fn compiler(&self) -> TimelineCompiler {
        TimelineCompiler::new(&self.config.timeline, self.offset)
    }

    pub fn injector<'a>(&'a self, directory: &'a CharacterDirectory) -> RecordInjector<'a> {
        RecordInjector::new(&self.link, directory, &self.config.injection)
    }

    pub fn verifier(&self) -> IntegrityVerifier<'_> {
        IntegrityVerifier::new(
            &self.link,
            &self.config.verification,
            self.offset,
            self.shell_package(),
        )
    }

    /// Open the ledger and bring its schema up to date
    pub fn open_ledger(&self) -> Result<Database> {
        let db = Database::open(&self.paths.database)?;
        db.migrate()?;
        Ok(db)
    }
}
