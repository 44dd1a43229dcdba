//! # stagehand-core
//!
//! Core library for stagehand: builds realistic communication records from a
//! cast of characters and writes them into an attached phone's SMS, MMS and
//! call-log providers for forensic training.
//!
//! This library provides:
//! - A device link over `adb` with typed failures
//! - Provider discovery, device diagnostics and automatic remediation
//! - Timeline compilation, record injection and integrity verification
//! - A SQLite ledger of inject runs, configuration and logging
//!
//! ## Flow
//!
//! - **Prepare:** [`ProviderLocator`] and [`DeviceDiagnostics`] run first; their
//!   findings gate [`AutoRemediator`].
//! - **Plan:** [`TimelineCompiler`] turns the [`CharacterDirectory`] into an
//!   ordered event list, independent of any device.
//! - **Write:** [`RecordInjector`] writes each event and reads it back.
//! - **Check:** [`IntegrityVerifier`] re-reads the device and reports.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stagehand_core::{CharacterDirectory, Config, SessionContext};
//!
//! let session = SessionContext::from_config(Config::load().expect("failed to load config"));
//! let bindings = session.locator().locate().expect("device unreachable");
//! let directory = CharacterDirectory::load("cast.json".as_ref()).expect("bad cast");
//! let timeline = session.compiler().compile(&directory, chrono::Utc::now());
//! let batch = session.injector(&directory).inject(&timeline.events, &bindings);
//! let report = session.verifier().verify(&bindings, &batch.results);
//! println!("{}", report.render_text());
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, RunRecord};
pub use device::{AdbTransport, CommandOutput, DeviceLink, DeviceTransport};
pub use diagnostics::{Device, DeviceDiagnostics, Readiness};
pub use directory::CharacterDirectory;
pub use error::{Error, Result};
pub use inject::{InjectionBatch, InjectionResult, RecordInjector};
pub use provider::{ProviderBinding, ProviderBindings, ProviderLocator};
pub use remediation::{AutoRemediator, Remediation, RemediationReport};
pub use session::{ArtifactPaths, SessionContext};
pub use timeline::{Timeline, TimelineCompiler};
pub use types::*;
pub use verify::{IntegrityVerifier, VerificationReport};

// Public modules
pub mod config;
pub mod db;
pub mod device;
pub mod diagnostics;
pub mod directory;
pub mod error;
pub mod export;
pub mod format;
pub mod inject;
pub mod logging;
pub mod provider;
pub mod remediation;
pub mod session;
pub mod timeline;
pub mod types;
pub mod verify;
