//! IntegrityVerifier: post-injection checks against live device state.
//!
//! Checks are independent [`IntegrityCheck`] implementations registered with
//! the verifier. Every registered check runs on every call; a check that
//! cannot finish is recorded as failed and the rest carry on.
//!
//! ## Example
//!
//! ```rust,ignore
//! use stagehand_core::verify::IntegrityVerifier;
//!
//! let verifier = IntegrityVerifier::new(&link, &config.verification, offset, "com.android.shell");
//! let report = verifier.verify(&bindings, &batch.results);
//! println!("{}", report.render_text());
//! ```

pub mod checks;
pub mod report;

pub use report::{CheckResult, VerificationReport};

use crate::config::VerificationConfig;
use crate::device::DeviceLink;
use crate::error::{Error, Result};
use crate::inject::InjectionResult;
use crate::provider::ProviderBindings;
use chrono::FixedOffset;
use serde_json::Value;
use std::collections::BTreeMap;

/// Everything a check may read
pub struct CheckContext<'a> {
    pub link: &'a DeviceLink,
    pub bindings: &'a ProviderBindings,
    /// Results of the injection run being verified
    pub injected: &'a [InjectionResult],
    pub config: &'a VerificationConfig,
    /// Offset used for hour-of-day and span formatting
    pub offset: FixedOffset,
    pub shell_package: &'a str,
}

/// One integrity check.
///
/// Checks are read-only and deterministic: the same device state gives the
/// same [`CheckResult`]. Returning `Err` means the check could not complete.
pub trait IntegrityCheck: Send + Sync {
    /// Key of this check in the report
    fn name(&self) -> &'static str;

    fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckResult>;
}

pub struct IntegrityVerifier<'a> {
    link: &'a DeviceLink,
    config: &'a VerificationConfig,
    offset: FixedOffset,
    shell_package: &'a str,
    checks: Vec<Box<dyn IntegrityCheck>>,
}

impl<'a> IntegrityVerifier<'a> {
    /// Verifier with the default suite registered
    pub fn new(
        link: &'a DeviceLink,
        config: &'a VerificationConfig,
        offset: FixedOffset,
        shell_package: &'a str,
    ) -> Self {
        Self::with_checks(link, config, offset, shell_package, default_suite())
    }

    pub fn with_checks(
        link: &'a DeviceLink,
        config: &'a VerificationConfig,
        offset: FixedOffset,
        shell_package: &'a str,
        checks: Vec<Box<dyn IntegrityCheck>>,
    ) -> Self {
        Self {
            link,
            config,
            offset,
            shell_package,
            checks,
        }
    }

    pub fn register(&mut self, check: Box<dyn IntegrityCheck>) {
        tracing::debug!(check = check.name(), "registered integrity check");
        self.checks.push(check);
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Run every check and assemble the report.
    pub fn verify(&self, bindings: &ProviderBindings, injected: &[InjectionResult]) -> VerificationReport {
        let ctx = CheckContext {
            link: self.link,
            bindings,
            injected,
            config: self.config,
            offset: self.offset,
            shell_package: self.shell_package,
        };

        let mut results = BTreeMap::new();
        for check in &self.checks {
            let name = check.name();
            let result = match check.run(&ctx) {
                Ok(result) => result,
                Err(e) => {
                    let error = Error::VerificationCheckFailed {
                        check: name.to_string(),
                        detail: e.to_string(),
                    };
                    CheckResult::fail(Value::Null, error.to_string())
                }
            };
            if result.success {
                tracing::info!(check = name, "integrity check passed");
            } else {
                tracing::warn!(check = name, errors = ?result.errors, "integrity check failed");
            }
            results.insert(name.to_string(), result);
        }

        let report = VerificationReport::from_checks(results);
        tracing::info!(
            success = report.success,
            passed = report.passed(),
            total = report.checks.len(),
            "verification finished"
        );
        report
    }
}

/// The built-in checks, in run order.
pub fn default_suite() -> Vec<Box<dyn IntegrityCheck>> {
    vec![
        Box::new(checks::StructureCheck),
        Box::new(checks::PermissionsCheck),
        Box::new(checks::ContentCheck),
        Box::new(checks::ThreadingCheck),
        Box::new(checks::ChronologyCheck),
        Box::new(checks::DistributionCheck),
        Box::new(checks::InteractionsCheck),
    ]
}
