//! Verification report: per-check verdicts keyed by check name.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Verdict of one integrity check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub success: bool,
    pub details: Value,
    pub errors: Vec<String>,
}

impl CheckResult {
    pub fn pass(details: Value) -> Self {
        Self {
            success: true,
            details,
            errors: Vec::new(),
        }
    }

    /// Success is derived from the error list
    pub fn from_errors(details: Value, errors: Vec<String>) -> Self {
        Self {
            success: errors.is_empty(),
            details,
            errors,
        }
    }

    pub fn fail(details: Value, error: impl Into<String>) -> Self {
        Self {
            success: false,
            details,
            errors: vec![error.into()],
        }
    }
}

/// Outcome of one verification run. Carries no timestamps of its own, so two
/// runs against the same device state compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub success: bool,
    pub checks: BTreeMap<String, CheckResult>,
    /// One line per failed check
    pub errors: Vec<String>,
}

impl VerificationReport {
    pub fn from_checks(checks: BTreeMap<String, CheckResult>) -> Self {
        let errors: Vec<String> = checks
            .iter()
            .filter(|(_, result)| !result.success)
            .map(|(name, result)| match result.errors.first() {
                Some(first) => format!("{} check failed: {}", name, first),
                None => format!("{} check failed", name),
            })
            .collect();
        Self {
            success: errors.is_empty() && !checks.is_empty(),
            checks,
            errors,
        }
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.get(name)
    }

    pub fn passed(&self) -> usize {
        self.checks.values().filter(|c| c.success).count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write pretty JSON to `dir/<file_name>` and return the path.
    pub fn save_json(&self, dir: &Path, file_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name);
        std::fs::write(&path, self.to_json()?)?;
        Ok(path)
    }

    /// Human-readable report
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let verdict = if self.success { "PASSED" } else { "FAILED" };
        let _ = writeln!(out, "Verification {} ({}/{} checks)", verdict, self.passed(), self.checks.len());
        for (name, result) in &self.checks {
            let mark = if result.success { "ok  " } else { "FAIL" };
            let _ = writeln!(out, "  [{}] {}", mark, name);
            if let Value::Object(map) = &result.details {
                for (key, value) in map {
                    let _ = writeln!(out, "         {}: {}", key, summarize(value));
                }
            }
            for error in &result.errors {
                let _ = writeln!(out, "         ! {}", error);
            }
        }
        out
    }
}

// Long arrays and objects are summarized by size.
fn summarize(value: &Value) -> String {
    match value {
        Value::Array(items) if items.len() > 4 => format!("[{} items]", items.len()),
        Value::Object(map) if map.len() > 6 => format!("{{{} entries}}", map.len()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
