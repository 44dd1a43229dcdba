//! Offline review artifacts for a compiled timeline.
//!
//! `plan` writes three files side by side: the raw events as JSON, the call
//! events as CSV, and the SMS/MMS events as JSON. Numbers are resolved the
//! same way the injector resolves them, so the files show what would be
//! written.

use crate::config::InjectionConfig;
use crate::directory::CharacterDirectory;
use crate::error::Result;
use crate::format::format_millis;
use crate::inject::Catalog;
use crate::timeline::Timeline;
use crate::types::{Direction, RecordKind, TimelineEvent};
use chrono::FixedOffset;
use rand::Rng;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const CALL_CSV_HEADER: &str =
    "from_number,to_number,timestamp,call_type,call_result,duration,event_context,location";

/// Paths written by [`export_plan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanExport {
    pub events: PathBuf,
    pub calls: PathBuf,
    pub messages: PathBuf,
}

/// One message as exported for review
#[derive(Debug, Clone, Serialize)]
pub struct MessageExport {
    pub kind: RecordKind,
    pub from: String,
    pub to: String,
    pub from_number: String,
    pub to_number: String,
    pub timestamp: i64,
    pub datetime: String,
    pub direction: Direction,
    pub context: String,
    pub body: String,
    /// Group chat name for group messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

pub struct Exporter<'a> {
    directory: &'a CharacterDirectory,
    config: &'a InjectionConfig,
    catalog: Catalog,
    offset: FixedOffset,
}

impl<'a> Exporter<'a> {
    pub fn new(
        directory: &'a CharacterDirectory,
        config: &'a InjectionConfig,
        offset: FixedOffset,
    ) -> Self {
        Self {
            directory,
            config,
            catalog: Catalog::from_config(config),
            offset,
        }
    }

    fn number(&self, name: &str) -> String {
        self.directory
            .phone_for(name)
            .unwrap_or_else(|| self.config.placeholder_number.clone())
    }

    /// Call events as CSV, header first
    pub fn calls_csv<R: Rng + ?Sized>(&self, events: &[TimelineEvent], rng: &mut R) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", CALL_CSV_HEADER);
        for event in events.iter().filter(|e| e.kind == RecordKind::Call) {
            let (result, duration) = match event.direction {
                Direction::Missed => ("no_answer", 0),
                _ => ("answered", self.catalog.duration(event.context.as_str(), rng)),
            };
            let location = self
                .directory
                .get(&event.sender)
                .and_then(|c| c.location())
                .unwrap_or("");
            let fields = [
                self.number(&event.sender),
                self.number(&event.recipient),
                format_millis(event.timestamp, self.offset),
                event.direction.as_str().to_string(),
                result.to_string(),
                duration.to_string(),
                event.context.to_string(),
                location.to_string(),
            ];
            let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            let _ = writeln!(out, "{}", line.join(","));
        }
        out
    }

    /// SMS and MMS events, bodies filled from templates where dialogue is missing
    pub fn messages<R: Rng + ?Sized>(
        &self,
        events: &[TimelineEvent],
        rng: &mut R,
    ) -> Vec<MessageExport> {
        events
            .iter()
            .filter(|e| e.kind != RecordKind::Call)
            .map(|event| MessageExport {
                kind: event.kind,
                from: event.sender.clone(),
                to: event.recipient.clone(),
                from_number: self.number(&event.sender),
                to_number: self.number(&event.recipient),
                timestamp: event.timestamp,
                datetime: format_millis(event.timestamp, self.offset),
                direction: event.direction,
                context: event.context.to_string(),
                body: match &event.text {
                    Some(text) if !text.is_empty() => text.clone(),
                    _ => self.catalog.body(event.context.as_str(), rng),
                },
                group: event.group.as_ref().map(|g| g.name.clone()),
            })
            .collect()
    }
}

/// Write `<stem>_events.json`, `<stem>_calls.csv` and `<stem>_sms.json` into `dir`.
pub fn export_plan<R: Rng + ?Sized>(
    dir: &Path,
    stem: &str,
    timeline: &Timeline,
    exporter: &Exporter<'_>,
    rng: &mut R,
) -> Result<PlanExport> {
    std::fs::create_dir_all(dir)?;
    let paths = PlanExport {
        events: dir.join(format!("{}_events.json", stem)),
        calls: dir.join(format!("{}_calls.csv", stem)),
        messages: dir.join(format!("{}_sms.json", stem)),
    };

    std::fs::write(&paths.events, serde_json::to_string_pretty(timeline)?)?;
    std::fs::write(&paths.calls, exporter.calls_csv(&timeline.events, rng))?;
    std::fs::write(
        &paths.messages,
        serde_json::to_string_pretty(&exporter.messages(&timeline.events, rng))?,
    )?;

    tracing::info!(dir = %dir.display(), stem, "plan exported");
    Ok(paths)
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
