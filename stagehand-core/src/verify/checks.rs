//! Built-in integrity checks.
//!
//! Every check reads live device state through the [`DeviceLink`] and never
//! writes. Message checks look at the SMS provider, which is where the
//! device keeps thread ids and delivery dates for text traffic.

use super::report::CheckResult;
use super::{CheckContext, IntegrityCheck};
use crate::device::{ContentQuery, ContentRow};
use crate::diagnostics::parse_granted_permissions;
use crate::error::Result;
use crate::format::format_millis;
use crate::remediation::REQUIRED_PERMISSIONS;
use crate::types::RecordKind;
use chrono::{TimeZone, Timelike, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// URI listing every conversation thread
pub const CONVERSATIONS_URI: &str = "content://mms-sms/conversations?simple=true";
/// URI of MMS parts across all messages
pub const MMS_PART_URI: &str = "content://mms/part";

const DAY_MILLIS: i64 = 86_400_000;

/// SMS `type` values for received and sent messages
const SMS_INBOX: i64 = 1;
const SMS_SENT: i64 = 2;

/// Characters that mark a body as mangled in transit
const CORRUPTION_MARKERS: &[char] = &['\0', '\u{FFFD}', '\u{00FF}'];

fn sms_uri<'c>(ctx: &'c CheckContext<'_>) -> Result<&'c str> {
    Ok(ctx.bindings.get(RecordKind::Sms)?.uri.as_str())
}

fn dates(rows: &[ContentRow]) -> Vec<i64> {
    rows.iter().filter_map(|row| row.get_i64("date")).collect()
}

// ============================================
// structure
// ============================================

/// Every URI the bound providers rely on answers a one-row probe.
pub struct StructureCheck;

impl IntegrityCheck for StructureCheck {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckResult> {
        if ctx.bindings.is_empty() {
            return Ok(CheckResult::fail(
                json!({ "uris": {} }),
                "no providers are bound on this device",
            ));
        }

        let mut uris: Vec<String> = ctx.bindings.iter().map(|b| b.uri.clone()).collect();
        if ctx.bindings.is_bound(RecordKind::Mms) {
            uris.push(MMS_PART_URI.to_string());
        }
        if ctx.bindings.is_bound(RecordKind::Sms) || ctx.bindings.is_bound(RecordKind::Mms) {
            uris.push(CONVERSATIONS_URI.to_string());
        }

        let mut resolved = Map::new();
        let mut errors = Vec::new();
        for uri in uris {
            let probe = ContentQuery::new(uri.as_str()).projection(&["_id"]).limit(1);
            match ctx.link.content_query(&probe) {
                Ok(_) => {
                    resolved.insert(uri, Value::Bool(true));
                }
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    errors.push(format!("{} does not resolve: {}", uri, e));
                    resolved.insert(uri, Value::Bool(false));
                }
            }
        }
        Ok(CheckResult::from_errors(json!({ "uris": resolved }), errors))
    }
}

// ============================================
// permissions
// ============================================

/// The remediated permission set is still granted to the shell package.
pub struct PermissionsCheck;

impl IntegrityCheck for PermissionsCheck {
    fn name(&self) -> &'static str {
        "permissions"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckResult> {
        let dumpsys = ctx
            .link
            .shell(&format!("dumpsys package {}", ctx.shell_package))?;
        let granted = parse_granted_permissions(&dumpsys);

        let mut status = Map::new();
        let mut errors = Vec::new();
        for permission in REQUIRED_PERMISSIONS {
            let ok = granted.contains(*permission);
            if !ok {
                errors.push(format!("{} is not granted", permission));
            }
            status.insert(permission.to_string(), Value::Bool(ok));
        }
        Ok(CheckResult::from_errors(json!({ "granted": status }), errors))
    }
}

// ============================================
// content
// ============================================

/// Samples the most recent messages for null or corrupted bodies and
/// invalid types, and confirms verified injections read back unchanged.
pub struct ContentCheck;

impl IntegrityCheck for ContentCheck {
    fn name(&self) -> &'static str {
        "content"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckResult> {
        let uri = sms_uri(ctx)?;
        let rows = ctx.link.content_query(
            &ContentQuery::new(uri)
                .projection(&["_id", "address", "date", "body", "type"])
                .sort("date DESC")
                .limit(ctx.config.sample_size),
        )?;

        let mut errors = Vec::new();
        let mut corrupted = Vec::new();
        for row in &rows {
            let id = row.get("_id").unwrap_or("?");
            let problem = match row.get("body") {
                None => Some("null body"),
                Some(body) if body.contains(CORRUPTION_MARKERS) => Some("corrupted body"),
                Some(_) => match row.get_i64("type") {
                    Some(1..=6) => None,
                    _ => Some("invalid message type"),
                },
            };
            if let Some(problem) = problem {
                corrupted.push(json!(id));
                errors.push(format!("message {}: {}", id, problem));
            }
        }

        let sampled = rows.len();
        let valid = sampled - corrupted.len();
        let missing = round_trip_misses(ctx, &rows);
        for miss in &missing {
            errors.push(format!("injected message not found on read-back: {}", miss));
        }

        let details = json!({
            "sampled": sampled,
            "valid": valid,
            "corrupted": corrupted,
            "valid_ratio": if sampled == 0 { Value::Null } else { json!(valid as f64 / sampled as f64) },
            "round_trip_missing": missing.len(),
        });
        Ok(CheckResult::from_errors(details, errors))
    }
}

/// Verified SMS injections inside the sampled window that the sample lacks.
///
/// A full sample covers dates strictly newer than its oldest row; a short
/// sample covers everything.
fn round_trip_misses(ctx: &CheckContext<'_>, rows: &[ContentRow]) -> Vec<String> {
    let present: BTreeSet<(&str, i64)> = rows
        .iter()
        .filter_map(|row| Some((row.get("address")?, row.get_i64("date")?)))
        .collect();
    let oldest = dates(rows).into_iter().min();
    let full = rows.len() >= ctx.config.sample_size;

    ctx.injected
        .iter()
        .filter(|r| r.kind == RecordKind::Sms && r.verified)
        .filter(|r| match (full, oldest) {
            (false, _) => true,
            (true, Some(oldest)) => r.timestamp > oldest,
            (true, None) => false,
        })
        .filter(|r| !present.contains(&(r.address.as_str(), r.timestamp)))
        .map(|r| format!("{} at {}", r.address, r.timestamp))
        .collect()
}

// ============================================
// threading
// ============================================

/// Every message's thread id names a known conversation.
pub struct ThreadingCheck;

impl IntegrityCheck for ThreadingCheck {
    fn name(&self) -> &'static str {
        "threading"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckResult> {
        let uri = sms_uri(ctx)?;
        let threads: BTreeSet<i64> = ctx
            .link
            .content_query(&ContentQuery::new(CONVERSATIONS_URI).projection(&["_id"]))?
            .iter()
            .filter_map(|row| row.get_i64("_id"))
            .collect();
        let messages = ctx
            .link
            .content_query(&ContentQuery::new(uri).projection(&["_id", "thread_id"]))?;

        let mut orphaned = Vec::new();
        let mut errors = Vec::new();
        for row in &messages {
            let id = row.get("_id").unwrap_or("?");
            match row.get_i64("thread_id") {
                Some(thread) if threads.contains(&thread) => {}
                Some(thread) => {
                    orphaned.push(json!(id));
                    errors.push(format!("message {} references unknown thread {}", id, thread));
                }
                None => {
                    orphaned.push(json!(id));
                    errors.push(format!("message {} has no thread", id));
                }
            }
        }

        let details = json!({
            "threads": threads.len(),
            "messages": messages.len(),
            "orphaned": orphaned,
        });
        Ok(CheckResult::from_errors(details, errors))
    }
}

// ============================================
// chronology
// ============================================

/// Dates read in stored (`_id`) order never go backwards.
pub struct ChronologyCheck;

impl IntegrityCheck for ChronologyCheck {
    fn name(&self) -> &'static str {
        "chronology"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckResult> {
        let uri = sms_uri(ctx)?;
        let rows = ctx.link.content_query(
            &ContentQuery::new(uri)
                .projection(&["_id", "date"])
                .sort("_id ASC"),
        )?;

        let mut errors = Vec::new();
        let mut gaps = Vec::new();
        let mut previous: Option<(&str, i64)> = None;
        for row in &rows {
            let (Some(id), Some(date)) = (row.get("_id"), row.get_i64("date")) else {
                continue;
            };
            if let Some((prev_id, prev_date)) = previous {
                if date < prev_date {
                    errors.push(format!(
                        "message {} is dated before message {} stored ahead of it",
                        id, prev_id
                    ));
                } else if date - prev_date > DAY_MILLIS {
                    gaps.push(json!({
                        "start": format_millis(prev_date, ctx.offset),
                        "end": format_millis(date, ctx.offset),
                        "hours": (date - prev_date) / 3_600_000,
                    }));
                }
            }
            previous = Some((id, date));
        }

        let all = dates(&rows);
        let span = match (all.iter().min(), all.iter().max()) {
            (Some(start), Some(end)) => json!({
                "start": format_millis(*start, ctx.offset),
                "end": format_millis(*end, ctx.offset),
            }),
            _ => Value::Null,
        };
        let details = json!({
            "message_count": rows.len(),
            "time_span": span,
            "gaps": gaps,
        });
        Ok(CheckResult::from_errors(details, errors))
    }
}

// ============================================
// distribution
// ============================================

/// The share of messages sent during the night window stays below the
/// configured threshold.
pub struct DistributionCheck;

impl IntegrityCheck for DistributionCheck {
    fn name(&self) -> &'static str {
        "distribution"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckResult> {
        let uri = sms_uri(ctx)?;
        let rows = ctx
            .link
            .content_query(&ContentQuery::new(uri).projection(&["date"]))?;

        let mut histogram = [0usize; 24];
        for millis in dates(&rows) {
            if let Some(ts) = Utc.timestamp_millis_opt(millis).single() {
                histogram[ts.with_timezone(&ctx.offset).hour() as usize] += 1;
            }
        }
        let total: usize = histogram.iter().sum();
        let end = (ctx.config.night_end_hour as usize).min(24);
        let start = (ctx.config.night_start_hour as usize).min(end);
        let night: usize = histogram[start..end].iter().sum();

        let mut buckets = Map::new();
        for (hour, count) in histogram.iter().enumerate() {
            buckets.insert(format!("{:02}", hour), json!(count));
        }
        let ratio = if total == 0 {
            None
        } else {
            Some(night as f64 / total as f64)
        };
        let details = json!({
            "total": total,
            "night_messages": night,
            "night_percentage": ratio.map(|r| r * 100.0),
            "hourly": buckets,
        });

        let result = match ratio {
            None => CheckResult::fail(details, "no messages to analyze"),
            Some(r) if r >= ctx.config.night_ratio_threshold => CheckResult::fail(
                details,
                format!(
                    "{:.1}% of messages fall between {:02}:00 and {:02}:00 (limit {:.1}%)",
                    r * 100.0,
                    ctx.config.night_start_hour,
                    ctx.config.night_end_hour,
                    ctx.config.night_ratio_threshold * 100.0
                ),
            ),
            Some(_) => CheckResult::pass(details),
        };
        Ok(result)
    }
}

// ============================================
// interactions
// ============================================

/// Every injected SMS contact has traffic in both directions.
///
/// Contacts with fewer than `interaction_min_messages` rows on the device
/// are listed but not judged.
pub struct InteractionsCheck;

#[derive(Default)]
struct Tally {
    incoming: usize,
    outgoing: usize,
    total: usize,
}

impl IntegrityCheck for InteractionsCheck {
    fn name(&self) -> &'static str {
        "interactions"
    }

    fn run(&self, ctx: &CheckContext<'_>) -> Result<CheckResult> {
        let uri = sms_uri(ctx)?;
        let contacts: BTreeSet<&str> = ctx
            .injected
            .iter()
            .filter(|r| r.kind == RecordKind::Sms && r.success)
            .map(|r| r.address.as_str())
            .collect();
        if contacts.is_empty() {
            return Ok(CheckResult::pass(json!({ "contacts": 0, "interactions": {} })));
        }

        let rows = ctx
            .link
            .content_query(&ContentQuery::new(uri).projection(&["address", "type"]))?;
        let mut tallies: BTreeMap<&str, Tally> =
            contacts.iter().map(|c| (*c, Tally::default())).collect();
        for row in &rows {
            let Some(tally) = row.get("address").and_then(|a| tallies.get_mut(a)) else {
                continue;
            };
            tally.total += 1;
            match row.get_i64("type") {
                Some(SMS_INBOX) => tally.incoming += 1,
                Some(SMS_SENT) => tally.outgoing += 1,
                _ => {}
            }
        }

        let mut errors = Vec::new();
        let mut sparse = Vec::new();
        let mut interactions = Map::new();
        for (address, tally) in &tallies {
            interactions.insert(
                address.to_string(),
                json!({
                    "incoming": tally.incoming,
                    "outgoing": tally.outgoing,
                    "total": tally.total,
                }),
            );
            if tally.total < ctx.config.interaction_min_messages {
                sparse.push(json!(address));
            } else if tally.incoming == 0 {
                errors.push(format!("no incoming messages for {}", address));
            } else if tally.outgoing == 0 {
                errors.push(format!("no outgoing messages for {}", address));
            }
        }

        let details = json!({
            "contacts": tallies.len(),
            "interactions": interactions,
            "sparse": sparse,
        });
        Ok(CheckResult::from_errors(details, errors))
    }
}
