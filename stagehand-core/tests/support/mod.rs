//! In-memory phone for integration tests.
//!
//! Interprets the shell commands stagehand sends (`content`, `settings`,
//! `getenforce`, `pm`, `dumpsys`, `chmod`, `ls`, `test`, `getprop`, `df`)
//! against a small model of the device's providers and settings.

#![allow(dead_code)]

use stagehand_core::{CommandOutput, DeviceTransport, Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

pub type Row = BTreeMap<String, Option<String>>;

pub const STOCK_SMS_DB: &str = "/data/data/com.android.providers.telephony/databases/mmssms.db";
pub const SAMSUNG_MESSAGE_DB: &str =
    "/data/data/com.samsung.android.messaging/databases/message.db";
pub const SAMSUNG_CALLLOG_DB: &str =
    "/data/data/com.android.providers.contacts/databases/calllog.db";

#[derive(Debug, Default)]
struct State {
    props: BTreeMap<String, String>,
    settings: BTreeMap<String, String>,
    selinux: String,
    selinux_locked: bool,
    granted: BTreeSet<String>,
    grants_blocked: bool,
    files: BTreeMap<String, String>,
    providers: BTreeSet<String>,
    denied_writes: BTreeSet<String>,
    dropped_writes: BTreeSet<String>,
    unresponsive: bool,
    tables: BTreeMap<String, Vec<Row>>,
    next_id: BTreeMap<String, i64>,
    threads: BTreeMap<String, i64>,
    log: Vec<String>,
}

pub struct SimulatedDevice {
    state: Mutex<State>,
}

impl SimulatedDevice {
    /// A stock device: providers answer, database files are not visible.
    pub fn stock() -> Self {
        let mut state = State {
            selinux: "Permissive".to_string(),
            ..Default::default()
        };
        for (key, value) in [
            ("ro.product.model", "Pixel 7"),
            ("ro.product.manufacturer", "Google"),
            ("ro.product.brand", "google"),
            ("ro.product.device", "panther"),
            ("ro.build.version.release", "14"),
            ("ro.build.version.sdk", "34"),
            ("ro.serialno", "SIM0001"),
            ("sys.usb.config", "mtp,adb"),
            ("sys.usb.state", "mtp,adb"),
        ] {
            state.props.insert(key.to_string(), value.to_string());
        }
        state.settings.insert("adb_enabled".to_string(), "1".to_string());
        state
            .settings
            .insert("development_settings_enabled".to_string(), "1".to_string());
        for uri in [
            "content://sms",
            "content://mms",
            "content://call_log/calls",
            "content://mms-sms/conversations",
        ] {
            state.providers.insert(uri.to_string());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// A Samsung device with visible vendor databases and `content://logs/call`.
    pub fn samsung() -> Self {
        let device = Self::stock();
        {
            let mut state = device.state();
            state
                .props
                .insert("ro.product.manufacturer".to_string(), "samsung".to_string());
            state.providers.insert("content://logs/call".to_string());
            for path in [SAMSUNG_MESSAGE_DB, SAMSUNG_CALLLOG_DB] {
                state.files.insert(path.to_string(), "-rw-rw----".to_string());
            }
        }
        device
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    // ============================================
    // Knobs
    // ============================================

    pub fn with_selinux(self, mode: &str) -> Self {
        self.state().selinux = mode.to_string();
        self
    }

    /// `setenforce` is refused
    pub fn with_selinux_locked(self) -> Self {
        self.state().selinux_locked = true;
        self
    }

    pub fn with_setting(self, key: &str, value: &str) -> Self {
        self.state()
            .settings
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_granted(self, permissions: &[&str]) -> Self {
        self.state()
            .granted
            .extend(permissions.iter().map(|p| p.to_string()));
        self
    }

    /// `pm grant` exits cleanly but changes nothing
    pub fn with_grants_blocked(self) -> Self {
        self.state().grants_blocked = true;
        self
    }

    pub fn with_file(self, path: &str, mode: &str) -> Self {
        self.state()
            .files
            .insert(path.to_string(), mode.to_string());
        self
    }

    pub fn without_provider(self, uri: &str) -> Self {
        self.state().providers.remove(uri);
        self
    }

    /// Inserts into `uri` are refused with a permission denial
    pub fn deny_writes(self, uri: &str) -> Self {
        self.state().denied_writes.insert(uri.to_string());
        self
    }

    /// Inserts into `uri` are acknowledged but never stored
    pub fn drop_writes(self, uri: &str) -> Self {
        self.state().dropped_writes.insert(uri.to_string());
        self
    }

    pub fn unresponsive(self) -> Self {
        self.state().unresponsive = true;
        self
    }

    /// Store an SMS row directly, bypassing thread assignment
    pub fn insert_raw_sms(&self, address: &str, date: i64, thread_id: i64, body: &str) {
        let mut state = self.state();
        let id = next_id(&mut state, "sms");
        let mut row = Row::new();
        row.insert("_id".to_string(), Some(id.to_string()));
        row.insert("thread_id".to_string(), Some(thread_id.to_string()));
        row.insert("address".to_string(), Some(address.to_string()));
        row.insert("date".to_string(), Some(date.to_string()));
        row.insert("type".to_string(), Some("1".to_string()));
        row.insert("body".to_string(), Some(body.to_string()));
        state.tables.entry("sms".to_string()).or_default().push(row);
    }

    // ============================================
    // Inspection
    // ============================================

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn selinux(&self) -> String {
        self.state().selinux.clone()
    }

    pub fn file_mode(&self, path: &str) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().log.clone()
    }
}

impl DeviceTransport for SimulatedDevice {
    fn execute(&self, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let mut state = self.state();
        state.log.push(args.join(" "));
        if state.unresponsive {
            return Err(Error::DeviceUnresponsive {
                command: args.join(" "),
                timeout_secs: timeout.as_secs(),
            });
        }
        match args.first().map(String::as_str) {
            Some("get-state") => Ok(CommandOutput::ok("device\n")),
            Some("push") => Ok(CommandOutput::ok("1 file pushed\n")),
            Some("shell") => {
                let line = args.get(1).cloned().unwrap_or_default();
                Ok(shell(&mut state, &split_words(&line)))
            }
            _ => Ok(CommandOutput::failed(1, "adb: unknown command")),
        }
    }

    fn serial(&self) -> Option<&str> {
        Some("SIM0001")
    }
}

// ============================================
// Shell
// ============================================

fn shell(state: &mut State, words: &[String]) -> CommandOutput {
    let w: Vec<&str> = words.iter().map(String::as_str).collect();
    match w.as_slice() {
        ["getprop"] => CommandOutput::ok(
            state
                .props
                .iter()
                .map(|(k, v)| format!("[{}]: [{}]\n", k, v))
                .collect::<String>(),
        ),
        ["getprop", key] => CommandOutput::ok(format!(
            "{}\n",
            state.props.get(*key).cloned().unwrap_or_default()
        )),
        ["cat", "/proc/meminfo"] => CommandOutput::ok("MemTotal:        7812345 kB\n"),
        ["cat", "/proc/cpuinfo"] => CommandOutput::ok("processor\t: 0\nprocessor\t: 1\n"),
        ["df", "/data"] => CommandOutput::ok(
            "Filesystem 1K-blocks Used Available Use% Mounted on\n\
             /dev/block/dm-9 115712000 40960000 74752000 36% /data\n",
        ),
        ["settings", "get", "global", key] => CommandOutput::ok(format!(
            "{}\n",
            state
                .settings
                .get(*key)
                .cloned()
                .unwrap_or_else(|| "null".to_string())
        )),
        ["settings", "put", "global", key, value] => {
            state.settings.insert(key.to_string(), value.to_string());
            CommandOutput::ok("")
        }
        ["getenforce"] => CommandOutput::ok(format!("{}\n", state.selinux)),
        ["setenforce", "0"] => {
            if state.selinux_locked {
                CommandOutput::failed(1, "setenforce: Couldn't set enforcing status to '0': Permission denied")
            } else {
                state.selinux = "Permissive".to_string();
                CommandOutput::ok("")
            }
        }
        ["pm", "grant", _package, permission] => {
            if !state.grants_blocked {
                state.granted.insert(permission.to_string());
            }
            CommandOutput::ok("")
        }
        ["dumpsys", "package", _package] => {
            let mut out = String::from("    runtime permissions:\n");
            for permission in &state.granted {
                out.push_str(&format!("      {}: granted=true\n", permission));
            }
            CommandOutput::ok(out)
        }
        ["chmod", "666", path] => match state.files.get_mut(*path) {
            Some(mode) => {
                *mode = "-rw-rw-rw-".to_string();
                CommandOutput::ok("")
            }
            None => CommandOutput::failed(1, format!("chmod: {}: No such file or directory", path)),
        },
        ["ls", "-l", path] => match state.files.get(*path) {
            Some(mode) => CommandOutput::ok(format!(
                "{} 1 radio radio 98304 2024-01-01 00:00 {}\n",
                mode, path
            )),
            None => CommandOutput::failed(1, format!("ls: {}: No such file or directory", path)),
        },
        ["test", "-f", path, "&&", "echo", "exists"] => {
            if state.files.contains_key(*path) {
                CommandOutput::ok("exists\n")
            } else {
                CommandOutput {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: String::new(),
                }
            }
        }
        ["content", "query", rest @ ..] => content_query(state, rest),
        ["content", "insert", rest @ ..] => content_insert(state, rest),
        _ => CommandOutput::failed(127, format!("sh: {}: not found", words.join(" "))),
    }
}

/// POSIX-ish word splitting: whitespace, single quotes, backslash escapes.
fn split_words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

fn flag<'a>(args: &[&'a str], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == name)
        .and_then(|i| args.get(i + 1))
        .copied()
}

// ============================================
// Content providers
// ============================================

/// Table, implicit filter and base URI for a content URI
fn route(uri: &str) -> Option<(String, Option<(String, String)>, String)> {
    let uri = uri.split('?').next().unwrap_or(uri);
    let path: Vec<&str> = uri.trim_start_matches("content://").split('/').collect();
    let routed = match path.as_slice() {
        ["sms"] => ("sms".to_string(), None, "content://sms"),
        ["mms"] => ("mms".to_string(), None, "content://mms"),
        ["mms", "part"] => ("part".to_string(), None, "content://mms"),
        ["mms", id, "part"] => (
            "part".to_string(),
            Some(("mid".to_string(), id.to_string())),
            "content://mms",
        ),
        ["mms", id, "addr"] => (
            "addr".to_string(),
            Some(("msg_id".to_string(), id.to_string())),
            "content://mms",
        ),
        ["call_log", "calls"] => ("calls".to_string(), None, "content://call_log/calls"),
        ["logs", "call"] => ("calls".to_string(), None, "content://logs/call"),
        ["mms-sms", "conversations"] => (
            "threads".to_string(),
            None,
            "content://mms-sms/conversations",
        ),
        _ => return None,
    };
    Some((routed.0, routed.1, routed.2.to_string()))
}

fn unknown_uri(uri: &str) -> CommandOutput {
    CommandOutput::ok(format!(
        "Error while accessing provider:{}\njava.lang.IllegalArgumentException: Unknown URI {}\n",
        uri, uri
    ))
}

fn next_id(state: &mut State, table: &str) -> i64 {
    let id = state.next_id.entry(table.to_string()).or_insert(0);
    *id += 1;
    *id
}

fn content_insert(state: &mut State, args: &[&str]) -> CommandOutput {
    let Some(uri) = flag(args, "--uri") else {
        return CommandOutput::failed(1, "missing --uri");
    };
    let Some((table, implicit, base)) = route(uri).filter(|(_, _, base)| state.providers.contains(base)) else {
        return unknown_uri(uri);
    };
    if state.denied_writes.contains(&base) {
        return CommandOutput::ok(format!(
            "Error while accessing provider:{}\njava.lang.SecurityException: Permission Denial: writing {} requires android.permission.WRITE_SMS\n",
            base, base
        ));
    }
    if state.dropped_writes.contains(&base) {
        return CommandOutput::ok("");
    }

    let mut row = Row::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--bind" {
            if let Some(spec) = args.get(i + 1) {
                let mut pieces = spec.splitn(3, ':');
                if let (Some(name), Some(_), Some(value)) =
                    (pieces.next(), pieces.next(), pieces.next())
                {
                    row.insert(name.to_string(), Some(value.to_string()));
                }
            }
            i += 1;
        }
        i += 1;
    }
    if let Some((column, value)) = implicit {
        row.entry(column).or_insert(Some(value));
    }

    let id = next_id(state, &table);
    row.insert("_id".to_string(), Some(id.to_string()));
    if table == "sms" {
        let address = row.get("address").cloned().flatten().unwrap_or_default();
        let known = state.threads.get(&address).copied();
        let thread = match known {
            Some(thread) => thread,
            None => {
                let thread = next_id(state, "threads");
                state.threads.insert(address, thread);
                let mut thread_row = Row::new();
                thread_row.insert("_id".to_string(), Some(thread.to_string()));
                state
                    .tables
                    .entry("threads".to_string())
                    .or_default()
                    .push(thread_row);
                thread
            }
        };
        row.insert("thread_id".to_string(), Some(thread.to_string()));
    }
    state.tables.entry(table).or_default().push(row);
    CommandOutput::ok("")
}

fn content_query(state: &mut State, args: &[&str]) -> CommandOutput {
    let Some(uri) = flag(args, "--uri") else {
        return CommandOutput::failed(1, "missing --uri");
    };
    let Some((table, implicit, _)) = route(uri).filter(|(_, _, base)| state.providers.contains(base)) else {
        return unknown_uri(uri);
    };

    let mut conditions: Vec<(String, String)> = implicit.into_iter().collect();
    if let Some(selection) = flag(args, "--where") {
        for clause in selection.split(" AND ") {
            if let Some((column, value)) = clause.split_once('=') {
                let value = value.trim();
                let value = value
                    .strip_prefix('\'')
                    .and_then(|v| v.strip_suffix('\''))
                    .map(|v| v.replace("''", "'"))
                    .unwrap_or_else(|| value.to_string());
                conditions.push((column.trim().to_string(), value));
            }
        }
    }

    let mut rows: Vec<Row> = state
        .tables
        .get(&table)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter(|row| {
            conditions
                .iter()
                .all(|(column, value)| row.get(column).cloned().flatten().as_deref() == Some(value))
        })
        .collect();

    if let Some(sort) = flag(args, "--sort") {
        let (order, limit) = match sort.split_once(" LIMIT ") {
            Some((order, limit)) => (order, limit.trim().parse::<usize>().ok()),
            None => (sort, None),
        };
        let mut parts = order.split_whitespace();
        if let Some(column) = parts.next() {
            let descending = parts.next().map(|d| d.eq_ignore_ascii_case("DESC")).unwrap_or(false);
            rows.sort_by(|a, b| {
                let key = |row: &Row| {
                    row.get(column)
                        .cloned()
                        .flatten()
                        .and_then(|v| v.parse::<i64>().ok())
                        .unwrap_or(i64::MIN)
                };
                let ordering = key(a).cmp(&key(b));
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
    }

    if rows.is_empty() {
        return CommandOutput::ok("No result found.\n");
    }

    let projection: Option<Vec<&str>> = flag(args, "--projection").map(|p| p.split(':').collect());
    let mut out = String::new();
    for (i, row) in rows.iter().enumerate() {
        let columns: Vec<String> = match &projection {
            Some(columns) => columns
                .iter()
                .map(|c| format!("{}={}", c, render(row.get(*c))))
                .collect(),
            None => row
                .iter()
                .map(|(c, v)| format!("{}={}", c, render(Some(v))))
                .collect(),
        };
        out.push_str(&format!("Row: {} {}\n", i, columns.join(", ")));
    }
    CommandOutput::ok(out)
}

fn render(value: Option<&Option<String>>) -> String {
    match value {
        Some(Some(v)) => v.clone(),
        _ => "NULL".to_string(),
    }
}
