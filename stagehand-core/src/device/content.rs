//! Content-provider command model
//!
//! Builds `content query` / `content insert` shell commands and parses the
//! `Row: N key=value, ...` output the device's `content` tool prints.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

// ============================================
// Shell quoting
// ============================================

/// Quote one word for the device's `sh`.
///
/// Words made only of safe characters pass through unchanged; everything else
/// is single-quoted with embedded quotes written as `'\''`.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Quote a value for use inside an SQL string literal.
pub fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

// ============================================
// Bindings
// ============================================

/// Typed value for `content insert --bind name:type:value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Str(String),
    Long(i64),
    Int(i32),
}

impl BindValue {
    fn type_code(&self) -> char {
        match self {
            BindValue::Str(_) => 's',
            BindValue::Long(_) => 'l',
            BindValue::Int(_) => 'i',
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            BindValue::Str(s) => s.clone(),
            BindValue::Long(v) => v.to_string(),
            BindValue::Int(v) => v.to_string(),
        }
    }
}

/// One column binding of an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub value: BindValue,
}

impl Binding {
    pub fn string(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: BindValue::Str(value.into()),
        }
    }

    pub fn long(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            value: BindValue::Long(value),
        }
    }

    pub fn int(name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            value: BindValue::Int(value),
        }
    }

    /// `--bind` argument, quoted for the device shell
    pub fn render(&self) -> String {
        format!(
            "--bind {}",
            shell_quote(&format!(
                "{}:{}:{}",
                self.name,
                self.value.type_code(),
                self.value.as_text()
            ))
        )
    }
}

/// Find a binding's value by column name.
pub fn binding_value<'a>(bindings: &'a [Binding], name: &str) -> Option<&'a BindValue> {
    bindings.iter().find(|b| b.name == name).map(|b| &b.value)
}

/// Device command for one insert.
pub fn insert_command(uri: &str, bindings: &[Binding]) -> String {
    let mut cmd = format!("content insert --uri {}", shell_quote(uri));
    for binding in bindings {
        cmd.push(' ');
        cmd.push_str(&binding.render());
    }
    cmd
}

// ============================================
// Queries
// ============================================

/// A bounded read against one content URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentQuery {
    pub uri: String,
    pub projection: Vec<String>,
    pub selection: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
}

impl ContentQuery {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            projection: Vec::new(),
            selection: None,
            sort: None,
            limit: None,
        }
    }

    pub fn projection(mut self, columns: &[&str]) -> Self {
        self.projection = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, selection: impl Into<String>) -> Self {
        self.selection = Some(selection.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Device command for this query. The limit rides on the sort clause.
    pub fn to_command(&self) -> String {
        let mut cmd = format!("content query --uri {}", shell_quote(&self.uri));
        if !self.projection.is_empty() {
            cmd.push_str(" --projection ");
            cmd.push_str(&shell_quote(&self.projection.join(":")));
        }
        if let Some(selection) = &self.selection {
            cmd.push_str(" --where ");
            cmd.push_str(&shell_quote(selection));
        }
        let sort = match (&self.sort, self.limit) {
            (Some(sort), Some(limit)) => Some(format!("{} LIMIT {}", sort, limit)),
            (None, Some(limit)) => Some(format!("_id LIMIT {}", limit)),
            (Some(sort), None) => Some(sort.clone()),
            (None, None) => None,
        };
        if let Some(sort) = sort {
            cmd.push_str(" --sort ");
            cmd.push_str(&shell_quote(&sort));
        }
        cmd
    }
}

// ============================================
// Rows
// ============================================

/// One row of `content query` output. `NULL` columns are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentRow {
    pub index: usize,
    pub columns: BTreeMap<String, Option<String>>,
}

impl ContentRow {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns.get(column).and_then(|v| v.as_deref())
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(|v| v.trim().parse().ok())
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }
}

fn row_header() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Row: (\d+) (.*)$").expect("valid row regex"))
}

fn column_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r", ([A-Za-z_][A-Za-z0-9_]*)=").expect("valid column regex"))
}

/// Whether a stdout line starts a query result row.
pub fn is_row_line(line: &str) -> bool {
    line.starts_with("Row: ")
}

/// Parse `content query` output.
///
/// With a known projection, columns are split only at `, <column>=` for the
/// projected names so commas inside values survive. Lines that do not start
/// a row continue the previous row's last value.
pub fn parse_rows(output: &str, projection: &[String]) -> Vec<ContentRow> {
    let mut raw_rows: Vec<(usize, String)> = Vec::new();
    for line in output.lines() {
        if let Some(caps) = row_header().captures(line) {
            let index = caps[1].parse().unwrap_or(raw_rows.len());
            raw_rows.push((index, caps[2].to_string()));
        } else if let Some((_, body)) = raw_rows.last_mut() {
            body.push('\n');
            body.push_str(line);
        }
    }

    raw_rows
        .into_iter()
        .map(|(index, body)| ContentRow {
            index,
            columns: if projection.is_empty() {
                split_detected(&body)
            } else {
                split_projected(&body, projection)
            },
        })
        .collect()
}

fn to_value(raw: &str) -> Option<String> {
    if raw == "NULL" {
        None
    } else {
        Some(raw.to_string())
    }
}

fn split_projected(body: &str, projection: &[String]) -> BTreeMap<String, Option<String>> {
    let mut columns = BTreeMap::new();
    let mut rest = body;
    for (i, column) in projection.iter().enumerate() {
        let prefix = format!("{}=", column);
        let Some(value_start) = rest.strip_prefix(prefix.as_str()) else {
            // Column layout differs from the projection; fall back to detection
            columns.extend(split_detected(rest));
            return columns;
        };
        let value_end = projection[i + 1..]
            .first()
            .and_then(|next| value_start.find(&format!(", {}=", next)));
        match value_end {
            Some(end) => {
                columns.insert(column.clone(), to_value(&value_start[..end]));
                rest = &value_start[end + 2..];
            }
            None => {
                columns.insert(column.clone(), to_value(value_start));
                break;
            }
        }
    }
    columns
}

fn split_detected(body: &str) -> BTreeMap<String, Option<String>> {
    let mut columns = BTreeMap::new();
    let mut starts: Vec<(usize, usize)> = Vec::new(); // (key start, value start)
    if let Some(eq) = body.find('=') {
        starts.push((0, eq + 1));
    }
    for caps in column_boundary().captures_iter(body) {
        let Some(key) = caps.get(1) else { continue };
        starts.push((key.start(), key.end() + 1));
    }
    for (i, &(key_start, value_start)) in starts.iter().enumerate() {
        let value_end = starts
            .get(i + 1)
            .map(|&(next_key, _)| next_key - 2)
            .unwrap_or(body.len());
        let key = &body[key_start..value_start - 1];
        columns.insert(key.to_string(), to_value(&body[value_start..value_end]));
    }
    columns
}
