//! Core domain types for stagehand
//!
//! These types describe planned communication before it is materialized into
//! device-specific writes.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Character** | A named participant with a phone number and organizational context |
//! | **RecordKind** | The device record family an event lands in (SMS, MMS, call log) |
//! | **TimelineEvent** | One planned communication between two characters |
//! | **ContextTag** | Scenario label ("business", "emergency", ...) that picks content and durations |
//! | **Direction** | Whether the device saw the event as received, sent, or missed |
//! | **GroupChat** | A named conversation with three or more members, written as group MMS |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ============================================
// Record kinds
// ============================================

/// Logical record family on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Sms,
    Mms,
    Call,
}

impl RecordKind {
    /// All kinds, in provider discovery order.
    pub const ALL: [RecordKind; 3] = [RecordKind::Sms, RecordKind::Mms, RecordKind::Call];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Sms => "sms",
            RecordKind::Mms => "mms",
            RecordKind::Call => "call",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Sms => write!(f, "SMS"),
            RecordKind::Mms => write!(f, "MMS"),
            RecordKind::Call => write!(f, "call-log"),
        }
    }
}

impl std::str::FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(RecordKind::Sms),
            "mms" => Ok(RecordKind::Mms),
            "call" => Ok(RecordKind::Call),
            _ => Err(format!("unknown record kind: {}", s)),
        }
    }
}

// ============================================
// Direction
// ============================================

/// How the device owner experienced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the sender (SMS inbox, answered incoming call)
    Incoming,
    /// Sent to the recipient (SMS sent box, outgoing call)
    Outgoing,
    /// Unanswered incoming call
    Missed,
}

impl Direction {
    /// Android `type` column value for SMS and call-log rows.
    pub fn provider_type(&self) -> i32 {
        match self {
            Direction::Incoming => 1,
            Direction::Outgoing => 2,
            Direction::Missed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
            Direction::Missed => "missed",
        }
    }
}

// ============================================
// Context tags
// ============================================

/// Scenario label carried on an event.
///
/// Later stages use it to select a body template or a call duration profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextTag(pub String);

impl ContextTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into().trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================
// Characters
// ============================================

/// An MMS attachment referenced by a dialogue line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type (e.g. "image/jpeg", "text/plain")
    pub content_type: String,
    /// Local file to push to the device (binary parts)
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Inline text content (text parts)
    #[serde(default)]
    pub text: Option<String>,
    /// File name shown by messaging apps
    #[serde(default)]
    pub name: Option<String>,
}

/// One line a character "says", replayed as a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DialogueSpec")]
pub struct DialogueLine {
    pub text: String,
    /// Explicit recipient; a random counterpart is chosen otherwise
    pub to: Option<String>,
    /// Lines with an attachment become MMS events
    pub attachment: Option<Attachment>,
}

impl DialogueLine {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            to: None,
            attachment: None,
        }
    }
}

/// Accepts either a bare string or a full line object.
#[derive(Deserialize)]
#[serde(untagged)]
enum DialogueSpec {
    Text(String),
    Full {
        text: String,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        attachment: Option<Attachment>,
    },
}

impl From<DialogueSpec> for DialogueLine {
    fn from(spec: DialogueSpec) -> Self {
        match spec {
            DialogueSpec::Text(text) => DialogueLine::text(text),
            DialogueSpec::Full {
                text,
                to,
                attachment,
            } => DialogueLine {
                text,
                to,
                attachment,
            },
        }
    }
}

/// Modernized identity details produced by the character generator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModernDetails {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

/// A named participant in the timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub context: Option<ContextTag>,
    #[serde(default)]
    pub modern_details: Option<ModernDetails>,
    #[serde(default)]
    pub dialogue: Vec<DialogueLine>,
}

impl Character {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: None,
            display_name: None,
            role: None,
            organization: None,
            location: None,
            context: None,
            modern_details: None,
            dialogue: Vec::new(),
        }
    }

    /// Phone number, preferring the modernized one, normalized to digits.
    ///
    /// A modern value with no digits (`"N/A"`) falls through to `phone`.
    pub fn phone_number(&self) -> Option<String> {
        let usable = |raw: Option<&str>| raw.map(normalize_phone).filter(|p| !p.is_empty());
        usable(self.modern_details.as_ref().and_then(|m| m.phone.as_deref()))
            .or_else(|| usable(self.phone.as_deref()))
    }

    /// Name shown in call logs and contact displays.
    pub fn display(&self) -> &str {
        self.display_name
            .as_deref()
            .or_else(|| {
                self.modern_details
                    .as_ref()
                    .and_then(|m| m.display_name.as_deref())
            })
            .unwrap_or(&self.name)
    }

    pub fn location(&self) -> Option<&str> {
        self.modern_details
            .as_ref()
            .and_then(|m| m.location.as_deref())
            .or(self.location.as_deref())
    }
}

/// Strip formatting from a phone number, keeping digits and a leading `+`.
pub fn normalize_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() || (i == 0 && c == '+') {
            out.push(c);
        }
    }
    out
}

/// A named group conversation among several characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupChat {
    pub name: String,
    /// Character names, in join order
    pub members: Vec<String>,
    #[serde(default)]
    pub admin: Option<String>,
    /// Group-only lines; when empty, members' short dialogue is replayed
    #[serde(default)]
    pub lines: Vec<GroupLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLine {
    pub from: String,
    pub text: String,
}

// ============================================
// Timeline events
// ============================================

/// Group membership carried by a group message event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupThread {
    pub name: String,
    /// Every participant except the sender
    pub members: Vec<String>,
}

/// One planned communication, before it is bound to a device provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub kind: RecordKind,
    /// Sender character name
    pub sender: String,
    /// Recipient character name
    pub recipient: String,
    /// Millisecond epoch timestamp
    pub timestamp: i64,
    pub context: ContextTag,
    pub direction: Direction,
    /// Message body from dialogue (SMS/MMS)
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    /// Calls only: written with the video-call feature flag
    #[serde(default)]
    pub video: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupThread>,
}

impl TimelineEvent {
    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp).unwrap_or_default()
    }

    /// The character whose number lands in the address column.
    ///
    /// Received and missed events show the sender; sent events show the recipient.
    pub fn counterpart(&self) -> &str {
        match self.direction {
            Direction::Outgoing => &self.recipient,
            Direction::Incoming | Direction::Missed => &self.sender,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("202-555-1212"), "2025551212");
        assert_eq!(normalize_phone(" +1 (404) 771-2079 "), "+14047712079");
        assert_eq!(normalize_phone("555-1234"), "5551234");
        assert_eq!(normalize_phone(""), "");
    }

    #[test]
    fn test_phone_prefers_modern_details() {
        let mut brutus = Character::new("BRUTUS");
        brutus.phone = Some("555-1111".to_string());
        assert_eq!(brutus.phone_number().as_deref(), Some("5551111"));

        brutus.modern_details = Some(ModernDetails {
            phone: Some("202-555-1212".to_string()),
            ..Default::default()
        });
        assert_eq!(brutus.phone_number().as_deref(), Some("2025551212"));
    }

    #[test]
    fn test_placeholder_modern_phone_falls_back() {
        let mut brutus = Character::new("BRUTUS");
        brutus.phone = Some("555-1111".to_string());
        brutus.modern_details = Some(ModernDetails {
            phone: Some("N/A".to_string()),
            ..Default::default()
        });
        assert_eq!(brutus.phone_number().as_deref(), Some("5551111"));

        brutus.phone = Some("unlisted".to_string());
        assert_eq!(brutus.phone_number(), None);
    }

    #[test]
    fn test_group_chat_lines_default_empty() {
        let json = r#"{"name": "Senate", "members": ["BRUTUS", "CASSIUS", "CASCA"]}"#;
        let group: GroupChat = serde_json::from_str(json).unwrap();
        assert_eq!(group.members.len(), 3);
        assert!(group.lines.is_empty());
        assert_eq!(group.admin, None);
    }

    #[test]
    fn test_dialogue_accepts_strings_and_objects() {
        let json = r#"["Remember our plan", {"text": "See attached", "to": "CASSIUS",
            "attachment": {"content_type": "text/plain", "text": "agenda"}}]"#;
        let lines: Vec<DialogueLine> = serde_json::from_str(json).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], DialogueLine::text("Remember our plan"));
        assert_eq!(lines[1].to.as_deref(), Some("CASSIUS"));
        assert!(lines[1].attachment.is_some());
    }

    #[test]
    fn test_counterpart_follows_direction() {
        let mut event = TimelineEvent {
            kind: RecordKind::Sms,
            sender: "HAMLET".to_string(),
            recipient: "OPHELIA".to_string(),
            timestamp: 0,
            context: ContextTag::new("business"),
            direction: Direction::Incoming,
            text: None,
            attachment: None,
            video: false,
            group: None,
        };
        assert_eq!(event.counterpart(), "HAMLET");
        event.direction = Direction::Outgoing;
        assert_eq!(event.counterpart(), "OPHELIA");
    }

    #[test]
    fn test_record_kind_round_trip() {
        for kind in RecordKind::ALL {
            assert_eq!(kind.as_str().parse::<RecordKind>().unwrap(), kind);
        }
        assert!("fax".parse::<RecordKind>().is_err());
    }
}
