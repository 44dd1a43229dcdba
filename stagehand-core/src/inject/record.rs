//! Materialization of timeline events into provider-specific writes.

use super::catalog::Catalog;
use crate::config::InjectionConfig;
use crate::device::content::{sql_quote, Binding};
use crate::device::ContentQuery;
use crate::directory::CharacterDirectory;
use crate::provider::ProviderBinding;
use crate::types::{Direction, RecordKind, TimelineEvent};
use rand::Rng;
use std::path::PathBuf;

const SAMSUNG_MESSAGING_PACKAGE: &str = "com.samsung.android.messaging";
const MMS_CONTENT_TYPE: &str = "application/vnd.wap.multipart.related";
const MMS_SEND_REQ: i32 = 128;
const MMS_RETRIEVE_CONF: i32 = 132;
const MMS_ADDR_FROM: i32 = 137;
const MMS_ADDR_TO: i32 = 151;
const CHARSET_UTF8: i32 = 106;
/// Call-log `features` value written for video calls
const VIDEO_CALL_FEATURES: i32 = 3;

/// One MMS part, written under `content://mms/<id>/part`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmsPart {
    pub seq: i32,
    pub content_type: String,
    pub text: Option<String>,
    /// Local file pushed to the device before the part row is written
    pub local_path: Option<PathBuf>,
    pub name: Option<String>,
    /// `cl`/`cid` fields (vendor layout)
    pub content_location: Option<String>,
}

impl MmsPart {
    /// Remote path for pushed binary data
    pub fn remote_path(&self, record_seq: usize) -> String {
        format!("/sdcard/stagehand_mms_{}_{}", record_seq, self.seq)
    }

    pub fn bindings(&self, mms_id: i64, record_seq: usize) -> Vec<Binding> {
        let mut bindings = vec![
            Binding::long("mid", mms_id),
            Binding::int("seq", self.seq),
            Binding::string("ct", &self.content_type),
        ];
        if let Some(name) = &self.name {
            bindings.push(Binding::string("name", name));
        }
        if let Some(location) = &self.content_location {
            bindings.push(Binding::string("cl", location));
            bindings.push(Binding::string("cid", format!("<{}>", location)));
        }
        if let Some(text) = &self.text {
            bindings.push(Binding::int("chset", CHARSET_UTF8));
            bindings.push(Binding::string("text", text));
        }
        if self.local_path.is_some() {
            bindings.push(Binding::string("_data", self.remote_path(record_seq)));
        }
        bindings
    }
}

/// One row under `content://mms/<id>/addr`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmsAddress {
    pub address: String,
    /// 137 from, 151 to
    pub addr_type: i32,
}

impl MmsAddress {
    pub fn bindings(&self, mms_id: i64) -> Vec<Binding> {
        vec![
            Binding::string("address", &self.address),
            Binding::int("type", self.addr_type),
            Binding::int("charset", CHARSET_UTF8),
            Binding::long("msg_id", mms_id),
        ]
    }
}

/// MMS-specific follow-up writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmsPlan {
    /// 1 inbox, 2 sent
    pub msg_box: i32,
    /// Seconds; MMS rows store dates in seconds
    pub date_secs: i64,
    /// Counterpart first; group messages add every other member as a recipient
    pub addresses: Vec<MmsAddress>,
    pub parts: Vec<MmsPart>,
}

/// A literal write request derived from one event. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionRecord {
    /// Position in the batch
    pub seq: usize,
    pub kind: RecordKind,
    pub uri: String,
    /// Counterpart number in the address/number column
    pub address: String,
    /// Millisecond epoch
    pub timestamp: i64,
    pub bindings: Vec<Binding>,
    pub mms: Option<MmsPlan>,
}

impl InjectionRecord {
    /// Query that finds this record again after the write
    pub fn read_back_query(&self) -> ContentQuery {
        match (&self.kind, &self.mms) {
            (RecordKind::Mms, Some(plan)) => ContentQuery::new(&self.uri)
                .projection(&["_id"])
                .filter(format!(
                    "date={} AND msg_box={}",
                    plan.date_secs, plan.msg_box
                ))
                .sort("_id DESC")
                .limit(1),
            (RecordKind::Call, _) => ContentQuery::new(&self.uri)
                .projection(&["_id", "number", "date"])
                .filter(format!(
                    "number={} AND date={}",
                    sql_quote(&self.address),
                    self.timestamp
                ))
                .limit(1),
            _ => ContentQuery::new(&self.uri)
                .projection(&["_id", "address", "date"])
                .filter(format!(
                    "address={} AND date={}",
                    sql_quote(&self.address),
                    self.timestamp
                ))
                .limit(1),
        }
    }
}

/// Builds records with the bindings each provider variant expects
pub struct RecordBuilder<'a> {
    pub directory: &'a CharacterDirectory,
    pub config: &'a InjectionConfig,
    pub catalog: &'a Catalog,
}

impl<'a> RecordBuilder<'a> {
    /// Phone for a character, or the placeholder when none is known
    pub fn number_for(&self, name: &str) -> String {
        match self.directory.phone_for(name) {
            Some(phone) => phone,
            None => {
                tracing::warn!(character = %name, placeholder = %self.config.placeholder_number, "no phone number; using placeholder");
                self.config.placeholder_number.clone()
            }
        }
    }

    pub fn build<R: Rng + ?Sized>(
        &self,
        seq: usize,
        event: &TimelineEvent,
        binding: &ProviderBinding,
        rng: &mut R,
    ) -> InjectionRecord {
        let address = self.number_for(event.counterpart());
        match event.kind {
            RecordKind::Sms => self.sms(seq, event, binding, address, rng),
            RecordKind::Mms => self.mms(seq, event, binding, address, rng),
            RecordKind::Call => self.call(seq, event, binding, address, rng),
        }
    }

    fn body<R: Rng + ?Sized>(&self, event: &TimelineEvent, rng: &mut R) -> String {
        match &event.text {
            Some(text) if !text.is_empty() => text.clone(),
            _ => self.catalog.body(event.context.as_str(), rng),
        }
    }

    fn sms<R: Rng + ?Sized>(
        &self,
        seq: usize,
        event: &TimelineEvent,
        binding: &ProviderBinding,
        address: String,
        rng: &mut R,
    ) -> InjectionRecord {
        let sms_type = match event.direction {
            Direction::Outgoing => 2,
            Direction::Incoming | Direction::Missed => 1,
        };
        let mut bindings = vec![
            Binding::string("address", &address),
            Binding::long("date", event.timestamp),
            Binding::long("date_sent", event.timestamp),
            Binding::int("type", sms_type),
            Binding::int("read", 1),
            Binding::int("seen", 1),
            Binding::string("body", self.body(event, rng)),
        ];
        if binding.is_vendor_specific() {
            bindings.push(Binding::string("creator", SAMSUNG_MESSAGING_PACKAGE));
            bindings.push(Binding::int("reserved", 0));
        }
        InjectionRecord {
            seq,
            kind: RecordKind::Sms,
            uri: binding.uri.clone(),
            address,
            timestamp: event.timestamp,
            bindings,
            mms: None,
        }
    }

    fn call<R: Rng + ?Sized>(
        &self,
        seq: usize,
        event: &TimelineEvent,
        binding: &ProviderBinding,
        address: String,
        rng: &mut R,
    ) -> InjectionRecord {
        let duration = match event.direction {
            Direction::Missed => 0,
            _ => self.catalog.duration(event.context.as_str(), rng),
        };
        let counterpart = self.directory.get(event.counterpart());
        let name = counterpart
            .map(|c| c.display().to_string())
            .unwrap_or_else(|| event.counterpart().to_string());

        let mut bindings = vec![
            Binding::string("number", &address),
            Binding::long("date", event.timestamp),
            Binding::long("duration", duration as i64),
            Binding::int("type", event.direction.provider_type()),
            Binding::int("new", i32::from(event.direction == Direction::Missed)),
            Binding::string("name", name),
        ];
        if binding.is_vendor_specific() {
            let geocode = counterpart
                .and_then(|c| c.location())
                .unwrap_or(&self.config.default_geocode)
                .to_string();
            bindings.push(Binding::int("presentation", 1));
            bindings.push(Binding::string("countryiso", &self.config.country_iso));
            bindings.push(Binding::string("geocoded_location", geocode));
            bindings.push(Binding::string("formatted_number", &address));
        }
        if event.video {
            bindings.push(Binding::int("features", VIDEO_CALL_FEATURES));
        }
        InjectionRecord {
            seq,
            kind: RecordKind::Call,
            uri: binding.uri.clone(),
            address,
            timestamp: event.timestamp,
            bindings,
            mms: None,
        }
    }

    fn mms<R: Rng + ?Sized>(
        &self,
        seq: usize,
        event: &TimelineEvent,
        binding: &ProviderBinding,
        address: String,
        rng: &mut R,
    ) -> InjectionRecord {
        let outgoing = event.direction == Direction::Outgoing;
        let msg_box = if outgoing { 2 } else { 1 };
        let date_secs = event.timestamp.div_euclid(1000);
        let body = self.body(event, rng);
        let vendor = binding.is_vendor_specific();

        let mut parts = Vec::new();
        let mut next_seq = 0;
        let mut push_part = |mut part: MmsPart, parts: &mut Vec<MmsPart>| {
            part.seq = next_seq;
            next_seq += 1;
            parts.push(part);
        };

        push_part(
            MmsPart {
                seq: 0,
                content_type: "text/plain".to_string(),
                text: Some(body.clone()),
                local_path: None,
                name: None,
                content_location: vendor.then(|| "text_0.txt".to_string()),
            },
            &mut parts,
        );
        if let Some(attachment) = &event.attachment {
            let name = attachment.name.clone().or_else(|| {
                attachment
                    .path
                    .as_ref()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
            });
            push_part(
                MmsPart {
                    seq: 0,
                    content_type: attachment.content_type.clone(),
                    text: attachment.text.clone(),
                    local_path: attachment.path.clone(),
                    name: name.clone(),
                    content_location: if vendor {
                        Some(name.unwrap_or_else(|| "attachment_1".to_string()))
                    } else {
                        None
                    },
                },
                &mut parts,
            );
        }

        if vendor {
            parts.insert(0, smil_part(&parts));
        }

        let mut addresses = vec![MmsAddress {
            address: address.clone(),
            addr_type: if outgoing { MMS_ADDR_TO } else { MMS_ADDR_FROM },
        }];
        if let Some(thread) = &event.group {
            for member in &thread.members {
                let number = self.number_for(member);
                if !addresses.iter().any(|a| a.address == number) {
                    addresses.push(MmsAddress {
                        address: number,
                        addr_type: MMS_ADDR_TO,
                    });
                }
            }
        }

        let subject: String = match &event.group {
            Some(thread) => thread.name.clone(),
            None => body.chars().take(40).collect(),
        };
        let bindings = vec![
            Binding::int("msg_box", msg_box),
            Binding::long("date", date_secs),
            Binding::long("date_sent", date_secs),
            Binding::int("read", 1),
            Binding::int("seen", 1),
            Binding::string("sub", subject),
            Binding::string("ct_t", MMS_CONTENT_TYPE),
            Binding::int(
                "m_type",
                if outgoing {
                    MMS_SEND_REQ
                } else {
                    MMS_RETRIEVE_CONF
                },
            ),
        ];

        InjectionRecord {
            seq,
            kind: RecordKind::Mms,
            uri: binding.uri.clone(),
            address,
            timestamp: event.timestamp,
            bindings,
            mms: Some(MmsPlan {
                msg_box,
                date_secs,
                addresses,
                parts,
            }),
        }
    }
}

/// SMIL layout part (seq -1) referencing the other parts
fn smil_part(parts: &[MmsPart]) -> MmsPart {
    let mut body = String::from("<smil><head><layout><root-layout/></layout></head><body><par>");
    for part in parts {
        let src = part.content_location.as_deref().unwrap_or("part");
        if part.content_type.starts_with("text/") {
            body.push_str(&format!("<text src=\"{}\"/>", src));
        } else if part.content_type.starts_with("image/") {
            body.push_str(&format!("<img src=\"{}\"/>", src));
        } else {
            body.push_str(&format!("<ref src=\"{}\"/>", src));
        }
    }
    body.push_str("</par></body></smil>");
    MmsPart {
        seq: -1,
        content_type: "application/smil".to_string(),
        text: Some(body),
        local_path: None,
        name: None,
        content_location: Some("smil.xml".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::content::binding_value;
    use crate::device::BindValue;
    use crate::provider::Vendor;
    use crate::types::{Attachment, Character, ContextTag, GroupThread, ModernDetails};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn directory() -> CharacterDirectory {
        let mut caesar = Character::new("CAESAR");
        caesar.modern_details = Some(ModernDetails {
            phone: Some("202-555-1000".to_string()),
            location: Some("Rome, GA".to_string()),
            ..Default::default()
        });
        CharacterDirectory::new(vec![caesar, Character::new("CINNA")]).unwrap()
    }

    fn event(kind: RecordKind, direction: Direction) -> TimelineEvent {
        TimelineEvent {
            kind,
            sender: "CAESAR".to_string(),
            recipient: "CINNA".to_string(),
            timestamp: 1_700_000_123_456,
            context: ContextTag::new("business"),
            direction,
            text: None,
            attachment: None,
            video: false,
            group: None,
        }
    }

    fn binding(kind: RecordKind, vendor: Vendor, uri: &str) -> ProviderBinding {
        ProviderBinding {
            kind,
            vendor,
            uri: uri.to_string(),
            path: None,
        }
    }

    #[test]
    fn test_sms_uses_counterpart_and_template() {
        let directory = directory();
        let config = InjectionConfig::default();
        let catalog = Catalog::builtin();
        let builder = RecordBuilder {
            directory: &directory,
            config: &config,
            catalog: &catalog,
        };
        let mut rng = StdRng::seed_from_u64(4);

        let incoming = builder.build(
            0,
            &event(RecordKind::Sms, Direction::Incoming),
            &binding(RecordKind::Sms, Vendor::Stock, "content://sms"),
            &mut rng,
        );
        assert_eq!(incoming.address, "2025551000");
        assert_eq!(
            binding_value(&incoming.bindings, "type"),
            Some(&BindValue::Int(1))
        );
        // "business" has no templates
        assert_eq!(
            binding_value(&incoming.bindings, "body"),
            Some(&BindValue::Str("Default message.".to_string()))
        );
        assert!(binding_value(&incoming.bindings, "creator").is_none());

        // Outgoing goes to CINNA, who has no phone
        let outgoing = builder.build(
            1,
            &event(RecordKind::Sms, Direction::Outgoing),
            &binding(RecordKind::Sms, Vendor::Samsung, "content://sms"),
            &mut rng,
        );
        assert_eq!(outgoing.address, "5551234");
        assert!(binding_value(&outgoing.bindings, "creator").is_some());
    }

    #[test]
    fn test_vendor_call_extras() {
        let directory = directory();
        let config = InjectionConfig::default();
        let catalog = Catalog::builtin();
        let builder = RecordBuilder {
            directory: &directory,
            config: &config,
            catalog: &catalog,
        };
        let mut rng = StdRng::seed_from_u64(4);
        let record = builder.build(
            0,
            &event(RecordKind::Call, Direction::Missed),
            &binding(RecordKind::Call, Vendor::Samsung, "content://logs/call"),
            &mut rng,
        );
        assert_eq!(
            binding_value(&record.bindings, "duration"),
            Some(&BindValue::Long(0))
        );
        assert_eq!(
            binding_value(&record.bindings, "geocoded_location"),
            Some(&BindValue::Str("Rome, GA".to_string()))
        );
        assert_eq!(
            binding_value(&record.bindings, "countryiso"),
            Some(&BindValue::Str("US".to_string()))
        );
        let query = record.read_back_query().to_command();
        assert!(query.contains("number="));
        assert!(query.contains("1700000123456"));
    }

    #[test]
    fn test_mms_parts_and_smil() {
        let directory = directory();
        let config = InjectionConfig::default();
        let catalog = Catalog::builtin();
        let builder = RecordBuilder {
            directory: &directory,
            config: &config,
            catalog: &catalog,
        };
        let mut rng = StdRng::seed_from_u64(4);
        let mut mms_event = event(RecordKind::Mms, Direction::Incoming);
        mms_event.text = Some("See the letter".to_string());
        mms_event.attachment = Some(Attachment {
            content_type: "image/jpeg".to_string(),
            path: Some(PathBuf::from("/tmp/letter.jpg")),
            text: None,
            name: None,
        });

        let stock = builder.build(
            3,
            &mms_event,
            &binding(RecordKind::Mms, Vendor::Stock, "content://mms"),
            &mut rng,
        );
        let plan = stock.mms.as_ref().unwrap();
        assert_eq!(plan.date_secs, 1_700_000_123);
        assert_eq!(plan.msg_box, 1);
        assert_eq!(plan.parts.len(), 2);
        assert_eq!(plan.parts[1].seq, 1);
        assert_eq!(plan.parts[1].name.as_deref(), Some("letter.jpg"));
        assert_eq!(
            binding_value(&plan.parts[1].bindings(9, 3), "_data"),
            Some(&BindValue::Str("/sdcard/stagehand_mms_3_1".to_string()))
        );

        let vendor = builder.build(
            3,
            &mms_event,
            &binding(RecordKind::Mms, Vendor::Samsung, "content://mms"),
            &mut rng,
        );
        let parts = &vendor.mms.as_ref().unwrap().parts;
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].seq, -1);
        assert_eq!(parts[0].content_type, "application/smil");
        assert!(parts[0].text.as_ref().unwrap().contains("letter.jpg"));
        assert!(parts[1..].iter().all(|p| p.content_location.is_some()));
    }

    #[test]
    fn test_video_call_sets_features() {
        let directory = directory();
        let config = InjectionConfig::default();
        let catalog = Catalog::builtin();
        let builder = RecordBuilder {
            directory: &directory,
            config: &config,
            catalog: &catalog,
        };
        let mut rng = StdRng::seed_from_u64(4);
        let stock = binding(RecordKind::Call, Vendor::Stock, "content://call_log/calls");

        let voice = builder.build(0, &event(RecordKind::Call, Direction::Incoming), &stock, &mut rng);
        assert!(binding_value(&voice.bindings, "features").is_none());

        let mut video = event(RecordKind::Call, Direction::Incoming);
        video.video = true;
        let record = builder.build(1, &video, &stock, &mut rng);
        assert_eq!(
            binding_value(&record.bindings, "features"),
            Some(&BindValue::Int(3))
        );
    }

    #[test]
    fn test_group_mms_addresses_every_member() {
        let mut caesar = Character::new("CAESAR");
        caesar.phone = Some("202-555-1000".to_string());
        let mut casca = Character::new("CASCA");
        casca.phone = Some("202-555-1002".to_string());
        let directory =
            CharacterDirectory::new(vec![caesar, Character::new("CINNA"), casca]).unwrap();
        let config = InjectionConfig::default();
        let catalog = Catalog::builtin();
        let builder = RecordBuilder {
            directory: &directory,
            config: &config,
            catalog: &catalog,
        };
        let mut rng = StdRng::seed_from_u64(4);
        let mut group_event = event(RecordKind::Mms, Direction::Incoming);
        group_event.text = Some("Et tu?".to_string());
        group_event.group = Some(GroupThread {
            name: "Ides".to_string(),
            members: vec!["CINNA".to_string(), "CASCA".to_string()],
        });

        let record = builder.build(
            0,
            &group_event,
            &binding(RecordKind::Mms, Vendor::Stock, "content://mms"),
            &mut rng,
        );
        let plan = record.mms.as_ref().unwrap();
        assert_eq!(
            plan.addresses,
            vec![
                MmsAddress {
                    address: "2025551000".to_string(),
                    addr_type: MMS_ADDR_FROM,
                },
                MmsAddress {
                    address: "5551234".to_string(),
                    addr_type: MMS_ADDR_TO,
                },
                MmsAddress {
                    address: "2025551002".to_string(),
                    addr_type: MMS_ADDR_TO,
                },
            ]
        );
        assert_eq!(
            binding_value(&record.bindings, "sub"),
            Some(&BindValue::Str("Ides".to_string()))
        );
        assert_eq!(
            binding_value(&plan.addresses[2].bindings(40), "msg_id"),
            Some(&BindValue::Long(40))
        );
    }
}
