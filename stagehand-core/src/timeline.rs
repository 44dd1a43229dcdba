//! TimelineCompiler: characters and dialogue in, ordered events out.
//!
//! Calls are scattered per pair of characters; messages replay the cast's
//! dialogue on one running clock, character after character. Group chats
//! replay on a clock of their own. Every timestamp is pushed forward into
//! the waking-hours window, and the result is sorted ascending.

use crate::config::TimelineConfig;
use crate::directory::CharacterDirectory;
use crate::types::{
    Character, ContextTag, Direction, GroupChat, GroupThread, RecordKind, TimelineEvent,
};
use chrono::{DateTime, Duration, FixedOffset, Local, TimeZone, Timelike, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;

/// Fewest known members a group chat needs
const MIN_GROUP_MEMBERS: usize = 3;
/// Group messages follow each other within this many minutes
const GROUP_MAX_STEP_MINUTES: u32 = 60;

/// Compiled events plus anything skipped along the way
#[derive(Debug, Clone, Default, Serialize)]
pub struct Timeline {
    pub events: Vec<TimelineEvent>,
    pub warnings: Vec<String>,
}

impl Timeline {
    pub fn count(&self, kind: RecordKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }

    /// Group chat messages (a subset of the MMS count)
    pub fn group_count(&self) -> usize {
        self.events.iter().filter(|e| e.group.is_some()).count()
    }

    pub fn is_sorted(&self) -> bool {
        self.events
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    }
}

/// Offset for the waking-hours window: configured, else the host's.
pub fn resolve_offset(config: &TimelineConfig) -> FixedOffset {
    config
        .utc_offset_minutes
        .and_then(|minutes| FixedOffset::east_opt(minutes * 60))
        .unwrap_or_else(|| *Local::now().offset())
}

pub struct TimelineCompiler {
    config: TimelineConfig,
    offset: FixedOffset,
    rng: StdRng,
}

impl TimelineCompiler {
    pub fn new(config: &TimelineConfig, offset: FixedOffset) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config: config.clone(),
            offset,
            rng,
        }
    }

    /// Compile the full timeline, anchored at `anchor` (usually now).
    pub fn compile(&mut self, directory: &CharacterDirectory, anchor: DateTime<Utc>) -> Timeline {
        let mut timeline = Timeline::default();
        let characters = directory.characters();

        self.compile_calls(characters, anchor, &mut timeline);
        self.compile_messages(characters, anchor, &mut timeline);
        for group in directory.groups() {
            self.compile_group(directory, group, anchor, &mut timeline);
        }

        // Stable: equal timestamps keep generation order
        timeline.events.sort_by_key(|e| e.timestamp);

        tracing::info!(
            sms = timeline.count(RecordKind::Sms),
            mms = timeline.count(RecordKind::Mms),
            group = timeline.group_count(),
            calls = timeline.count(RecordKind::Call),
            skipped = timeline.warnings.len(),
            "timeline compiled"
        );
        timeline
    }

    fn context_for(&self, character: &Character) -> ContextTag {
        character
            .context
            .clone()
            .unwrap_or_else(|| ContextTag::new(&self.config.default_context))
    }

    fn compile_calls(&mut self, characters: &[Character], anchor: DateTime<Utc>, timeline: &mut Timeline) {
        for (i, first) in characters.iter().enumerate() {
            for second in &characters[i + 1..] {
                let count = self
                    .rng
                    .gen_range(self.config.min_calls_per_pair..=self.config.max_calls_per_pair);
                for _ in 0..count {
                    let days_ago = self.rng.gen_range(0..=self.config.call_days_back);
                    let hours = self.rng.gen_range(0..24);
                    let minutes = self.rng.gen_range(0..60);
                    let raw = anchor
                        - Duration::days(days_ago as i64)
                        - Duration::hours(hours)
                        - Duration::minutes(minutes);

                    let (sender, recipient) = if self.rng.gen_bool(0.5) {
                        (first, second)
                    } else {
                        (second, first)
                    };
                    let direction = *[Direction::Incoming, Direction::Outgoing, Direction::Missed]
                        .choose(&mut self.rng)
                        .unwrap_or(&Direction::Incoming);
                    let p = self.config.video_call_probability;
                    let video = p > 0.0 && self.rng.gen_bool(p);

                    timeline.events.push(TimelineEvent {
                        kind: RecordKind::Call,
                        sender: sender.name.clone(),
                        recipient: recipient.name.clone(),
                        timestamp: self.wrap_to_waking_hours(raw).timestamp_millis(),
                        context: self.context_for(sender),
                        direction,
                        text: None,
                        attachment: None,
                        video,
                        group: None,
                    });
                }
            }
        }
    }

    fn compile_messages(&mut self, characters: &[Character], anchor: DateTime<Utc>, timeline: &mut Timeline) {
        // One clock for the whole cast: each character picks up where the previous one stopped
        let mut clock = anchor - Duration::days(self.config.day_span as i64);
        for character in characters.iter().filter(|c| !c.dialogue.is_empty()) {
            let others: Vec<&Character> = characters
                .iter()
                .filter(|c| c.name != character.name)
                .collect();
            if others.is_empty() {
                let warning = format!("{} has dialogue but nobody to send it to", character.name);
                tracing::warn!(character = %character.name, "no counterpart; dialogue skipped");
                timeline.warnings.push(warning);
                continue;
            }

            for line in &character.dialogue {
                let step = self
                    .rng
                    .gen_range(self.config.min_step_minutes..=self.config.max_step_minutes);
                clock += Duration::minutes(step as i64);
                if self.rng.gen_bool(self.config.gap_probability) {
                    let gap = self
                        .rng
                        .gen_range(self.config.min_gap_days..=self.config.max_gap_days);
                    clock += Duration::days(gap as i64);
                }
                clock = self.wrap_to_waking_hours(clock);

                let recipient = match line.to.as_deref() {
                    Some(to) if others.iter().any(|c| c.name == to) => to.to_string(),
                    Some(to) => {
                        timeline.warnings.push(format!(
                            "{}: unknown recipient {}, picked another character",
                            character.name, to
                        ));
                        self.pick(&others)
                    }
                    None => self.pick(&others),
                };

                let direction = if self.rng.gen_bool(0.5) {
                    Direction::Incoming
                } else {
                    Direction::Outgoing
                };

                timeline.events.push(TimelineEvent {
                    kind: if line.attachment.is_some() {
                        RecordKind::Mms
                    } else {
                        RecordKind::Sms
                    },
                    sender: character.name.clone(),
                    recipient,
                    timestamp: clock.timestamp_millis(),
                    context: self.context_for(character),
                    direction,
                    text: Some(line.text.clone()),
                    attachment: line.attachment.clone(),
                    video: false,
                    group: None,
                });
            }
        }
    }

    /// Replay a group chat as incoming group MMS, one per line.
    ///
    /// Lines come from the group itself, or else from members' dialogue
    /// short enough for a group thread.
    fn compile_group(
        &mut self,
        directory: &CharacterDirectory,
        group: &GroupChat,
        anchor: DateTime<Utc>,
        timeline: &mut Timeline,
    ) {
        let mut members: Vec<&Character> = Vec::new();
        for name in &group.members {
            match directory.get(name) {
                Some(c) if !members.iter().any(|m| m.name == c.name) => members.push(c),
                Some(_) => {}
                None => timeline
                    .warnings
                    .push(format!("{}: unknown member {}", group.name, name)),
            }
        }
        if members.len() < MIN_GROUP_MEMBERS {
            tracing::warn!(group = %group.name, members = members.len(), "group chat skipped");
            timeline.warnings.push(format!(
                "{}: a group chat needs at least {} known members",
                group.name, MIN_GROUP_MEMBERS
            ));
            return;
        }

        let mut lines: Vec<(&Character, &str)> = Vec::new();
        if group.lines.is_empty() {
            for &member in &members {
                for line in &member.dialogue {
                    if line.text.chars().count() < self.config.group_line_max_chars {
                        lines.push((member, line.text.as_str()));
                    }
                }
            }
        } else {
            for line in &group.lines {
                match members.iter().find(|m| m.name == line.from) {
                    Some(&member) => lines.push((member, line.text.as_str())),
                    None => timeline.warnings.push(format!(
                        "{}: line from non-member {} skipped",
                        group.name, line.from
                    )),
                }
            }
        }

        let mut clock = anchor - Duration::days(self.config.day_span as i64);
        for (sender, text) in lines {
            let step = self.rng.gen_range(1..=GROUP_MAX_STEP_MINUTES);
            clock = self.wrap_to_waking_hours(clock + Duration::minutes(step as i64));

            let others: Vec<String> = members
                .iter()
                .filter(|m| m.name != sender.name)
                .map(|m| m.name.clone())
                .collect();
            timeline.events.push(TimelineEvent {
                kind: RecordKind::Mms,
                sender: sender.name.clone(),
                recipient: others.first().cloned().unwrap_or_default(),
                timestamp: clock.timestamp_millis(),
                context: self.context_for(sender),
                direction: Direction::Incoming,
                text: Some(text.to_string()),
                attachment: None,
                video: false,
                group: Some(GroupThread {
                    name: group.name.clone(),
                    members: others,
                }),
            });
        }
    }

    fn pick(&mut self, others: &[&Character]) -> String {
        others
            .choose(&mut self.rng)
            .map(|c| c.name.clone())
            .unwrap_or_default()
    }

    /// Advance hour by hour until the local hour is inside the waking window.
    pub fn wrap_to_waking_hours(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let mut ts = ts;
        loop {
            let hour = self.offset.from_utc_datetime(&ts.naive_utc()).hour();
            if hour >= self.config.waking_start_hour && hour <= self.config.waking_end_hour {
                return ts;
            }
            ts += Duration::hours(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DialogueLine;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn seeded(seed: u64) -> TimelineConfig {
        TimelineConfig {
            seed: Some(seed),
            ..Default::default()
        }
    }

    fn character(name: &str, lines: usize) -> Character {
        let mut c = Character::new(name);
        c.dialogue = (0..lines)
            .map(|i| DialogueLine::text(format!("{} line {}", name, i)))
            .collect();
        c
    }

    #[test]
    fn test_wrap_rule() {
        let compiler = TimelineCompiler::new(&seeded(1), utc());
        let at_3am = Utc.with_ymd_and_hms(2024, 5, 1, 3, 15, 0).unwrap();
        assert_eq!(
            compiler.wrap_to_waking_hours(at_3am),
            Utc.with_ymd_and_hms(2024, 5, 1, 7, 15, 0).unwrap()
        );
        let at_noon = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(compiler.wrap_to_waking_hours(at_noon), at_noon);
        let at_11pm = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();
        assert_eq!(compiler.wrap_to_waking_hours(at_11pm), at_11pm);
    }

    #[test]
    fn test_wrap_respects_offset() {
        // 10:00 UTC is 05:00 at UTC-5
        let est = FixedOffset::west_opt(5 * 3600).unwrap();
        let compiler = TimelineCompiler::new(&seeded(1), est);
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            compiler.wrap_to_waking_hours(ts),
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_two_characters_one_day() {
        let directory =
            CharacterDirectory::new(vec![character("ROMEO", 5), character("JULIET", 5)]).unwrap();
        let config = TimelineConfig {
            day_span: 1,
            ..seeded(7)
        };
        let anchor = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let timeline = TimelineCompiler::new(&config, utc()).compile(&directory, anchor);

        assert_eq!(timeline.count(RecordKind::Sms), 10);
        assert!((1..=3).contains(&timeline.count(RecordKind::Call)));
        assert!(timeline.is_sorted());
        for event in &timeline.events {
            let hour = event.timestamp_utc().hour();
            assert!((7..=23).contains(&hour), "hour {} out of window", hour);
            assert_ne!(event.sender, event.recipient);
        }
    }

    #[test]
    fn test_same_seed_same_timeline() {
        let directory = CharacterDirectory::new(vec![
            character("HAMLET", 4),
            character("HORATIO", 2),
            character("OPHELIA", 3),
        ])
        .unwrap();
        let anchor = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let a = TimelineCompiler::new(&seeded(99), utc()).compile(&directory, anchor);
        let b = TimelineCompiler::new(&seeded(99), utc()).compile(&directory, anchor);
        assert_eq!(a.events, b.events);
    }

    #[test]
    fn test_lone_character_skipped() {
        let directory = CharacterDirectory::new(vec![character("YORICK", 3)]).unwrap();
        let timeline = TimelineCompiler::new(&seeded(3), utc()).compile(&directory, Utc::now());
        assert!(timeline.events.is_empty());
        assert_eq!(timeline.warnings.len(), 1);
    }

    #[test]
    fn test_attachment_and_recipient() {
        let mut sender = Character::new("IAGO");
        sender.dialogue = vec![DialogueLine {
            text: "The handkerchief".to_string(),
            to: Some("OTHELLO".to_string()),
            attachment: Some(crate::types::Attachment {
                content_type: "text/plain".to_string(),
                path: None,
                text: Some("proof".to_string()),
                name: None,
            }),
        }];
        let directory = CharacterDirectory::new(vec![
            sender,
            Character::new("OTHELLO"),
            Character::new("CASSIO"),
        ])
        .unwrap();
        let config = TimelineConfig {
            min_calls_per_pair: 0,
            max_calls_per_pair: 0,
            ..seeded(5)
        };
        let timeline = TimelineCompiler::new(&config, utc()).compile(&directory, Utc::now());
        assert_eq!(timeline.events.len(), 1);
        let event = &timeline.events[0];
        assert_eq!(event.kind, RecordKind::Mms);
        assert_eq!(event.recipient, "OTHELLO");
        assert_eq!(event.context.as_str(), "general");
    }

    fn without_calls(seed: u64) -> TimelineConfig {
        TimelineConfig {
            min_calls_per_pair: 0,
            max_calls_per_pair: 0,
            ..seeded(seed)
        }
    }

    fn span(timeline: &Timeline, sender: &str) -> (i64, i64) {
        let stamps: Vec<i64> = timeline
            .events
            .iter()
            .filter(|e| e.sender == sender)
            .map(|e| e.timestamp)
            .collect();
        (
            *stamps.iter().min().unwrap(),
            *stamps.iter().max().unwrap(),
        )
    }

    #[test]
    fn test_dialogue_clock_continues_across_characters() {
        let directory =
            CharacterDirectory::new(vec![character("HAMLET", 20), character("OPHELIA", 20)])
                .unwrap();
        let config = TimelineConfig {
            day_span: 30,
            ..without_calls(3)
        };
        let anchor = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let timeline = TimelineCompiler::new(&config, utc()).compile(&directory, anchor);

        assert_eq!(timeline.count(RecordKind::Sms), 40);
        let (hamlet_first, hamlet_last) = span(&timeline, "HAMLET");
        let (ophelia_first, _) = span(&timeline, "OPHELIA");
        let start = (anchor - Duration::days(30)).timestamp_millis();
        assert!(hamlet_first > start);
        assert!(
            ophelia_first >= hamlet_last,
            "OPHELIA starts at {} before HAMLET ends at {}",
            ophelia_first,
            hamlet_last
        );
    }

    #[test]
    fn test_video_call_probability() {
        let directory = CharacterDirectory::new(vec![
            character("ROMEO", 0),
            character("JULIET", 0),
            character("MERCUTIO", 0),
        ])
        .unwrap();
        let anchor = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        let always = TimelineConfig {
            video_call_probability: 1.0,
            ..seeded(11)
        };
        let timeline = TimelineCompiler::new(&always, utc()).compile(&directory, anchor);
        assert!(timeline.count(RecordKind::Call) >= 3);
        assert!(timeline.events.iter().all(|e| e.video));

        let timeline = TimelineCompiler::new(&seeded(11), utc()).compile(&directory, anchor);
        assert!(timeline.events.iter().all(|e| !e.video));
    }

    fn council() -> Vec<Character> {
        vec![
            character("CLAUDIUS", 0),
            character("GERTRUDE", 0),
            character("POLONIUS", 0),
            character("HAMLET", 0),
        ]
    }

    #[test]
    fn test_group_lines_become_group_mms() {
        let group = GroupChat {
            name: "Royal Court".to_string(),
            members: vec![
                "CLAUDIUS".to_string(),
                "GERTRUDE".to_string(),
                "POLONIUS".to_string(),
                "LAERTES".to_string(),
            ],
            admin: Some("CLAUDIUS".to_string()),
            lines: vec![
                crate::types::GroupLine {
                    from: "CLAUDIUS".to_string(),
                    text: "Everything's fine here".to_string(),
                },
                crate::types::GroupLine {
                    from: "POLONIUS".to_string(),
                    text: "Brevity is the soul of wit".to_string(),
                },
                crate::types::GroupLine {
                    from: "HAMLET".to_string(),
                    text: "Words, words, words".to_string(),
                },
            ],
        };
        let directory = CharacterDirectory::new(council())
            .unwrap()
            .with_groups(vec![group])
            .unwrap();
        let anchor = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let timeline = TimelineCompiler::new(&without_calls(8), utc()).compile(&directory, anchor);

        assert_eq!(timeline.group_count(), 2);
        assert_eq!(timeline.count(RecordKind::Mms), 2);
        assert!(timeline.is_sorted());
        let first = &timeline.events[0];
        assert_eq!(first.sender, "CLAUDIUS");
        assert_eq!(first.direction, Direction::Incoming);
        assert_eq!(first.recipient, "GERTRUDE");
        let thread = first.group.as_ref().unwrap();
        assert_eq!(thread.name, "Royal Court");
        assert_eq!(thread.members, vec!["GERTRUDE", "POLONIUS"]);
        // LAERTES is not in the directory, HAMLET is not in the group
        assert_eq!(timeline.warnings.len(), 2);
    }

    #[test]
    fn test_group_without_lines_replays_short_dialogue() {
        let mut cast = council();
        cast[0].dialogue = vec![
            DialogueLine::text("Our sometime sister, now our queen"),
            DialogueLine::text("x".repeat(120)),
        ];
        cast[1].dialogue = vec![DialogueLine::text("The lady doth protest too much")];
        let group = GroupChat {
            name: "Family".to_string(),
            members: vec![
                "CLAUDIUS".to_string(),
                "GERTRUDE".to_string(),
                "HAMLET".to_string(),
            ],
            admin: None,
            lines: Vec::new(),
        };
        let directory = CharacterDirectory::new(cast)
            .unwrap()
            .with_groups(vec![group])
            .unwrap();
        let timeline =
            TimelineCompiler::new(&without_calls(2), utc()).compile(&directory, Utc::now());

        // Three one-to-one lines, two short enough for the group
        assert_eq!(timeline.count(RecordKind::Sms), 3);
        assert_eq!(timeline.group_count(), 2);
        for event in timeline.events.iter().filter(|e| e.group.is_some()) {
            assert_eq!(event.kind, RecordKind::Mms);
            assert_eq!(event.group.as_ref().unwrap().members.len(), 2);
        }
    }

    #[test]
    fn test_small_group_skipped() {
        let group = GroupChat {
            name: "Pair".to_string(),
            members: vec!["CLAUDIUS".to_string(), "GERTRUDE".to_string()],
            admin: None,
            lines: vec![crate::types::GroupLine {
                from: "CLAUDIUS".to_string(),
                text: "Hello".to_string(),
            }],
        };
        let directory = CharacterDirectory::new(council())
            .unwrap()
            .with_groups(vec![group])
            .unwrap();
        let timeline =
            TimelineCompiler::new(&without_calls(2), utc()).compile(&directory, Utc::now());
        assert!(timeline.events.is_empty());
        assert_eq!(timeline.warnings.len(), 1);
    }
}
