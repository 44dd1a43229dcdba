//! Character directory and contact-list inputs.
//!
//! Both are produced upstream and read here without modification, except
//! that a VCF contact list may fill in phone numbers a character lacks.

use crate::error::{Error, Result};
use crate::types::{normalize_phone, Character, GroupChat, ModernDetails};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Deserialize)]
#[serde(untagged)]
enum DirectoryFile {
    Wrapped {
        characters: Vec<Character>,
        #[serde(default)]
        groups: Vec<GroupChat>,
    },
    Bare(Vec<Character>),
}

/// Named participants, looked up by character name.
#[derive(Debug, Clone, Default)]
pub struct CharacterDirectory {
    characters: Vec<Character>,
    groups: Vec<GroupChat>,
}

impl CharacterDirectory {
    /// Build from characters; names must be unique.
    pub fn new(characters: Vec<Character>) -> Result<Self> {
        let mut seen = HashSet::new();
        for character in &characters {
            if character.name.trim().is_empty() {
                return Err(Error::Directory("character with empty name".to_string()));
            }
            if !seen.insert(character.name.as_str()) {
                return Err(Error::Directory(format!(
                    "duplicate character: {}",
                    character.name
                )));
            }
        }
        Ok(Self {
            characters,
            groups: Vec::new(),
        })
    }

    /// Attach group chats; names must be unique and non-empty.
    ///
    /// Unknown members are tolerated here and dropped when the timeline is
    /// compiled.
    pub fn with_groups(mut self, groups: Vec<GroupChat>) -> Result<Self> {
        let mut seen = HashSet::new();
        for group in &groups {
            if group.name.trim().is_empty() {
                return Err(Error::Directory("group with empty name".to_string()));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(Error::Directory(format!("duplicate group: {}", group.name)));
            }
        }
        self.groups = groups;
        Ok(self)
    }

    /// Load `{"characters": [...], "groups": [...]}` or a bare character
    /// array from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Directory(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: DirectoryFile = serde_json::from_str(json)?;
        match file {
            DirectoryFile::Wrapped { characters, groups } => {
                Self::new(characters)?.with_groups(groups)
            }
            DirectoryFile::Bare(characters) => Self::new(characters),
        }
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn groups(&self) -> &[GroupChat] {
        &self.groups
    }

    pub fn get(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    /// Resolved, normalized phone for a character
    pub fn phone_for(&self, name: &str) -> Option<String> {
        self.get(name).and_then(Character::phone_number)
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// Give phoneless characters the number of a contact with the same name.
    ///
    /// Matches the character name or display name, ignoring case. Returns how
    /// many characters were updated.
    pub fn seed_phones(&mut self, contacts: &[Contact]) -> usize {
        let mut seeded = 0;
        for character in &mut self.characters {
            if character.phone_number().is_some() {
                continue;
            }
            let found = contacts.iter().find(|contact| {
                contact.name.eq_ignore_ascii_case(&character.name)
                    || contact.name.eq_ignore_ascii_case(character.display())
            });
            if let Some(contact) = found {
                tracing::debug!(character = %character.name, phone = %contact.phone, "phone seeded from contacts");
                character
                    .modern_details
                    .get_or_insert_with(ModernDetails::default)
                    .phone = Some(contact.phone.clone());
                seeded += 1;
            }
        }
        seeded
    }
}

/// One VCF entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    /// Normalized phone number
    pub phone: String,
}

/// Parse `FN:` / `TEL...:` pairs from VCF text. Cell numbers are preferred.
pub fn parse_vcf(text: &str) -> Vec<Contact> {
    text.split("BEGIN:VCARD")
        .filter_map(|card| {
            let mut name = None;
            let mut cell = None;
            let mut other = None;
            for line in card.lines().map(str::trim) {
                if let Some(fn_value) = line.strip_prefix("FN:") {
                    name = Some(fn_value.trim().to_string());
                } else if line.starts_with("TEL") {
                    let Some((params, number)) = line.split_once(':') else {
                        continue;
                    };
                    let number = normalize_phone(number);
                    if number.is_empty() {
                        continue;
                    }
                    if params.to_ascii_uppercase().contains("CELL") {
                        cell.get_or_insert(number);
                    } else {
                        other.get_or_insert(number);
                    }
                }
            }
            Some(Contact {
                name: name.filter(|n| !n.is_empty())?,
                phone: cell.or(other)?,
            })
        })
        .collect()
}

pub fn load_vcf(path: &Path) -> Result<Vec<Contact>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Directory(format!("failed to read {:?}: {}", path, e)))?;
    Ok(parse_vcf(&text))
}
