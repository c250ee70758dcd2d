use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A physical door guarded by its own lock controller.
///
/// The facility has exactly two: the internal (upstairs) door and the
/// external (downstairs) door.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Door {
    Upstairs,
    Downstairs,
}

impl Door {
    /// Both doors, upstairs first.
    pub const ALL: [Door; 2] = [Door::Upstairs, Door::Downstairs];

    /// Name of the serial port the door's controller is attached to.
    #[must_use]
    pub fn port_name(self) -> &'static str {
        match self {
            Door::Upstairs => "door_up",
            Door::Downstairs => "door_down",
        }
    }

    /// Returns `true` if a tag with `level` may be loaded into this door's controller.
    #[inline]
    #[must_use]
    pub fn admits(self, level: AccessLevel) -> bool {
        match self {
            Door::Upstairs => level == AccessLevel::Both,
            Door::Downstairs => matches!(level, AccessLevel::DownstairsOnly | AccessLevel::Both),
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Door::Upstairs => 0,
            Door::Downstairs => 1,
        }
    }
}

impl fmt::Display for Door {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.port_name())
    }
}

impl FromStr for Door {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "door_up" | "upstairs" | "internaldoor" => Ok(Door::Upstairs),
            "door_down" | "downstairs" | "externaldoor" => Ok(Door::Downstairs),
            _ => Err(Error::UnknownDoor(s.to_string())),
        }
    }
}

/// Which doors a tag opens.
///
/// Deserialized leniently through [`AccessLevel::from_db`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum AccessLevel {
    #[default]
    None,
    DownstairsOnly,
    Both,
}

impl AccessLevel {
    /// Parse the membership database's access column.
    ///
    /// Anything other than `DOWNSTAIRS` or `BOTH` grants no door.
    #[must_use]
    pub fn from_db(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DOWNSTAIRS" | "DOWNSTAIRS_ONLY" => AccessLevel::DownstairsOnly,
            "BOTH" => AccessLevel::Both,
            _ => AccessLevel::None,
        }
    }
}

impl From<String> for AccessLevel {
    fn from(value: String) -> Self {
        AccessLevel::from_db(&value)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AccessLevel::None => write!(f, "NONE"),
            AccessLevel::DownstairsOnly => write!(f, "DOWNSTAIRS"),
            AccessLevel::Both => write!(f, "BOTH"),
        }
    }
}

/// A credential known to the membership store.
///
/// Two tags are equal when id, PIN and level all match. The id is
/// normalized to uppercase on construction and the tag is immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TagRecord", into = "TagRecord")]
pub struct Tag {
    id: String,
    pin: String,
    level: AccessLevel,
}

impl Tag {
    /// Create a tag.
    ///
    /// # Errors
    /// Returns `Error::InvalidTagId` if the id is empty or contains anything
    /// but ASCII alphanumerics, and `Error::InvalidPin` if the PIN contains
    /// whitespace or non-ASCII characters (the controller protocol separates
    /// id and PIN with a single space).
    pub fn new(id: &str, pin: &str, level: AccessLevel) -> Result<Self> {
        let id = id.trim().to_ascii_uppercase();
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidTagId(id));
        }
        if !pin.is_ascii() || pin.chars().any(|c| c.is_ascii_whitespace()) {
            return Err(Error::InvalidPin { tag: id });
        }
        Ok(Tag {
            id,
            pin: pin.to_string(),
            level,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn pin(&self) -> &str {
        &self.pin
    }

    #[must_use]
    pub fn level(&self) -> AccessLevel {
        self.level
    }

    /// Returns `true` if the tag grants any door at all.
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.level != AccessLevel::None
    }
}

/// Serialized shape of a [`Tag`], as found in roster files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: String,
    pub pin: String,
    #[serde(default)]
    pub access: AccessLevel,
}

impl TryFrom<TagRecord> for Tag {
    type Error = Error;

    fn try_from(record: TagRecord) -> Result<Self> {
        Tag::new(&record.id, &record.pin, record.access)
    }
}

impl From<Tag> for TagRecord {
    fn from(tag: Tag) -> Self {
        TagRecord {
            id: tag.id,
            pin: tag.pin,
            access: tag.level,
        }
    }
}

/// The `"<id> <pin>"` record uploaded to a lock controller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRecord(String);

impl KeyRecord {
    #[must_use]
    pub fn for_tag(tag: &Tag) -> Self {
        KeyRecord(format!("{} {}", tag.id, tag.pin))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The current list of valid credentials, sorted by tag id.
///
/// A roster is never patched in place: a change produces a new `Roster`
/// that replaces the old one as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    tags: Vec<Tag>,
}

impl Roster {
    /// Build a roster, sorting by tag id.
    #[must_use]
    pub fn new(mut tags: Vec<Tag>) -> Self {
        tags.sort_by(|a, b| a.id.cmp(&b.id));
        Roster { tags }
    }

    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Look up a tag by id (case-insensitive).
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Tag> {
        let id = id.to_ascii_uppercase();
        self.tags
            .binary_search_by(|t| t.id.as_str().cmp(id.as_str()))
            .ok()
            .map(|i| &self.tags[i])
    }

    /// Returns `true` if `id` belongs to a current member.
    #[must_use]
    pub fn is_member(&self, id: &str) -> bool {
        self.get(id).is_some_and(Tag::is_member)
    }

    /// Key records for `door`, in roster order.
    #[must_use]
    pub fn key_records(&self, door: Door) -> Vec<KeyRecord> {
        self.tags
            .iter()
            .filter(|t| door.admits(t.level))
            .map(KeyRecord::for_tag)
            .collect()
    }
}

impl FromIterator<Tag> for Roster {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Roster::new(iter.into_iter().collect())
    }
}
