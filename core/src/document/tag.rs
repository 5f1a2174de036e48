use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A named label attached to documents.
///
/// Tags are identified by their name. Surrounding whitespace is trimmed when a tag is created,
/// so `" worship "` and `"worship"` are the same tag. Names are case-preserving and compared
/// case-sensitively.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Tag name must not be empty")]
pub struct EmptyTagName;

impl Tag {
    pub fn new(name: impl AsRef<str>) -> Result<Self, EmptyTagName> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(EmptyTagName);
        }
        Ok(Tag(name.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Tag {
    type Err = EmptyTagName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::new(s)
    }
}

impl TryFrom<String> for Tag {
    type Error = EmptyTagName;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tag::new(value)
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_trims_and_rejects_empty() {
        assert_eq!(Tag::new("  hymn ").unwrap().name(), "hymn");
        assert_eq!(Tag::new("   "), Err(EmptyTagName));
        assert_eq!(Tag::new("hymn").unwrap(), "hymn ".parse::<Tag>().unwrap());
    }

    #[test]
    fn test_tag_serde_validates() {
        let tag: Tag = serde_json::from_str("\"Easter\"").unwrap();
        assert_eq!(tag.name(), "Easter");
        assert_eq!(serde_json::to_string(&tag).unwrap(), "\"Easter\"");
        assert!(serde_json::from_str::<Tag>("\"\"").is_err());
    }
}
