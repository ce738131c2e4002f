// Copyright (c) 2022 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    EmptyTopic,
    TooManyData,
    InvalidChar,
    ContainsWildChar,
}

/// A parsed topic filter which can be matched against topic names.
///
/// Filter rules are defined in MQTT chapter-4.7 `Topic Name and Filters`.
#[derive(Debug, Default, Clone, Eq, PartialOrd, Ord, Hash)]
pub struct Topic {
    topic: String,
    parts: Vec<TopicPart>,
}

impl PartialEq for Topic {
    fn eq(&self, other: &Self) -> bool {
        self.topic.eq(&other.topic)
    }
}

impl Topic {
    /// Parse a topic filter into parts.
    ///
    /// # Errors
    ///
    /// Returns error if `s` violates the filter rules.
    pub fn parse(s: &str) -> Result<Self, TopicError> {
        validate_sub_topic(s)?;
        let parts = Self::parse_parts(s)?;
        Ok(Self {
            topic: s.to_string(),
            parts,
        })
    }

    fn parse_parts(s: &str) -> Result<Vec<TopicPart>, TopicError> {
        s.split('/').map(TopicPart::parse).collect()
    }

    /// Check whether this filter matches topic name `s`.
    ///
    /// The multi-level wildcard matches the parent level as well, so `sport/#`
    /// matches both `sport` and `sport/tennis`. Wildcards at the first level
    /// never match topic names starting with `$` [MQTT-4.7.2-1].
    #[must_use]
    pub fn is_match(&self, s: &str) -> bool {
        let levels: Vec<&str> = s.split('/').collect();
        for (index, part) in self.parts.iter().enumerate() {
            match part {
                TopicPart::MultiWildcard => {
                    if index == 0 && is_internal(levels[0]) {
                        return false;
                    }
                    return true;
                }
                TopicPart::SingleWildcard => {
                    if index >= levels.len() {
                        return false;
                    }
                    if index == 0 && is_internal(levels[0]) {
                        return false;
                    }
                }
                TopicPart::Normal(ref literal) | TopicPart::Internal(ref literal) => {
                    if index >= levels.len() || literal != levels[index] {
                        return false;
                    }
                }
                TopicPart::Empty => {
                    if index >= levels.len() || !levels[index].is_empty() {
                        return false;
                    }
                }
            }
        }
        // `sport/tennis` must not match the longer name `sport/tennis/player`.
        self.parts.len() == levels.len()
    }

    /// Get original filter string.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get byte length of filter string.
    #[must_use]
    pub fn len(&self) -> usize {
        self.topic.len()
    }

    /// Returns true if filter string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.topic.is_empty()
    }
}

fn is_internal(level: &str) -> bool {
    level.starts_with('$')
}

/// Validate topic filter.
///
/// ```
/// use lian_codec::topic::validate_sub_topic;
///
/// assert!(validate_sub_topic("sport/tennis/player/#").is_ok());
/// assert!(validate_sub_topic("sport/tennis/player#").is_err());
/// assert!(validate_sub_topic("#").is_ok());
/// assert!(validate_sub_topic("sport/#/player/ranking").is_err());
/// assert!(validate_sub_topic("+").is_ok());
/// assert!(validate_sub_topic("sport+").is_err());
/// ```
///
/// # Errors
///
/// Returns error if `topic` violates the rules in MQTT chapter-4.7.
pub fn validate_sub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if topic.len() > u16::MAX as usize {
        return Err(TopicError::TooManyData);
    }
    if topic == "#" {
        return Ok(());
    }
    let bytes = topic.as_bytes();
    for (index, b) in bytes.iter().enumerate() {
        if b == &b'#' {
            // Must occupy an entire level and must be the last level
            // [MQTT-4.7.1-2].
            if index > 0 && bytes[index - 1] != b'/' {
                return Err(TopicError::InvalidChar);
            }
            if index != bytes.len() - 1 {
                return Err(TopicError::InvalidChar);
            }
        } else if b == &b'+' {
            // Must occupy an entire level [MQTT-4.7.1-3].
            if index > 0 && bytes[index - 1] != b'/' {
                return Err(TopicError::InvalidChar);
            }
            if index + 1 < bytes.len() && bytes[index + 1] != b'/' {
                return Err(TopicError::InvalidChar);
            }
        }
    }

    Ok(())
}

/// Check whether topic name contains wildcard characters.
///
/// ```
/// use lian_codec::topic::validate_pub_topic;
///
/// assert!(validate_pub_topic("sport/tennis/player/#").is_err());
/// assert!(validate_pub_topic("sport/tennis/player/ranking").is_ok());
/// ```
///
/// # Errors
///
/// Returns error if `topic` is empty, too long or contains `+`/`#`.
pub fn validate_pub_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if topic.len() > u16::MAX as usize {
        return Err(TopicError::TooManyData);
    }

    if topic.bytes().any(|c| c == b'+' || c == b'#') {
        Err(TopicError::InvalidChar)
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TopicPart {
    /// Special internal part, like `$SYS`.
    /// Topics starting with `$` char are treated as internal topics, even so
    /// only `$SYS` is used currently.
    Internal(String),

    /// Normal part.
    Normal(String),

    /// Empty part.
    Empty,

    /// `#` char, to match any remaining parts.
    MultiWildcard,

    /// `+` char, to match one part.
    SingleWildcard,
}

impl TopicPart {
    fn has_wildcard(s: &str) -> bool {
        s.contains(|c| c == '#' || c == '+')
    }

    fn is_internal(s: &str) -> bool {
        s.starts_with('$')
    }

    fn parse(s: &str) -> Result<Self, TopicError> {
        match s {
            "" => Ok(Self::Empty),
            "+" => Ok(Self::SingleWildcard),
            "#" => Ok(Self::MultiWildcard),
            _ => {
                if Self::has_wildcard(s) {
                    Err(TopicError::ContainsWildChar)
                } else if Self::is_internal(s) {
                    Ok(Self::Internal(s.to_string()))
                } else {
                    Ok(Self::Normal(s.to_string()))
                }
            }
        }
    }
}

impl Default for TopicPart {
    fn default() -> Self {
        Self::Empty
    }
}

/// Topic name used in Publish packets, free of wildcard characters.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PubTopic(String);

impl PubTopic {
    /// Create a new publish topic.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is empty, too long or contains wildcard characters.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        validate_pub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = ba.read_string()?;
        validate_pub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

/// Topic filter used in Subscribe/Unsubscribe packets, may contain wildcards.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubTopic(String);

impl SubTopic {
    /// Create a new topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` violates the filter rules.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        validate_sub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let s = ba.read_string()?;
        validate_sub_topic(&s)?;
        Ok(Self(s))
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert!(Topic::parse("$SYS/uptime").is_ok());
        assert!(Topic::parse("sport/+/player").is_ok());
        assert!(Topic::parse("sport/ten+nis").is_err());
        assert!(Topic::parse("").is_err());
    }

    #[test]
    fn test_literal_match() {
        let t = Topic::parse("sport/tennis").unwrap();
        assert!(t.is_match("sport/tennis"));
        assert!(!t.is_match("sport"));
        assert!(!t.is_match("sport/tennis/player"));
    }

    #[test]
    fn test_single_wildcard_match() {
        let t = Topic::parse("sport/+/player").unwrap();
        assert!(t.is_match("sport/tennis/player"));
        assert!(t.is_match("sport/golf/player"));
        assert!(!t.is_match("sport/tennis"));
        assert!(!t.is_match("sport/tennis/player/ranking"));

        let t = Topic::parse("+").unwrap();
        assert!(t.is_match("finance"));
        assert!(!t.is_match("finance/quotes"));
    }

    #[test]
    fn test_multi_wildcard_match() {
        let t = Topic::parse("dev/#").unwrap();
        assert!(t.is_match("dev/cpu/0"));
        assert!(t.is_match("dev"));
        assert!(!t.is_match("device"));

        let t = Topic::parse("#").unwrap();
        assert!(t.is_match("a/b/c"));
    }

    #[test]
    fn test_internal_topics_hidden_from_wildcards() {
        let t = Topic::parse("#").unwrap();
        assert!(!t.is_match("$SYS/uptime"));

        let t = Topic::parse("+/uptime").unwrap();
        assert!(!t.is_match("$SYS/uptime"));

        let t = Topic::parse("$SYS/#").unwrap();
        assert!(t.is_match("$SYS/uptime"));
    }

    #[test]
    fn test_empty_levels() {
        let t = Topic::parse("a//b").unwrap();
        assert!(t.is_match("a//b"));
        assert!(!t.is_match("a/b"));
    }

    #[test]
    fn test_pub_topic_rejects_wildcards() {
        assert!(PubTopic::new("a/b").is_ok());
        assert_eq!(PubTopic::new("a/+/b"), Err(TopicError::InvalidChar));
        assert_eq!(PubTopic::new(""), Err(TopicError::EmptyTopic));
    }
}
