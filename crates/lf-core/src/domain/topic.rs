//! Hierarchical topics and subscription patterns.
//!
//! A **topic** names what a message is about, for example
//! `machine.line3.press2.status`.  It is a non-empty list of *segments*
//! separated by a delimiter.  Clients may use either `.` or `/` as the
//! delimiter; the hub always stores the canonical dotted form, so
//! `machine/line3/press2/status` and `machine.line3.press2.status` are the
//! same topic.
//!
//! A **pattern** is what a subscriber asks for.  It is either:
//!
//! - an exact topic (`line1.temp` matches only `line1.temp`), or
//! - a prefix wildcard whose final segment is `*` (`line1.*` matches
//!   `line1.temp` and `line1.press.status`, but not `line1` itself and not
//!   `line10.temp`).  The bare pattern `*` matches every topic.
//!
//! Matching is case-sensitive and works on whole segments only.
//!
//! # Grammar
//!
//! ```text
//! topic    = segment *( ("." / "/") segment )
//! pattern  = topic / topic ("." / "/") "*" / "*"
//! segment  = 1*( ALPHA / DIGIT / "_" / "-" )
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical segment delimiter.
pub const DELIMITER: char = '.';

/// Alternative delimiter accepted on input and rewritten to [`DELIMITER`].
pub const ALT_DELIMITER: char = '/';

/// Wildcard segment allowed as the last segment of a [`TopicPattern`].
pub const WILDCARD: &str = "*";

/// Bounds applied while parsing topics and patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicLimits {
    /// Maximum length of the canonical string, in bytes.
    pub max_length: usize,
    /// Maximum number of segments (the wildcard counts as one).
    pub max_segments: usize,
}

impl Default for TopicLimits {
    fn default() -> Self {
        Self {
            max_length: 256,
            max_segments: 16,
        }
    }
}

/// Reasons a topic or pattern string is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("topic is empty")]
    Empty,

    #[error("topic is {length} bytes long, limit is {max}")]
    TooLong { length: usize, max: usize },

    #[error("topic has {count} segments, limit is {max}")]
    TooManySegments { count: usize, max: usize },

    #[error("segment {position} is empty")]
    EmptySegment { position: usize },

    #[error("invalid character {character:?} in segment {segment:?}")]
    InvalidCharacter { segment: String, character: char },

    /// `*` used in a publish topic.
    #[error("wildcards are not allowed in a publish topic")]
    WildcardInTopic,

    /// `*` used anywhere other than the final segment of a pattern.
    #[error("wildcard is only allowed as the final segment")]
    MisplacedWildcard,
}

// ── Topic ─────────────────────────────────────────────────────────────────────

/// A validated, canonical (dot-delimited) publish topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic(String);

impl Topic {
    /// Parses `raw` using [`TopicLimits::default`].
    ///
    /// # Errors
    ///
    /// Returns a [`TopicError`] describing the first rule `raw` breaks.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lf_core::Topic;
    ///
    /// let topic = Topic::parse("machine/line3/press2/status").unwrap();
    /// assert_eq!(topic.as_str(), "machine.line3.press2.status");
    /// ```
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        Self::parse_with(raw, &TopicLimits::default())
    }

    /// Parses `raw` under explicit limits.
    ///
    /// # Errors
    ///
    /// Returns a [`TopicError`] describing the first rule `raw` breaks.
    pub fn parse_with(raw: &str, limits: &TopicLimits) -> Result<Self, TopicError> {
        let canonical = normalise(raw, limits)?;
        for (position, segment) in canonical.split(DELIMITER).enumerate() {
            if segment == WILDCARD {
                return Err(TopicError::WildcardInTopic);
            }
            check_segment(segment, position)?;
        }
        Ok(Self(canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(DELIMITER)
    }

    pub fn segment_count(&self) -> usize {
        self.0.matches(DELIMITER).count() + 1
    }

    /// Every proper prefix of the topic, shortest first.
    ///
    /// For `a.b.c` this yields `a` and `a.b`.  These are exactly the literal
    /// prefixes a wildcard pattern may carry and still match this topic, which
    /// is what lets the router look up wildcard subscribers in
    /// O(segments) instead of scanning every pattern.
    pub fn proper_prefixes(&self) -> impl Iterator<Item = &str> {
        self.0
            .char_indices()
            .filter(|(_, c)| *c == DELIMITER)
            .map(move |(i, _)| &self.0[..i])
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::parse(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.0
    }
}

// ── TopicPattern ──────────────────────────────────────────────────────────────

/// A validated subscription pattern: an exact topic or a prefix wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicPattern {
    /// Canonical text, e.g. `line1.*` or `line1.temp`.
    canonical: String,
    /// Byte length of the literal prefix when this is a wildcard pattern.
    wildcard_prefix_len: Option<usize>,
}

impl TopicPattern {
    /// Parses `raw` using [`TopicLimits::default`].
    ///
    /// # Errors
    ///
    /// Returns a [`TopicError`] describing the first rule `raw` breaks.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lf_core::{Topic, TopicPattern};
    ///
    /// let pattern = TopicPattern::parse("line1/*").unwrap();
    /// assert!(pattern.matches(&Topic::parse("line1.temp").unwrap()));
    /// assert!(!pattern.matches(&Topic::parse("line10.temp").unwrap()));
    /// ```
    pub fn parse(raw: &str) -> Result<Self, TopicError> {
        Self::parse_with(raw, &TopicLimits::default())
    }

    /// Parses `raw` under explicit limits.
    ///
    /// # Errors
    ///
    /// Returns a [`TopicError`] describing the first rule `raw` breaks.
    pub fn parse_with(raw: &str, limits: &TopicLimits) -> Result<Self, TopicError> {
        let canonical = normalise(raw, limits)?;
        let segment_count = canonical.split(DELIMITER).count();
        let mut wildcard = false;
        for (position, segment) in canonical.split(DELIMITER).enumerate() {
            if segment == WILDCARD {
                if position + 1 != segment_count {
                    return Err(TopicError::MisplacedWildcard);
                }
                wildcard = true;
                continue;
            }
            check_segment(segment, position)?;
        }

        let wildcard_prefix_len = if wildcard {
            // "*" -> 0, "a.b.*" -> len("a.b")
            Some(canonical.len().saturating_sub(WILDCARD.len() + DELIMITER.len_utf8()))
        } else {
            None
        };

        Ok(Self {
            canonical,
            wildcard_prefix_len,
        })
    }

    /// The pattern that matches every topic.
    pub fn match_all() -> Self {
        Self {
            canonical: WILDCARD.to_string(),
            wildcard_prefix_len: Some(0),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard_prefix_len.is_some()
    }

    /// The literal prefix of a wildcard pattern (`""` for `*`), or `None` for
    /// an exact pattern.
    pub fn wildcard_prefix(&self) -> Option<&str> {
        self.wildcard_prefix_len.map(|len| &self.canonical[..len])
    }

    /// Returns `true` if `topic` is selected by this pattern.
    pub fn matches(&self, topic: &Topic) -> bool {
        self.matches_canonical(topic.as_str())
    }

    /// Returns `true` if every topic selected by `other` is also selected by
    /// `self`.
    pub fn covers(&self, other: &TopicPattern) -> bool {
        match (self.wildcard_prefix(), other.wildcard_prefix()) {
            (_, None) => self.matches_canonical(&other.canonical),
            (None, Some(_)) => false,
            (Some(p), Some(q)) => p.is_empty() || p == q || is_segment_prefix(p, q),
        }
    }

    /// Returns `true` if at least one topic is selected by both patterns.
    pub fn overlaps(&self, other: &TopicPattern) -> bool {
        match (self.wildcard_prefix(), other.wildcard_prefix()) {
            (None, None) => self.canonical == other.canonical,
            (None, Some(_)) => other.matches_canonical(&self.canonical),
            (Some(_), None) => self.matches_canonical(&other.canonical),
            (Some(p), Some(q)) => {
                p.is_empty() || q.is_empty() || p == q || is_segment_prefix(p, q) || is_segment_prefix(q, p)
            }
        }
    }

    fn matches_canonical(&self, t: &str) -> bool {
        match self.wildcard_prefix() {
            None => self.canonical == t,
            Some("") => true,
            Some(prefix) => is_segment_prefix(prefix, t),
        }
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl TryFrom<String> for TopicPattern {
    type Error = TopicError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TopicPattern::parse(&value)
    }
}

impl From<TopicPattern> for String {
    fn from(pattern: TopicPattern) -> Self {
        pattern.canonical
    }
}

impl From<Topic> for TopicPattern {
    fn from(topic: Topic) -> Self {
        Self {
            canonical: topic.0,
            wildcard_prefix_len: None,
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Rewrites alternative delimiters and applies the length/segment limits.
fn normalise(raw: &str, limits: &TopicLimits) -> Result<String, TopicError> {
    if raw.is_empty() {
        return Err(TopicError::Empty);
    }
    if raw.len() > limits.max_length {
        return Err(TopicError::TooLong {
            length: raw.len(),
            max: limits.max_length,
        });
    }
    let canonical = raw.replace(ALT_DELIMITER, ".");
    let count = canonical.split(DELIMITER).count();
    if count > limits.max_segments {
        return Err(TopicError::TooManySegments {
            count,
            max: limits.max_segments,
        });
    }
    Ok(canonical)
}

/// `prefix` names whole leading segments of `path` and `path` is longer.
fn is_segment_prefix(prefix: &str, path: &str) -> bool {
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == DELIMITER as u8
}

fn check_segment(segment: &str, position: usize) -> Result<(), TopicError> {
    if segment.is_empty() {
        return Err(TopicError::EmptySegment { position });
    }
    if segment.contains('*') {
        return Err(TopicError::MisplacedWildcard);
    }
    match segment
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        Some(character) => Err(TopicError::InvalidCharacter {
            segment: segment.to_string(),
            character,
        }),
        None => Ok(()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn topic(s: &str) -> Topic {
        Topic::parse(s).expect("valid topic")
    }

    fn pattern(s: &str) -> TopicPattern {
        TopicPattern::parse(s).expect("valid pattern")
    }

    // ── Topic parsing ────────────────────────────────────────────────────────

    #[test]
    fn test_topic_slash_delimiter_is_normalised_to_dots() {
        assert_eq!(topic("machine/line3/press2/status").as_str(), "machine.line3.press2.status");
    }

    #[test]
    fn test_topic_mixed_delimiters_normalise_to_same_topic() {
        assert_eq!(topic("line1/press.status"), topic("line1.press/status"));
    }

    #[test]
    fn test_topic_single_segment_is_valid() {
        let t = topic("heartbeat");
        assert_eq!(t.segment_count(), 1);
        assert_eq!(t.proper_prefixes().count(), 0);
    }

    #[test]
    fn test_topic_empty_is_rejected() {
        assert_eq!(Topic::parse(""), Err(TopicError::Empty));
    }

    #[test]
    fn test_topic_empty_segment_is_rejected() {
        assert_eq!(Topic::parse("a..b"), Err(TopicError::EmptySegment { position: 1 }));
        assert_eq!(Topic::parse(".a"), Err(TopicError::EmptySegment { position: 0 }));
        assert_eq!(Topic::parse("a/"), Err(TopicError::EmptySegment { position: 1 }));
    }

    #[test]
    fn test_topic_wildcard_is_rejected() {
        assert_eq!(Topic::parse("line1.*"), Err(TopicError::WildcardInTopic));
    }

    #[test]
    fn test_topic_partial_wildcard_is_rejected() {
        assert_eq!(Topic::parse("line1.te*"), Err(TopicError::MisplacedWildcard));
    }

    #[test]
    fn test_topic_invalid_character_is_rejected() {
        let err = Topic::parse("line 1.temp").unwrap_err();
        assert_eq!(
            err,
            TopicError::InvalidCharacter {
                segment: "line 1".to_string(),
                character: ' '
            }
        );
    }

    #[test]
    fn test_topic_allows_underscore_and_hyphen() {
        assert!(Topic::parse("haas_vf2.spindle-speed").is_ok());
    }

    #[test]
    fn test_topic_too_long_is_rejected() {
        let limits = TopicLimits {
            max_length: 8,
            max_segments: 16,
        };
        assert_eq!(
            Topic::parse_with("abcdefghi", &limits),
            Err(TopicError::TooLong { length: 9, max: 8 })
        );
    }

    #[test]
    fn test_topic_too_many_segments_is_rejected() {
        let limits = TopicLimits {
            max_length: 256,
            max_segments: 2,
        };
        assert_eq!(
            Topic::parse_with("a.b.c", &limits),
            Err(TopicError::TooManySegments { count: 3, max: 2 })
        );
    }

    #[test]
    fn test_topic_proper_prefixes_shortest_first() {
        let t = topic("a.b.c");
        let prefixes: Vec<&str> = t.proper_prefixes().collect();
        assert_eq!(prefixes, vec!["a", "a.b"]);
    }

    // ── Pattern parsing ──────────────────────────────────────────────────────

    #[test]
    fn test_pattern_wildcard_only_in_final_segment() {
        assert!(TopicPattern::parse("line1.*").is_ok());
        assert_eq!(TopicPattern::parse("*.temp"), Err(TopicError::MisplacedWildcard));
        assert_eq!(TopicPattern::parse("a.*.c"), Err(TopicError::MisplacedWildcard));
        assert_eq!(TopicPattern::parse("a.b*"), Err(TopicError::MisplacedWildcard));
    }

    #[test]
    fn test_pattern_wildcard_prefix() {
        assert_eq!(pattern("machine.line3.*").wildcard_prefix(), Some("machine.line3"));
        assert_eq!(pattern("*").wildcard_prefix(), Some(""));
        assert_eq!(pattern("line1.temp").wildcard_prefix(), None);
    }

    #[test]
    fn test_pattern_slash_form_is_canonicalised() {
        assert_eq!(pattern("line1/*").as_str(), "line1.*");
    }

    // ── Matching ─────────────────────────────────────────────────────────────

    #[test]
    fn test_exact_pattern_matches_only_equal_topic() {
        let p = pattern("line1.temp");
        assert!(p.matches(&topic("line1.temp")));
        assert!(!p.matches(&topic("line1.temp.raw")));
        assert!(!p.matches(&topic("line1")));
    }

    #[test]
    fn test_wildcard_matches_deeper_topics() {
        let p = pattern("machine.line3.*");
        assert!(p.matches(&topic("machine.line3.press2")));
        assert!(p.matches(&topic("machine.line3.press2.status")));
    }

    #[test]
    fn test_wildcard_does_not_match_its_own_prefix() {
        assert!(!pattern("line1.*").matches(&topic("line1")));
    }

    #[test]
    fn test_wildcard_is_segment_bounded() {
        assert!(!pattern("line1.*").matches(&topic("line10.temp")));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        assert!(!pattern("Line1.*").matches(&topic("line1.temp")));
        assert!(!pattern("line1.temp").matches(&topic("line1.Temp")));
    }

    #[test]
    fn test_bare_wildcard_matches_everything() {
        let p = TopicPattern::match_all();
        assert_eq!(p, pattern("*"));
        assert!(p.matches(&topic("a")));
        assert!(p.matches(&topic("a.b.c.d")));
    }

    #[test]
    fn test_covers() {
        assert!(pattern("*").covers(&pattern("a.*")));
        assert!(pattern("a.*").covers(&pattern("a.b.*")));
        assert!(pattern("a.*").covers(&pattern("a.*")));
        assert!(pattern("a.*").covers(&pattern("a.b")));
        assert!(!pattern("a.*").covers(&pattern("*")));
        assert!(!pattern("a.b").covers(&pattern("a.b.*")));
        assert!(!pattern("a.b.*").covers(&pattern("a.*")));
    }

    #[test]
    fn test_overlaps() {
        assert!(pattern("secret.*").overlaps(&pattern("*")));
        assert!(pattern("a.*").overlaps(&pattern("a.b.*")));
        assert!(pattern("a.b.*").overlaps(&pattern("a.*")));
        assert!(pattern("a.*").overlaps(&pattern("a.b")));
        assert!(!pattern("a.*").overlaps(&pattern("ab.*")));
        assert!(!pattern("a.b").overlaps(&pattern("a.c")));
    }

    #[test]
    fn test_topic_converts_into_exact_pattern() {
        let p: TopicPattern = topic("a.b").into();
        assert!(!p.is_wildcard());
        assert!(p.matches(&topic("a.b")));
    }

    #[test]
    fn test_pattern_deserializes_through_parser() {
        let ok: Result<TopicPattern, _> = String::from("a/b/*").try_into();
        assert_eq!(ok.map(|p| p.as_str().to_string()), Ok("a.b.*".to_string()));
        let bad: Result<TopicPattern, _> = String::from("*.a").try_into();
        assert!(bad.is_err());
    }
}
