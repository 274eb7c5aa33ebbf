//! S3 notification event model
//!
//! Events published on the listen stream follow the S3 notification document
//! shape. Subscriptions are expressed as rules: an event-name set plus a
//! prefix/suffix pattern, keyed by the target that asked for them.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// Longest accepted prefix/suffix filter value.
const MAX_FILTER_VALUE_LEN: usize = 1024;

/// Well-known notification event names. The `*All` variants are shorthand
/// groups that expand to their members when rules are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventName {
    #[default]
    Unspecified,
    ObjectAccessedGet,
    ObjectAccessedHead,
    ObjectAccessedAll,
    ObjectCreatedCompleteMultipartUpload,
    ObjectCreatedCopy,
    ObjectCreatedPost,
    ObjectCreatedPut,
    ObjectCreatedAll,
    ObjectRemovedDelete,
    ObjectRemovedDeleteMarkerCreated,
    ObjectRemovedAll,
}

impl EventName {
    /// Parses an event name in its `s3:` wire form.
    pub fn parse(s: &str) -> Result<Self, EventError> {
        match s {
            "s3:ObjectAccessed:Get" => Ok(Self::ObjectAccessedGet),
            "s3:ObjectAccessed:Head" => Ok(Self::ObjectAccessedHead),
            "s3:ObjectAccessed:*" => Ok(Self::ObjectAccessedAll),
            "s3:ObjectCreated:CompleteMultipartUpload" => {
                Ok(Self::ObjectCreatedCompleteMultipartUpload)
            }
            "s3:ObjectCreated:Copy" => Ok(Self::ObjectCreatedCopy),
            "s3:ObjectCreated:Post" => Ok(Self::ObjectCreatedPost),
            "s3:ObjectCreated:Put" => Ok(Self::ObjectCreatedPut),
            "s3:ObjectCreated:*" => Ok(Self::ObjectCreatedAll),
            "s3:ObjectRemoved:Delete" => Ok(Self::ObjectRemovedDelete),
            "s3:ObjectRemoved:DeleteMarkerCreated" => Ok(Self::ObjectRemovedDeleteMarkerCreated),
            "s3:ObjectRemoved:*" => Ok(Self::ObjectRemovedAll),
            _ => Err(EventError::InvalidName(s.to_string())),
        }
    }

    /// Expands shorthand group names to their members; a concrete name
    /// expands to itself.
    pub fn expand(self) -> Vec<Self> {
        match self {
            Self::ObjectAccessedAll => vec![Self::ObjectAccessedGet, Self::ObjectAccessedHead],
            Self::ObjectCreatedAll => vec![
                Self::ObjectCreatedCompleteMultipartUpload,
                Self::ObjectCreatedCopy,
                Self::ObjectCreatedPost,
                Self::ObjectCreatedPut,
            ],
            Self::ObjectRemovedAll => vec![
                Self::ObjectRemovedDelete,
                Self::ObjectRemovedDeleteMarkerCreated,
            ],
            name => vec![name],
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unspecified => "",
            Self::ObjectAccessedGet => "s3:ObjectAccessed:Get",
            Self::ObjectAccessedHead => "s3:ObjectAccessed:Head",
            Self::ObjectAccessedAll => "s3:ObjectAccessed:*",
            Self::ObjectCreatedCompleteMultipartUpload => {
                "s3:ObjectCreated:CompleteMultipartUpload"
            }
            Self::ObjectCreatedCopy => "s3:ObjectCreated:Copy",
            Self::ObjectCreatedPost => "s3:ObjectCreated:Post",
            Self::ObjectCreatedPut => "s3:ObjectCreated:Put",
            Self::ObjectCreatedAll => "s3:ObjectCreated:*",
            Self::ObjectRemovedDelete => "s3:ObjectRemoved:Delete",
            Self::ObjectRemovedDeleteMarkerCreated => "s3:ObjectRemoved:DeleteMarkerCreated",
            Self::ObjectRemovedAll => "s3:ObjectRemoved:*",
        };
        f.write_str(s)
    }
}

/// Identity of the principal behind an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "principalId")]
    pub principal_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    #[serde(rename = "ownerIdentity")]
    pub owner_identity: Identity,
    pub arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(rename = "eTag", default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
    #[serde(
        rename = "contentType",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub content_type: String,
    #[serde(
        rename = "versionId",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub version_id: String,
    pub sequencer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "s3SchemaVersion")]
    pub schema_version: String,
    #[serde(rename = "configurationId")]
    pub configuration_id: String,
    pub bucket: Bucket,
    pub object: Object,
}

/// Where the request producing the event came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub host: String,
    pub port: String,
    #[serde(rename = "userAgent")]
    pub user_agent: String,
}

/// One S3 notification event. The zero value doubles as the stream
/// keep-alive envelope and is ignored by peer clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "eventVersion")]
    pub event_version: String,
    #[serde(rename = "eventSource")]
    pub event_source: String,
    #[serde(rename = "awsRegion")]
    pub aws_region: String,
    #[serde(rename = "eventTime")]
    pub event_time: String,
    #[serde(rename = "eventName")]
    pub event_name: EventName,
    #[serde(rename = "userIdentity")]
    pub user_identity: Identity,
    #[serde(rename = "requestParameters", default)]
    pub request_parameters: HashMap<String, String>,
    #[serde(rename = "responseElements", default)]
    pub response_elements: HashMap<String, String>,
    pub s3: Metadata,
    pub source: Source,
}

impl Event {
    /// True for the zero-valued keep-alive envelope.
    pub fn is_keep_alive(&self) -> bool {
        self.event_name == EventName::Unspecified
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.event_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Identifies one subscription target of a rules map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TargetId {
    pub id: String,
    pub name: String,
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.name)
    }
}

pub type TargetIdSet = HashSet<TargetId>;

/// Validates a prefix/suffix filter value.
pub fn validate_filter_rule_value(value: &str) -> Result<(), EventError> {
    if value.len() > MAX_FILTER_VALUE_LEN {
        return Err(EventError::InvalidFilterValue(format!(
            "filter value longer than {} characters",
            MAX_FILTER_VALUE_LEN
        )));
    }
    for segment in value.split('/') {
        if segment == "." || segment == ".." {
            return Err(EventError::InvalidFilterValue(value.to_string()));
        }
    }
    Ok(())
}

/// Builds the single wildcard pattern for a prefix/suffix pair.
pub fn new_pattern(prefix: &str, suffix: &str) -> String {
    let mut pattern = String::new();
    if !prefix.is_empty() {
        pattern.push_str(prefix);
        if !prefix.ends_with('*') {
            pattern.push('*');
        }
    }
    if !suffix.is_empty() {
        if !suffix.starts_with('*') && pattern.is_empty() {
            pattern.push('*');
        }
        pattern.push_str(suffix);
    }
    pattern.replace("**", "*")
}

/// Wildcard match where `*` spans any run of characters.
pub fn match_simple(pattern: &str, name: &str) -> bool {
    if pattern.is_empty() {
        return name.is_empty();
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0usize, 0usize);
    let (mut star, mut mark) = (None::<usize>, 0usize);
    while ni < n.len() {
        if pi < p.len() && (p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ni;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ni = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Pattern rules for one event name: pattern string to interested targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rules(HashMap<String, TargetIdSet>);

impl Rules {
    pub fn add(&mut self, pattern: String, target: TargetId) {
        self.0.entry(pattern).or_default().insert(target);
    }

    pub fn match_targets(&self, object_key: &str) -> TargetIdSet {
        let mut matched = TargetIdSet::new();
        for (pattern, targets) in &self.0 {
            if match_simple(pattern, object_key) {
                matched.extend(targets.iter().cloned());
            }
        }
        matched
    }

    pub fn matches(&self, object_key: &str) -> bool {
        self.0.keys().any(|pattern| match_simple(pattern, object_key))
    }

    fn merge(&mut self, other: &Rules) {
        for (pattern, targets) in &other.0 {
            let entry = self.0.entry(pattern.clone()).or_default();
            entry.extend(targets.iter().cloned());
        }
    }
}

/// Rules per event name. Group names are expanded at insertion time so
/// lookups are always against concrete names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesMap(HashMap<EventName, Rules>);

impl RulesMap {
    pub fn new(event_names: &[EventName], pattern: String, target: TargetId) -> Self {
        // An empty pattern means no prefix/suffix filter at all.
        let pattern = if pattern.is_empty() {
            "*".to_string()
        } else {
            pattern
        };
        let mut map = Self::default();
        for name in event_names.iter().flat_map(|n| n.expand()) {
            map.0
                .entry(name)
                .or_default()
                .add(pattern.clone(), target.clone());
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges another rules map into this one.
    pub fn add(&mut self, other: &RulesMap) {
        for (name, rules) in &other.0 {
            self.0.entry(*name).or_default().merge(rules);
        }
    }

    pub fn match_simple(&self, event_name: EventName, object_key: &str) -> bool {
        self.0
            .get(&event_name)
            .map(|rules| rules.matches(object_key))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_name_parse_round_trip() {
        for s in [
            "s3:ObjectAccessed:Get",
            "s3:ObjectCreated:Put",
            "s3:ObjectCreated:*",
            "s3:ObjectRemoved:Delete",
        ] {
            assert_eq!(EventName::parse(s).unwrap().to_string(), s);
        }
        assert!(EventName::parse("s3:BucketCreated:Put").is_err());
    }

    #[test]
    fn group_names_expand() {
        assert_eq!(EventName::ObjectCreatedAll.expand().len(), 4);
        assert_eq!(
            EventName::ObjectCreatedPut.expand(),
            vec![EventName::ObjectCreatedPut]
        );
    }

    #[test]
    fn pattern_building() {
        assert_eq!(new_pattern("logs/", ".json"), "logs/*.json");
        assert_eq!(new_pattern("logs/", ""), "logs/*");
        assert_eq!(new_pattern("", ".json"), "*.json");
        assert_eq!(new_pattern("", ""), "");
    }

    #[test]
    fn wildcard_matching() {
        assert!(match_simple("logs/*.json", "logs/a.json"));
        assert!(match_simple("logs/*.json", "logs/sub/a.json"));
        assert!(!match_simple("logs/*.json", "other/x.txt"));
        assert!(match_simple("*", "anything"));
        assert!(match_simple("", ""));
    }

    #[test]
    fn filter_value_validation() {
        assert!(validate_filter_rule_value("logs/").is_ok());
        assert!(validate_filter_rule_value("a/../b").is_err());
        assert!(validate_filter_rule_value(&"x".repeat(1025)).is_err());
    }

    #[test]
    fn rules_map_matches_expanded_names() {
        let target = TargetId {
            id: "1".to_string(),
            name: "listen".to_string(),
        };
        let map = RulesMap::new(
            &[EventName::ObjectCreatedAll],
            new_pattern("logs/", ".json"),
            target,
        );
        assert!(map.match_simple(EventName::ObjectCreatedPut, "logs/a.json"));
        assert!(!map.match_simple(EventName::ObjectCreatedPut, "other/x.txt"));
        assert!(!map.match_simple(EventName::ObjectRemovedDelete, "logs/a.json"));
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let map = RulesMap::new(
            &[EventName::ObjectCreatedPut],
            String::new(),
            TargetId {
                id: "1".to_string(),
                name: "t".to_string(),
            },
        );
        assert!(map.match_simple(EventName::ObjectCreatedPut, "any/key.bin"));
    }

    #[test]
    fn rules_map_merge() {
        let t1 = TargetId {
            id: "1".to_string(),
            name: "a".to_string(),
        };
        let t2 = TargetId {
            id: "2".to_string(),
            name: "b".to_string(),
        };
        let mut map = RulesMap::new(&[EventName::ObjectCreatedPut], "*".to_string(), t1);
        let other = RulesMap::new(&[EventName::ObjectRemovedDelete], "*".to_string(), t2);
        map.add(&other);
        assert!(map.match_simple(EventName::ObjectCreatedPut, "k"));
        assert!(map.match_simple(EventName::ObjectRemovedDelete, "k"));
    }

    #[test]
    fn keep_alive_envelope_is_zero_valued() {
        assert!(Event::default().is_keep_alive());
    }
}
