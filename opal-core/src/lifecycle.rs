//! Bucket lifecycle configuration document
//!
//! The XML document accepted on the admin surface. Parsing only checks
//! well-formedness; [`LifecycleConfiguration::validate`] applies the semantic
//! rules. Resolution of transition storage classes against registered remote
//! targets happens at the handler, which knows the target registry.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Most rules a single configuration may carry.
const MAX_RULES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFilter {
    #[serde(rename = "Prefix", default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expiration {
    #[serde(rename = "Days", default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(rename = "Date", default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl Expiration {
    fn is_set(&self) -> bool {
        self.days.is_some() || self.date.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(rename = "Days", default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(rename = "StorageClass", default)]
    pub storage_class: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleRule {
    #[serde(rename = "ID", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "Status")]
    pub status: RuleStatus,
    #[serde(rename = "Filter", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<RuleFilter>,
    #[serde(
        rename = "Expiration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub expiration: Option<Expiration>,
    #[serde(
        rename = "Transition",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transition: Option<Transition>,
}

impl LifecycleRule {
    pub fn prefix(&self) -> &str {
        self.filter.as_ref().map(|f| f.prefix.as_str()).unwrap_or("")
    }
}

/// A bucket lifecycle configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename = "LifecycleConfiguration")]
pub struct LifecycleConfiguration {
    #[serde(rename = "Rule", default)]
    pub rules: Vec<LifecycleRule>,
}

impl LifecycleConfiguration {
    /// Parses a document from its XML form.
    pub fn parse(data: &[u8]) -> Result<Self, LifecycleError> {
        let text =
            std::str::from_utf8(data).map_err(|e| LifecycleError::Malformed(e.to_string()))?;
        quick_xml::de::from_str(text).map_err(|e| LifecycleError::Malformed(e.to_string()))
    }

    /// Serializes the document back to XML.
    pub fn to_xml(&self) -> Result<String, LifecycleError> {
        quick_xml::se::to_string(self).map_err(|e| LifecycleError::Malformed(e.to_string()))
    }

    /// Semantic validation of the parsed document.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.rules.is_empty() {
            return Err(LifecycleError::Validation(
                "lifecycle configuration must carry at least one rule".to_string(),
            ));
        }
        if self.rules.len() > MAX_RULES {
            return Err(LifecycleError::Validation(format!(
                "lifecycle configuration allows at most {} rules",
                MAX_RULES
            )));
        }
        let mut ids = HashSet::new();
        for rule in &self.rules {
            if !rule.id.is_empty() && !ids.insert(rule.id.as_str()) {
                return Err(LifecycleError::Validation(format!(
                    "duplicate rule id: {}",
                    rule.id
                )));
            }
            let has_expiration = rule.expiration.as_ref().map(Expiration::is_set).unwrap_or(false);
            let has_transition = rule.transition.is_some();
            if !has_expiration && !has_transition {
                return Err(LifecycleError::Validation(
                    "rule carries no expiration and no transition action".to_string(),
                ));
            }
            if let Some(expiration) = &rule.expiration {
                if let Some(days) = expiration.days {
                    if days == 0 {
                        return Err(LifecycleError::Validation(
                            "expiration days must be a positive integer".to_string(),
                        ));
                    }
                }
            }
            if let Some(transition) = &rule.transition {
                if transition.storage_class.is_empty() {
                    return Err(LifecycleError::Validation(
                        "transition requires a storage class".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Storage classes referenced by transition actions.
    pub fn transition_classes(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter_map(|r| r.transition.as_ref())
            .map(|t| t.storage_class.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<LifecycleConfiguration>
  <Rule>
    <ID>expire-logs</ID>
    <Status>Enabled</Status>
    <Filter><Prefix>logs/</Prefix></Filter>
    <Expiration><Days>30</Days></Expiration>
  </Rule>
  <Rule>
    <ID>tier-archive</ID>
    <Status>Enabled</Status>
    <Transition><Days>90</Days><StorageClass>COLD</StorageClass></Transition>
  </Rule>
</LifecycleConfiguration>"#;

    #[test]
    fn parse_and_validate_sample() {
        let config = LifecycleConfiguration::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].prefix(), "logs/");
        config.validate().unwrap();
        let classes: Vec<&str> = config.transition_classes().collect();
        assert_eq!(classes, vec!["COLD"]);
    }

    #[test]
    fn xml_round_trip() {
        let config = LifecycleConfiguration::parse(SAMPLE.as_bytes()).unwrap();
        let xml = config.to_xml().unwrap();
        let back = LifecycleConfiguration::parse(xml.as_bytes()).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(LifecycleConfiguration::parse(b"<LifecycleConfiguration><Rule>").is_err());
    }

    #[test]
    fn rejects_empty_configuration() {
        let config = LifecycleConfiguration::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_rule_without_action() {
        let config = LifecycleConfiguration {
            rules: vec![LifecycleRule {
                id: "noop".to_string(),
                status: RuleStatus::Enabled,
                filter: None,
                expiration: None,
                transition: None,
            }],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let rule = LifecycleRule {
            id: "dup".to_string(),
            status: RuleStatus::Enabled,
            filter: None,
            expiration: Some(Expiration {
                days: Some(1),
                date: None,
            }),
            transition: None,
        };
        let config = LifecycleConfiguration {
            rules: vec![rule.clone(), rule],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_expiration_days() {
        let config = LifecycleConfiguration {
            rules: vec![LifecycleRule {
                id: String::new(),
                status: RuleStatus::Enabled,
                filter: None,
                expiration: Some(Expiration {
                    days: Some(0),
                    date: None,
                }),
                transition: None,
            }],
        };
        assert!(config.validate().is_err());
    }
}
