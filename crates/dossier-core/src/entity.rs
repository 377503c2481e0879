use crate::types::{CandidateId, EntityId, EntityType, ResultId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Closed attribute vocabulary. Entity attributes are a typed map keyed by
/// this enum rather than open string dictionaries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKey {
    FullName,
    DisplayName,
    Email,
    Phone,
    Username,
    Domain,
    Url,
    Employer,
    JobTitle,
    Industry,
    City,
    Region,
    Country,
    BirthYear,
    Bio,
    Organization,
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AttributeKey::FullName => "full_name",
            AttributeKey::DisplayName => "display_name",
            AttributeKey::Email => "email",
            AttributeKey::Phone => "phone",
            AttributeKey::Username => "username",
            AttributeKey::Domain => "domain",
            AttributeKey::Url => "url",
            AttributeKey::Employer => "employer",
            AttributeKey::JobTitle => "job_title",
            AttributeKey::Industry => "industry",
            AttributeKey::City => "city",
            AttributeKey::Region => "region",
            AttributeKey::Country => "country",
            AttributeKey::BirthYear => "birth_year",
            AttributeKey::Bio => "bio",
            AttributeKey::Organization => "organization",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Integer(i64),
    Many(Vec<String>),
}

impl AttributeValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

pub type AttributeMap = BTreeMap<AttributeKey, AttributeValue>;

/// A typed extraction from one raw result, pre-normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub candidate_id: CandidateId,
    pub entity_type: EntityType,
    pub attributes: AttributeMap,
    pub source_refs: Vec<ResultId>,
    /// Which connector produced the raw result(s); carried so the resolver
    /// can weight conflicts by source confidence.
    pub source_name: String,
    pub extraction_confidence: f64,
    pub observed_at: chrono::DateTime<chrono::Utc>,
}

impl EntityCandidate {
    pub fn new(entity_type: EntityType, source_name: impl Into<String>) -> Self {
        Self {
            candidate_id: Uuid::new_v4(),
            entity_type,
            attributes: AttributeMap::new(),
            source_refs: Vec::new(),
            source_name: source_name.into(),
            extraction_confidence: 0.5,
            observed_at: chrono::Utc::now(),
        }
    }

    pub fn with_attribute(mut self, key: AttributeKey, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key, value.into());
        self
    }
}

/// Canonical forms computed by the normalizer. Every field is derived; the
/// candidate's raw attributes are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonicalForms {
    pub normalized_email: Option<String>,
    /// Provider alias / plus-tag / dot-insignificance collapsed key.
    pub email_deliverable_key: Option<String>,
    pub e164_phone: Option<String>,
    pub phone_last7: Option<String>,
    pub canonical_username: Option<String>,
    pub username_variants: BTreeSet<String>,
    /// Name tokens sorted alphabetically for a comparison key.
    pub name_tokens: Vec<String>,
    pub name_soundex: Vec<String>,
    pub name_metaphone: Vec<String>,
    pub normalized_domain: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// A candidate plus canonical forms and a quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEntity {
    pub candidate: EntityCandidate,
    pub canonical: CanonicalForms,
    /// Base confidence of the connector that produced the candidate.
    pub source_confidence: f64,
    /// completeness x field-consistency x source-confidence, in [0, 1].
    pub quality_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Probable,
    Possible,
    Unlikely,
}

impl VerificationStatus {
    /// Discretize a final confidence in [0, 100].
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 90.0 {
            VerificationStatus::Verified
        } else if confidence >= 75.0 {
            VerificationStatus::Probable
        } else if confidence >= 60.0 {
            VerificationStatus::Possible
        } else {
            VerificationStatus::Unlikely
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Probable => "probable",
            VerificationStatus::Possible => "possible",
            VerificationStatus::Unlikely => "unlikely",
        };
        write!(f, "{}", s)
    }
}

/// A value that lost conflict resolution during a merge, kept for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputedValue {
    pub value: AttributeValue,
    pub source_name: String,
    pub extraction_confidence: f64,
}

/// A below-threshold pair the resolver declined to merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbiguousLink {
    pub other_entity: EntityId,
    pub score: f64,
}

/// A cluster of normalized candidates treated as one real-world entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub entity_id: EntityId,
    pub entity_type: EntityType,
    pub attributes: AttributeMap,
    pub disputed_attributes: BTreeMap<AttributeKey, Vec<DisputedValue>>,
    pub confidence: f64,
    pub verification_status: VerificationStatus,
    pub member_candidates: Vec<CandidateId>,
    pub sources: BTreeSet<String>,
    pub source_refs: Vec<ResultId>,
    pub ambiguous_with: Vec<AmbiguousLink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_status_bands() {
        assert_eq!(
            VerificationStatus::from_confidence(95.0),
            VerificationStatus::Verified
        );
        assert_eq!(
            VerificationStatus::from_confidence(90.0),
            VerificationStatus::Verified
        );
        assert_eq!(
            VerificationStatus::from_confidence(80.0),
            VerificationStatus::Probable
        );
        assert_eq!(
            VerificationStatus::from_confidence(60.0),
            VerificationStatus::Possible
        );
        assert_eq!(
            VerificationStatus::from_confidence(59.9),
            VerificationStatus::Unlikely
        );
    }

    #[test]
    fn test_attribute_value_untagged_roundtrip() {
        let mut attrs = AttributeMap::new();
        attrs.insert(AttributeKey::FullName, "Alice Roe".into());
        attrs.insert(AttributeKey::BirthYear, AttributeValue::Integer(1987));
        let json = serde_json::to_string(&attrs).unwrap();
        let back: AttributeMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attrs);
    }
}
