use chrono::NaiveDate;
use dossier_core::{EntityId, EventId, ResultId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Birth,
    NameChange,
    EducationEnrollment,
    EducationGraduation,
    EducationCertification,
    JobStart,
    JobEnd,
    JobPromotion,
    JobCompanyFounded,
    RelationshipStart,
    RelationshipEnd,
    RelationshipMarriage,
    RelationshipDivorce,
    LocationMove,
    LocationResidence,
    LocationTravel,
    DigitalAccountRegistration,
    DigitalPost,
    DigitalPublication,
    DigitalCommit,
    LegalArrest,
    LegalConviction,
    LegalLawsuit,
    MediaMention,
    MediaAward,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::Birth => "birth",
            EventType::NameChange => "name_change",
            EventType::EducationEnrollment => "education_enrollment",
            EventType::EducationGraduation => "education_graduation",
            EventType::EducationCertification => "education_certification",
            EventType::JobStart => "job_start",
            EventType::JobEnd => "job_end",
            EventType::JobPromotion => "job_promotion",
            EventType::JobCompanyFounded => "job_company_founded",
            EventType::RelationshipStart => "relationship_start",
            EventType::RelationshipEnd => "relationship_end",
            EventType::RelationshipMarriage => "relationship_marriage",
            EventType::RelationshipDivorce => "relationship_divorce",
            EventType::LocationMove => "location_move",
            EventType::LocationResidence => "location_residence",
            EventType::LocationTravel => "location_travel",
            EventType::DigitalAccountRegistration => "digital_account_registration",
            EventType::DigitalPost => "digital_post",
            EventType::DigitalPublication => "digital_publication",
            EventType::DigitalCommit => "digital_commit",
            EventType::LegalArrest => "legal_arrest",
            EventType::LegalConviction => "legal_conviction",
            EventType::LegalLawsuit => "legal_lawsuit",
            EventType::MediaMention => "media_mention",
            EventType::MediaAward => "media_award",
        };
        write!(f, "{}", s)
    }
}

/// Precision carried alongside every extracted date; ordering is from
/// most to least precise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatePrecision {
    ExactTime,
    ExactDate,
    Month,
    Year,
    ApproxYear,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub event_id: EventId,
    pub subject_id: EntityId,
    pub event_type: EventType,
    pub title: String,
    pub date: Option<NaiveDate>,
    pub date_precision: DatePrecision,
    pub location: Option<String>,
    pub confidence: f64,
    pub sources: BTreeSet<String>,
    pub source_refs: Vec<ResultId>,
    pub related_entities: Vec<EntityId>,
    pub metadata: BTreeMap<String, String>,
}

impl TimelineEvent {
    pub fn new(subject_id: EntityId, event_type: EventType, title: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            subject_id,
            event_type,
            title: title.into(),
            date: None,
            date_precision: DatePrecision::Unknown,
            location: None,
            confidence: 0.5,
            sources: BTreeSet::new(),
            source_refs: Vec::new(),
            related_entities: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate, precision: DatePrecision) -> Self {
        self.date = Some(date);
        self.date_precision = precision;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.insert(source.into());
        self
    }

    /// Merge key: events with the same subject, type, date, and
    /// normalized title are the same real-world event reported twice.
    pub fn merge_key(&self) -> (EntityId, EventType, Option<NaiveDate>, String) {
        let normalized_title = self
            .title
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        (self.subject_id, self.event_type, self.date, normalized_title)
    }
}

/// A first-occurrence milestone derived from the event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub subject_id: EntityId,
    pub kind: MilestoneKind,
    pub date: Option<NaiveDate>,
    pub confidence: f64,
    pub title: String,
    pub supporting_events: Vec<EventId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneKind {
    Birth,
    Graduation,
    FirstJob,
    Marriage,
    Founding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_key_normalizes_title() {
        let subject = Uuid::new_v4();
        let a = TimelineEvent::new(subject, EventType::JobStart, "Joined   Example Corp");
        let b = TimelineEvent::new(subject, EventType::JobStart, "joined example corp");
        assert_eq!(a.merge_key(), b.merge_key());

        let c = TimelineEvent::new(subject, EventType::JobEnd, "joined example corp");
        assert_ne!(a.merge_key(), c.merge_key());
    }

    #[test]
    fn test_precision_ordering() {
        assert!(DatePrecision::ExactDate < DatePrecision::Month);
        assert!(DatePrecision::Month < DatePrecision::Year);
        assert!(DatePrecision::Year < DatePrecision::Unknown);
    }
}
