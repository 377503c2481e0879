use crate::error::ErrorKind;
use crate::types::{EntityId, InvestigationId, QueryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Seed identifiers supplied by the client; these bound the investigation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectIdentifiers {
    pub full_name: String,
    #[serde(default)]
    pub usernames: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub geographic_hints: GeographicHints,
    #[serde(default)]
    pub professional_hints: ProfessionalHints,
    #[serde(default)]
    pub known_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeographicHints {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// ISO 3166-1 alpha-2.
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfessionalHints {
    #[serde(default)]
    pub employer: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default = "Constraints::default_exclude_sensitive")]
    pub exclude_sensitive_attributes: bool,
    #[serde(default = "Constraints::default_exclude_minors")]
    pub exclude_minors: bool,
    #[serde(default = "Constraints::default_max_search_depth")]
    pub max_search_depth: u8,
    #[serde(default = "Constraints::default_retention_days")]
    pub retention_days: u16,
    /// Wall-time bound in minutes; clamped to [1, 360] at validation.
    #[serde(default)]
    pub max_duration_min: Option<u32>,
}

impl Constraints {
    fn default_exclude_sensitive() -> bool {
        true
    }
    fn default_exclude_minors() -> bool {
        true
    }
    fn default_max_search_depth() -> u8 {
        3
    }
    fn default_retention_days() -> u16 {
        30
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            exclude_sensitive_attributes: true,
            exclude_minors: true,
            max_search_depth: Self::default_max_search_depth(),
            retention_days: Self::default_retention_days(),
            max_duration_min: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "Thresholds::default_entity")]
    pub minimum_entity_confidence: f64,
    #[serde(default = "Thresholds::default_source")]
    pub minimum_source_confidence: f64,
}

impl Thresholds {
    fn default_entity() -> f64 {
        70.0
    }
    fn default_source() -> f64 {
        60.0
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            minimum_entity_confidence: Self::default_entity(),
            minimum_source_confidence: Self::default_source(),
        }
    }
}

/// Complete seed input for one investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedInput {
    #[serde(default = "Uuid::new_v4")]
    pub investigation_id: InvestigationId,
    #[serde(default = "Uuid::new_v4")]
    pub correlation_id: Uuid,
    pub subject_identifiers: SubjectIdentifiers,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl SeedInput {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            investigation_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4(),
            subject_identifiers: SubjectIdentifiers {
                full_name: full_name.into(),
                ..Default::default()
            },
            constraints: Constraints::default(),
            thresholds: Thresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Created,
    Planning,
    Fetching,
    Parsing,
    Resolving,
    Reporting,
    Completed,
    Failed,
    Cancelled,
}

impl InvestigationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvestigationStatus::Completed
                | InvestigationStatus::Failed
                | InvestigationStatus::Cancelled
        )
    }

    /// Legal transitions of the coordinator's state machine. `failed` and
    /// `cancelled` are reachable from any non-terminal state.
    pub fn can_transition_to(self, next: InvestigationStatus) -> bool {
        use InvestigationStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) | (_, Cancelled) => true,
            (Created, Planning) => true,
            (Planning, Fetching) => true,
            // fetching <-> parsing <-> resolving are pipelined
            (Fetching, Parsing) | (Parsing, Fetching) => true,
            (Parsing, Resolving) | (Resolving, Parsing) => true,
            (Fetching, Resolving) | (Resolving, Fetching) => true,
            (Fetching, Reporting) | (Parsing, Reporting) | (Resolving, Reporting) => true,
            (Reporting, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvestigationStatus::Created => "created",
            InvestigationStatus::Planning => "planning",
            InvestigationStatus::Fetching => "fetching",
            InvestigationStatus::Parsing => "parsing",
            InvestigationStatus::Resolving => "resolving",
            InvestigationStatus::Reporting => "reporting",
            InvestigationStatus::Completed => "completed",
            InvestigationStatus::Failed => "failed",
            InvestigationStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One entry of the investigation's `errors[]` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub kind: ErrorKind,
    pub source: Option<String>,
    pub query_id: Option<QueryId>,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            source: None,
            query_id: None,
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_query(mut self, query_id: QueryId) -> Self {
        self.query_id = Some(query_id);
        self
    }
}

/// The record the coordinator owns until terminal state; persisted through
/// the investigation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRecord {
    pub seed: SeedInput,
    pub status: InvestigationStatus,
    pub progress_percentage: f64,
    pub current_stage: String,
    pub entities_found: usize,
    pub queries_executed: usize,
    pub queries_total: usize,
    pub errors: Vec<ErrorEntry>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl InvestigationRecord {
    pub fn new(seed: SeedInput) -> Self {
        Self {
            seed,
            status: InvestigationStatus::Created,
            progress_percentage: 0.0,
            current_stage: InvestigationStatus::Created.to_string(),
            entities_found: 0,
            queries_executed: 0,
            queries_total: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
            estimated_completion: None,
        }
    }

    pub fn investigation_id(&self) -> InvestigationId {
        self.seed.investigation_id
    }
}

/// Events streamed to progress subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StatusUpdate {
        investigation_id: InvestigationId,
        timestamp: DateTime<Utc>,
        status: InvestigationStatus,
        progress_percentage: f64,
        queries_executed: usize,
        queries_total: usize,
        entities_found: usize,
        /// Events dropped from the bounded bus since the last delivery.
        dropped_events: u64,
    },
    NewEntity {
        investigation_id: InvestigationId,
        timestamp: DateTime<Utc>,
        entity_id: EntityId,
        entity_type: crate::types::EntityType,
        confidence: f64,
    },
    StageTransition {
        investigation_id: InvestigationId,
        timestamp: DateTime<Utc>,
        from: InvestigationStatus,
        to: InvestigationStatus,
    },
    Error {
        investigation_id: InvestigationId,
        timestamp: DateTime<Utc>,
        kind: ErrorKind,
        message: String,
    },
    Completion {
        investigation_id: InvestigationId,
        timestamp: DateTime<Utc>,
        status: InvestigationStatus,
        partial: bool,
    },
}

impl ProgressEvent {
    /// Critical events are never dropped by the bounded progress bus.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ProgressEvent::StageTransition { .. } | ProgressEvent::Completion { .. }
        )
    }

    pub fn investigation_id(&self) -> InvestigationId {
        match self {
            ProgressEvent::StatusUpdate {
                investigation_id, ..
            }
            | ProgressEvent::NewEntity {
                investigation_id, ..
            }
            | ProgressEvent::StageTransition {
                investigation_id, ..
            }
            | ProgressEvent::Error {
                investigation_id, ..
            }
            | ProgressEvent::Completion {
                investigation_id, ..
            } => *investigation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_transitions() {
        use InvestigationStatus::*;
        assert!(Created.can_transition_to(Planning));
        assert!(Planning.can_transition_to(Fetching));
        assert!(Fetching.can_transition_to(Parsing));
        assert!(Parsing.can_transition_to(Fetching));
        assert!(Resolving.can_transition_to(Reporting));
        assert!(Reporting.can_transition_to(Completed));
        assert!(Fetching.can_transition_to(Cancelled));
        assert!(Planning.can_transition_to(Failed));

        assert!(!Completed.can_transition_to(Planning));
        assert!(!Cancelled.can_transition_to(Fetching));
        assert!(!Created.can_transition_to(Reporting));
        assert!(!Reporting.can_transition_to(Fetching));
    }

    #[test]
    fn test_seed_defaults() {
        let seed = SeedInput::new("Alice Roe");
        assert_eq!(seed.constraints.max_search_depth, 3);
        assert_eq!(seed.thresholds.minimum_entity_confidence, 70.0);
        assert!(seed.constraints.exclude_minors);
    }

    #[test]
    fn test_seed_deserialize_minimal() {
        let json = r#"{"subject_identifiers": {"full_name": "Bob Chen"}}"#;
        let seed: SeedInput = serde_json::from_str(json).unwrap();
        assert_eq!(seed.subject_identifiers.full_name, "Bob Chen");
        assert_eq!(seed.constraints.retention_days, 30);
    }
}
