use crate::event::{DatePrecision, EventType, Milestone, MilestoneKind, TimelineEvent};
use chrono::{Datelike, NaiveDate};
use dossier_core::{EntityId, EventId};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Age priors used when no birth event exists: people typically finish
/// university and start their first job around these ages.
const GRADUATION_AGE_PRIOR: i32 = 22;
const FIRST_JOB_AGE_PRIOR: i32 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityBucket {
    Day,
    Week,
    Month,
    Year,
}

/// Per-subject event log with duplicate merging and derived queries.
/// Storage order is irrelevant; reads sort by
/// `(date, date_precision, confidence)`.
#[derive(Debug, Default)]
pub struct TimelineBuilder {
    events: HashMap<EventId, TimelineEvent>,
    by_merge_key: HashMap<(EntityId, EventType, Option<NaiveDate>, String), EventId>,
    by_subject: HashMap<EntityId, Vec<EventId>>,
}

impl TimelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event. An event with the same merge key as an existing one
    /// is folded into it: confidence combines as `1 - prod(1 - c_i)` and
    /// sources union.
    pub fn add_event(&mut self, event: TimelineEvent) -> EventId {
        let key = event.merge_key();
        if let Some(&existing_id) = self.by_merge_key.get(&key) {
            let existing = self.events.get_mut(&existing_id).expect("indexed event");
            existing.confidence = 1.0 - (1.0 - existing.confidence) * (1.0 - event.confidence);
            existing.sources.extend(event.sources);
            existing.source_refs.extend(event.source_refs);
            existing.related_entities.extend(event.related_entities);
            if existing.date_precision > event.date_precision {
                existing.date_precision = event.date_precision;
            }
            debug!(event_id = %existing_id, "merged duplicate timeline event");
            return existing_id;
        }

        let id = event.event_id;
        self.by_merge_key.insert(key, id);
        self.by_subject.entry(event.subject_id).or_default().push(id);
        self.events.insert(id, event);
        id
    }

    pub fn event(&self, id: EventId) -> Option<&TimelineEvent> {
        self.events.get(&id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events for a subject ordered by (date, precision, confidence);
    /// undated events sort last.
    pub fn events_for(&self, subject: EntityId) -> Vec<&TimelineEvent> {
        let mut events: Vec<&TimelineEvent> = self
            .by_subject
            .get(&subject)
            .into_iter()
            .flatten()
            .filter_map(|id| self.events.get(id))
            .collect();
        events.sort_by(|a, b| {
            let date_a = a.date.unwrap_or(NaiveDate::MAX);
            let date_b = b.date.unwrap_or(NaiveDate::MAX);
            date_a
                .cmp(&date_b)
                .then(a.date_precision.cmp(&b.date_precision))
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        events
    }

    pub fn subjects(&self) -> Vec<EntityId> {
        let mut subjects: Vec<EntityId> = self.by_subject.keys().copied().collect();
        subjects.sort();
        subjects
    }

    /// First occurrence per canonical milestone kind.
    pub fn milestones(&self, subject: EntityId) -> Vec<Milestone> {
        let events = self.events_for(subject);
        let mut milestones = Vec::new();

        let first_of = |kinds: &[EventType]| {
            events
                .iter()
                .find(|e| kinds.contains(&e.event_type) && e.date.is_some())
                .or_else(|| events.iter().find(|e| kinds.contains(&e.event_type)))
        };

        let table: [(MilestoneKind, &[EventType], &str); 5] = [
            (MilestoneKind::Birth, &[EventType::Birth], "Birth"),
            (
                MilestoneKind::Graduation,
                &[EventType::EducationGraduation],
                "Graduation",
            ),
            (
                MilestoneKind::FirstJob,
                &[EventType::JobStart],
                "First employment",
            ),
            (
                MilestoneKind::Marriage,
                &[EventType::RelationshipMarriage, EventType::RelationshipStart],
                "Major relationship",
            ),
            (
                MilestoneKind::Founding,
                &[EventType::JobCompanyFounded],
                "Company founded",
            ),
        ];

        for (kind, kinds, title) in table {
            if let Some(event) = first_of(kinds) {
                milestones.push(Milestone {
                    subject_id: subject,
                    kind,
                    date: event.date,
                    confidence: event.confidence,
                    title: title.to_string(),
                    supporting_events: vec![event.event_id],
                });
            }
        }
        milestones
    }

    /// Estimated age at `as_of`: from the best birth event when present,
    /// otherwise inferred from first graduation / first job with declared
    /// age priors.
    pub fn estimated_age(&self, subject: EntityId, as_of: NaiveDate) -> Option<i32> {
        let events = self.events_for(subject);

        let birth = events
            .iter()
            .filter(|e| e.event_type == EventType::Birth && e.date.is_some())
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(event) = birth {
            return Some(as_of.year() - event.date.expect("filtered").year());
        }

        let inferred_birth_year = events
            .iter()
            .find(|e| e.event_type == EventType::EducationGraduation && e.date.is_some())
            .map(|e| e.date.expect("filtered").year() - GRADUATION_AGE_PRIOR)
            .or_else(|| {
                events
                    .iter()
                    .find(|e| e.event_type == EventType::JobStart && e.date.is_some())
                    .map(|e| e.date.expect("filtered").year() - FIRST_JOB_AGE_PRIOR)
            })?;

        Some(as_of.year() - inferred_birth_year)
    }

    /// Event counts per time bucket, sorted by bucket key.
    pub fn activity_buckets(
        &self,
        subject: EntityId,
        bucket: ActivityBucket,
    ) -> BTreeMap<String, usize> {
        let mut buckets = BTreeMap::new();
        for event in self.events_for(subject) {
            let Some(date) = event.date else {
                continue;
            };
            let key = match bucket {
                ActivityBucket::Day => date.format("%Y-%m-%d").to_string(),
                ActivityBucket::Week => date.format("%Y-W%W").to_string(),
                ActivityBucket::Month => date.format("%Y-%m").to_string(),
                ActivityBucket::Year => date.format("%Y").to_string(),
            };
            *buckets.entry(key).or_insert(0) += 1;
        }
        buckets
    }

    /// The `top_n` busiest month buckets, descending.
    pub fn most_active_periods(&self, subject: EntityId, top_n: usize) -> Vec<(String, usize)> {
        let mut periods: Vec<(String, usize)> = self
            .activity_buckets(subject, ActivityBucket::Month)
            .into_iter()
            .collect();
        periods.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        periods.truncate(top_n);
        periods
    }

    /// Summary of the subject's reconstructed span of activity.
    pub fn lifespan_summary(&self, subject: EntityId) -> Option<LifespanSummary> {
        let events = self.events_for(subject);
        if events.is_empty() {
            return None;
        }

        let dated: Vec<&&TimelineEvent> = events.iter().filter(|e| e.date.is_some()).collect();
        let earliest = dated.first().and_then(|e| e.date);
        let latest = dated.last().and_then(|e| e.date);

        let mut counts_by_type: BTreeMap<String, usize> = BTreeMap::new();
        for event in &events {
            *counts_by_type.entry(event.event_type.to_string()).or_insert(0) += 1;
        }
        let mean_confidence =
            events.iter().map(|e| e.confidence).sum::<f64>() / events.len() as f64;

        Some(LifespanSummary {
            subject_id: subject,
            total_events: events.len(),
            earliest_event: earliest,
            latest_event: latest,
            timespan_years: match (earliest, latest) {
                (Some(a), Some(b)) => Some(b.year() - a.year()),
                _ => None,
            },
            counts_by_type,
            mean_confidence,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LifespanSummary {
    pub subject_id: EntityId,
    pub total_events: usize,
    pub earliest_event: Option<NaiveDate>,
    pub latest_event: Option<NaiveDate>,
    pub timespan_years: Option<i32>,
    pub counts_by_type: BTreeMap<String, usize>,
    pub mean_confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_duplicate_merge_combines_confidence() {
        let mut timeline = TimelineBuilder::new();
        let subject = Uuid::new_v4();

        let a = TimelineEvent::new(subject, EventType::JobStart, "Joined Example Corp")
            .with_date(date(2019, 3, 1), DatePrecision::Month)
            .with_confidence(0.6)
            .with_source("linkedin");
        let b = TimelineEvent::new(subject, EventType::JobStart, "joined example corp")
            .with_date(date(2019, 3, 1), DatePrecision::Month)
            .with_confidence(0.5)
            .with_source("web_search");

        let id_a = timeline.add_event(a);
        let id_b = timeline.add_event(b);
        assert_eq!(id_a, id_b);
        assert_eq!(timeline.len(), 1);

        let merged = timeline.event(id_a).unwrap();
        // 1 - (1-0.6)(1-0.5) = 0.8
        assert!((merged.confidence - 0.8).abs() < 1e-9);
        assert_eq!(merged.sources.len(), 2);
    }

    #[test]
    fn test_read_ordering() {
        let mut timeline = TimelineBuilder::new();
        let subject = Uuid::new_v4();

        timeline.add_event(
            TimelineEvent::new(subject, EventType::DigitalPost, "undated post")
                .with_confidence(0.9),
        );
        timeline.add_event(
            TimelineEvent::new(subject, EventType::JobStart, "second")
                .with_date(date(2020, 1, 1), DatePrecision::Year),
        );
        timeline.add_event(
            TimelineEvent::new(subject, EventType::Birth, "first")
                .with_date(date(1987, 5, 12), DatePrecision::ExactDate),
        );

        let events = timeline.events_for(subject);
        assert_eq!(events[0].title, "first");
        assert_eq!(events[1].title, "second");
        assert_eq!(events[2].title, "undated post");
    }

    #[test]
    fn test_milestones_first_occurrence() {
        let mut timeline = TimelineBuilder::new();
        let subject = Uuid::new_v4();

        timeline.add_event(
            TimelineEvent::new(subject, EventType::JobStart, "second job")
                .with_date(date(2018, 6, 1), DatePrecision::Month),
        );
        timeline.add_event(
            TimelineEvent::new(subject, EventType::JobStart, "first job")
                .with_date(date(2014, 7, 1), DatePrecision::Month),
        );
        timeline.add_event(
            TimelineEvent::new(subject, EventType::EducationGraduation, "graduated")
                .with_date(date(2014, 6, 1), DatePrecision::Month),
        );

        let milestones = timeline.milestones(subject);
        let first_job = milestones
            .iter()
            .find(|m| m.kind == MilestoneKind::FirstJob)
            .unwrap();
        assert_eq!(first_job.date, Some(date(2014, 7, 1)));
        assert!(milestones.iter().any(|m| m.kind == MilestoneKind::Graduation));
        assert!(!milestones.iter().any(|m| m.kind == MilestoneKind::Birth));
    }

    #[test]
    fn test_estimated_age_from_birth() {
        let mut timeline = TimelineBuilder::new();
        let subject = Uuid::new_v4();
        timeline.add_event(
            TimelineEvent::new(subject, EventType::Birth, "born")
                .with_date(date(1987, 5, 12), DatePrecision::ExactDate),
        );
        assert_eq!(timeline.estimated_age(subject, date(2026, 1, 1)), Some(39));
    }

    #[test]
    fn test_estimated_age_from_priors() {
        let mut timeline = TimelineBuilder::new();
        let subject = Uuid::new_v4();
        timeline.add_event(
            TimelineEvent::new(subject, EventType::EducationGraduation, "graduated")
                .with_date(date(2014, 6, 1), DatePrecision::Month),
        );
        // birth year prior: 2014 - 22 = 1992
        assert_eq!(timeline.estimated_age(subject, date(2026, 1, 1)), Some(34));

        let no_data = Uuid::new_v4();
        assert_eq!(timeline.estimated_age(no_data, date(2026, 1, 1)), None);
    }

    #[test]
    fn test_activity_buckets_and_most_active() {
        let mut timeline = TimelineBuilder::new();
        let subject = Uuid::new_v4();
        for day in [1, 2, 3] {
            timeline.add_event(
                TimelineEvent::new(subject, EventType::DigitalPost, format!("post {}", day))
                    .with_date(date(2023, 4, day), DatePrecision::ExactDate),
            );
        }
        timeline.add_event(
            TimelineEvent::new(subject, EventType::DigitalPost, "later post")
                .with_date(date(2023, 7, 1), DatePrecision::ExactDate),
        );

        let months = timeline.activity_buckets(subject, ActivityBucket::Month);
        assert_eq!(months["2023-04"], 3);
        assert_eq!(months["2023-07"], 1);

        let top = timeline.most_active_periods(subject, 1);
        assert_eq!(top, vec![("2023-04".to_string(), 3)]);
    }

    #[test]
    fn test_lifespan_summary() {
        let mut timeline = TimelineBuilder::new();
        let subject = Uuid::new_v4();
        timeline.add_event(
            TimelineEvent::new(subject, EventType::Birth, "born")
                .with_date(date(1990, 1, 1), DatePrecision::Year),
        );
        timeline.add_event(
            TimelineEvent::new(subject, EventType::JobStart, "hired")
                .with_date(date(2015, 1, 1), DatePrecision::Year),
        );

        let summary = timeline.lifespan_summary(subject).unwrap();
        assert_eq!(summary.total_events, 2);
        assert_eq!(summary.timespan_years, Some(25));
        assert_eq!(summary.counts_by_type["birth"], 1);

        assert!(timeline.lifespan_summary(Uuid::new_v4()).is_none());
    }
}
