use crate::risk::{score_risk, RiskLevel, RiskScores, RiskSignals};
use chrono::{DateTime, NaiveDate, Utc};
use dossier_core::{
    AttributeKey, EntityId, ErrorEntry, InvestigationId, RawResult, ResolvedEntity, SeedInput,
    VerificationStatus,
};
use dossier_graph::{EntityGraph, GraphStatistics};
use dossier_timeline::{Milestone, TimelineBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub overall_score: f64,
    pub level: RiskLevel,
    /// Highest-contributing exposure factors, most severe first.
    pub key_exposures: Vec<String>,
    pub entities_resolved: usize,
    pub sources_consulted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityInventoryEntry {
    pub entity_id: EntityId,
    pub entity_type: String,
    pub display: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExposureCategory {
    pub category: String,
    pub count: usize,
    pub source_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub date: Option<NaiveDate>,
    pub event_type: String,
    pub title: String,
    pub confidence: f64,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl fmt::Display for Effort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: u8,
    pub category: String,
    pub action: String,
    /// Estimated fraction of the risk removed by acting, in [0, 1].
    pub impact_estimate: f64,
    pub effort: Effort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFinding {
    pub entity_id: EntityId,
    pub entity_type: String,
    pub verification_status: VerificationStatus,
    pub confidence: f64,
    pub attributes: BTreeMap<String, serde_json::Value>,
    pub sources: Vec<String>,
    pub source_refs: Vec<String>,
    pub ambiguous_with: Vec<EntityId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReference {
    pub url: String,
    pub source_name: String,
    pub retrieved_at: DateTime<Utc>,
    pub content_hash: String,
}

/// The final report value. A pure function of the resolved graph,
/// timeline, and seed: assembling twice from the same inputs yields an
/// identical value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationReport {
    pub investigation_id: InvestigationId,
    pub subject_name: String,
    pub partial: bool,
    pub executive_summary: ExecutiveSummary,
    pub risk: RiskScores,
    pub identity_inventory: BTreeMap<String, Vec<IdentityInventoryEntry>>,
    pub exposure_analysis: Vec<ExposureCategory>,
    pub activity_timeline: Vec<EventSummary>,
    pub milestones: Vec<Milestone>,
    pub remediation_recommendations: Vec<Recommendation>,
    pub detailed_findings: Vec<EntityFinding>,
    pub source_references: Vec<SourceReference>,
    pub graph_statistics: GraphStatistics,
    pub errors: Vec<ErrorEntry>,
}

/// Assembles the report from the pipeline's working set.
pub struct Reporter;

impl Reporter {
    pub fn assemble(
        seed: &SeedInput,
        subject_id: EntityId,
        resolved: &[ResolvedEntity],
        graph: &EntityGraph,
        timeline: &TimelineBuilder,
        raw_results: &[RawResult],
        errors: Vec<ErrorEntry>,
        partial: bool,
    ) -> InvestigationReport {
        let mut entities: Vec<&ResolvedEntity> = resolved.iter().collect();
        entities.sort_by_key(|e| e.entity_id);

        let signals = derive_signals(&entities, graph, raw_results);
        let risk = score_risk(&signals);

        let mut source_references: Vec<SourceReference> = raw_results
            .iter()
            .map(|r| SourceReference {
                url: r.url.clone(),
                source_name: r.source_name.clone(),
                retrieved_at: r.retrieved_at,
                content_hash: r.content_hash.clone(),
            })
            .collect();
        source_references.sort_by(|a, b| a.url.cmp(&b.url).then(a.content_hash.cmp(&b.content_hash)));
        source_references.dedup_by(|a, b| a.url == b.url && a.content_hash == b.content_hash);

        let mut identity_inventory: BTreeMap<String, Vec<IdentityInventoryEntry>> = BTreeMap::new();
        for entity in &entities {
            identity_inventory
                .entry(entity.verification_status.to_string())
                .or_default()
                .push(IdentityInventoryEntry {
                    entity_id: entity.entity_id,
                    entity_type: entity.entity_type.to_string(),
                    display: display_name(entity),
                    confidence: entity.confidence,
                });
        }

        let exposure_analysis = exposure_analysis(&entities, raw_results);

        let events = timeline.events_for(subject_id);
        let activity_timeline: Vec<EventSummary> = events
            .iter()
            .map(|e| EventSummary {
                date: e.date,
                event_type: e.event_type.to_string(),
                title: e.title.clone(),
                confidence: e.confidence,
                sources: e.sources.iter().cloned().collect(),
            })
            .collect();

        let detailed_findings: Vec<EntityFinding> = entities
            .iter()
            .map(|entity| EntityFinding {
                entity_id: entity.entity_id,
                entity_type: entity.entity_type.to_string(),
                verification_status: entity.verification_status,
                confidence: entity.confidence,
                attributes: entity
                    .attributes
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.to_string(),
                            serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
                        )
                    })
                    .collect(),
                sources: entity.sources.iter().cloned().collect(),
                source_refs: entity
                    .source_refs
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
                ambiguous_with: {
                    let mut ids: Vec<EntityId> = entity
                        .ambiguous_with
                        .iter()
                        .map(|l| l.other_entity)
                        .collect();
                    ids.sort();
                    ids
                },
            })
            .collect();

        let key_exposures = key_exposures(&risk, &signals);
        let remediation_recommendations = recommendations(&risk, &signals);

        let report = InvestigationReport {
            investigation_id: seed.investigation_id,
            subject_name: seed.subject_identifiers.full_name.clone(),
            partial,
            executive_summary: ExecutiveSummary {
                overall_score: risk.overall,
                level: risk.level,
                key_exposures,
                entities_resolved: entities.len(),
                sources_consulted: source_references
                    .iter()
                    .map(|s| s.source_name.as_str())
                    .collect::<BTreeSet<_>>()
                    .len(),
            },
            risk,
            identity_inventory,
            exposure_analysis,
            activity_timeline,
            milestones: timeline.milestones(subject_id),
            remediation_recommendations,
            detailed_findings,
            source_references,
            graph_statistics: graph.statistics(),
            errors,
        };

        info!(
            investigation_id = %report.investigation_id,
            level = %report.risk.level,
            entities = report.executive_summary.entities_resolved,
            partial,
            "report assembled"
        );
        report
    }
}

fn display_name(entity: &ResolvedEntity) -> String {
    for key in [
        AttributeKey::FullName,
        AttributeKey::DisplayName,
        AttributeKey::Email,
        AttributeKey::Username,
        AttributeKey::Domain,
        AttributeKey::Organization,
    ] {
        if let Some(value) = entity.attributes.get(&key).and_then(|v| v.as_text()) {
            return value.to_string();
        }
    }
    entity.entity_id.to_string()
}

fn derive_signals(
    entities: &[&ResolvedEntity],
    graph: &EntityGraph,
    raw_results: &[RawResult],
) -> RiskSignals {
    let mut signals = RiskSignals::default();

    for entity in entities {
        if entity.attributes.contains_key(&AttributeKey::Email) {
            signals.emails_exposed += 1;
        }
        if entity.attributes.contains_key(&AttributeKey::Phone) {
            signals.phones_exposed += 1;
        }
        if entity.attributes.contains_key(&AttributeKey::City)
            || entity.attributes.contains_key(&AttributeKey::Region)
        {
            signals.addresses_exposed += 1;
        }
        for key in [
            AttributeKey::Employer,
            AttributeKey::JobTitle,
            AttributeKey::Industry,
        ] {
            if entity.attributes.contains_key(&key) {
                signals.professional_attributes += 1;
            }
        }
        if entity.attributes.contains_key(&AttributeKey::BirthYear) {
            signals.identity_attributes += 1;
            signals.dob_exposed = true;
        }
        if entity.attributes.contains_key(&AttributeKey::Bio) {
            signals.behavioral_items += 1;
        }
    }

    signals.network_size = graph.node_count().saturating_sub(1);

    for result in raw_results {
        if let Some(data_classes) = result.metadata.get("data_classes") {
            signals.breach_count += 1;
            let lower = data_classes.to_lowercase();
            if lower.contains("password") {
                signals.credentials_exposed = true;
                signals.weak_password_hints += 1;
            }
            if lower.contains("physical address") {
                signals.address_exposed = true;
            }
            if lower.contains("credit card") || lower.contains("bank") {
                signals.financial_data_exposed = true;
            }
            if let Some(date) = result.metadata.get("breach_date") {
                // recent means within roughly the last two years
                let recent_cutoff = Utc::now().date_naive() - chrono::Days::new(730);
                if let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
                    if parsed > recent_cutoff {
                        signals.recent_breach_count += 1;
                    }
                }
            }
        }
    }

    signals
}

fn exposure_analysis(
    entities: &[&ResolvedEntity],
    raw_results: &[RawResult],
) -> Vec<ExposureCategory> {
    let categories: [(&str, Box<dyn Fn(&ResolvedEntity) -> bool>); 4] = [
        (
            "contact",
            Box::new(|e: &ResolvedEntity| {
                e.attributes.contains_key(&AttributeKey::Email)
                    || e.attributes.contains_key(&AttributeKey::Phone)
            }),
        ),
        (
            "professional",
            Box::new(|e: &ResolvedEntity| {
                e.attributes.contains_key(&AttributeKey::Employer)
                    || e.attributes.contains_key(&AttributeKey::JobTitle)
            }),
        ),
        (
            "identity",
            Box::new(|e: &ResolvedEntity| {
                e.attributes.contains_key(&AttributeKey::FullName)
                    || e.attributes.contains_key(&AttributeKey::BirthYear)
            }),
        ),
        (
            "location",
            Box::new(|e: &ResolvedEntity| {
                e.attributes.contains_key(&AttributeKey::City)
                    || e.attributes.contains_key(&AttributeKey::Country)
            }),
        ),
    ];

    let url_for = |refs: &[dossier_core::ResultId]| -> Vec<String> {
        let wanted: BTreeSet<_> = refs.iter().collect();
        let mut urls: Vec<String> = raw_results
            .iter()
            .filter(|r| wanted.contains(&r.result_id))
            .map(|r| r.url.clone())
            .collect();
        urls.sort();
        urls.dedup();
        urls
    };

    categories
        .into_iter()
        .map(|(name, predicate)| {
            let matching: Vec<&&ResolvedEntity> =
                entities.iter().filter(|e| predicate(e)).collect();
            let mut source_refs: Vec<String> = matching
                .iter()
                .flat_map(|e| url_for(&e.source_refs))
                .collect();
            source_refs.sort();
            source_refs.dedup();
            ExposureCategory {
                category: name.to_string(),
                count: matching.len(),
                source_refs,
            }
        })
        .collect()
}

fn key_exposures(risk: &RiskScores, signals: &RiskSignals) -> Vec<String> {
    let mut factors: Vec<(f64, String)> = Vec::new();
    if signals.breach_count > 0 {
        factors.push((
            risk.security_risk,
            format!("{} breach record(s) referencing the subject", signals.breach_count),
        ));
    }
    if signals.emails_exposed > 0 {
        factors.push((
            risk.privacy_exposure,
            format!("{} email address(es) publicly linked", signals.emails_exposed),
        ));
    }
    if signals.phones_exposed > 0 {
        factors.push((
            risk.privacy_exposure * 0.9,
            format!("{} phone number(s) publicly linked", signals.phones_exposed),
        ));
    }
    if signals.credentials_exposed {
        factors.push((
            risk.identity_theft_risk,
            "credential material present in breach data".to_string(),
        ));
    }
    if signals.network_size > 5 {
        factors.push((
            risk.misc,
            format!("{} connected entities discovered", signals.network_size),
        ));
    }
    factors.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    factors.into_iter().take(3).map(|(_, f)| f).collect()
}

fn recommendations(risk: &RiskScores, signals: &RiskSignals) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if signals.credentials_exposed {
        recs.push(Recommendation {
            priority: 1,
            category: "credentials".into(),
            action: "Rotate passwords for all accounts tied to breached email addresses".into(),
            impact_estimate: 0.30,
            effort: Effort::Medium,
        });
    }
    if signals.missing_2fa_hints > 0 || signals.breach_count > 0 {
        recs.push(Recommendation {
            priority: 2,
            category: "account_security".into(),
            action: "Enable two-factor authentication on primary email and financial accounts"
                .into(),
            impact_estimate: 0.25,
            effort: Effort::Low,
        });
    }
    if risk.privacy_exposure > 50.0 {
        recs.push(Recommendation {
            priority: 3,
            category: "privacy".into(),
            action: "Request removal of personal records from data-broker listings".into(),
            impact_estimate: 0.15,
            effort: Effort::Medium,
        });
    }
    if signals.phones_exposed > 0 {
        recs.push(Recommendation {
            priority: 4,
            category: "contact".into(),
            action: "Replace the exposed phone number on public profiles with a masked line"
                .into(),
            impact_estimate: 0.10,
            effort: Effort::Low,
        });
    }
    if recs.is_empty() {
        recs.push(Recommendation {
            priority: 5,
            category: "monitoring".into(),
            action: "Continue periodic monitoring; current public exposure is limited".into(),
            impact_estimate: 0.05,
            effort: Effort::Low,
        });
    }

    recs.sort_by_key(|r| r.priority);
    recs
}

/// Render the report as markdown. Presentation only; the report value is
/// the contract.
pub fn render_markdown(report: &InvestigationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Investigation report: {}\n\n", report.subject_name));
    if report.partial {
        out.push_str("> Partial report: the investigation ended before the plan drained.\n\n");
    }
    out.push_str(&format!(
        "**Overall risk: {:.0}/100 ({})** - {} entities resolved across {} sources.\n\n",
        report.risk.overall,
        report.risk.level,
        report.executive_summary.entities_resolved,
        report.executive_summary.sources_consulted,
    ));
    if !report.executive_summary.key_exposures.is_empty() {
        out.push_str("## Key exposures\n\n");
        for exposure in &report.executive_summary.key_exposures {
            out.push_str(&format!("- {}\n", exposure));
        }
        out.push('\n');
    }
    out.push_str("## Remediation\n\n");
    for rec in &report.remediation_recommendations {
        out.push_str(&format!(
            "{}. {} (impact ~{:.0}%, effort {})\n",
            rec.priority,
            rec.action,
            rec.impact_estimate * 100.0,
            rec.effort
        ));
    }
    out.push_str("\n## Timeline\n\n");
    for event in &report.activity_timeline {
        let date = event
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "undated".to_string());
        out.push_str(&format!("- {}: {} ({})\n", date, event.title, event.event_type));
    }
    out.push_str("\n## Sources\n\n");
    for source in &report.source_references {
        out.push_str(&format!(
            "- {} (retrieved {}, sha256 {})\n",
            source.url,
            source.retrieved_at.format("%Y-%m-%d %H:%M"),
            &source.content_hash[..12.min(source.content_hash.len())]
        ));
    }
    out
}
