use dossier_core::{
    BlockedPatterns, ErrorEntry, ErrorKind, Query, QueryKind, SeedInput,
};
use dossier_connectors::ConnectorRegistry;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hard cap on queries per planning round, independent of seed richness.
const MAX_QUERIES_PER_ROUND: usize = 200;

/// An identifier discovered mid-investigation that can seed a follow-up
/// planning round.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiscoveredIdentifier {
    pub kind: QueryKind,
    pub value: String,
}

#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub queries: Vec<Query>,
    /// Queries rejected by the blocked-pattern pass; recorded on the
    /// investigation, never scheduled.
    pub rejected: Vec<ErrorEntry>,
}

/// Turns seed identifiers into a deduplicated, prioritized query plan.
/// Re-invoked with discovered identifiers for follow-up rounds while the
/// search depth allows.
pub struct QueryPlanner {
    registry: Arc<ConnectorRegistry>,
    blocked: Arc<BlockedPatterns>,
}

impl QueryPlanner {
    pub fn new(registry: Arc<ConnectorRegistry>, blocked: Arc<BlockedPatterns>) -> Self {
        Self { registry, blocked }
    }

    /// The initial plan at depth zero.
    pub fn plan(&self, seed: &SeedInput) -> PlanOutcome {
        let mut drafts: Vec<(QueryKind, String, u8)> = Vec::new();
        let subject = &seed.subject_identifiers;

        drafts.push((QueryKind::Name, subject.full_name.clone(), 60));

        for username in &subject.usernames {
            drafts.push((QueryKind::Username, username.clone(), 75));
        }
        for email in &subject.emails {
            drafts.push((QueryKind::Email, email.clone(), 90));
        }
        for phone in &subject.phone_numbers {
            drafts.push((QueryKind::Phone, phone.clone(), 85));
        }
        for domain in &subject.known_domains {
            drafts.push((QueryKind::Domain, domain.clone(), 85));
        }
        if let Some(employer) = &subject.professional_hints.employer {
            drafts.push((QueryKind::Company, employer.clone(), 55));
            drafts.push((
                QueryKind::Composite,
                format!("{} {}", subject.full_name, employer),
                80,
            ));
        }
        if let Some(city) = &subject.geographic_hints.city {
            drafts.push((
                QueryKind::Composite,
                format!("{} {}", subject.full_name, city),
                80,
            ));
        }
        for domain in &subject.known_domains {
            drafts.push((
                QueryKind::Composite,
                format!("{} {}", subject.full_name, domain),
                78,
            ));
        }

        let outcome = self.materialize(drafts, 0);
        info!(
            queries = outcome.queries.len(),
            rejected = outcome.rejected.len(),
            "initial query plan built"
        );
        outcome
    }

    /// A follow-up round from identifiers discovered during resolution.
    /// Returns an empty plan once `depth` reaches the seed's
    /// `max_search_depth`.
    pub fn expand(
        &self,
        seed: &SeedInput,
        discovered: &[DiscoveredIdentifier],
        depth: u8,
    ) -> PlanOutcome {
        if depth >= seed.constraints.max_search_depth {
            debug!(depth, "search depth exhausted, no expansion");
            return PlanOutcome::default();
        }

        let already_known: BTreeSet<String> = seed
            .subject_identifiers
            .usernames
            .iter()
            .chain(seed.subject_identifiers.emails.iter())
            .chain(seed.subject_identifiers.phone_numbers.iter())
            .chain(seed.subject_identifiers.known_domains.iter())
            .map(|s| s.to_lowercase())
            .collect();

        let mut sorted: Vec<&DiscoveredIdentifier> = discovered.iter().collect();
        sorted.sort();
        sorted.dedup();

        let drafts: Vec<(QueryKind, String, u8)> = sorted
            .into_iter()
            .filter(|id| !already_known.contains(&id.value.to_lowercase()))
            .map(|id| {
                let priority = match id.kind {
                    QueryKind::Email => 70,
                    QueryKind::Domain => 65,
                    QueryKind::Username => 60,
                    _ => 40,
                };
                (id.kind, id.value.clone(), priority)
            })
            .collect();

        let outcome = self.materialize(drafts, depth);
        info!(
            depth,
            queries = outcome.queries.len(),
            "follow-up plan built"
        );
        outcome
    }

    /// Route drafts to connectors, fold in connector confidence, dedupe,
    /// and apply the blocked-pattern pass.
    fn materialize(&self, drafts: Vec<(QueryKind, String, u8)>, depth: u8) -> PlanOutcome {
        let mut queries = Vec::new();
        let mut rejected = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();

        for (kind, query_string, base_priority) in drafts {
            let query_string = query_string.trim().to_string();
            if query_string.is_empty() {
                continue;
            }

            if let Err(e) = self.blocked.check_query(&query_string) {
                warn!(query = %query_string, "query rejected by security pass");
                rejected.push(
                    ErrorEntry::new(ErrorKind::SecurityRejected, e.to_string())
                        .with_source("planner"),
                );
                continue;
            }

            let connectors = self.registry.for_query_kind(kind);
            if connectors.is_empty() {
                debug!(%kind, "no connector supports this query kind");
                continue;
            }

            let mean_confidence: f64 = connectors
                .iter()
                .map(|c| c.base_confidence())
                .sum::<f64>()
                / connectors.len() as f64;

            let mut query = Query::new(query_string, kind);
            query.depth = depth;
            // priority folds the template base with connector confidence
            query.priority = (f64::from(base_priority) + mean_confidence * 10.0)
                .round()
                .clamp(0.0, 100.0) as u8;
            query.target_connectors = connectors
                .iter()
                .map(|c| c.source_name().to_string())
                .filter(|name| {
                    let mut query_probe = query.clone();
                    query_probe.target_connectors = vec![name.clone()];
                    query_probe
                        .dedup_keys()
                        .into_iter()
                        .all(|key| seen.insert(key))
                })
                .collect();

            if query.target_connectors.is_empty() {
                continue;
            }
            queries.push(query);
            if queries.len() >= MAX_QUERIES_PER_ROUND {
                warn!("query cap reached, dropping remaining drafts");
                break;
            }
        }

        queries.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.kind.cmp(&b.kind))
                .then(a.query_string.cmp(&b.query_string))
        });

        PlanOutcome { queries, rejected }
    }
}
