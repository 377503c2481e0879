use crate::matcher::FuzzyMatcher;
use dossier_core::{
    AmbiguousLink, AttributeKey, AttributeMap, AttributeValue, CandidateId, DisputedValue,
    EntityType, NormalizedEntity, ResolvedEntity, Thresholds, VerificationStatus,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};
use uuid::Uuid;

/// Floor of the ambiguous band: pairs scoring here but below the merge
/// threshold are flagged for review, never merged.
const AMBIGUOUS_FLOOR: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct AmbiguousPair {
    pub left: CandidateId,
    pub right: CandidateId,
    pub score: f64,
    pub reasoning: String,
}

#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    pub entities: Vec<ResolvedEntity>,
    pub ambiguous_pairs: Vec<AmbiguousPair>,
    pub comparisons: usize,
}

/// Clusters normalized candidates into resolved entities with blocking,
/// fuzzy pair scoring, and union-find merging. For a fixed candidate set
/// and thresholds the output is identical regardless of input order.
pub struct EntityResolver {
    matcher: FuzzyMatcher,
    thresholds: Thresholds,
}

impl EntityResolver {
    pub fn new(matcher: FuzzyMatcher, thresholds: Thresholds) -> Self {
        Self {
            matcher,
            thresholds,
        }
    }

    pub fn resolve(&self, mut candidates: Vec<NormalizedEntity>) -> ResolutionOutcome {
        // canonical processing order, independent of arrival order; the
        // same candidate observed twice is one piece of evidence
        candidates.sort_by_key(|c| c.candidate.candidate_id);
        candidates.dedup_by_key(|c| c.candidate.candidate_id);

        let blocks = build_blocks(&candidates);
        let pairs = comparable_pairs(&blocks);

        let mut union_find = UnionFind::new(candidates.len());
        let mut ambiguous: Vec<AmbiguousPair> = Vec::new();
        let mut merge_edges: Vec<(usize, usize, f64)> = Vec::new();

        for (i, j) in &pairs {
            let result = self.matcher.score(&candidates[*i], &candidates[*j]);
            if result.score >= self.thresholds.minimum_entity_confidence {
                union_find.union(*i, *j);
                merge_edges.push((*i, *j, result.score));
            } else if result.score >= AMBIGUOUS_FLOOR {
                debug!(
                    left = %candidates[*i].candidate.candidate_id,
                    right = %candidates[*j].candidate.candidate_id,
                    score = result.score,
                    "ambiguous pair held for review"
                );
                ambiguous.push(AmbiguousPair {
                    left: candidates[*i].candidate.candidate_id,
                    right: candidates[*j].candidate.candidate_id,
                    score: result.score,
                    reasoning: result.reasoning(),
                });
            }
        }

        let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for idx in 0..candidates.len() {
            clusters.entry(union_find.find(idx)).or_default().push(idx);
        }

        // weak clusters split back on their weakest merge edge
        let clusters = self.split_weak_clusters(clusters, &candidates, &merge_edges);

        let mut entity_of_candidate: HashMap<CandidateId, Uuid> = HashMap::new();
        let mut entities: Vec<ResolvedEntity> = clusters
            .values()
            .map(|members| {
                let entity = merge_cluster(&candidates, members);
                for &member in members {
                    entity_of_candidate
                        .insert(candidates[member].candidate.candidate_id, entity.entity_id);
                }
                entity
            })
            .collect();

        // surface ambiguous links on both sides of each held pair
        for pair in &ambiguous {
            let left_entity = entity_of_candidate.get(&pair.left).copied();
            let right_entity = entity_of_candidate.get(&pair.right).copied();
            if let (Some(left), Some(right)) = (left_entity, right_entity) {
                if left == right {
                    continue;
                }
                for entity in entities.iter_mut() {
                    if entity.entity_id == left {
                        entity.ambiguous_with.push(AmbiguousLink {
                            other_entity: right,
                            score: pair.score,
                        });
                    } else if entity.entity_id == right {
                        entity.ambiguous_with.push(AmbiguousLink {
                            other_entity: left,
                            score: pair.score,
                        });
                    }
                }
            }
        }

        entities.sort_by_key(|e| e.entity_id);
        info!(
            candidates = candidates.len(),
            entities = entities.len(),
            comparisons = pairs.len(),
            ambiguous = ambiguous.len(),
            "resolution pass complete"
        );

        ResolutionOutcome {
            entities,
            ambiguous_pairs: ambiguous,
            comparisons: pairs.len(),
        }
    }

    /// A cluster whose combined confidence lands below the `unlikely`
    /// floor is split back on its weakest merge.
    fn split_weak_clusters(
        &self,
        clusters: BTreeMap<usize, Vec<usize>>,
        candidates: &[NormalizedEntity],
        merge_edges: &[(usize, usize, f64)],
    ) -> BTreeMap<usize, Vec<usize>> {
        let mut out: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut next_key = candidates.len();

        for (root, members) in clusters {
            if members.len() < 2 || cluster_confidence(candidates, &members) >= AMBIGUOUS_FLOOR {
                out.insert(root, members);
                continue;
            }

            let member_set: BTreeSet<usize> = members.iter().copied().collect();
            let mut edges: Vec<&(usize, usize, f64)> = merge_edges
                .iter()
                .filter(|(a, b, _)| member_set.contains(a) && member_set.contains(b))
                .collect();
            edges.sort_by(|x, y| x.2.partial_cmp(&y.2).unwrap_or(std::cmp::Ordering::Equal));
            if edges.is_empty() {
                out.insert(root, members);
                continue;
            }
            let weakest = edges[0];
            debug!(score = weakest.2, "splitting weak cluster on weakest merge");

            // rebuild components without the weakest edge
            let mut local = UnionFind::new(candidates.len());
            for (a, b, _) in merge_edges {
                if member_set.contains(a)
                    && member_set.contains(b)
                    && (*a, *b) != (weakest.0, weakest.1)
                {
                    local.union(*a, *b);
                }
            }
            let mut sub: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for &member in &members {
                sub.entry(local.find(member)).or_default().push(member);
            }
            for (_, sub_members) in sub {
                out.insert(next_key, sub_members);
                next_key += 1;
            }
        }
        out
    }
}

/// Evidence-combination confidence for a cluster: each member contributes
/// `source_confidence x extraction_confidence`, combined as
/// `100 x (1 - prod(1 - s_i))`.
fn cluster_confidence(candidates: &[NormalizedEntity], members: &[usize]) -> f64 {
    let mut miss = 1.0;
    for &idx in members {
        let candidate = &candidates[idx];
        let support = candidate.source_confidence * candidate.candidate.extraction_confidence;
        miss *= 1.0 - support.clamp(0.0, 1.0);
    }
    100.0 * (1.0 - miss)
}

/// Blocking keys: candidates are comparable only when they share at least
/// one block, which keeps scoring far below O(n^2).
fn build_blocks(candidates: &[NormalizedEntity]) -> BTreeMap<String, Vec<usize>> {
    let mut blocks: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, entity) in candidates.iter().enumerate() {
        let kind = entity.candidate.entity_type;
        let mut push = |tag: &str, value: &str| {
            blocks
                .entry(format!("{}|{}|{}", kind, tag, value))
                .or_default()
                .push(idx);
        };

        if let Some(key) = &entity.canonical.email_deliverable_key {
            push("email", key);
        }
        if let Some(phone) = &entity.canonical.e164_phone {
            push("phone", phone);
        }
        if let Some(domain) = &entity.canonical.normalized_domain {
            push("domain", domain);
        }
        for code in &entity.canonical.name_soundex {
            push("soundex", code);
        }
        for variant in &entity.canonical.username_variants {
            push("username", variant);
        }
    }
    blocks
}

fn comparable_pairs(blocks: &BTreeMap<String, Vec<usize>>) -> Vec<(usize, usize)> {
    let mut pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
    for members in blocks.values() {
        for (pos, &i) in members.iter().enumerate() {
            for &j in &members[pos + 1..] {
                let pair = if i < j { (i, j) } else { (j, i) };
                pairs.insert(pair);
            }
        }
    }
    pairs.into_iter().collect()
}

/// Merge a cluster's attributes. Singletons coalesce; conflicting values
/// prefer higher source confidence, then extraction confidence, then
/// recency, with every losing value recorded in `disputed_attributes`.
fn merge_cluster(candidates: &[NormalizedEntity], members: &[usize]) -> ResolvedEntity {
    let mut sorted_members = members.to_vec();
    sorted_members.sort_by_key(|&idx| candidates[idx].candidate.candidate_id);

    let entity_type = dominant_type(candidates, &sorted_members);

    let mut attributes = AttributeMap::new();
    let mut disputed: BTreeMap<AttributeKey, Vec<DisputedValue>> = BTreeMap::new();
    let mut winner_rank: BTreeMap<AttributeKey, (f64, f64, i64, Uuid)> = BTreeMap::new();

    for &idx in &sorted_members {
        let entity = &candidates[idx];
        let rank = (
            entity.source_confidence,
            entity.candidate.extraction_confidence,
            entity.candidate.observed_at.timestamp_millis(),
            entity.candidate.candidate_id,
        );
        for (key, value) in &entity.candidate.attributes {
            match attributes.get(key) {
                None => {
                    attributes.insert(*key, value.clone());
                    winner_rank.insert(*key, rank);
                }
                Some(existing) if existing == value => {}
                Some(existing) => {
                    let current = winner_rank.get(key).copied().unwrap_or(rank);
                    if rank > current {
                        disputed.entry(*key).or_default().push(DisputedValue {
                            value: existing.clone(),
                            source_name: source_of(candidates, &sorted_members, key, existing),
                            extraction_confidence: current.1,
                        });
                        attributes.insert(*key, value.clone());
                        winner_rank.insert(*key, rank);
                    } else {
                        disputed.entry(*key).or_default().push(DisputedValue {
                            value: value.clone(),
                            source_name: entity.candidate.source_name.clone(),
                            extraction_confidence: entity.candidate.extraction_confidence,
                        });
                    }
                }
            }
        }
    }

    let confidence = cluster_confidence(candidates, &sorted_members);
    let mut sources: BTreeSet<String> = BTreeSet::new();
    let mut source_refs = Vec::new();
    for &idx in &sorted_members {
        sources.insert(candidates[idx].candidate.source_name.clone());
        source_refs.extend(candidates[idx].candidate.source_refs.iter().copied());
    }
    source_refs.sort();
    source_refs.dedup();

    ResolvedEntity {
        // derived from the lead member so resolution is reproducible
        entity_id: lead_entity_id(candidates, &sorted_members),
        entity_type,
        attributes,
        disputed_attributes: disputed,
        confidence,
        verification_status: VerificationStatus::from_confidence(confidence),
        member_candidates: sorted_members
            .iter()
            .map(|&idx| candidates[idx].candidate.candidate_id)
            .collect(),
        sources,
        source_refs,
        ambiguous_with: Vec::new(),
    }
}

/// The resolved entity id is the smallest member candidate id, so the
/// same cluster always resolves to the same identity.
fn lead_entity_id(candidates: &[NormalizedEntity], members: &[usize]) -> Uuid {
    members
        .iter()
        .map(|&idx| candidates[idx].candidate.candidate_id)
        .min()
        .expect("cluster non-empty")
}

fn dominant_type(candidates: &[NormalizedEntity], members: &[usize]) -> EntityType {
    let mut counts: BTreeMap<String, (usize, EntityType)> = BTreeMap::new();
    for &idx in members {
        let t = candidates[idx].candidate.entity_type;
        let entry = counts.entry(t.to_string()).or_insert((0, t));
        entry.0 += 1;
    }
    // person outranks narrower types when both appear in one cluster
    if counts.contains_key("person") {
        return EntityType::Person;
    }
    counts
        .values()
        .max_by_key(|(count, _)| *count)
        .map(|(_, t)| *t)
        .expect("cluster non-empty")
}

fn source_of(
    candidates: &[NormalizedEntity],
    members: &[usize],
    key: &AttributeKey,
    value: &AttributeValue,
) -> String {
    members
        .iter()
        .filter_map(|&idx| {
            let c = &candidates[idx].candidate;
            (c.attributes.get(key) == Some(value)).then(|| c.source_name.clone())
        })
        .next()
        .unwrap_or_default()
}

/// Disjoint-set with path compression and union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::Normalizer;
    use dossier_core::{EntityCandidate, GeographicHints};

    fn normalizer() -> Normalizer {
        Normalizer::new(GeographicHints {
            country: Some("US".into()),
            ..Default::default()
        })
    }

    fn resolver() -> EntityResolver {
        EntityResolver::new(FuzzyMatcher::default(), Thresholds::default())
    }

    fn person(
        name: &str,
        email: Option<&str>,
        source: &str,
        source_conf: f64,
        extraction: f64,
    ) -> NormalizedEntity {
        let mut candidate = EntityCandidate::new(EntityType::Person, source)
            .with_attribute(AttributeKey::FullName, name);
        if let Some(email) = email {
            candidate = candidate.with_attribute(AttributeKey::Email, email);
        }
        candidate.extraction_confidence = extraction;
        normalizer().normalize(candidate, source_conf)
    }

    #[test]
    fn test_same_email_candidates_merge() {
        let outcome = resolver().resolve(vec![
            person("Alice Roe", Some("alice@example.com"), "web_search", 0.8, 0.9),
            person("A. Roe", Some("alice@example.com"), "code_repository", 0.85, 0.9),
        ]);

        assert_eq!(outcome.entities.len(), 1);
        let entity = &outcome.entities[0];
        assert_eq!(entity.member_candidates.len(), 2);
        assert_eq!(entity.sources.len(), 2);
        assert!(entity.confidence > 90.0);
        assert_eq!(entity.verification_status, VerificationStatus::Verified);
    }

    #[test]
    fn test_unrelated_candidates_stay_apart() {
        let outcome = resolver().resolve(vec![
            person("Alice Roe", Some("alice@example.com"), "web_search", 0.8, 0.9),
            person("Gregor Samsa", Some("gregor@kafka.example"), "web_search", 0.8, 0.9),
        ]);
        assert_eq!(outcome.entities.len(), 2);
        assert!(outcome.ambiguous_pairs.is_empty());
    }

    #[test]
    fn test_ambiguous_band_not_merged_but_annotated() {
        let mut a = EntityCandidate::new(EntityType::Person, "web_search")
            .with_attribute(AttributeKey::FullName, "Jordan Avery")
            .with_attribute(AttributeKey::Email, "jordan.a@example.com")
            .with_attribute(AttributeKey::City, "Portland")
            .with_attribute(AttributeKey::BirthYear, AttributeValue::Integer(1985));
        a.extraction_confidence = 0.9;
        let mut b = EntityCandidate::new(EntityType::Person, "code_repository")
            .with_attribute(AttributeKey::FullName, "Jordan Avery")
            .with_attribute(AttributeKey::Email, "javery91@example.com")
            .with_attribute(AttributeKey::City, "Portland")
            .with_attribute(AttributeKey::BirthYear, AttributeValue::Integer(1990));
        b.extraction_confidence = 0.9;

        let n = normalizer();
        let outcome = resolver().resolve(vec![n.normalize(a, 0.8), n.normalize(b, 0.85)]);

        assert_eq!(outcome.entities.len(), 2, "ambiguous pair must not merge");
        assert_eq!(outcome.ambiguous_pairs.len(), 1);
        let pair = &outcome.ambiguous_pairs[0];
        assert!((60.0..75.0).contains(&pair.score), "score {}", pair.score);
        assert!(!pair.reasoning.is_empty());
        for entity in &outcome.entities {
            assert_eq!(entity.ambiguous_with.len(), 1);
        }
    }

    #[test]
    fn test_conflict_resolution_prefers_source_confidence() {
        let mut low = EntityCandidate::new(EntityType::Person, "web_search")
            .with_attribute(AttributeKey::FullName, "Alice Roe")
            .with_attribute(AttributeKey::Email, "alice@example.com")
            .with_attribute(AttributeKey::Employer, "Oldname Inc");
        low.extraction_confidence = 0.9;
        let mut high = EntityCandidate::new(EntityType::Person, "domain_registry")
            .with_attribute(AttributeKey::FullName, "Alice Roe")
            .with_attribute(AttributeKey::Email, "alice@example.com")
            .with_attribute(AttributeKey::Employer, "Example Corp");
        high.extraction_confidence = 0.9;

        let n = normalizer();
        let outcome = resolver().resolve(vec![n.normalize(low, 0.6), n.normalize(high, 0.95)]);

        assert_eq!(outcome.entities.len(), 1);
        let entity = &outcome.entities[0];
        assert_eq!(
            entity.attributes[&AttributeKey::Employer].as_text().unwrap(),
            "Example Corp"
        );
        let disputed = &entity.disputed_attributes[&AttributeKey::Employer];
        assert_eq!(disputed.len(), 1);
        assert_eq!(disputed[0].value.as_text().unwrap(), "Oldname Inc");
        assert_eq!(disputed[0].source_name, "web_search");
    }

    #[test]
    fn test_order_independence() {
        let make = || {
            vec![
                person("Alice Roe", Some("alice@example.com"), "web_search", 0.8, 0.9),
                person("A. Roe", Some("alice@example.com"), "code_repository", 0.85, 0.9),
                person("Gregor Samsa", Some("gregor@kafka.example"), "web_search", 0.8, 0.9),
                person("Bob Chen", Some("bob@example.com"), "breach_database", 0.9, 0.8),
            ]
        };

        // same candidate values in both runs (fresh ids would defeat the
        // comparison), several permutations of one fixed set
        let base = make();
        let mut reversed = base.clone();
        reversed.reverse();
        let mut rotated = base.clone();
        rotated.rotate_left(2);

        let snapshots: Vec<String> = [base, reversed, rotated]
            .into_iter()
            .map(|input| {
                let outcome = resolver().resolve(input);
                let mut view: Vec<String> = outcome
                    .entities
                    .iter()
                    .map(|e| {
                        format!(
                            "{}|{:?}|{:.3}|{:?}",
                            e.entity_id, e.attributes, e.confidence, e.member_candidates
                        )
                    })
                    .collect();
                view.sort();
                view.join("\n")
            })
            .collect();

        assert_eq!(snapshots[0], snapshots[1]);
        assert_eq!(snapshots[0], snapshots[2]);
    }

    #[test]
    fn test_merge_with_self_is_noop() {
        let single = person("Alice Roe", Some("alice@example.com"), "web_search", 0.8, 0.9);
        let outcome_once = resolver().resolve(vec![single.clone()]);
        let outcome_twice = resolver().resolve(vec![single.clone(), single]);

        // the duplicate candidate collapses to the identical entity:
        // same attributes, same confidence
        assert_eq!(outcome_once.entities.len(), 1);
        assert_eq!(outcome_twice.entities.len(), 1);
        assert_eq!(
            outcome_once.entities[0].attributes,
            outcome_twice.entities[0].attributes
        );
        assert_eq!(
            outcome_once.entities[0].confidence,
            outcome_twice.entities[0].confidence
        );
    }

    #[test]
    fn test_blocking_limits_comparisons() {
        // 20 candidates, 10 sharing one email block, 10 sharing another,
        // nothing across blocks
        let mut input = Vec::new();
        for i in 0..10 {
            input.push(person(
                &format!("Alice Roe{}", i),
                Some("alice@example.com"),
                "web_search",
                0.8,
                0.9,
            ));
            input.push(person(
                &format!("Zed Quux{}", i),
                Some("zed@other.example"),
                "web_search",
                0.8,
                0.9,
            ));
        }
        let outcome = resolver().resolve(input);
        // full cross product would be 190 comparisons
        assert!(outcome.comparisons < 190);
    }
}
