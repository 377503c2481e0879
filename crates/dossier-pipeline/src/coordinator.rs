use crate::discovery::{DiscoveredIdentifier, PlanOutcome, QueryPlanner};
use crate::matcher::FuzzyMatcher;
use crate::normalize::{normalize_domain, Normalizer};
use crate::parser::ResultParser;
use crate::progress::{ProgressBus, ProgressSubscription};
use crate::resolve::EntityResolver;
use dossier_cache::ResultCache;
use dossier_connectors::ConnectorRegistry;
use dossier_core::{
    validate_seed, AttributeKey, BlockedPatterns, DossierError, ErrorEntry, ErrorKind,
    InvestigationId, InvestigationRecord, InvestigationStatus, InvestigationStore, ProgressEvent,
    Query, QueryKind, RawResult, ResolvedEntity, Result, ResultId, SeedInput, Settings,
};
use dossier_fetch::{Disposition, FetchScheduler, QueryOutcome, RateLimitController};
use dossier_graph::{EdgeClass, EntityGraph, NodeIdx, Relationship};
use dossier_report::{InvestigationReport, Reporter};
use dossier_timeline::{extract_dates, DatePrecision, EventType, TimelineBuilder, TimelineEvent};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Process-wide singletons handed to every coordinator at startup.
/// Constructed once from configuration; never ambient state.
pub struct PipelineContext {
    pub registry: Arc<ConnectorRegistry>,
    pub cache: Arc<ResultCache>,
    pub limiter: Arc<RateLimitController>,
    pub store: Arc<dyn InvestigationStore>,
    pub settings: Arc<Settings>,
    pub blocked: Arc<BlockedPatterns>,
}

impl PipelineContext {
    pub fn new(
        settings: Settings,
        registry: Arc<ConnectorRegistry>,
        store: Arc<dyn InvestigationStore>,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(dossier_cache::CacheConfig {
            default_ttl: std::time::Duration::from_secs(settings.cache_ttl_sec),
            max_entries: settings.cache_max_entries,
        }));
        let limiter = Arc::new(RateLimitController::new(dossier_fetch::BackoffConfig {
            base: std::time::Duration::from_secs(1),
            factor: 2.0,
            cap: std::time::Duration::from_secs(300),
            jitter_frac: settings.backoff_jitter_frac,
        }));
        let blocked = BlockedPatterns::with_extra(settings.blocked_query_patterns.iter().cloned())
            .unwrap_or_else(|e| {
                warn!(error = %e, "extra blocked patterns rejected, using built-ins");
                BlockedPatterns::with_defaults()
            });
        Self {
            registry,
            cache,
            limiter,
            store,
            settings: Arc::new(settings),
            blocked: Arc::new(blocked),
        }
    }

    fn scheduler(&self) -> FetchScheduler {
        let retry = dossier_fetch::RetryPolicy {
            max_attempts: self.settings.retry_max_attempts,
            base: std::time::Duration::from_millis(self.settings.backoff_base_ms),
            factor: self.settings.backoff_factor,
            cap: std::time::Duration::from_millis(self.settings.backoff_cap_ms),
            jitter_frac: self.settings.backoff_jitter_frac,
        };
        let cache_ttl_overrides = self
            .settings
            .cache_ttl_overrides_sec
            .iter()
            .map(|(k, v)| (k.clone(), std::time::Duration::from_secs(*v)))
            .collect();
        FetchScheduler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.cache),
            Arc::clone(&self.limiter),
            dossier_fetch::SchedulerConfig {
                max_concurrent: self.settings.max_concurrent_queries_per_investigation,
                default_query_timeout: self.settings.query_timeout(),
                retry,
                rate_wait_cap: self.settings.investigation_deadline(),
                cache_ttl_overrides,
                max_rate_limit_rounds: 10,
            },
        )
    }
}

/// Live handle to a running investigation.
pub struct InvestigationHandle {
    pub investigation_id: InvestigationId,
    record: Arc<RwLock<InvestigationRecord>>,
    bus: Arc<ProgressBus>,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl InvestigationHandle {
    pub fn cancel(&self) {
        info!(investigation_id = %self.investigation_id, "cancellation requested");
        self.cancel.cancel();
    }

    pub fn record(&self) -> InvestigationRecord {
        self.record.read().clone()
    }

    pub fn status(&self) -> InvestigationStatus {
        self.record.read().status
    }

    /// Subscribe to progress; the current status is delivered first. A
    /// subscriber joining after the terminal state receives the status
    /// plus a closing completion event.
    pub fn subscribe(&self) -> ProgressSubscription {
        let snapshot = status_event(&self.record.read(), self.bus.dropped());
        let subscription = self.bus.subscribe(snapshot);

        // re-check after registering: completion published in the gap
        // would otherwise leave this subscriber waiting forever
        let record = self.record.read();
        if record.status.is_terminal() {
            let partial = record.status == InvestigationStatus::Cancelled
                || record.errors.iter().any(|e| e.kind == ErrorKind::Timeout);
            subscription.ensure_terminal(ProgressEvent::Completion {
                investigation_id: record.investigation_id(),
                timestamp: Utc::now(),
                status: record.status,
                partial,
            });
        }
        subscription
    }

    pub async fn wait(self) {
        let _ = self.join.await;
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Owns one investigation's state machine from `created` to a terminal
/// state, fanning progress out on the bus and persisting through the
/// store.
pub struct InvestigationCoordinator;

impl InvestigationCoordinator {
    /// Validate the seed and launch the investigation task.
    pub fn spawn(ctx: Arc<PipelineContext>, seed: SeedInput) -> Result<InvestigationHandle> {
        validate_seed(&seed)?;

        let investigation_id = seed.investigation_id;
        let record = Arc::new(RwLock::new(InvestigationRecord::new(seed)));
        let bus = Arc::new(ProgressBus::new(ctx.settings.progress_channel_capacity));
        let cancel = CancellationToken::new();

        let join = tokio::spawn(run_investigation(
            ctx,
            Arc::clone(&record),
            Arc::clone(&bus),
            cancel.clone(),
        ));

        Ok(InvestigationHandle {
            investigation_id,
            record,
            bus,
            cancel,
            join,
        })
    }
}

/// Everything the pipeline accumulates for one investigation. Owned
/// exclusively by the coordinator task.
#[derive(Default)]
struct WorkingSet {
    raw_results: Vec<RawResult>,
    seen_results: BTreeSet<ResultId>,
    candidates: Vec<dossier_core::NormalizedEntity>,
    entities: Vec<ResolvedEntity>,
    graph: EntityGraph,
    timeline: TimelineBuilder,
    announced_entities: BTreeSet<Uuid>,
}

async fn run_investigation(
    ctx: Arc<PipelineContext>,
    record: Arc<RwLock<InvestigationRecord>>,
    bus: Arc<ProgressBus>,
    cancel: CancellationToken,
) {
    let investigation_id = record.read().investigation_id();
    let outcome = drive(&ctx, &record, &bus, &cancel).await;

    if let Err(e) = outcome {
        error!(%investigation_id, error = %e, "investigation failed");
        {
            let mut r = record.write();
            r.errors.push(ErrorEntry::new(e.kind(), e.to_string()));
            r.status = InvestigationStatus::Failed;
            r.completed_at = Some(Utc::now());
        }
        persist_record(&ctx, &record).await;
        bus.publish(ProgressEvent::Error {
            investigation_id,
            timestamp: Utc::now(),
            kind: e.kind(),
            message: e.to_string(),
        });
        bus.publish(ProgressEvent::Completion {
            investigation_id,
            timestamp: Utc::now(),
            status: InvestigationStatus::Failed,
            partial: true,
        });
    }
}

async fn drive(
    ctx: &Arc<PipelineContext>,
    record: &Arc<RwLock<InvestigationRecord>>,
    bus: &Arc<ProgressBus>,
    cancel: &CancellationToken,
) -> Result<()> {
    let seed = record.read().seed.clone();
    let investigation_id = seed.investigation_id;

    transition(ctx, record, bus, InvestigationStatus::Planning).await?;

    let planner = QueryPlanner::new(Arc::clone(&ctx.registry), Arc::clone(&ctx.blocked));
    let PlanOutcome {
        mut queries,
        rejected,
    } = planner.plan(&seed);
    {
        let mut r = record.write();
        r.errors.extend(rejected);
        // one unit per (query, connector): the denominator of progress
        r.queries_total = queries.iter().map(|q| q.target_connectors.len()).sum();
    }

    let deadline = investigation_deadline(&seed, &ctx.settings);
    let partial = Arc::new(AtomicBool::new(false));
    let fetch_cancel = cancel.child_token();
    {
        // deadline watchdog: on expiry the pipeline keeps whatever it
        // has and reports partial
        let fetch_cancel = fetch_cancel.clone();
        let partial = Arc::clone(&partial);
        let id = investigation_id;
        tokio::spawn(async move {
            tokio::select! {
                _ = fetch_cancel.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    warn!(investigation_id = %id, "investigation deadline reached");
                    partial.store(true, Ordering::SeqCst);
                    fetch_cancel.cancel();
                }
            }
        });
    }

    let parser = ResultParser::new();
    let normalizer = Normalizer::new(seed.subject_identifiers.geographic_hints.clone());
    let resolver = EntityResolver::new(FuzzyMatcher::default(), seed.thresholds.clone());
    let scheduler = Arc::new(ctx.scheduler());

    let mut working = WorkingSet::default();
    let mut depth: u8 = 0;

    transition(ctx, record, bus, InvestigationStatus::Fetching).await?;

    loop {
        if queries.is_empty() || fetch_cancel.is_cancelled() {
            break;
        }

        fetch_round(
            ctx,
            record,
            bus,
            &scheduler,
            &parser,
            &normalizer,
            std::mem::take(&mut queries),
            fetch_cancel.clone(),
            &mut working,
        )
        .await?;

        transition(ctx, record, bus, InvestigationStatus::Resolving).await?;
        resolve_round(ctx, record, bus, &resolver, &seed, &mut working).await?;

        if fetch_cancel.is_cancelled() {
            break;
        }

        depth += 1;
        let discovered = discovered_identifiers(&working.entities);
        let expansion = planner.expand(&seed, &discovered, depth);
        if expansion.queries.is_empty() {
            break;
        }
        {
            let mut r = record.write();
            r.errors.extend(expansion.rejected);
            r.queries_total += expansion
                .queries
                .iter()
                .map(|q| q.target_connectors.len())
                .sum::<usize>();
        }
        queries = expansion.queries;
        transition(ctx, record, bus, InvestigationStatus::Fetching).await?;
    }

    // fetching is over; this also releases the deadline watchdog
    fetch_cancel.cancel();

    transition(ctx, record, bus, InvestigationStatus::Reporting).await?;

    let was_cancelled = cancel.is_cancelled();
    let is_partial = partial.load(Ordering::SeqCst) || was_cancelled;
    if is_partial {
        let mut r = record.write();
        if !r.errors.iter().any(|e| e.kind == ErrorKind::Timeout) && !was_cancelled {
            r.errors.push(
                ErrorEntry::new(ErrorKind::Timeout, "investigation deadline reached")
                    .with_source("coordinator"),
            );
        }
    }

    let subject_id = subject_entity(&seed, &working.entities);
    let report = Reporter::assemble(
        &seed,
        subject_id,
        &working.entities,
        &working.graph,
        &working.timeline,
        &working.raw_results,
        record.read().errors.clone(),
        is_partial,
    );
    save_report(ctx, investigation_id, &report).await?;

    let final_status = if was_cancelled {
        InvestigationStatus::Cancelled
    } else {
        InvestigationStatus::Completed
    };
    {
        let mut r = record.write();
        r.status = final_status;
        r.current_stage = final_status.to_string();
        r.progress_percentage = 100.0;
        r.completed_at = Some(Utc::now());
    }
    persist_record(ctx, record).await;

    bus.publish(ProgressEvent::Completion {
        investigation_id,
        timestamp: Utc::now(),
        status: final_status,
        partial: is_partial,
    });
    info!(%investigation_id, status = %final_status, partial = is_partial, "investigation finished");
    Ok(())
}

/// One fetch pass: the scheduler drains the plan while completed units
/// stream back and are parsed and normalized as they arrive.
#[allow(clippy::too_many_arguments)]
async fn fetch_round(
    ctx: &Arc<PipelineContext>,
    record: &Arc<RwLock<InvestigationRecord>>,
    bus: &Arc<ProgressBus>,
    scheduler: &Arc<FetchScheduler>,
    parser: &ResultParser,
    normalizer: &Normalizer,
    queries: Vec<Query>,
    fetch_cancel: CancellationToken,
    working: &mut WorkingSet,
) -> Result<()> {
    let (outcome_tx, mut outcome_rx) = mpsc::channel::<QueryOutcome>(64);

    let scheduler_task = {
        let scheduler = Arc::clone(scheduler);
        tokio::spawn(async move { scheduler.run(queries, fetch_cancel, Some(outcome_tx)).await })
    };

    let base_confidences: HashMap<String, f64> = ctx
        .registry
        .names()
        .into_iter()
        .filter_map(|name| ctx.registry.get(&name).map(|c| (name, c.base_confidence())))
        .collect();

    let mut entered_parsing = false;
    while let Some(outcome) = outcome_rx.recv().await {
        match &outcome.disposition {
            Disposition::Success { results } => {
                if !entered_parsing && !results.is_empty() {
                    transition(ctx, record, bus, InvestigationStatus::Parsing).await?;
                    entered_parsing = true;
                }
                let source_confidence = base_confidences
                    .get(&outcome.source_name)
                    .copied()
                    .unwrap_or(0.5);
                for result in results.iter() {
                    if !working.seen_results.insert(result.result_id) {
                        continue;
                    }
                    working.raw_results.push(result.clone());
                    for candidate in parser.parse(result) {
                        working
                            .candidates
                            .push(normalizer.normalize(candidate, source_confidence));
                    }
                }
            }
            Disposition::Failed { kind, message } => {
                if *kind != ErrorKind::Cancelled {
                    record.write().errors.push(
                        ErrorEntry::new(*kind, message.clone())
                            .with_source(outcome.source_name.clone())
                            .with_query(outcome.query_id),
                    );
                }
            }
        }

        {
            let mut r = record.write();
            r.queries_executed += 1;
            let progress = weighted_progress(&r);
            r.progress_percentage = progress;
            r.estimated_completion = estimate_completion(&r);
        }
        bus.publish(status_event(&record.read(), bus.dropped()));
    }

    scheduler_task
        .await
        .map_err(|e| DossierError::Internal(format!("scheduler task: {}", e)))?;
    Ok(())
}

async fn resolve_round(
    ctx: &Arc<PipelineContext>,
    record: &Arc<RwLock<InvestigationRecord>>,
    bus: &Arc<ProgressBus>,
    resolver: &EntityResolver,
    seed: &SeedInput,
    working: &mut WorkingSet,
) -> Result<()> {
    let investigation_id = seed.investigation_id;
    let outcome = resolver.resolve(working.candidates.clone());
    working.entities = outcome.entities;

    working.graph = build_graph(&working.entities);
    working.timeline = build_timeline(seed, &working.entities, &working.raw_results);

    {
        let mut r = record.write();
        r.entities_found = working.entities.len();
        r.progress_percentage = weighted_progress(&r);
    }

    for entity in &working.entities {
        if working.announced_entities.insert(entity.entity_id) {
            bus.publish(ProgressEvent::NewEntity {
                investigation_id,
                timestamp: Utc::now(),
                entity_id: entity.entity_id,
                entity_type: entity.entity_type,
                confidence: entity.confidence,
            });
        }
    }

    persist_record(ctx, record).await;
    Ok(())
}

/// Graph construction from the resolved set: one node per entity,
/// `registered` edges between people and the domains they registered,
/// `works_with` among people sharing an employer, `co_occurs` for
/// entities extracted from the same raw result.
fn build_graph(entities: &[ResolvedEntity]) -> EntityGraph {
    let mut graph = EntityGraph::new();
    let mut node_of: BTreeMap<Uuid, NodeIdx> = BTreeMap::new();

    for entity in entities {
        let idx = graph.add_node(
            entity.entity_id,
            entity.entity_type,
            entity.attributes.clone(),
            entity.confidence / 100.0,
            entity.sources.iter().cloned(),
        );
        node_of.insert(entity.entity_id, idx);
    }

    // registered: person -> domain they are the registrant of
    for person in entities.iter().filter(|e| {
        e.entity_type == dossier_core::EntityType::Person
            && e.attributes.contains_key(&AttributeKey::Domain)
    }) {
        let Some(domain) = person.attributes[&AttributeKey::Domain].as_text() else {
            continue;
        };
        let normalized = normalize_domain(domain);
        for target in entities.iter().filter(|e| {
            e.entity_type == dossier_core::EntityType::Domain
                && e.attributes
                    .get(&AttributeKey::Domain)
                    .and_then(|v| v.as_text())
                    .map(normalize_domain)
                    .as_deref()
                    == Some(normalized.as_str())
        }) {
            graph.add_edge(
                node_of[&person.entity_id],
                node_of[&target.entity_id],
                Relationship::Registered,
                EdgeClass::Direct,
                0.9,
                (person.confidence.min(target.confidence)) / 100.0,
                person.sources.iter().cloned(),
            );
        }
    }

    // works_with: people sharing an employer attribute
    let people: Vec<&ResolvedEntity> = entities
        .iter()
        .filter(|e| e.entity_type == dossier_core::EntityType::Person)
        .collect();
    for (i, a) in people.iter().enumerate() {
        for b in &people[i + 1..] {
            let employer_a = a.attributes.get(&AttributeKey::Employer).and_then(|v| v.as_text());
            let employer_b = b.attributes.get(&AttributeKey::Employer).and_then(|v| v.as_text());
            if let (Some(ea), Some(eb)) = (employer_a, employer_b) {
                if ea.eq_ignore_ascii_case(eb) {
                    graph.add_edge(
                        node_of[&a.entity_id],
                        node_of[&b.entity_id],
                        Relationship::WorksWith,
                        EdgeClass::Direct,
                        0.6,
                        (a.confidence.min(b.confidence)) / 100.0,
                        a.sources.iter().cloned(),
                    );
                }
            }
        }
    }

    // co_occurs: extracted from the same raw result
    let mut by_result: BTreeMap<ResultId, Vec<Uuid>> = BTreeMap::new();
    for entity in entities {
        for result in &entity.source_refs {
            by_result.entry(*result).or_default().push(entity.entity_id);
        }
    }
    for members in by_result.values() {
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                if a == b {
                    continue;
                }
                graph.add_edge(
                    node_of[a],
                    node_of[b],
                    Relationship::CoOccurs,
                    EdgeClass::Direct,
                    0.4,
                    0.5,
                    [],
                );
            }
        }
    }

    graph
}

/// Timeline assembly: dated registration events from registry results,
/// breach records, and dated public mentions.
fn build_timeline(
    seed: &SeedInput,
    entities: &[ResolvedEntity],
    raw_results: &[RawResult],
) -> TimelineBuilder {
    let mut timeline = TimelineBuilder::new();
    let subject = subject_entity(seed, entities);

    for result in raw_results {
        if let Some(breach_date) = result.metadata.get("breach_date") {
            let parsed = chrono::NaiveDate::parse_from_str(breach_date, "%Y-%m-%d").ok();
            let mut event = TimelineEvent::new(
                subject,
                EventType::MediaMention,
                result.title.clone(),
            )
            .with_confidence(0.8)
            .with_source(result.source_name.clone());
            if let Some(date) = parsed {
                event = event.with_date(date, DatePrecision::ExactDate);
            }
            event.source_refs.push(result.result_id);
            timeline.add_event(event);
            continue;
        }

        let prefix: String = result.content_text().chars().take(4096).collect();
        let dates = extract_dates(&prefix);
        if let Some(best) = dates.into_iter().min_by_key(|d| d.precision) {
            let event_type = if result.source_name == "domain_registry" {
                EventType::DigitalAccountRegistration
            } else {
                EventType::MediaMention
            };
            let mut event = TimelineEvent::new(subject, event_type, result.title.clone())
                .with_date(best.date, best.precision)
                .with_confidence(0.5)
                .with_source(result.source_name.clone());
            event.source_refs.push(result.result_id);
            timeline.add_event(event);
        }
    }

    timeline
}

/// The resolved entity standing for the investigation subject: the
/// highest-confidence person whose name overlaps the seed name, else a
/// stable synthesized id.
pub fn subject_entity(seed: &SeedInput, entities: &[ResolvedEntity]) -> Uuid {
    let seed_tokens: BTreeSet<String> = crate::text::tokenize_name(&seed.subject_identifiers.full_name)
        .into_iter()
        .collect();

    entities
        .iter()
        .filter(|e| e.entity_type == dossier_core::EntityType::Person)
        .filter(|e| {
            e.attributes
                .get(&AttributeKey::FullName)
                .and_then(|v| v.as_text())
                .map(|name| {
                    crate::text::tokenize_name(name)
                        .iter()
                        .any(|t| seed_tokens.contains(t))
                })
                .unwrap_or(false)
        })
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.entity_id.cmp(&a.entity_id))
        })
        .map(|e| e.entity_id)
        .unwrap_or(seed.investigation_id)
}

/// High-confidence identifiers not seen in the seed become follow-up
/// query material; the planner filters out what the seed already knew.
fn discovered_identifiers(entities: &[ResolvedEntity]) -> Vec<DiscoveredIdentifier> {
    let mut out = BTreeSet::new();
    for entity in entities {
        if entity.confidence < 60.0 {
            continue;
        }
        if let Some(email) = entity.attributes.get(&AttributeKey::Email).and_then(|v| v.as_text()) {
            out.insert(DiscoveredIdentifier {
                kind: QueryKind::Email,
                value: email.to_lowercase(),
            });
        }
        if let Some(domain) = entity.attributes.get(&AttributeKey::Domain).and_then(|v| v.as_text())
        {
            out.insert(DiscoveredIdentifier {
                kind: QueryKind::Domain,
                value: normalize_domain(domain),
            });
        }
        if let Some(username) =
            entity.attributes.get(&AttributeKey::Username).and_then(|v| v.as_text())
        {
            out.insert(DiscoveredIdentifier {
                kind: QueryKind::Username,
                value: username.to_lowercase(),
            });
        }
    }
    out.into_iter().collect()
}

/// Progress is a weighted blend of queries executed and entities
/// resolved against a rough expectation.
fn weighted_progress(record: &InvestigationRecord) -> f64 {
    let query_part = if record.queries_total == 0 {
        0.0
    } else {
        record.queries_executed as f64 / record.queries_total as f64
    };
    let expected_entities = (record.queries_total / 2).max(1);
    let entity_part = (record.entities_found as f64 / expected_entities as f64).min(1.0);
    ((query_part * 0.7 + entity_part * 0.3) * 100.0).min(99.0)
}

fn estimate_completion(record: &InvestigationRecord) -> Option<chrono::DateTime<Utc>> {
    let progress = record.progress_percentage / 100.0;
    if progress < 0.05 {
        return None;
    }
    let elapsed = Utc::now() - record.started_at;
    let total = chrono::Duration::milliseconds(
        (elapsed.num_milliseconds() as f64 / progress) as i64,
    );
    Some(record.started_at + total)
}

fn investigation_deadline(seed: &SeedInput, settings: &Settings) -> std::time::Duration {
    seed.constraints
        .max_duration_min
        .map(|m| std::time::Duration::from_secs(u64::from(m) * 60))
        .unwrap_or_else(|| settings.investigation_deadline())
}

fn status_event(record: &InvestigationRecord, dropped: u64) -> ProgressEvent {
    ProgressEvent::StatusUpdate {
        investigation_id: record.investigation_id(),
        timestamp: Utc::now(),
        status: record.status,
        progress_percentage: record.progress_percentage,
        queries_executed: record.queries_executed,
        queries_total: record.queries_total,
        entities_found: record.entities_found,
        dropped_events: dropped,
    }
}

async fn transition(
    ctx: &Arc<PipelineContext>,
    record: &Arc<RwLock<InvestigationRecord>>,
    bus: &Arc<ProgressBus>,
    to: InvestigationStatus,
) -> Result<()> {
    let (from, investigation_id) = {
        let r = record.read();
        (r.status, r.investigation_id())
    };
    if from == to {
        return Ok(());
    }
    if !from.can_transition_to(to) {
        return Err(DossierError::Internal(format!(
            "illegal transition {} -> {}",
            from, to
        )));
    }
    {
        let mut r = record.write();
        r.status = to;
        r.current_stage = to.to_string();
    }
    info!(%investigation_id, %from, %to, "stage transition");
    bus.publish(ProgressEvent::StageTransition {
        investigation_id,
        timestamp: Utc::now(),
        from,
        to,
    });
    persist_record(ctx, record).await;
    Ok(())
}

async fn persist_record(ctx: &Arc<PipelineContext>, record: &Arc<RwLock<InvestigationRecord>>) {
    let snapshot = record.read().clone();
    if let Err(e) = ctx.store.save_investigation(&snapshot).await {
        // the in-memory record remains authoritative until terminal state
        warn!(error = %e, "investigation store write failed");
    }
}

async fn save_report(
    ctx: &Arc<PipelineContext>,
    investigation_id: InvestigationId,
    report: &InvestigationReport,
) -> Result<()> {
    let value = serde_json::to_value(report)?;
    ctx.store.save_report(investigation_id, value).await
}
