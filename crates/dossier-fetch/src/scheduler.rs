use crate::rate_limit::{AcquireMode, RateLimitController};
use crate::retry::RetryPolicy;
use dossier_cache::{Fingerprint, ResultCache};
use dossier_connectors::ConnectorRegistry;
use dossier_core::{
    DossierError, ErrorKind, Query, QueryId, RawResult, Result, SearchContext, SourceConnector,
};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Concurrency cap per investigation.
    pub max_concurrent: usize,
    pub default_query_timeout: Duration,
    pub retry: RetryPolicy,
    /// Upper bound on how long one fetch unit may sit waiting for a
    /// rate-limit slot before it is recorded as timed out.
    pub rate_wait_cap: Duration,
    /// Cache TTL per source; fall back to the cache's default when absent.
    pub cache_ttl_overrides: BTreeMap<String, Duration>,
    /// Rounds of rate-limit deferral before a unit gives up.
    pub max_rate_limit_rounds: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            default_query_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            rate_wait_cap: Duration::from_secs(3600),
            cache_ttl_overrides: BTreeMap::new(),
            max_rate_limit_rounds: 10,
        }
    }
}

/// Terminal record for one (query, connector) fetch unit.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query_id: QueryId,
    pub source_name: String,
    /// Upstream calls made; > 1 means retried-then-success or retried-
    /// then-failed.
    pub attempts: u32,
    pub disposition: Disposition,
}

#[derive(Debug, Clone)]
pub enum Disposition {
    Success { results: Arc<Vec<RawResult>> },
    Failed { kind: ErrorKind, message: String },
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.disposition, Disposition::Success { .. })
    }
}

/// Fans a query plan out to connectors through cache -> rate limiter ->
/// adapter, with bounded concurrency, classified retries, and per-unit
/// completion events.
pub struct FetchScheduler {
    registry: Arc<ConnectorRegistry>,
    cache: Arc<ResultCache>,
    limiter: Arc<RateLimitController>,
    config: SchedulerConfig,
}

impl FetchScheduler {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        cache: Arc<ResultCache>,
        limiter: Arc<RateLimitController>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            limiter,
            config,
        }
    }

    /// Drain the plan. Every completed unit is sent over `outcome_tx` as
    /// it finishes (order is non-deterministic); the full outcome list is
    /// returned when the plan is drained or cancellation empties the
    /// queue.
    pub async fn run(
        &self,
        plan: Vec<Query>,
        cancel: CancellationToken,
        outcome_tx: Option<mpsc::Sender<QueryOutcome>>,
    ) -> Vec<QueryOutcome> {
        let units = dispatch_order(plan);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut join_set: JoinSet<QueryOutcome> = JoinSet::new();
        let mut outcomes = Vec::with_capacity(units.len());

        let mut pending = VecDeque::from(units);
        loop {
            // dispatch while we have queue and permits; stop dispatching
            // once cancelled (queued units are dropped)
            while !cancel.is_cancelled() && !pending.is_empty() {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                let (query, connector_name) = pending.pop_front().expect("pending non-empty");
                let Some(connector) = self.registry.get(&connector_name) else {
                    drop(permit);
                    let outcome = QueryOutcome {
                        query_id: query.query_id,
                        source_name: connector_name.clone(),
                        attempts: 0,
                        disposition: Disposition::Failed {
                            kind: ErrorKind::NotFound,
                            message: format!("connector not registered: {}", connector_name),
                        },
                    };
                    Self::emit(&outcome_tx, &outcome).await;
                    outcomes.push(outcome);
                    continue;
                };

                let cache = Arc::clone(&self.cache);
                let limiter = Arc::clone(&self.limiter);
                let config = self.config.clone();
                let unit_cancel = cancel.child_token();
                join_set.spawn(async move {
                    let _permit = permit;
                    execute_unit(query, connector, cache, limiter, config, unit_cancel).await
                });
            }

            if cancel.is_cancelled() && !pending.is_empty() {
                debug!(dropped = pending.len(), "cancellation drops queued fetch units");
                pending.clear();
            }

            match join_set.join_next().await {
                Some(Ok(outcome)) => {
                    Self::emit(&outcome_tx, &outcome).await;
                    outcomes.push(outcome);
                }
                Some(Err(join_error)) => {
                    warn!(error = %join_error, "fetch unit panicked");
                }
                None => {
                    if pending.is_empty() {
                        break;
                    }
                }
            }
        }

        outcomes
    }

    async fn emit(tx: &Option<mpsc::Sender<QueryOutcome>>, outcome: &QueryOutcome) {
        if let Some(tx) = tx {
            // subscriber loss must not stall the scheduler
            let _ = tx.send(outcome.clone()).await;
        }
    }
}

/// Expand queries into (query, connector) units, highest priority band
/// first, round-robin across connectors within a band so no single source
/// is starved.
fn dispatch_order(plan: Vec<Query>) -> Vec<(Query, String)> {
    let mut bands: BTreeMap<u8, BTreeMap<String, VecDeque<Query>>> = BTreeMap::new();
    for query in plan {
        for connector in &query.target_connectors {
            bands
                .entry(query.priority)
                .or_default()
                .entry(connector.clone())
                .or_default()
                .push_back(query.clone());
        }
    }

    let mut ordered = Vec::new();
    for (_, mut connectors) in bands.into_iter().rev() {
        loop {
            let mut drained = true;
            for (name, queue) in connectors.iter_mut() {
                if let Some(query) = queue.pop_front() {
                    ordered.push((query, name.clone()));
                    drained = false;
                }
            }
            if drained {
                break;
            }
        }
    }
    ordered
}

async fn execute_unit(
    query: Query,
    connector: Arc<dyn SourceConnector>,
    cache: Arc<ResultCache>,
    limiter: Arc<RateLimitController>,
    config: SchedulerConfig,
    cancel: CancellationToken,
) -> QueryOutcome {
    let source_name = connector.source_name().to_string();
    let fingerprint = Fingerprint::compute(&source_name, &query.query_string, &query.parameters);
    let ttl = config.cache_ttl_overrides.get(&source_name).copied();

    let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let outcome = cache
        .get_or_fetch(fingerprint, ttl, {
            let attempts = Arc::clone(&attempts);
            let query = query.clone();
            let connector = Arc::clone(&connector);
            let limiter = Arc::clone(&limiter);
            let config = config.clone();
            let cancel = cancel.clone();
            move || async move {
                fetch_upstream(&query, connector, limiter, &config, cancel, &attempts).await
            }
        })
        .await;

    let attempts = attempts.load(std::sync::atomic::Ordering::Relaxed);
    match outcome {
        Ok(results) => QueryOutcome {
            query_id: query.query_id,
            source_name,
            attempts,
            disposition: Disposition::Success { results },
        },
        Err(error) => QueryOutcome {
            query_id: query.query_id,
            source_name,
            attempts,
            disposition: Disposition::Failed {
                kind: error.kind(),
                message: error.to_string(),
            },
        },
    }
}

async fn fetch_upstream(
    query: &Query,
    connector: Arc<dyn SourceConnector>,
    limiter: Arc<RateLimitController>,
    config: &SchedulerConfig,
    cancel: CancellationToken,
    attempts: &std::sync::atomic::AtomicU32,
) -> Result<Vec<RawResult>> {
    let source = connector.source_name().to_string();
    let timeout = connector
        .preferred_timeout()
        .unwrap_or(config.default_query_timeout);
    let mut transient_attempt = 0u32;
    let mut rate_limit_rounds = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(DossierError::Cancelled);
        }

        let acquire_deadline = tokio::time::Instant::now() + config.rate_wait_cap;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DossierError::Cancelled),
            acquired = limiter.acquire(
                &source,
                connector.rate_limit_per_hour(),
                AcquireMode::Block,
                acquire_deadline,
            ) => acquired?,
        }

        attempts.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        transient_attempt += 1;

        let ctx = SearchContext::with_cancel(timeout, cancel.child_token());
        let result = tokio::time::timeout(timeout, connector.search(query, &ctx)).await;

        let error = match result {
            Ok(Ok(results)) => {
                limiter.record_success(&source);
                // unsafe content is redacted before it can reach the cache
                return Ok(results
                    .into_iter()
                    .map(dossier_core::sanitize_result)
                    .collect());
            }
            Ok(Err(e)) => e,
            Err(_elapsed) => DossierError::Timeout(timeout),
        };

        match error.kind() {
            ErrorKind::RateLimited => {
                rate_limit_rounds += 1;
                // the transient budget is not charged for pacing
                transient_attempt = transient_attempt.saturating_sub(1);
                limiter.record_rate_limited(&source, connector.rate_limit_per_hour());
                if rate_limit_rounds >= config.max_rate_limit_rounds {
                    warn!(%source, rounds = rate_limit_rounds, "giving up after repeated rate limiting");
                    return Err(error);
                }
            }
            kind if kind.is_transient() => {
                if !config.retry.should_retry(&error, transient_attempt) {
                    return Err(error);
                }
                let delay = config.retry.delay(transient_attempt);
                debug!(%source, attempt = transient_attempt, ?delay, "retrying transient failure");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DossierError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            _ => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dossier_cache::CacheConfig;
    use dossier_connectors::{CannedResponse, MockConnector};
    use dossier_core::{EntityType, MediaType, QueryKind, SourceType};
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scheduler_with(
        registry: ConnectorRegistry,
        config: SchedulerConfig,
    ) -> FetchScheduler {
        FetchScheduler::new(
            Arc::new(registry),
            Arc::new(ResultCache::new(CacheConfig::default())),
            Arc::new(RateLimitController::default()),
            config,
        )
    }

    fn query_for(connector: &str, text: &str, priority: u8) -> Query {
        let mut q = Query::new(text, QueryKind::Name);
        q.target_connectors = vec![connector.to_string()];
        q.priority = priority;
        q
    }

    #[test]
    fn test_dispatch_order_priority_and_round_robin() {
        let mut plan = vec![
            query_for("a", "low-1", 10),
            query_for("a", "high-a1", 90),
            query_for("b", "high-b1", 90),
            query_for("a", "high-a2", 90),
        ];
        // multi-connector query contributes one unit per connector
        let mut multi = Query::new("high-multi", QueryKind::Name);
        multi.priority = 90;
        multi.target_connectors = vec!["a".into(), "b".into()];
        plan.push(multi);

        let order = dispatch_order(plan);
        let labels: Vec<(String, String)> = order
            .iter()
            .map(|(q, c)| (q.query_string.clone(), c.clone()))
            .collect();

        // high band drains first, alternating a/b; the low-priority unit is last
        assert_eq!(labels.last().unwrap().0, "low-1");
        let high: Vec<&(String, String)> = labels.iter().filter(|(q, _)| q != "low-1").collect();
        assert_eq!(high.len(), 5);
        assert_eq!(high[0].1, "a");
        assert_eq!(high[1].1, "b");
        assert_eq!(high[2].1, "a");
    }

    #[tokio::test]
    async fn test_run_collects_success_and_failure() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("good").respond_default(
            CannedResponse::single("https://e/1", "t", "content", MediaType::PlainText),
        )));
        registry.register(Arc::new(MockConnector::new("bad").respond_default(
            CannedResponse::Error(dossier_connectors::CannedError::CredentialsInvalid),
        )));

        let scheduler = scheduler_with(registry, SchedulerConfig::default());
        let plan = vec![query_for("good", "alice", 50), query_for("bad", "alice", 50)];
        let outcomes = scheduler.run(plan, CancellationToken::new(), None).await;

        assert_eq!(outcomes.len(), 2);
        let good = outcomes.iter().find(|o| o.source_name == "good").unwrap();
        assert!(good.is_success());
        let bad = outcomes.iter().find(|o| o.source_name == "bad").unwrap();
        match &bad.disposition {
            Disposition::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::CredentialsInvalid),
            _ => panic!("expected failure"),
        }
    }

    /// Fails with a transient error a fixed number of times, then
    /// succeeds.
    struct FlakyConnector {
        failures_remaining: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SourceConnector for FlakyConnector {
        fn source_name(&self) -> &str {
            "flaky"
        }
        fn source_type(&self) -> SourceType {
            SourceType::SearchEngine
        }
        fn supported_entity_types(&self) -> BTreeSet<EntityType> {
            BTreeSet::from([EntityType::Person])
        }
        fn rate_limit_per_hour(&self) -> u32 {
            100_000
        }
        fn base_confidence(&self) -> f64 {
            0.5
        }
        async fn search(&self, query: &Query, _ctx: &SearchContext) -> Result<Vec<RawResult>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DossierError::UpstreamUnavailable("blip".into()));
            }
            Ok(vec![RawResult::new(
                query.query_id,
                "flaky",
                "https://e/x",
                "t",
                b"ok".to_vec(),
                MediaType::PlainText,
            )])
        }
    }

    #[tokio::test]
    async fn test_transient_retry_then_success() {
        let flaky = Arc::new(FlakyConnector {
            failures_remaining: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let registry = ConnectorRegistry::new();
        registry.register(Arc::clone(&flaky) as Arc<dyn SourceConnector>);

        let config = SchedulerConfig {
            retry: RetryPolicy {
                base: Duration::from_millis(5),
                jitter_frac: 0.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let scheduler = scheduler_with(registry, config);
        let outcomes = scheduler
            .run(
                vec![query_for("flaky", "alice", 50)],
                CancellationToken::new(),
                None,
            )
            .await;

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
        assert_eq!(outcomes[0].attempts, 3);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_does_not_retry() {
        let registry = ConnectorRegistry::new();
        let mock = Arc::new(MockConnector::new("strict").respond_default(
            CannedResponse::Error(dossier_connectors::CannedError::MalformedResponse),
        ));
        registry.register(Arc::clone(&mock) as Arc<dyn SourceConnector>);

        let scheduler = scheduler_with(registry, SchedulerConfig::default());
        let outcomes = scheduler
            .run(
                vec![query_for("strict", "alice", 50)],
                CancellationToken::new(),
                None,
            )
            .await;

        assert_eq!(outcomes[0].attempts, 1);
        assert_eq!(mock.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_drops_queue() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(
            MockConnector::new("slow")
                .with_delay(Duration::from_millis(200))
                .respond_default(CannedResponse::single(
                    "https://e/1",
                    "t",
                    "c",
                    MediaType::PlainText,
                )),
        ));

        let config = SchedulerConfig {
            max_concurrent: 1,
            ..Default::default()
        };
        let scheduler = scheduler_with(registry, config);
        let plan: Vec<Query> = (0..20)
            .map(|i| query_for("slow", &format!("q{}", i), 50))
            .collect();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let outcomes = scheduler.run(plan, cancel, None).await;
        // most of the queue was dropped rather than fetched
        assert!(outcomes.len() < 20);
    }

    #[tokio::test]
    async fn test_identical_queries_coalesce_in_cache() {
        let registry = ConnectorRegistry::new();
        let mock = Arc::new(MockConnector::new("cached").respond_default(
            CannedResponse::single("https://e/1", "t", "c", MediaType::PlainText),
        ));
        registry.register(Arc::clone(&mock) as Arc<dyn SourceConnector>);

        let scheduler = scheduler_with(registry, SchedulerConfig::default());
        let plan = vec![
            query_for("cached", "same query", 50),
            query_for("cached", "same query", 50),
            query_for("cached", "Same   Query", 50),
        ];
        let outcomes = scheduler.run(plan, CancellationToken::new(), None).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.is_success()));
        // one upstream call serves all three units
        assert_eq!(mock.search_calls(), 1);
    }

    /// S3: a 60/hr source given 120 distinct queries is paced by the
    /// controller; every query eventually succeeds and no rate-limit
    /// error escapes to the caller.
    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_pacing() {
        let registry = ConnectorRegistry::new();
        let mock = Arc::new(
            MockConnector::new("x")
                .with_rate_limit(60)
                .respond_default(CannedResponse::single(
                    "https://e/1",
                    "t",
                    "c",
                    MediaType::PlainText,
                )),
        );
        registry.register(Arc::clone(&mock) as Arc<dyn SourceConnector>);

        let limiter = Arc::new(RateLimitController::default());
        let scheduler = FetchScheduler::new(
            Arc::new(registry),
            Arc::new(ResultCache::new(CacheConfig::default())),
            Arc::clone(&limiter),
            SchedulerConfig {
                rate_wait_cap: Duration::from_secs(3600 * 3),
                ..Default::default()
            },
        );

        let plan: Vec<Query> = (0..120)
            .map(|i| query_for("x", &format!("distinct query {}", i), 50))
            .collect();
        let outcomes = scheduler.run(plan, CancellationToken::new(), None).await;

        assert_eq!(outcomes.len(), 120);
        assert!(outcomes.iter().all(|o| o.is_success()));
        assert_eq!(mock.search_calls(), 120);
        // the rolling-hour budget was never exceeded
        assert!(limiter.acquisitions_last_hour("x") <= 60);
    }

    #[tokio::test]
    async fn test_outcomes_streamed() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("s").respond_default(
            CannedResponse::single("https://e/1", "t", "c", MediaType::PlainText),
        )));
        let scheduler = scheduler_with(registry, SchedulerConfig::default());

        let (tx, mut rx) = mpsc::channel(8);
        let outcomes = scheduler
            .run(
                vec![query_for("s", "a", 50), query_for("s", "b", 50)],
                CancellationToken::new(),
                Some(tx),
            )
            .await;
        assert_eq!(outcomes.len(), 2);

        let mut streamed = 0;
        while rx.try_recv().is_ok() {
            streamed += 1;
        }
        assert_eq!(streamed, 2);
    }
}
