use async_trait::async_trait;
use dossier_core::{
    DossierError, EntityType, MediaType, Query, RawResult, Result, SearchContext, SourceConnector,
    SourceType,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Scriptable in-process connector used by the test suites and demos.
/// Responses are keyed by normalized query string; unmatched queries
/// return the default response (empty unless configured).
pub struct MockConnector {
    name: String,
    source_type: SourceType,
    entity_types: BTreeSet<EntityType>,
    rate_limit: u32,
    base_confidence: f64,
    responses: Mutex<Vec<(String, CannedResponse)>>,
    default_response: Mutex<CannedResponse>,
    /// Artificial latency before answering, for deadline/cancel tests.
    delay: Option<Duration>,
    search_calls: AtomicUsize,
}

#[derive(Clone)]
pub enum CannedResponse {
    Results(Vec<CannedResult>),
    Error(CannedError),
}

#[derive(Clone)]
pub struct CannedResult {
    pub url: String,
    pub title: String,
    pub content: String,
    pub media_type: MediaType,
}

#[derive(Clone, Copy)]
pub enum CannedError {
    RateLimited { retry_after_secs: u64 },
    Timeout,
    UpstreamUnavailable,
    CredentialsInvalid,
    MalformedResponse,
}

impl MockConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: SourceType::SearchEngine,
            entity_types: BTreeSet::from([EntityType::Person, EntityType::Domain]),
            rate_limit: 1000,
            base_confidence: 0.8,
            responses: Mutex::new(Vec::new()),
            default_response: Mutex::new(CannedResponse::Results(Vec::new())),
            delay: None,
            search_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_source_type(mut self, source_type: SourceType) -> Self {
        self.source_type = source_type;
        self
    }

    pub fn with_entity_types(mut self, types: impl IntoIterator<Item = EntityType>) -> Self {
        self.entity_types = types.into_iter().collect();
        self
    }

    pub fn with_rate_limit(mut self, per_hour: u32) -> Self {
        self.rate_limit = per_hour;
        self
    }

    pub fn with_base_confidence(mut self, confidence: f64) -> Self {
        self.base_confidence = confidence;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Respond with `response` whenever the normalized query contains
    /// `needle`.
    pub fn respond_when(self, needle: impl Into<String>, response: CannedResponse) -> Self {
        self.responses
            .lock()
            .push((needle.into().to_lowercase(), response));
        self
    }

    pub fn respond_default(self, response: CannedResponse) -> Self {
        *self.default_response.lock() = response;
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    fn materialize(&self, query: &Query, response: &CannedResponse) -> Result<Vec<RawResult>> {
        match response {
            CannedResponse::Results(canned) => Ok(canned
                .iter()
                .map(|c| {
                    RawResult::new(
                        query.query_id,
                        self.name.clone(),
                        c.url.clone(),
                        c.title.clone(),
                        c.content.clone().into_bytes(),
                        c.media_type,
                    )
                })
                .collect()),
            CannedResponse::Error(err) => Err(match err {
                CannedError::RateLimited { retry_after_secs } => DossierError::RateLimited {
                    source_id: self.name.clone(),
                    retry_after_secs: *retry_after_secs,
                },
                CannedError::Timeout => DossierError::Timeout(Duration::from_secs(30)),
                CannedError::UpstreamUnavailable => {
                    DossierError::UpstreamUnavailable(self.name.clone())
                }
                CannedError::CredentialsInvalid => {
                    DossierError::CredentialsInvalid(self.name.clone())
                }
                CannedError::MalformedResponse => DossierError::MalformedResponse {
                    source_id: self.name.clone(),
                    detail: "canned".into(),
                },
            }),
        }
    }
}

#[async_trait]
impl SourceConnector for MockConnector {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn source_type(&self) -> SourceType {
        self.source_type
    }

    fn supported_entity_types(&self) -> BTreeSet<EntityType> {
        self.entity_types.clone()
    }

    fn rate_limit_per_hour(&self) -> u32 {
        self.rate_limit
    }

    fn base_confidence(&self) -> f64 {
        self.base_confidence
    }

    async fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Vec<RawResult>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(DossierError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            if delay > ctx.timeout {
                return Err(DossierError::Timeout(ctx.timeout));
            }
        }

        let needle_query = query.query_string.to_lowercase();
        let responses = self.responses.lock();
        for (needle, response) in responses.iter() {
            if needle_query.contains(needle.as_str()) {
                return self.materialize(query, response);
            }
        }
        let default = self.default_response.lock();
        self.materialize(query, &default)
    }
}

impl CannedResponse {
    pub fn single(url: &str, title: &str, content: &str, media_type: MediaType) -> Self {
        CannedResponse::Results(vec![CannedResult {
            url: url.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            media_type,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::QueryKind;

    #[tokio::test]
    async fn test_canned_responses() {
        let connector = MockConnector::new("mock").respond_when(
            "alice",
            CannedResponse::single(
                "https://example.com/alice",
                "Alice Roe",
                "Alice Roe profile",
                MediaType::Html,
            ),
        );

        let query = Query::new("Alice Roe", QueryKind::Name);
        let ctx = SearchContext::new(Duration::from_secs(5));
        let results = connector.search(&query, &ctx).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_name, "mock");
        assert_eq!(connector.search_calls(), 1);

        let other = Query::new("nobody", QueryKind::Name);
        let results = connector.search(&other, &ctx).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_canned_error() {
        let connector = MockConnector::new("mock")
            .respond_default(CannedResponse::Error(CannedError::UpstreamUnavailable));
        let query = Query::new("anything", QueryKind::Name);
        let ctx = SearchContext::new(Duration::from_secs(5));
        let err = connector.search(&query, &ctx).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_cancellation_respected() {
        let connector = MockConnector::new("mock").with_delay(Duration::from_secs(60));
        let query = Query::new("anything", QueryKind::Name);
        let ctx = SearchContext::new(Duration::from_secs(120));
        ctx.cancel.cancel();
        let err = connector.search(&query, &ctx).await.unwrap_err();
        assert!(matches!(err, DossierError::Cancelled));
    }
}
