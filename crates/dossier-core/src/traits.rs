use crate::investigation::InvestigationRecord;
use crate::types::{EntityType, InvestigationId, Query, RawResult};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation handed to every connector search. Adapters
/// must abort on either and return partial results or a timeout error,
/// never hang.
#[derive(Debug, Clone)]
pub struct SearchContext {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl SearchContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }
}

/// Capability contract every source adapter satisfies. Concrete connectors
/// are registered at startup in a registry keyed by `source_name`; adapter
/// failures surface as per-query errors and never crash the pipeline.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Stable identifier; the registry key and the cache fingerprint input.
    fn source_name(&self) -> &str;

    fn source_type(&self) -> crate::types::SourceType;

    fn supported_entity_types(&self) -> BTreeSet<EntityType>;

    fn rate_limit_per_hour(&self) -> u32;

    /// Base confidence of this source in [0, 1].
    fn base_confidence(&self) -> f64;

    /// Connector-specific override of the default per-query timeout.
    fn preferred_timeout(&self) -> Option<Duration> {
        None
    }

    /// Execute one query. Idempotent for the same `(query, parameters)`
    /// within the cache TTL.
    async fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Vec<RawResult>>;

    /// Cheap credential probe; connectors without credentials return true.
    async fn validate_credentials(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Opaque persistence abstraction. The store must not interpret values;
/// reports are stored as serialized JSON.
#[async_trait]
pub trait InvestigationStore: Send + Sync {
    async fn save_investigation(&self, record: &InvestigationRecord) -> Result<()>;

    async fn get_investigation(&self, id: InvestigationId) -> Result<Option<InvestigationRecord>>;

    async fn save_report(&self, id: InvestigationId, report: serde_json::Value) -> Result<()>;

    async fn get_report(&self, id: InvestigationId) -> Result<Option<serde_json::Value>>;

    async fn list_investigations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InvestigationRecord>>;

    async fn delete_investigation(&self, id: InvestigationId) -> Result<()>;
}
