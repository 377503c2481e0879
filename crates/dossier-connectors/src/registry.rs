use dashmap::DashMap;
use dossier_core::{EntityType, QueryKind, SourceConnector, SourceType};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide connector registry keyed by `source_name`. Connectors are
/// registered once at startup; no runtime mutation beyond that.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: DashMap<String, Arc<dyn SourceConnector>>,
}

/// Status snapshot for one registered connector.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStatus {
    pub source_name: String,
    pub source_type: SourceType,
    pub rate_limit_per_hour: u32,
    pub base_confidence: f64,
    pub credentials_ok: bool,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connector: Arc<dyn SourceConnector>) {
        let name = connector.source_name().to_string();
        if self.connectors.contains_key(&name) {
            warn!(source = %name, "connector already registered, overwriting");
        }
        info!(source = %name, "registered connector");
        self.connectors.insert(name, connector);
    }

    pub fn get(&self, source_name: &str) -> Option<Arc<dyn SourceConnector>> {
        self.connectors.get(source_name).map(|c| Arc::clone(&c))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connectors.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Connectors able to answer a query of the given kind, in sorted
    /// name order so plans are deterministic.
    pub fn for_query_kind(&self, kind: QueryKind) -> Vec<Arc<dyn SourceConnector>> {
        let wanted = entity_types_for_kind(kind);
        let mut matching: Vec<Arc<dyn SourceConnector>> = self
            .connectors
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .supported_entity_types()
                    .iter()
                    .any(|t| wanted.contains(t))
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        matching.sort_by(|a, b| a.source_name().cmp(b.source_name()));
        matching
    }

    /// Credential sweep over every connector; failures are recorded, not
    /// fatal.
    pub async fn status_sweep(&self) -> Vec<ConnectorStatus> {
        let connectors: Vec<Arc<dyn SourceConnector>> = self
            .connectors
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut statuses = Vec::with_capacity(connectors.len());
        for connector in &connectors {
            let credentials_ok = match connector.validate_credentials().await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(source = %connector.source_name(), error = %e, "credential check failed");
                    false
                }
            };
            statuses.push(ConnectorStatus {
                source_name: connector.source_name().to_string(),
                source_type: connector.source_type(),
                rate_limit_per_hour: connector.rate_limit_per_hour(),
                base_confidence: connector.base_confidence(),
                credentials_ok,
            });
        }
        statuses.sort_by(|a, b| a.source_name.cmp(&b.source_name));
        statuses
    }
}

/// Which entity types a query kind is looking for, used for routing.
pub fn entity_types_for_kind(kind: QueryKind) -> Vec<EntityType> {
    match kind {
        QueryKind::Name => vec![EntityType::Person, EntityType::SocialProfile],
        QueryKind::Username => vec![EntityType::Username, EntityType::SocialProfile],
        QueryKind::Email => vec![EntityType::Email],
        QueryKind::Phone => vec![EntityType::Phone],
        QueryKind::Domain => vec![EntityType::Domain],
        QueryKind::Company => vec![EntityType::Organization],
        QueryKind::Location => vec![EntityType::Location],
        QueryKind::Composite => vec![
            EntityType::Person,
            EntityType::SocialProfile,
            EntityType::Organization,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;

    #[tokio::test]
    async fn test_register_and_route() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(
            MockConnector::new("mock_domains").with_entity_types([EntityType::Domain]),
        ));
        registry.register(Arc::new(
            MockConnector::new("mock_people").with_entity_types([EntityType::Person]),
        ));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["mock_domains", "mock_people"]);

        let for_domain = registry.for_query_kind(QueryKind::Domain);
        assert_eq!(for_domain.len(), 1);
        assert_eq!(for_domain[0].source_name(), "mock_domains");

        assert!(registry.for_query_kind(QueryKind::Phone).is_empty());
    }

    #[tokio::test]
    async fn test_status_sweep() {
        let registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("mock_a")));
        let statuses = registry.status_sweep().await;
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].credentials_ok);
    }
}
