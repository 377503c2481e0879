use anyhow::Context;
use dossier_api::{router, AppState, MemoryInvestigationStore};
use dossier_connectors::adapters::{
    BreachDatabaseConnector, CertTransparencyConnector, CodeRepositoryConnector,
    DomainRegistryConnector, SearchEngineConnector, WaybackConnector,
};
use dossier_connectors::ConnectorRegistry;
use dossier_core::Settings;
use dossier_pipeline::PipelineContext;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::from_env().context("loading settings")?;
    let registry = build_registry(&settings)?;
    let store = Arc::new(MemoryInvestigationStore::new());
    let ctx = Arc::new(PipelineContext::new(settings, registry, store));
    let state = AppState::new(ctx);

    let bind = std::env::var("DOSSIER_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;
    info!(%bind, "dossier api listening");

    axum::serve(listener, router(state))
        .await
        .context("serving")?;
    Ok(())
}

/// Credential-free connectors register unconditionally; keyed connectors
/// only when their key is configured.
fn build_registry(settings: &Settings) -> anyhow::Result<Arc<ConnectorRegistry>> {
    let registry = ConnectorRegistry::new();

    registry.register(Arc::new(CertTransparencyConnector::new()?));
    registry.register(Arc::new(DomainRegistryConnector::new()?));
    registry.register(Arc::new(WaybackConnector::new()?));
    registry.register(Arc::new(CodeRepositoryConnector::new(
        settings.connector_api_keys.get("code_repository").cloned(),
    )?));

    if let Some(key) = settings.connector_api_keys.get("breach_database") {
        registry.register(Arc::new(BreachDatabaseConnector::new(Some(key.clone()))?));
    }
    if let Some(key) = settings.connector_api_keys.get("web_search") {
        registry.register(Arc::new(SearchEngineConnector::new(Some(key.clone()))?));
    }

    info!(connectors = registry.len(), "connector registry initialized");
    Ok(Arc::new(registry))
}
