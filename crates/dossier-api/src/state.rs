use dashmap::DashMap;
use dossier_core::InvestigationId;
use dossier_pipeline::{InvestigationHandle, PipelineContext};
use std::sync::Arc;

/// Shared application state: the process-wide pipeline singletons plus
/// the live investigation handles. Terminal investigations are served
/// from the store after their handles are reaped.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<PipelineContext>,
    pub investigations: Arc<DashMap<InvestigationId, InvestigationHandle>>,
}

impl AppState {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            investigations: Arc::new(DashMap::new()),
        }
    }

    /// Drop handles whose tasks have finished; their records live on in
    /// the store.
    pub fn reap_finished(&self) {
        self.investigations.retain(|_, handle| !handle.is_finished());
    }
}
