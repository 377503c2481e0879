use async_trait::async_trait;
use dashmap::DashMap;
use dossier_core::{InvestigationId, InvestigationRecord, InvestigationStore, Result};

/// In-memory investigation store. The store is the source of truth for
/// terminal investigations; this implementation keeps everything for the
/// process lifetime, which is the default deployment without an external
/// database.
#[derive(Default)]
pub struct MemoryInvestigationStore {
    records: DashMap<InvestigationId, InvestigationRecord>,
    reports: DashMap<InvestigationId, serde_json::Value>,
}

impl MemoryInvestigationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InvestigationStore for MemoryInvestigationStore {
    async fn save_investigation(&self, record: &InvestigationRecord) -> Result<()> {
        self.records
            .insert(record.investigation_id(), record.clone());
        Ok(())
    }

    async fn get_investigation(&self, id: InvestigationId) -> Result<Option<InvestigationRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn save_report(&self, id: InvestigationId, report: serde_json::Value) -> Result<()> {
        self.reports.insert(id, report);
        Ok(())
    }

    async fn get_report(&self, id: InvestigationId) -> Result<Option<serde_json::Value>> {
        Ok(self.reports.get(&id).map(|r| r.clone()))
    }

    async fn list_investigations(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<InvestigationRecord>> {
        let mut all: Vec<InvestigationRecord> =
            self.records.iter().map(|entry| entry.clone()).collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_investigation(&self, id: InvestigationId) -> Result<()> {
        self.records.remove(&id);
        self.reports.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::SeedInput;

    #[tokio::test]
    async fn test_roundtrip_and_delete() {
        let store = MemoryInvestigationStore::new();
        let record = InvestigationRecord::new(SeedInput::new("Alice Roe"));
        let id = record.investigation_id();

        store.save_investigation(&record).await.unwrap();
        assert!(store.get_investigation(id).await.unwrap().is_some());

        store
            .save_report(id, serde_json::json!({"ok": true}))
            .await
            .unwrap();
        assert_eq!(
            store.get_report(id).await.unwrap().unwrap()["ok"],
            serde_json::json!(true)
        );

        store.delete_investigation(id).await.unwrap();
        assert!(store.get_investigation(id).await.unwrap().is_none());
        assert!(store.get_report(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_pagination() {
        let store = MemoryInvestigationStore::new();
        for i in 0..5 {
            let record = InvestigationRecord::new(SeedInput::new(format!("Subject {}", i)));
            store.save_investigation(&record).await.unwrap();
        }
        assert_eq!(store.list_investigations(2, 0).await.unwrap().len(), 2);
        assert_eq!(store.list_investigations(10, 3).await.unwrap().len(), 2);
        assert!(store.list_investigations(10, 5).await.unwrap().is_empty());
    }
}
