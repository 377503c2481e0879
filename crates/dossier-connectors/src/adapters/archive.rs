use crate::adapters::cert_transparency::urlencode;
use crate::client::HttpClient;
use async_trait::async_trait;
use dossier_core::{
    EntityType, MediaType, Query, RawResult, Result, SearchContext, SourceConnector, SourceType,
};
use serde_json::Value;
use std::collections::BTreeSet;

const SOURCE_NAME: &str = "web_archive";

/// Wayback Machine CDX adapter: historical snapshots for a domain or URL.
pub struct WaybackConnector {
    client: HttpClient,
    base_url: String,
}

impl WaybackConnector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(SOURCE_NAME)?,
            base_url: "https://web.archive.org".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The CDX response is a JSON array-of-arrays whose first row is the
    /// column header.
    fn parse_envelope(&self, query: &Query, envelope: &Value) -> Vec<RawResult> {
        let Some(rows) = envelope.as_array() else {
            return Vec::new();
        };
        let Some(header) = rows.first().and_then(Value::as_array) else {
            return Vec::new();
        };
        let index_of = |name: &str| {
            header
                .iter()
                .position(|col| col.as_str() == Some(name))
        };
        let (Some(ts_idx), Some(url_idx)) = (index_of("timestamp"), index_of("original")) else {
            return Vec::new();
        };

        rows.iter()
            .skip(1)
            .filter_map(|row| {
                let row = row.as_array()?;
                let timestamp = row.get(ts_idx)?.as_str()?;
                let original = row.get(url_idx)?.as_str()?;
                let snapshot_url = format!("{}/web/{}/{}", self.base_url, timestamp, original);
                let body = serde_json::json!({
                    "original_url": original,
                    "snapshot_timestamp": timestamp,
                    "snapshot_url": snapshot_url,
                });
                let mut result = RawResult::new(
                    query.query_id,
                    SOURCE_NAME,
                    snapshot_url,
                    format!("Archived snapshot of {}", original),
                    serde_json::to_vec(&body).ok()?,
                    MediaType::Json,
                );
                result
                    .metadata
                    .insert("snapshot_timestamp".into(), timestamp.into());
                Some(result)
            })
            .collect()
    }
}

#[async_trait]
impl SourceConnector for WaybackConnector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn source_type(&self) -> SourceType {
        SourceType::Archive
    }

    fn supported_entity_types(&self) -> BTreeSet<EntityType> {
        BTreeSet::from([EntityType::Domain, EntityType::Document])
    }

    fn rate_limit_per_hour(&self) -> u32 {
        400
    }

    fn base_confidence(&self) -> f64 {
        0.8
    }

    async fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Vec<RawResult>> {
        let url = format!(
            "{}/cdx/search/cdx?url={}&output=json&limit=20&collapse=digest",
            self.base_url,
            urlencode(query.query_string.trim())
        );
        let response = self.client.get(&url, &[], ctx).await?;
        let envelope: Value = response.json(SOURCE_NAME)?;
        Ok(self.parse_envelope(query, &envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::QueryKind;

    #[test]
    fn test_parse_cdx_envelope() {
        let connector = WaybackConnector::new().unwrap();
        let query = Query::new("aroe.example", QueryKind::Domain);
        let envelope: Value = serde_json::from_str(
            r#"[
                ["urlkey", "timestamp", "original", "mimetype", "statuscode", "digest", "length"],
                ["example,aroe)/", "20200401000000", "https://aroe.example/", "text/html", "200", "ABCD", "1234"],
                ["example,aroe)/about", "20210115120000", "https://aroe.example/about", "text/html", "200", "EFGH", "2345"]
            ]"#,
        )
        .unwrap();

        let results = connector.parse_envelope(&query, &envelope);
        assert_eq!(results.len(), 2);
        assert!(results[0].url.contains("/web/20200401000000/"));
        assert_eq!(
            results[1].metadata.get("snapshot_timestamp").unwrap(),
            "20210115120000"
        );
    }

    #[test]
    fn test_parse_empty_envelope() {
        let connector = WaybackConnector::new().unwrap();
        let query = Query::new("aroe.example", QueryKind::Domain);
        assert!(connector
            .parse_envelope(&query, &serde_json::json!([]))
            .is_empty());
        assert!(connector
            .parse_envelope(&query, &serde_json::json!({}))
            .is_empty());
    }
}
