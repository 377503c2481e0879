use crate::client::HttpClient;
use async_trait::async_trait;
use dossier_core::{
    EntityType, MediaType, Query, RawResult, Result, SearchContext, SourceConnector, SourceType,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

const SOURCE_NAME: &str = "cert_transparency";

/// Certificate-transparency log adapter (crt.sh JSON interface). Public
/// logs, no credentials, very high base confidence.
pub struct CertTransparencyConnector {
    client: HttpClient,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CrtShEntry {
    #[serde(default)]
    issuer_name: String,
    #[serde(default)]
    common_name: String,
    #[serde(default)]
    name_value: String,
    #[serde(default)]
    not_before: String,
    #[serde(default)]
    not_after: String,
    #[serde(default)]
    id: u64,
}

impl CertTransparencyConnector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(SOURCE_NAME)?,
            base_url: "https://crt.sh".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn parse_envelope(&self, query: &Query, entries: Vec<CrtShEntry>) -> Vec<RawResult> {
        entries
            .into_iter()
            .map(|entry| {
                let body = serde_json::json!({
                    "issuer": entry.issuer_name,
                    "common_name": entry.common_name,
                    "names": entry.name_value.split('\n').collect::<Vec<_>>(),
                    "not_before": entry.not_before,
                    "not_after": entry.not_after,
                });
                let mut result = RawResult::new(
                    query.query_id,
                    SOURCE_NAME,
                    format!("{}/?id={}", self.base_url, entry.id),
                    format!("Certificate for {}", entry.common_name),
                    serde_json::to_vec(&body).unwrap_or_default(),
                    MediaType::Json,
                );
                result
                    .metadata
                    .insert("issuer".into(), body["issuer"].as_str().unwrap_or("").into());
                result
            })
            .collect()
    }
}

#[async_trait]
impl SourceConnector for CertTransparencyConnector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn source_type(&self) -> SourceType {
        SourceType::CertificateTransparency
    }

    fn supported_entity_types(&self) -> BTreeSet<EntityType> {
        BTreeSet::from([EntityType::Domain])
    }

    fn rate_limit_per_hour(&self) -> u32 {
        600
    }

    fn base_confidence(&self) -> f64 {
        0.98
    }

    async fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Vec<RawResult>> {
        let url = format!(
            "{}/?q={}&output=json",
            self.base_url,
            urlencode(&query.query_string)
        );
        let response = self.client.get(&url, &[], ctx).await?;
        if response.status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let entries: Vec<CrtShEntry> = response.json(SOURCE_NAME)?;
        if entries.is_empty() {
            warn!(query = %query.query_string, "no certificates found");
        }
        Ok(self.parse_envelope(query, entries))
    }
}

pub(crate) fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::QueryKind;

    #[test]
    fn test_parse_crtsh_envelope() {
        let connector = CertTransparencyConnector::new().unwrap();
        let query = Query::new("aroe.example", QueryKind::Domain);
        let raw = r#"[{
            "id": 12345,
            "issuer_name": "C=US, O=Example CA",
            "common_name": "aroe.example",
            "name_value": "aroe.example\nwww.aroe.example",
            "not_before": "2024-01-01T00:00:00",
            "not_after": "2025-01-01T00:00:00"
        }]"#;
        let entries: Vec<CrtShEntry> = serde_json::from_str(raw).unwrap();
        let results = connector.parse_envelope(&query, entries);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source_name, "cert_transparency");
        assert!(results[0].url.contains("id=12345"));
        let body: serde_json::Value = serde_json::from_slice(&results[0].content).unwrap();
        assert_eq!(body["names"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("a b&c"), "a+b%26c");
    }
}
