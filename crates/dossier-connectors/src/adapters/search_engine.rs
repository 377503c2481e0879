use crate::adapters::cert_transparency::urlencode;
use crate::client::HttpClient;
use async_trait::async_trait;
use dossier_core::{
    EntityType, MediaType, Query, RawResult, Result, SearchContext, SourceConnector, SourceType,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::BTreeSet;

const SOURCE_NAME: &str = "web_search";

/// Generic JSON web-search adapter (SerpAPI-compatible envelope). The
/// widest-net source: low base confidence, supports every query kind.
pub struct SearchEngineConnector {
    client: HttpClient,
    base_url: String,
    api_key: Option<SecretString>,
}

impl SearchEngineConnector {
    pub fn new(api_key: Option<SecretString>) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(SOURCE_NAME)?,
            base_url: "https://serpapi.com/search".to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn parse_envelope(&self, query: &Query, envelope: &Value) -> Vec<RawResult> {
        let Some(organic) = envelope.get("organic_results").and_then(Value::as_array) else {
            return Vec::new();
        };
        organic
            .iter()
            .filter_map(|item| {
                let link = item.get("link").and_then(Value::as_str)?;
                let title = item.get("title").and_then(Value::as_str).unwrap_or("");
                let snippet = item.get("snippet").and_then(Value::as_str).unwrap_or("");
                let mut result = RawResult::new(
                    query.query_id,
                    SOURCE_NAME,
                    link,
                    title,
                    snippet.as_bytes().to_vec(),
                    MediaType::PlainText,
                );
                result.snippet = Some(snippet.to_string());
                if let Some(position) = item.get("position").and_then(Value::as_u64) {
                    result
                        .metadata
                        .insert("position".into(), position.to_string());
                }
                Some(result)
            })
            .collect()
    }
}

#[async_trait]
impl SourceConnector for SearchEngineConnector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn source_type(&self) -> SourceType {
        SourceType::SearchEngine
    }

    fn supported_entity_types(&self) -> BTreeSet<EntityType> {
        BTreeSet::from([
            EntityType::Person,
            EntityType::Organization,
            EntityType::Username,
            EntityType::SocialProfile,
            EntityType::Domain,
            EntityType::Location,
            EntityType::Email,
            EntityType::Phone,
        ])
    }

    fn rate_limit_per_hour(&self) -> u32 {
        100
    }

    fn base_confidence(&self) -> f64 {
        0.6
    }

    async fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Vec<RawResult>> {
        let Some(api_key) = &self.api_key else {
            return Err(dossier_core::DossierError::CredentialsInvalid(
                SOURCE_NAME.into(),
            ));
        };
        let url = format!(
            "{}?q={}&engine=google&api_key={}",
            self.base_url,
            urlencode(&query.query_string),
            urlencode(api_key.expose_secret())
        );
        let response = self.client.get(&url, &[], ctx).await?;
        let envelope: Value = response.json(SOURCE_NAME)?;
        Ok(self.parse_envelope(query, &envelope))
    }

    async fn validate_credentials(&self) -> Result<bool> {
        Ok(self.api_key.is_some())
    }
}
