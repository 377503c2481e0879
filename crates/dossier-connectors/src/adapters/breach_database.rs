use crate::adapters::cert_transparency::urlencode;
use crate::client::HttpClient;
use async_trait::async_trait;
use dossier_core::{
    DossierError, EntityType, MediaType, Query, RawResult, Result, SearchContext, SourceConnector,
    SourceType,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::BTreeSet;

const SOURCE_NAME: &str = "breach_database";

/// HIBP-style breach lookup. Requires an API key; searches are keyed by
/// email address.
pub struct BreachDatabaseConnector {
    client: HttpClient,
    base_url: String,
    api_key: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct BreachEntry {
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "Domain", default)]
    domain: String,
    #[serde(rename = "BreachDate", default)]
    breach_date: String,
    #[serde(rename = "DataClasses", default)]
    data_classes: Vec<String>,
    #[serde(rename = "IsVerified", default)]
    is_verified: bool,
}

impl BreachDatabaseConnector {
    pub fn new(api_key: Option<SecretString>) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(SOURCE_NAME)?,
            base_url: "https://haveibeenpwned.com/api/v3".to_string(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn parse_envelope(&self, query: &Query, breaches: Vec<BreachEntry>) -> Vec<RawResult> {
        breaches
            .into_iter()
            .map(|b| {
                let body = serde_json::json!({
                    "breach": b.name,
                    "title": b.title,
                    "domain": b.domain,
                    "breach_date": b.breach_date,
                    "data_classes": b.data_classes,
                    "verified": b.is_verified,
                });
                let mut result = RawResult::new(
                    query.query_id,
                    SOURCE_NAME,
                    format!("https://haveibeenpwned.com/breach/{}", b.name),
                    format!("Breach: {}", b.title),
                    serde_json::to_vec(&body).unwrap_or_default(),
                    MediaType::Json,
                );
                result
                    .metadata
                    .insert("breach_date".into(), b.breach_date.clone());
                result
                    .metadata
                    .insert("data_classes".into(), b.data_classes.join(","));
                result
            })
            .collect()
    }
}

#[async_trait]
impl SourceConnector for BreachDatabaseConnector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn source_type(&self) -> SourceType {
        SourceType::BreachDatabase
    }

    fn supported_entity_types(&self) -> BTreeSet<EntityType> {
        BTreeSet::from([EntityType::Email])
    }

    fn rate_limit_per_hour(&self) -> u32 {
        100
    }

    fn base_confidence(&self) -> f64 {
        0.9
    }

    async fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Vec<RawResult>> {
        let Some(api_key) = &self.api_key else {
            return Err(DossierError::CredentialsInvalid(SOURCE_NAME.into()));
        };
        let url = format!(
            "{}/breachedaccount/{}?truncateResponse=false",
            self.base_url,
            urlencode(query.query_string.trim())
        );
        let headers = [("hibp-api-key", api_key.expose_secret().to_string())];
        let response = self.client.get(&url, &headers, ctx).await?;
        // 404 means "no breaches", not an error
        if response.status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let breaches: Vec<BreachEntry> = response.json(SOURCE_NAME)?;
        Ok(self.parse_envelope(query, breaches))
    }

    async fn validate_credentials(&self) -> Result<bool> {
        Ok(self.api_key.is_some())
    }
}
