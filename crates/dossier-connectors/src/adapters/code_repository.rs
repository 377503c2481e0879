use crate::adapters::cert_transparency::urlencode;
use crate::client::HttpClient;
use async_trait::async_trait;
use dossier_core::{
    EntityType, MediaType, Query, RawResult, Result, SearchContext, SourceConnector, SourceType,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::collections::BTreeSet;

const SOURCE_NAME: &str = "code_repository";

/// GitHub-style user search. Works unauthenticated at a reduced rate
/// limit; a token raises both the limit and result fidelity.
pub struct CodeRepositoryConnector {
    client: HttpClient,
    base_url: String,
    token: Option<SecretString>,
}

impl CodeRepositoryConnector {
    pub fn new(token: Option<SecretString>) -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(SOURCE_NAME)?,
            base_url: "https://api.github.com".to_string(),
            token,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn parse_envelope(&self, query: &Query, envelope: &Value) -> Vec<RawResult> {
        let Some(items) = envelope.get("items").and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                let login = item.get("login").and_then(Value::as_str)?;
                let html_url = item.get("html_url").and_then(Value::as_str)?;
                let body = serde_json::json!({
                    "username": login,
                    "profile_url": html_url,
                    "account_type": item.get("type").and_then(Value::as_str).unwrap_or("User"),
                });
                let mut result = RawResult::new(
                    query.query_id,
                    SOURCE_NAME,
                    html_url,
                    format!("Code hosting profile: {}", login),
                    serde_json::to_vec(&body).ok()?,
                    MediaType::Json,
                );
                result.metadata.insert("username".into(), login.into());
                Some(result)
            })
            .collect()
    }
}

#[async_trait]
impl SourceConnector for CodeRepositoryConnector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn source_type(&self) -> SourceType {
        SourceType::CodeRepository
    }

    fn supported_entity_types(&self) -> BTreeSet<EntityType> {
        BTreeSet::from([
            EntityType::Username,
            EntityType::SocialProfile,
            EntityType::Person,
        ])
    }

    fn rate_limit_per_hour(&self) -> u32 {
        if self.token.is_some() {
            5000
        } else {
            60
        }
    }

    fn base_confidence(&self) -> f64 {
        0.85
    }

    async fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Vec<RawResult>> {
        let url = format!(
            "{}/search/users?q={}&per_page=10",
            self.base_url,
            urlencode(&query.query_string)
        );
        let mut headers: Vec<(&str, String)> =
            vec![("accept", "application/vnd.github+json".to_string())];
        if let Some(token) = &self.token {
            headers.push(("authorization", format!("Bearer {}", token.expose_secret())));
        }
        let response = self.client.get(&url, &headers, ctx).await?;
        let envelope: Value = response.json(SOURCE_NAME)?;
        Ok(self.parse_envelope(query, &envelope))
    }

    async fn validate_credentials(&self) -> Result<bool> {
        // anonymous access is allowed, just slower
        Ok(true)
    }
}
