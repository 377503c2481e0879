use crate::adapters::cert_transparency::urlencode;
use crate::client::HttpClient;
use async_trait::async_trait;
use dossier_core::{
    EntityType, MediaType, Query, RawResult, Result, SearchContext, SourceConnector, SourceType,
};
use serde_json::Value;
use std::collections::BTreeSet;

const SOURCE_NAME: &str = "domain_registry";

/// RDAP domain-registration lookups (the structured successor to WHOIS).
pub struct DomainRegistryConnector {
    client: HttpClient,
    base_url: String,
}

impl DomainRegistryConnector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: HttpClient::new(SOURCE_NAME)?,
            base_url: "https://rdap.org".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Flatten the RDAP envelope into the fields the parser understands:
    /// registrant names/emails from vCard entities, registration events,
    /// nameservers.
    fn parse_envelope(&self, query: &Query, envelope: &Value) -> Option<RawResult> {
        let domain = envelope
            .get("ldhName")
            .and_then(Value::as_str)
            .unwrap_or(&query.query_string)
            .to_lowercase();

        let mut registrants: Vec<String> = Vec::new();
        let mut emails: Vec<String> = Vec::new();
        if let Some(entities) = envelope.get("entities").and_then(Value::as_array) {
            for entity in entities {
                if let Some(vcard) = entity
                    .get("vcardArray")
                    .and_then(Value::as_array)
                    .and_then(|a| a.get(1))
                    .and_then(Value::as_array)
                {
                    for field in vcard {
                        let Some(parts) = field.as_array() else {
                            continue;
                        };
                        match (parts.first().and_then(Value::as_str), parts.get(3)) {
                            (Some("fn"), Some(Value::String(name))) => {
                                registrants.push(name.clone())
                            }
                            (Some("email"), Some(Value::String(email))) => {
                                emails.push(email.clone())
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        let mut events = Vec::new();
        if let Some(raw_events) = envelope.get("events").and_then(Value::as_array) {
            for event in raw_events {
                if let (Some(action), Some(date)) = (
                    event.get("eventAction").and_then(Value::as_str),
                    event.get("eventDate").and_then(Value::as_str),
                ) {
                    events.push(serde_json::json!({ "action": action, "date": date }));
                }
            }
        }

        let nameservers: Vec<String> = envelope
            .get("nameservers")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|ns| ns.get("ldhName").and_then(Value::as_str))
                    .map(|s| s.to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let body = serde_json::json!({
            "domain": domain,
            "registrants": registrants,
            "emails": emails,
            "events": events,
            "nameservers": nameservers,
        });

        Some(RawResult::new(
            query.query_id,
            SOURCE_NAME,
            format!("{}/domain/{}", self.base_url, domain),
            format!("Registration record for {}", domain),
            serde_json::to_vec(&body).ok()?,
            MediaType::Json,
        ))
    }
}

#[async_trait]
impl SourceConnector for DomainRegistryConnector {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn source_type(&self) -> SourceType {
        SourceType::DomainRegistry
    }

    fn supported_entity_types(&self) -> BTreeSet<EntityType> {
        BTreeSet::from([EntityType::Domain, EntityType::Person, EntityType::Email])
    }

    fn rate_limit_per_hour(&self) -> u32 {
        300
    }

    fn base_confidence(&self) -> f64 {
        0.95
    }

    async fn search(&self, query: &Query, ctx: &SearchContext) -> Result<Vec<RawResult>> {
        let url = format!(
            "{}/domain/{}",
            self.base_url,
            urlencode(query.query_string.trim())
        );
        let response = self.client.get(&url, &[], ctx).await?;
        if response.status == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let envelope: Value = response.json(SOURCE_NAME)?;
        Ok(self
            .parse_envelope(query, &envelope)
            .into_iter()
            .collect())
    }
}
