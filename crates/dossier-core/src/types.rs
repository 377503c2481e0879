use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type InvestigationId = Uuid;
pub type QueryId = Uuid;
pub type ResultId = Uuid;
pub type CandidateId = Uuid;
pub type EntityId = Uuid;
pub type EventId = Uuid;

/// What a query is asking for; routes the query to connectors that can
/// answer it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Name,
    Username,
    Email,
    Phone,
    Domain,
    Company,
    Location,
    Composite,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryKind::Name => "name",
            QueryKind::Username => "username",
            QueryKind::Email => "email",
            QueryKind::Phone => "phone",
            QueryKind::Domain => "domain",
            QueryKind::Company => "company",
            QueryKind::Location => "location",
            QueryKind::Composite => "composite",
        };
        write!(f, "{}", s)
    }
}

/// Broad category of an external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    SearchEngine,
    SocialMedia,
    CodeRepository,
    DomainRegistry,
    CertificateTransparency,
    BreachDatabase,
    Archive,
    CorporateRegistry,
    PatentRegistry,
    FundingRegistry,
    ThreatIntel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Email,
    Phone,
    Username,
    Domain,
    SocialProfile,
    Location,
    Document,
    Event,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Email => "email",
            EntityType::Phone => "phone",
            EntityType::Username => "username",
            EntityType::Domain => "domain",
            EntityType::SocialProfile => "social_profile",
            EntityType::Location => "location",
            EntityType::Document => "document",
            EntityType::Event => "event",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" => Ok(EntityType::Person),
            "organization" => Ok(EntityType::Organization),
            "email" => Ok(EntityType::Email),
            "phone" => Ok(EntityType::Phone),
            "username" => Ok(EntityType::Username),
            "domain" => Ok(EntityType::Domain),
            "social_profile" => Ok(EntityType::SocialProfile),
            "location" => Ok(EntityType::Location),
            "document" => Ok(EntityType::Document),
            "event" => Ok(EntityType::Event),
            other => Err(format!("unknown entity type: {}", other)),
        }
    }
}

/// Media type of raw result content, used for parser dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    Html,
    Json,
    Xml,
    PlainText,
    Other,
}

impl MediaType {
    pub fn from_content_type(header: &str) -> Self {
        let lower = header.to_ascii_lowercase();
        if lower.contains("json") {
            MediaType::Json
        } else if lower.contains("html") {
            MediaType::Html
        } else if lower.contains("xml") {
            MediaType::Xml
        } else if lower.contains("text/") {
            MediaType::PlainText
        } else {
            MediaType::Other
        }
    }
}

/// One planned search against one or more connectors. Produced by the
/// planner, consumed by the scheduler, discarded after the raw result is
/// cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub query_id: QueryId,
    pub query_string: String,
    pub kind: QueryKind,
    pub target_connectors: Vec<String>,
    pub priority: u8,
    pub parameters: BTreeMap<String, String>,
    pub depth: u8,
}

impl Query {
    pub fn new(query_string: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            query_string: query_string.into(),
            kind,
            target_connectors: Vec::new(),
            priority: 50,
            parameters: BTreeMap::new(),
            depth: 0,
        }
    }

    /// Equivalence key for plan deduplication: `(kind, normalized string,
    /// connector, params)`. Connector-specific, so a query targeting two
    /// connectors contributes two keys.
    pub fn dedup_keys(&self) -> Vec<String> {
        let normalized = normalize_query_string(&self.query_string);
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        self.target_connectors
            .iter()
            .map(|c| format!("{}|{}|{}|{}", self.kind, normalized, c, params.join("&")))
            .collect()
    }
}

/// Lowercase, collapse internal whitespace, trim. Fingerprints and dedup
/// keys are computed over this form so that cosmetic differences do not
/// defeat caching.
pub fn normalize_query_string(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Content returned by one connector for one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResult {
    pub result_id: ResultId,
    pub query_id: QueryId,
    pub source_name: String,
    pub url: String,
    pub title: String,
    pub snippet: Option<String>,
    pub content: Vec<u8>,
    pub media_type: MediaType,
    pub metadata: BTreeMap<String, String>,
    pub retrieved_at: DateTime<Utc>,
    pub content_hash: String,
    /// Set when the security scan flagged and redacted the content.
    pub security_flag: Option<String>,
}

impl RawResult {
    pub fn new(
        query_id: QueryId,
        source_name: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        content: Vec<u8>,
        media_type: MediaType,
    ) -> Self {
        let content_hash = content_hash(&content);
        Self {
            result_id: Uuid::new_v4(),
            query_id,
            source_name: source_name.into(),
            url: url.into(),
            title: title.into(),
            snippet: None,
            content,
            media_type,
            metadata: BTreeMap::new(),
            retrieved_at: Utc::now(),
            content_hash,
            security_flag: None,
        }
    }

    pub fn content_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// Hex SHA-256 of the raw bytes; a pure function of content.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
