use dossier_core::{
    AttributeKey, EntityCandidate, EntityType, MediaType, RawResult,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("email pattern")
});
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?[0-9]{1,3}[-.\s]?\(?[0-9]{2,4}\)?[-.\s]?[0-9]{3,4}[-.\s]?[0-9]{3,4}")
        .expect("phone pattern")
});
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>)]+"#).expect("url pattern"));
static HANDLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)@([A-Za-z0-9_.-]{2,30})\b").expect("handle pattern"));
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+(com|org|net|io|dev|co|app|edu|gov|example)\b")
        .expect("domain pattern")
});
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));
/// Two or three capitalized words in sequence; weak evidence of a person
/// name.
static CAPITALIZED_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Z][a-z]{1,15})\s+([A-Z][a-z]{1,15})(?:\s+([A-Z][a-z]{1,15}))?\b")
        .expect("name pattern")
});

/// Social platforms whose profile URLs yield username candidates.
const PROFILE_HOSTS: &[&str] = &[
    "github.com",
    "gitlab.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "instagram.com",
    "reddit.com",
];

/// Extracts typed entity candidates from raw results. Parsing never
/// fails: malformed content yields zero candidates and a warning.
#[derive(Default)]
pub struct ResultParser {
    /// When false, the weak capitalized-words person extraction is off.
    pub textual_name_extraction: bool,
}

impl ResultParser {
    pub fn new() -> Self {
        Self {
            textual_name_extraction: true,
        }
    }

    pub fn parse(&self, result: &RawResult) -> Vec<EntityCandidate> {
        let mut candidates = match result.media_type {
            MediaType::Json => self.parse_json(result),
            MediaType::Html => {
                let text = HTML_TAG_RE
                    .replace_all(&result.content_text(), " ")
                    .into_owned();
                self.parse_text(result, &text)
            }
            MediaType::Xml | MediaType::PlainText | MediaType::Other => {
                let text = result.content_text().into_owned();
                self.parse_text(result, &text)
            }
        };

        // title and snippet carry extractable signal regardless of body type
        let mut header = result.title.clone();
        if let Some(snippet) = &result.snippet {
            header.push(' ');
            header.push_str(snippet);
        }
        candidates.extend(self.parse_text(result, &header));

        dedup_candidates(candidates)
    }

    /// Structural extraction keyed to the envelope shapes our adapters
    /// emit, falling back to regex over the raw JSON text.
    fn parse_json(&self, result: &RawResult) -> Vec<EntityCandidate> {
        let value: Value = match serde_json::from_slice(&result.content) {
            Ok(value) => value,
            Err(e) => {
                warn!(url = %result.url, error = %e, "json parse failed, no candidates");
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();

        if let Some(domain) = value.get("domain").and_then(Value::as_str) {
            candidates.push(
                candidate(result, EntityType::Domain, 0.95)
                    .with_attribute(AttributeKey::Domain, domain),
            );
        }
        if let Some(registrants) = value.get("registrants").and_then(Value::as_array) {
            for name in registrants.iter().filter_map(Value::as_str) {
                let mut person = candidate(result, EntityType::Person, 0.95)
                    .with_attribute(AttributeKey::FullName, name);
                if let Some(domain) = value.get("domain").and_then(Value::as_str) {
                    person = person.with_attribute(AttributeKey::Domain, domain);
                }
                candidates.push(person);
            }
        }
        if let Some(emails) = value.get("emails").and_then(Value::as_array) {
            for email in emails.iter().filter_map(Value::as_str) {
                candidates.push(
                    candidate(result, EntityType::Email, 0.95)
                        .with_attribute(AttributeKey::Email, email),
                );
            }
        }
        if let Some(names) = value.get("names").and_then(Value::as_array) {
            // certificate SAN list
            for name in names.iter().filter_map(Value::as_str) {
                candidates.push(
                    candidate(result, EntityType::Domain, 0.9)
                        .with_attribute(AttributeKey::Domain, name.trim_start_matches("*.")),
                );
            }
        }
        if let Some(username) = value.get("username").and_then(Value::as_str) {
            let mut profile = candidate(result, EntityType::SocialProfile, 0.9)
                .with_attribute(AttributeKey::Username, username);
            if let Some(url) = value.get("profile_url").and_then(Value::as_str) {
                profile = profile.with_attribute(AttributeKey::Url, url);
            }
            candidates.push(profile);
        }
        if let Some(breach) = value.get("breach").and_then(Value::as_str) {
            candidates.push(
                candidate(result, EntityType::Document, 0.9)
                    .with_attribute(AttributeKey::DisplayName, format!("breach:{}", breach)),
            );
        }

        // whatever the structural pass missed, the regex pass may catch
        let flattened = flatten_json_strings(&value);
        candidates.extend(self.regex_extract(result, &flattened));
        candidates
    }

    fn parse_text(&self, result: &RawResult, text: &str) -> Vec<EntityCandidate> {
        let mut candidates = self.regex_extract(result, text);

        if self.textual_name_extraction {
            for caps in CAPITALIZED_NAME_RE.captures_iter(text).take(10) {
                let name = caps.get(0).expect("match").as_str().trim();
                // skip obvious non-names picked up by the pattern
                if name.split_whitespace().count() < 2 {
                    continue;
                }
                candidates.push(
                    candidate(result, EntityType::Person, 0.3)
                        .with_attribute(AttributeKey::FullName, name),
                );
            }
        }
        candidates
    }

    fn regex_extract(&self, result: &RawResult, text: &str) -> Vec<EntityCandidate> {
        let mut candidates = Vec::new();

        for m in EMAIL_RE.find_iter(text).take(50) {
            candidates.push(
                candidate(result, EntityType::Email, 0.9)
                    .with_attribute(AttributeKey::Email, m.as_str().to_lowercase()),
            );
        }

        for m in PHONE_RE.find_iter(text).take(50) {
            let digits: String = m.as_str().chars().filter(|c| c.is_ascii_digit()).collect();
            if !(7..=15).contains(&digits.len()) {
                continue;
            }
            candidates.push(
                candidate(result, EntityType::Phone, 0.85)
                    .with_attribute(AttributeKey::Phone, m.as_str().trim()),
            );
        }

        for m in URL_RE.find_iter(text).take(50) {
            if let Some((host, username)) = profile_url_parts(m.as_str()) {
                candidates.push(
                    candidate(result, EntityType::SocialProfile, 0.7)
                        .with_attribute(AttributeKey::Username, username)
                        .with_attribute(AttributeKey::Url, m.as_str())
                        .with_attribute(AttributeKey::Domain, host),
                );
            }
        }

        for caps in HANDLE_RE.captures_iter(text).take(50) {
            candidates.push(
                candidate(result, EntityType::Username, 0.7)
                    .with_attribute(AttributeKey::Username, &caps[1]),
            );
        }

        let lowered = text.to_lowercase();
        for m in DOMAIN_RE.find_iter(&lowered).take(50) {
            let domain = m.as_str();
            // email domains are already covered by the email candidates
            let preceded_by_at = m.start() > 0 && lowered.as_bytes()[m.start() - 1] == b'@';
            if preceded_by_at || domain.starts_with("www.") {
                continue;
            }
            candidates.push(
                candidate(result, EntityType::Domain, 0.85)
                    .with_attribute(AttributeKey::Domain, domain),
            );
        }

        candidates
    }
}

fn candidate(result: &RawResult, entity_type: EntityType, confidence: f64) -> EntityCandidate {
    let mut c = EntityCandidate::new(entity_type, result.source_name.clone());
    c.source_refs.push(result.result_id);
    c.extraction_confidence = confidence;
    c
}

fn profile_url_parts(url: &str) -> Option<(String, String)> {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let stripped = stripped.strip_prefix("www.").unwrap_or(stripped);
    let (host, path) = stripped.split_once('/')?;
    if !PROFILE_HOSTS.contains(&host) {
        return None;
    }
    let path = path.strip_prefix("in/").unwrap_or(path); // linkedin style
    let username = path.split(['/', '?', '#']).next()?;
    if username.is_empty() || username.len() > 40 {
        return None;
    }
    Some((host.to_string(), username.to_string()))
}

fn flatten_json_strings(value: &Value) -> String {
    let mut out = String::new();
    collect_strings(value, &mut out);
    out
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        Value::Array(items) => {
            for item in items {
                collect_strings(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_strings(item, out);
            }
        }
        _ => {}
    }
}

/// Collapse duplicate candidates extracted twice from the same result
/// (same type and attribute set).
fn dedup_candidates(candidates: Vec<EntityCandidate>) -> Vec<EntityCandidate> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut out = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let key = format!(
            "{}|{}",
            candidate.entity_type,
            serde_json::to_string(&candidate.attributes).unwrap_or_default()
        );
        if seen.insert(key) {
            out.push(candidate);
        } else {
            debug!(entity_type = %candidate.entity_type, "duplicate extraction dropped");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::MediaType;
    use uuid::Uuid;

    fn raw(content: &str, media_type: MediaType) -> RawResult {
        RawResult::new(
            Uuid::new_v4(),
            "test_source",
            "https://example.com/page",
            "Result title",
            content.as_bytes().to_vec(),
            media_type,
        )
    }

    #[test]
    fn test_plain_text_extraction() {
        let parser = ResultParser::new();
        let result = raw(
            "Contact Alice Roe at alice.roe@example.com or +1 555 123 4567. \
             Code at https://github.com/aroe and she posts as @a_roe on aroe.example... \
             visit aroe.dev",
            MediaType::PlainText,
        );
        let candidates = parser.parse(&result);

        let emails: Vec<_> = candidates
            .iter()
            .filter(|c| c.entity_type == EntityType::Email)
            .collect();
        assert_eq!(emails.len(), 1);
        assert_eq!(
            emails[0].attributes[&AttributeKey::Email].as_text().unwrap(),
            "alice.roe@example.com"
        );

        assert!(candidates.iter().any(|c| c.entity_type == EntityType::Phone));
        assert!(candidates
            .iter()
            .any(|c| c.entity_type == EntityType::SocialProfile
                && c.attributes[&AttributeKey::Username].as_text() == Some("aroe")));
        assert!(candidates
            .iter()
            .any(|c| c.entity_type == EntityType::Username
                && c.attributes[&AttributeKey::Username].as_text() == Some("a_roe")));
        assert!(candidates
            .iter()
            .any(|c| c.entity_type == EntityType::Domain
                && c.attributes[&AttributeKey::Domain].as_text() == Some("aroe.dev")));
        // person name found with low confidence
        let person = candidates
            .iter()
            .find(|c| c.entity_type == EntityType::Person)
            .unwrap();
        assert!(person.extraction_confidence < 0.5);
    }

    #[test]
    fn test_html_tags_stripped() {
        let parser = ResultParser::new();
        let result = raw(
            "<html><body><p>mail: <b>bob@example.com</b></p></body></html>",
            MediaType::Html,
        );
        let candidates = parser.parse(&result);
        assert!(candidates
            .iter()
            .any(|c| c.entity_type == EntityType::Email));
    }

    #[test]
    fn test_structural_json_extraction() {
        let parser = ResultParser::new();
        let result = raw(
            r#"{
                "domain": "aroe.example",
                "registrants": ["Alice Roe"],
                "emails": ["alice@aroe.example"],
                "nameservers": ["ns1.aroe.example"]
            }"#,
            MediaType::Json,
        );
        let candidates = parser.parse(&result);

        let person = candidates
            .iter()
            .find(|c| c.entity_type == EntityType::Person)
            .unwrap();
        assert_eq!(
            person.attributes[&AttributeKey::FullName].as_text().unwrap(),
            "Alice Roe"
        );
        // registrant is linked to the domain it registered
        assert_eq!(
            person.attributes[&AttributeKey::Domain].as_text().unwrap(),
            "aroe.example"
        );
        assert!(person.extraction_confidence > 0.9);
        assert!(candidates.iter().any(|c| c.entity_type == EntityType::Domain));
        assert!(candidates.iter().any(|c| c.entity_type == EntityType::Email));
    }

    #[test]
    fn test_malformed_json_yields_nothing() {
        let parser = ResultParser::new();
        let mut result = raw("{not valid json", MediaType::Json);
        result.title = String::new();
        let candidates = parser.parse(&result);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_candidates_reference_their_raw_result() {
        let parser = ResultParser::new();
        let result = raw("reach me: carol@example.org", MediaType::PlainText);
        let candidates = parser.parse(&result);
        assert!(!candidates.is_empty());
        for candidate in &candidates {
            assert_eq!(candidate.source_refs, vec![result.result_id]);
            assert_eq!(candidate.source_name, "test_source");
        }
    }

    #[test]
    fn test_duplicate_extractions_collapse() {
        let parser = ResultParser::new();
        let result = raw(
            "dave@example.com dave@example.com dave@example.com",
            MediaType::PlainText,
        );
        let emails = parser
            .parse(&result)
            .into_iter()
            .filter(|c| c.entity_type == EntityType::Email)
            .count();
        assert_eq!(emails, 1);
    }
}
