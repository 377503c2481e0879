use crate::error::{DossierError, Result};
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use tracing::warn;

/// Outgoing queries matching any of these never reach the scheduler.
/// Covers credential-dumping search operators, raw SSN / credit-card
/// formats, and explicit probes of authentication endpoints.
static DEFAULT_BLOCKED: &[&str] = &[
    // credential-dump search operators
    r"(?i)filetype:(sql|env|log|bak)\b.*\b(password|passwd|pwd|credential)",
    r"(?i)\b(password|passwd|pwd)\s*(dump|list|leak)\b",
    r"(?i)intext:(password|api[_-]?key|secret[_-]?key)",
    // raw SSN and credit card formats must never go out in a query
    r"\b\d{3}-\d{2}-\d{4}\b",
    r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
    // explicit authentication endpoint probes
    r"(?i)inurl:(login|signin|wp-admin|admin/login|auth)\b",
    r"(?i)/(wp-login|phpmyadmin|\.git/config|\.env)\b",
];

/// Patterns that flag fetched content as unsafe. Flagged content is
/// redacted, never dropped.
static SQL_INJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(union\s+select|drop\s+table|insert\s+into|delete\s+from|exec\s*\()")
        .expect("sql injection pattern")
});
static XSS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(<script|javascript:|\bonerror\s*=|\bonload\s*=)").expect("xss pattern")
});
static COMMAND_INJECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\|\||&&|;\s*rm\s|`[^`]+`|\$\([^)]+\))").expect("cmd pattern"));
static PATH_TRAVERSAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\.\./|\.\.\\|%2e%2e)").expect("traversal pattern"));

static SENSITIVE_SSN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn pattern"));
static SENSITIVE_CARD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").expect("card pattern"));

/// Content larger than this is truncated before caching or logging.
pub const MAX_CONTENT_BYTES: usize = 2 * 1024 * 1024;

/// Compiled blocked-pattern set applied to every planned query.
pub struct BlockedPatterns {
    set: RegexSet,
    sources: Vec<String>,
}

impl BlockedPatterns {
    pub fn with_defaults() -> Self {
        Self::from_patterns(DEFAULT_BLOCKED.iter().map(|s| s.to_string()))
            .expect("default blocked patterns compile")
    }

    pub fn from_patterns<I>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let sources: Vec<String> = patterns.into_iter().collect();
        let set = RegexSet::new(&sources)
            .map_err(|e| DossierError::Configuration(format!("blocked pattern: {}", e)))?;
        Ok(Self { set, sources })
    }

    /// Extend the defaults with operator-supplied patterns.
    pub fn with_extra<I>(extra: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let patterns = DEFAULT_BLOCKED
            .iter()
            .map(|s| s.to_string())
            .chain(extra)
            .collect::<Vec<_>>();
        Self::from_patterns(patterns)
    }

    /// Err(SecurityRejected) when the query string trips any pattern.
    pub fn check_query(&self, query_string: &str) -> Result<()> {
        let matches = self.set.matches(query_string);
        if let Some(idx) = matches.iter().next() {
            warn!(pattern = %self.sources[idx], "query blocked by security pattern");
            return Err(DossierError::SecurityRejected(format!(
                "query matches blocked pattern #{}",
                idx
            )));
        }
        Ok(())
    }

    pub fn pattern_count(&self) -> usize {
        self.sources.len()
    }
}

impl Default for BlockedPatterns {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Outcome of scanning fetched content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentScan {
    Clean,
    /// Flag name plus the redacted content to cache/log in place of the
    /// original.
    Flagged { flag: String, redacted: Vec<u8> },
}

/// Scan content for injection payloads and oversize bodies. Flagged
/// content is redacted, not dropped, so downstream stages still see the
/// result exists.
pub fn scan_content(content: &[u8]) -> ContentScan {
    if content.len() > MAX_CONTENT_BYTES {
        let mut truncated = content[..MAX_CONTENT_BYTES].to_vec();
        truncated.extend_from_slice(b"...[truncated]");
        return ContentScan::Flagged {
            flag: "oversize_content".into(),
            redacted: truncated,
        };
    }

    let text = String::from_utf8_lossy(content);
    let flag = if SQL_INJECTION.is_match(&text) {
        Some("sql_injection")
    } else if XSS.is_match(&text) {
        Some("xss")
    } else if COMMAND_INJECTION.is_match(&text) {
        Some("command_injection")
    } else if PATH_TRAVERSAL.is_match(&text) {
        Some("path_traversal")
    } else {
        None
    };

    match flag {
        Some(flag) => ContentScan::Flagged {
            flag: flag.into(),
            redacted: redact_text(&text).into_bytes(),
        },
        None => ContentScan::Clean,
    }
}

/// Apply the content scan to a raw result before it is cached. Flagged
/// content is replaced with its redacted form, the security flag is set,
/// and the content hash is recomputed over the stored bytes.
pub fn sanitize_result(mut result: crate::types::RawResult) -> crate::types::RawResult {
    if let ContentScan::Flagged { flag, redacted } = scan_content(&result.content) {
        warn!(url = %result.url, %flag, "raw result content redacted");
        result.content = redacted;
        result.content_hash = crate::types::content_hash(&result.content);
        result.security_flag = Some(flag);
    }
    result
}

/// Strip raw SSN / card numbers and neutralize script fragments before a
/// string is cached or logged.
pub fn redact_text(text: &str) -> String {
    let step = SENSITIVE_SSN.replace_all(text, "[redacted-ssn]");
    let step = SENSITIVE_CARD.replace_all(&step, "[redacted-card]");
    let step = XSS.replace_all(&step, "[redacted-markup]");
    SQL_INJECTION.replace_all(&step, "[redacted-sql]").into_owned()
}
