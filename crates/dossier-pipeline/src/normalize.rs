use crate::text::{metaphone, soundex, tokenize_name};
use dossier_core::{
    AttributeKey, CanonicalForms, EntityCandidate, EntityType, GeographicHints, NormalizedEntity,
};
use std::collections::BTreeSet;

/// Providers whose local parts ignore dots.
const DOT_INSENSITIVE_PROVIDERS: &[&str] = &["gmail.com"];

/// Domain aliases mapped to their canonical provider.
const DOMAIN_ALIASES: &[(&str, &str)] = &[
    ("googlemail.com", "gmail.com"),
    ("hotmail.com", "outlook.com"),
    ("live.com", "outlook.com"),
    ("msn.com", "outlook.com"),
];

/// Country calling codes for E.164 derivation from national numbers.
const CALLING_CODES: &[(&str, &str, usize)] = &[
    // (country-2, calling code, national significant digits)
    ("US", "1", 10),
    ("CA", "1", 10),
    ("GB", "44", 10),
    ("DE", "49", 10),
    ("FR", "33", 9),
    ("AU", "61", 9),
    ("IN", "91", 10),
    ("NL", "31", 9),
    ("SE", "46", 9),
];

/// Country display names to ISO 3166-1 alpha-2.
const COUNTRY_NAMES: &[(&str, &str)] = &[
    ("united states", "US"),
    ("usa", "US"),
    ("united kingdom", "GB"),
    ("great britain", "GB"),
    ("germany", "DE"),
    ("france", "FR"),
    ("canada", "CA"),
    ("australia", "AU"),
    ("india", "IN"),
    ("netherlands", "NL"),
    ("sweden", "SE"),
];

/// Canonicalizes candidate attributes and computes the quality score.
/// Normalization is idempotent: canonical forms are pure functions of the
/// candidate's raw attributes.
pub struct Normalizer {
    hints: GeographicHints,
}

impl Normalizer {
    pub fn new(hints: GeographicHints) -> Self {
        Self { hints }
    }

    pub fn normalize(&self, candidate: EntityCandidate, source_confidence: f64) -> NormalizedEntity {
        let mut canonical = CanonicalForms::default();

        if let Some(email) = attr_text(&candidate, AttributeKey::Email) {
            let normalized = normalize_email(email);
            canonical.email_deliverable_key = Some(deliverable_key(&normalized));
            canonical.normalized_email = Some(normalized);
        }

        if let Some(phone) = attr_text(&candidate, AttributeKey::Phone) {
            let e164 = self.normalize_phone(phone);
            if let Some(ref e164) = e164 {
                let digits: String = e164.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() >= 7 {
                    canonical.phone_last7 = Some(digits[digits.len() - 7..].to_string());
                }
            } else {
                let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() >= 7 {
                    canonical.phone_last7 = Some(digits[digits.len() - 7..].to_string());
                }
            }
            canonical.e164_phone = e164;
        }

        if let Some(username) = attr_text(&candidate, AttributeKey::Username) {
            let canonical_username = canonicalize_username(username);
            canonical.username_variants = username_variants(username);
            canonical.canonical_username = Some(canonical_username);
        }

        if let Some(name) = attr_text(&candidate, AttributeKey::FullName)
            .or_else(|| attr_text(&candidate, AttributeKey::DisplayName))
            .or_else(|| attr_text(&candidate, AttributeKey::Organization))
        {
            let mut tokens = tokenize_name(name);
            tokens.sort();
            canonical.name_soundex = tokens.iter().map(|t| soundex(t)).collect();
            canonical.name_metaphone = tokens.iter().map(|t| metaphone(t)).collect();
            canonical.name_tokens = tokens;
        }

        if let Some(domain) = attr_text(&candidate, AttributeKey::Domain) {
            canonical.normalized_domain = Some(normalize_domain(domain));
        }

        canonical.country = attr_text(&candidate, AttributeKey::Country)
            .map(normalize_country)
            .or_else(|| self.hints.country.clone());
        canonical.region = attr_text(&candidate, AttributeKey::Region).map(|r| r.to_lowercase());
        canonical.city = attr_text(&candidate, AttributeKey::City).map(|c| c.to_lowercase());

        let quality_score = self.quality_score(&candidate, &canonical, source_confidence);

        NormalizedEntity {
            candidate,
            canonical,
            source_confidence,
            quality_score,
        }
    }

    /// National numbers pick up the calling code of the geographic hint
    /// country; already-international input is validated and kept.
    fn normalize_phone(&self, raw: &str) -> Option<String> {
        let has_plus = raw.trim_start().starts_with('+');
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() || digits.len() > 15 {
            return None;
        }

        if has_plus {
            if digits.len() >= 7 && !digits.starts_with('0') {
                return Some(format!("+{}", digits));
            }
            return None;
        }

        let country = self.hints.country.as_deref().unwrap_or("US");
        let (_, code, national_len) = CALLING_CODES
            .iter()
            .find(|(cc, _, _)| cc.eq_ignore_ascii_case(country))?;

        // already carrying the country code without the plus
        if digits.starts_with(code) && digits.len() == code.len() + national_len {
            return Some(format!("+{}", digits));
        }
        let national = digits.trim_start_matches('0');
        if national.len() == *national_len {
            return Some(format!("+{}{}", code, national));
        }
        None
    }

    /// completeness x internal consistency x source confidence.
    fn quality_score(
        &self,
        candidate: &EntityCandidate,
        canonical: &CanonicalForms,
        source_confidence: f64,
    ) -> f64 {
        let expected: &[AttributeKey] = match candidate.entity_type {
            EntityType::Person => &[
                AttributeKey::FullName,
                AttributeKey::Email,
                AttributeKey::Username,
                AttributeKey::City,
                AttributeKey::Employer,
            ],
            EntityType::Email => &[AttributeKey::Email],
            EntityType::Phone => &[AttributeKey::Phone],
            EntityType::Username | EntityType::SocialProfile => {
                &[AttributeKey::Username, AttributeKey::Url]
            }
            EntityType::Domain => &[AttributeKey::Domain],
            EntityType::Organization => &[AttributeKey::Organization, AttributeKey::Domain],
            _ => &[AttributeKey::FullName],
        };
        let present = expected
            .iter()
            .filter(|k| candidate.attributes.contains_key(k))
            .count();
        let mut completeness = present as f64 / expected.len() as f64;
        // wide profiles are not punished for having one solid attribute
        if present > 0 && expected.len() > 2 {
            completeness = completeness.max(0.4);
        }

        let mut consistency: f64 = 1.0;
        if let (Some(e164), Some(hint_country)) =
            (&canonical.e164_phone, self.hints.country.as_deref())
        {
            if let Some((_, code, _)) = CALLING_CODES
                .iter()
                .find(|(cc, _, _)| cc.eq_ignore_ascii_case(hint_country))
            {
                if !e164[1..].starts_with(code) {
                    consistency *= 0.7;
                }
            }
        }
        if canonical.e164_phone.is_none() && canonical.phone_last7.is_some() {
            // unparseable phone lowers quality
            consistency *= 0.8;
        }

        (completeness * consistency * source_confidence).clamp(0.0, 1.0)
    }
}

fn attr_text(candidate: &EntityCandidate, key: AttributeKey) -> Option<&str> {
    candidate.attributes.get(&key).and_then(|v| v.as_text())
}

pub fn normalize_email(email: &str) -> String {
    let email = email.trim().to_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return email;
    };
    let domain = DOMAIN_ALIASES
        .iter()
        .find(|(alias, _)| *alias == domain)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(domain);
    format!("{}@{}", local, domain)
}

/// The address that mail actually reaches: plus-tags stripped, dots
/// stripped for dot-insensitive providers, aliases collapsed.
pub fn deliverable_key(normalized_email: &str) -> String {
    let Some((local, domain)) = normalized_email.split_once('@') else {
        return normalized_email.to_string();
    };
    let local = local.split('+').next().unwrap_or(local);
    let local = if DOT_INSENSITIVE_PROVIDERS.contains(&domain) {
        local.replace('.', "")
    } else {
        local.to_string()
    };
    format!("{}@{}", local, domain)
}

pub fn canonicalize_username(username: &str) -> String {
    username
        .trim()
        .trim_start_matches('@')
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Variants a person commonly registers across platforms.
pub fn username_variants(username: &str) -> BTreeSet<String> {
    let base = username.trim().trim_start_matches('@').to_lowercase();
    let mut variants = BTreeSet::from([base.clone()]);

    for sep in ['.', '_', '-'] {
        variants.insert(base.replace(sep, ""));
    }
    let parts: Vec<&str> = base
        .split(|c: char| matches!(c, '.' | '_' | '-'))
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() > 1 {
        variants.insert(parts.join(""));
        variants.insert(parts.join("_"));
        variants.insert(parts.join("-"));
        variants.insert(parts.join("."));
    }
    if parts.len() == 2 {
        let (first, last) = (parts[0], parts[1]);
        if let Some(initial) = first.chars().next() {
            variants.insert(format!("{}{}", initial, last));
        }
        if let Some(initial) = last.chars().next() {
            variants.insert(format!("{}{}", first, initial));
        }
    }
    variants
}

pub fn normalize_domain(domain: &str) -> String {
    let lower = domain.trim().to_lowercase();
    let stripped = lower.trim_end_matches('.');
    stripped.strip_prefix("www.").unwrap_or(stripped).to_string()
}

pub fn normalize_country(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return trimmed.to_uppercase();
    }
    COUNTRY_NAMES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(trimmed))
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| trimmed.to_uppercase())
}
