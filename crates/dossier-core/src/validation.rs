use crate::error::{DossierError, Result};
use crate::investigation::SeedInput;
use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email pattern")
});
static E164: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9]\d{6,14}$").expect("e164 pattern"));
static DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$")
        .expect("domain pattern")
});

/// Terms in seed input that indicate sensitive-attribute targeting; these
/// are rejected outright rather than filtered.
static SENSITIVE_TERMS: &[&str] = &[
    "ssn",
    "social security",
    "medical record",
    "diagnosis",
    "religion",
    "bank account",
    "credit card",
    "passport number",
];

pub const MAX_USERNAMES: usize = 20;
pub const MAX_EMAILS: usize = 10;
pub const MAX_PHONES: usize = 5;
pub const MAX_DOMAINS: usize = 10;

pub fn validate_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

pub fn validate_e164(phone: &str) -> bool {
    E164.is_match(phone)
}

pub fn validate_domain(domain: &str) -> bool {
    DOMAIN.is_match(domain.trim_end_matches('.'))
}

/// Validate a seed input per the submission contract. Every failure is a
/// `Validation` error naming the offending field.
pub fn validate_seed(seed: &SeedInput) -> Result<()> {
    let subject = &seed.subject_identifiers;

    if subject.full_name.trim().is_empty() {
        return Err(DossierError::Validation("full_name is required".into()));
    }
    if subject.full_name.len() > 256 {
        return Err(DossierError::Validation("full_name too long".into()));
    }

    if subject.usernames.len() > MAX_USERNAMES {
        return Err(DossierError::Validation(format!(
            "at most {} usernames",
            MAX_USERNAMES
        )));
    }
    if subject.emails.len() > MAX_EMAILS {
        return Err(DossierError::Validation(format!(
            "at most {} emails",
            MAX_EMAILS
        )));
    }
    if subject.phone_numbers.len() > MAX_PHONES {
        return Err(DossierError::Validation(format!(
            "at most {} phone numbers",
            MAX_PHONES
        )));
    }
    if subject.known_domains.len() > MAX_DOMAINS {
        return Err(DossierError::Validation(format!(
            "at most {} known domains",
            MAX_DOMAINS
        )));
    }

    for email in &subject.emails {
        if !validate_email(email) {
            return Err(DossierError::Validation(format!(
                "invalid email: {}",
                email
            )));
        }
    }
    for phone in &subject.phone_numbers {
        if !validate_e164(phone) {
            return Err(DossierError::Validation(format!(
                "phone must be E.164: {}",
                phone
            )));
        }
    }
    for domain in &subject.known_domains {
        if !validate_domain(domain) {
            return Err(DossierError::Validation(format!(
                "invalid domain: {}",
                domain
            )));
        }
    }

    if let Some(country) = &subject.geographic_hints.country {
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DossierError::Validation(
                "geographic_hints.country must be ISO 3166-1 alpha-2".into(),
            ));
        }
    }

    let constraints = &seed.constraints;
    if !(1..=10).contains(&constraints.max_search_depth) {
        return Err(DossierError::Validation(
            "max_search_depth must be in 1..=10".into(),
        ));
    }
    if !(1..=365).contains(&constraints.retention_days) {
        return Err(DossierError::Validation(
            "retention_days must be in 1..=365".into(),
        ));
    }
    if let Some(minutes) = constraints.max_duration_min {
        if !(1..=360).contains(&minutes) {
            return Err(DossierError::Validation(
                "max_duration_min must be in 1..=360".into(),
            ));
        }
    }

    let thresholds = &seed.thresholds;
    if !(0.0..=100.0).contains(&thresholds.minimum_entity_confidence)
        || !(0.0..=100.0).contains(&thresholds.minimum_source_confidence)
    {
        return Err(DossierError::Validation(
            "confidence thresholds must be in 0..=100".into(),
        ));
    }

    reject_sensitive_terms(seed)
}

/// Sensitive-attribute and minor targeting is a non-goal; seed inputs that
/// ask for it are rejected at the door.
fn reject_sensitive_terms(seed: &SeedInput) -> Result<()> {
    let subject = &seed.subject_identifiers;
    let haystacks: Vec<&str> = std::iter::once(subject.full_name.as_str())
        .chain(subject.usernames.iter().map(String::as_str))
        .chain(
            subject
                .professional_hints
                .employer
                .iter()
                .chain(subject.professional_hints.industry.iter())
                .chain(subject.professional_hints.title.iter())
                .map(String::as_str),
        )
        .collect();

    for haystack in haystacks {
        let lower = haystack.to_lowercase();
        for term in SENSITIVE_TERMS {
            if lower.contains(term) {
                return Err(DossierError::SecurityRejected(format!(
                    "seed contains sensitive-attribute term: {}",
                    term
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigation::SeedInput;

    #[test]
    fn test_minimal_valid_seed() {
        let seed = SeedInput::new("Alice Roe");
        assert!(validate_seed(&seed).is_ok());
    }

    #[test]
    fn test_missing_full_name() {
        let seed = SeedInput::new("  ");
        assert!(matches!(
            validate_seed(&seed),
            Err(DossierError::Validation(_))
        ));
    }

    #[test]
    fn test_bad_email_rejected() {
        let mut seed = SeedInput::new("Alice Roe");
        seed.subject_identifiers.emails.push("not-an-email".into());
        assert!(validate_seed(&seed).is_err());
        seed.subject_identifiers.emails.clear();
        seed.subject_identifiers
            .emails
            .push("alice@example.com".into());
        assert!(validate_seed(&seed).is_ok());
    }

    #[test]
    fn test_phone_must_be_e164() {
        let mut seed = SeedInput::new("Alice Roe");
        seed.subject_identifiers
            .phone_numbers
            .push("555-123-4567".into());
        assert!(validate_seed(&seed).is_err());
        seed.subject_identifiers.phone_numbers.clear();
        seed.subject_identifiers
            .phone_numbers
            .push("+15551234567".into());
        assert!(validate_seed(&seed).is_ok());
    }

    #[test]
    fn test_depth_and_retention_ranges() {
        let mut seed = SeedInput::new("Alice Roe");
        seed.constraints.max_search_depth = 0;
        assert!(validate_seed(&seed).is_err());
        seed.constraints.max_search_depth = 11;
        assert!(validate_seed(&seed).is_err());
        seed.constraints.max_search_depth = 10;
        seed.constraints.retention_days = 366;
        assert!(validate_seed(&seed).is_err());
        seed.constraints.retention_days = 365;
        assert!(validate_seed(&seed).is_ok());
    }

    #[test]
    fn test_sensitive_terms_rejected() {
        let mut seed = SeedInput::new("Alice Roe");
        seed.subject_identifiers
            .usernames
            .push("find_ssn_records".into());
        assert!(matches!(
            validate_seed(&seed),
            Err(DossierError::SecurityRejected(_))
        ));
    }

    #[test]
    fn test_list_caps() {
        let mut seed = SeedInput::new("Alice Roe");
        seed.subject_identifiers.usernames = (0..21).map(|i| format!("user{}", i)).collect();
        assert!(validate_seed(&seed).is_err());
    }
}
