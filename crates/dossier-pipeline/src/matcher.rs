use crate::text::{jaro_winkler, levenshtein_ratio, token_jaccard};
use dossier_core::{AttributeKey, NormalizedEntity};
use serde::Serialize;

/// Relative weights of the match fields; renormalized over the fields
/// actually present on both records.
#[derive(Debug, Clone)]
pub struct MatchWeights {
    pub name: f64,
    pub email: f64,
    pub phone: f64,
    pub username: f64,
    pub biographical: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            name: 0.25,
            email: 0.25,
            phone: 0.15,
            username: 0.15,
            biographical: 0.20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldScore {
    pub field: &'static str,
    pub algorithm: &'static str,
    /// Raw per-field score in [0, 100].
    pub score: f64,
    pub weight: f64,
    /// Weighted contribution to the overall score.
    pub contribution: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchResult {
    /// Overall weighted score in [0, 100].
    pub score: f64,
    pub fields: Vec<FieldScore>,
}

impl MatchResult {
    pub fn reasoning(&self) -> String {
        self.fields
            .iter()
            .map(|f| format!("{}: {:.0} via {} ({})", f.field, f.score, f.algorithm, f.reasoning))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Weighted multi-signal similarity between two normalized entities, with
/// a per-field breakdown naming the algorithm that produced each score.
pub struct FuzzyMatcher {
    weights: MatchWeights,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(MatchWeights::default())
    }
}

impl FuzzyMatcher {
    pub fn new(weights: MatchWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, a: &NormalizedEntity, b: &NormalizedEntity) -> MatchResult {
        let mut fields = Vec::new();

        if let Some(field) = self.name_score(a, b) {
            fields.push(field);
        }
        if let Some(field) = self.email_score(a, b) {
            fields.push(field);
        }
        if let Some(field) = self.phone_score(a, b) {
            fields.push(field);
        }
        if let Some(field) = self.username_score(a, b) {
            fields.push(field);
        }
        if let Some(field) = self.biographical_score(a, b) {
            fields.push(field);
        }

        let total_weight: f64 = fields.iter().map(|f| f.weight).sum();
        let score = if total_weight > 0.0 {
            fields
                .iter()
                .map(|f| f.score * f.weight)
                .sum::<f64>()
                / total_weight
        } else {
            0.0
        };

        for field in &mut fields {
            field.contribution = if total_weight > 0.0 {
                field.score * field.weight / total_weight
            } else {
                0.0
            };
        }

        MatchResult { score, fields }
    }

    /// Max over token-set Jaccard, ordered-token edit distance,
    /// Jaro-Winkler, and phonetic-code match.
    fn name_score(&self, a: &NormalizedEntity, b: &NormalizedEntity) -> Option<FieldScore> {
        let tokens_a = &a.canonical.name_tokens;
        let tokens_b = &b.canonical.name_tokens;
        if tokens_a.is_empty() || tokens_b.is_empty() {
            return None;
        }

        let jaccard = token_jaccard(tokens_a, tokens_b) * 100.0;
        let joined_a = tokens_a.join(" ");
        let joined_b = tokens_b.join(" ");
        let edit = levenshtein_ratio(&joined_a, &joined_b) * 100.0;
        let jw = jaro_winkler(&joined_a, &joined_b) * 100.0;
        let phonetic = {
            let overlap = a
                .canonical
                .name_soundex
                .iter()
                .filter(|code| b.canonical.name_soundex.contains(code))
                .count();
            let denom = tokens_a.len().min(tokens_b.len());
            if denom > 0 && overlap >= denom {
                85.0
            } else {
                0.0
            }
        };

        let (score, algorithm): (f64, &'static str) = [
            (jaccard, "token_jaccard"),
            (edit, "levenshtein"),
            (jw, "jaro_winkler"),
            (phonetic, "soundex"),
        ]
        .into_iter()
        .max_by(|x, y| x.0.partial_cmp(&y.0).unwrap_or(std::cmp::Ordering::Equal))
        .expect("non-empty");

        Some(FieldScore {
            field: "name",
            algorithm,
            score,
            weight: self.weights.name,
            contribution: 0.0,
            reasoning: format!("'{}' vs '{}'", joined_a, joined_b),
        })
    }

    fn email_score(&self, a: &NormalizedEntity, b: &NormalizedEntity) -> Option<FieldScore> {
        let key_a = a.canonical.email_deliverable_key.as_deref()?;
        let key_b = b.canonical.email_deliverable_key.as_deref()?;
        let email_a = a.canonical.normalized_email.as_deref()?;
        let email_b = b.canonical.normalized_email.as_deref()?;

        let (score, algorithm, reasoning) = if key_a == key_b {
            (100.0, "exact", "deliverable keys match".to_string())
        } else {
            let (local_a, domain_a) = email_a.split_once('@')?;
            let (local_b, domain_b) = email_b.split_once('@')?;
            if local_a == local_b && domain_a != domain_b {
                (
                    90.0,
                    "alias",
                    format!("same local part across {} and {}", domain_a, domain_b),
                )
            } else if domain_a == domain_b {
                let jw = jaro_winkler(local_a, local_b) * 100.0;
                (jw, "jaro_winkler", "same domain, similar local".to_string())
            } else {
                (0.0, "exact", "different addresses".to_string())
            }
        };

        Some(FieldScore {
            field: "email",
            algorithm,
            score,
            weight: self.weights.email,
            contribution: 0.0,
            reasoning,
        })
    }

    fn phone_score(&self, a: &NormalizedEntity, b: &NormalizedEntity) -> Option<FieldScore> {
        let has_any = |e: &NormalizedEntity| {
            e.canonical.e164_phone.is_some() || e.canonical.phone_last7.is_some()
        };
        if !has_any(a) || !has_any(b) {
            return None;
        }

        let (score, algorithm, reasoning) = match (
            a.canonical.e164_phone.as_deref(),
            b.canonical.e164_phone.as_deref(),
        ) {
            (Some(pa), Some(pb)) if pa == pb => {
                (100.0, "exact", "E.164 numbers match".to_string())
            }
            _ => match (
                a.canonical.phone_last7.as_deref(),
                b.canonical.phone_last7.as_deref(),
            ) {
                (Some(la), Some(lb)) if la == lb => {
                    (80.0, "last7", "local numbers match".to_string())
                }
                _ => {
                    let digits_a: String = a
                        .canonical
                        .e164_phone
                        .as_deref()
                        .or(a.canonical.phone_last7.as_deref())
                        .unwrap_or_default()
                        .chars()
                        .filter(|c| c.is_ascii_digit())
                        .collect();
                    let digits_b: String = b
                        .canonical
                        .e164_phone
                        .as_deref()
                        .or(b.canonical.phone_last7.as_deref())
                        .unwrap_or_default()
                        .chars()
                        .filter(|c| c.is_ascii_digit())
                        .collect();
                    (
                        jaro_winkler(&digits_a, &digits_b) * 100.0,
                        "jaro_winkler",
                        "digit-string similarity".to_string(),
                    )
                }
            },
        };

        Some(FieldScore {
            field: "phone",
            algorithm,
            score,
            weight: self.weights.phone,
            contribution: 0.0,
            reasoning,
        })
    }

    fn username_score(&self, a: &NormalizedEntity, b: &NormalizedEntity) -> Option<FieldScore> {
        let user_a = a.canonical.canonical_username.as_deref()?;
        let user_b = b.canonical.canonical_username.as_deref()?;

        let (score, algorithm, reasoning) = if user_a == user_b {
            (100.0, "exact", "canonical usernames match".to_string())
        } else if a
            .canonical
            .username_variants
            .intersection(&b.canonical.username_variants)
            .next()
            .is_some()
        {
            (90.0, "variant", "shared username variant".to_string())
        } else {
            (
                levenshtein_ratio(user_a, user_b) * 100.0,
                "levenshtein",
                format!("'{}' vs '{}'", user_a, user_b),
            )
        };

        Some(FieldScore {
            field: "username",
            algorithm,
            score,
            weight: self.weights.username,
            contribution: 0.0,
            reasoning,
        })
    }

    /// Linear combination of matching hints: DOB year within one is worth
    /// 70, a city match 60, employer token overlap up to 80.
    fn biographical_score(&self, a: &NormalizedEntity, b: &NormalizedEntity) -> Option<FieldScore> {
        let mut signals: Vec<(f64, String)> = Vec::new();

        let year = |e: &NormalizedEntity| {
            e.candidate
                .attributes
                .get(&AttributeKey::BirthYear)
                .and_then(|v| v.as_integer())
        };
        if let (Some(ya), Some(yb)) = (year(a), year(b)) {
            let score = if (ya - yb).abs() <= 1 { 70.0 } else { 0.0 };
            signals.push((score, format!("birth years {} / {}", ya, yb)));
        }

        if let (Some(ca), Some(cb)) = (a.canonical.city.as_deref(), b.canonical.city.as_deref()) {
            let score = if ca == cb { 60.0 } else { 0.0 };
            signals.push((score, format!("cities {} / {}", ca, cb)));
        }

        let employer = |e: &NormalizedEntity| {
            e.candidate
                .attributes
                .get(&AttributeKey::Employer)
                .and_then(|v| v.as_text())
                .map(crate::text::tokenize_name)
        };
        if let (Some(ea), Some(eb)) = (employer(a), employer(b)) {
            let overlap = token_jaccard(&ea, &eb);
            signals.push((overlap * 80.0, "employer token overlap".to_string()));
        }

        if signals.is_empty() {
            return None;
        }

        let score = signals.iter().map(|(s, _)| s).sum::<f64>() / signals.len() as f64;
        let reasoning = signals
            .iter()
            .map(|(s, r)| format!("{} ({:.0})", r, s))
            .collect::<Vec<_>>()
            .join(", ");

        Some(FieldScore {
            field: "biographical",
            algorithm: "linear",
            score,
            weight: self.weights.biographical,
            contribution: 0.0,
            reasoning,
        })
    }
}
