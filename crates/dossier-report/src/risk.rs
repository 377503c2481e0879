use serde::{Deserialize, Serialize};
use std::fmt;

/// Signals distilled from resolved entities, raw results, and the graph;
/// the only inputs the risk scorer sees, which keeps it a pure function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskSignals {
    pub emails_exposed: usize,
    pub phones_exposed: usize,
    pub addresses_exposed: usize,
    pub professional_attributes: usize,
    pub identity_attributes: usize,
    pub behavioral_items: usize,
    pub network_size: usize,

    pub breach_count: usize,
    pub recent_breach_count: usize,
    pub weak_password_hints: usize,
    pub missing_2fa_hints: usize,
    pub vulnerability_findings: usize,

    pub dob_exposed: bool,
    pub address_exposed: bool,
    pub financial_data_exposed: bool,
    pub credentials_exposed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            RiskLevel::Critical
        } else if score >= 50.0 {
            RiskLevel::High
        } else if score >= 30.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScores {
    pub privacy_exposure: f64,
    pub security_risk: f64,
    pub identity_theft_risk: f64,
    pub misc: f64,
    pub overall: f64,
    pub level: RiskLevel,
}

fn saturate(score: f64) -> f64 {
    score.min(100.0)
}

/// Privacy exposure: weighted count of exposed attribute classes
/// (contact 30%, professional 25%, identity 20%, behavioral 15%,
/// network 10%), each class saturating at 100.
pub fn privacy_exposure_score(signals: &RiskSignals) -> f64 {
    let contact = saturate(
        signals.emails_exposed as f64 * 10.0
            + signals.phones_exposed as f64 * 15.0
            + signals.addresses_exposed as f64 * 20.0,
    );
    let professional = saturate(signals.professional_attributes as f64 * 20.0);
    let identity = saturate(
        signals.identity_attributes as f64 * 25.0 + if signals.dob_exposed { 25.0 } else { 0.0 },
    );
    let behavioral = saturate(signals.behavioral_items as f64 * 2.0);
    let network = saturate(signals.network_size as f64 * 5.0);

    saturate(
        contact * 0.30
            + professional * 0.25
            + identity * 0.20
            + behavioral * 0.15
            + network * 0.10,
    )
}

/// Security risk: breach exposure (count with a recency kicker), account
/// security signals, and vulnerability exposure from infra sources.
pub fn security_risk_score(signals: &RiskSignals) -> f64 {
    let breach = saturate(
        signals.breach_count as f64 * 15.0 + signals.recent_breach_count as f64 * 20.0,
    );
    let account = saturate(
        signals.weak_password_hints as f64 * 25.0 + signals.missing_2fa_hints as f64 * 15.0,
    );
    let vulnerability = saturate(signals.vulnerability_findings as f64 * 20.0);

    saturate(breach * 0.45 + account * 0.35 + vulnerability * 0.20)
}

/// Identity-theft risk: PII availability, address data, financial-data
/// flags, credential availability.
pub fn identity_theft_score(signals: &RiskSignals) -> f64 {
    let pii = saturate(
        if signals.dob_exposed { 40.0 } else { 0.0 }
            + signals.identity_attributes as f64 * 15.0,
    );
    let address = if signals.address_exposed { 70.0 } else { 0.0 };
    let financial = if signals.financial_data_exposed { 90.0 } else { 0.0 };
    let credentials = saturate(
        if signals.credentials_exposed { 60.0 } else { 0.0 }
            + signals.breach_count.min(4) as f64 * 10.0,
    );

    saturate(pii * 0.40 + address * 0.25 + financial * 0.20 + credentials * 0.15)
}

/// Network-derived residual exposure: how large and dense the subject's
/// discovered network is.
pub fn misc_score(signals: &RiskSignals) -> f64 {
    saturate(signals.network_size as f64 * 4.0 + signals.behavioral_items as f64)
}

/// Overall = 0.35 privacy + 0.30 security + 0.20 identity + 0.15 misc.
pub fn score_risk(signals: &RiskSignals) -> RiskScores {
    let privacy_exposure = privacy_exposure_score(signals);
    let security_risk = security_risk_score(signals);
    let identity_theft_risk = identity_theft_score(signals);
    let misc = misc_score(signals);

    let overall = privacy_exposure * 0.35
        + security_risk * 0.30
        + identity_theft_risk * 0.20
        + misc * 0.15;

    RiskScores {
        privacy_exposure,
        security_risk,
        identity_theft_risk,
        misc,
        overall,
        level: RiskLevel::from_score(overall),
    }
}
