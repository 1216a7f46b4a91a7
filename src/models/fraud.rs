use super::round_score;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Score at or above which risk becomes medium.
pub const MEDIUM_RISK_THRESHOLD: f64 = 40.0;
/// Score at or above which checkout requires verification.
pub const HIGH_RISK_THRESHOLD: f64 = 70.0;
/// Score at or above which checkout is blocked.
pub const VERY_HIGH_RISK_THRESHOLD: f64 = 90.0;
/// Score reported when the assessor could not produce a result.
pub const FAIL_SAFE_SCORE: f64 = 70.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= VERY_HIGH_RISK_THRESHOLD {
            RiskLevel::VeryHigh
        } else if score >= HIGH_RISK_THRESHOLD {
            RiskLevel::High
        } else if score >= MEDIUM_RISK_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very_high",
        }
    }
}

/// Gating decision derived from the risk level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FraudAction {
    Allow,
    /// Checkout is redirected to manual review
    RequireVerification,
    /// Terminal; the payment cannot proceed
    Block,
}

impl FraudAction {
    pub fn for_level(level: RiskLevel) -> Self {
        match level {
            RiskLevel::Low | RiskLevel::Medium => FraudAction::Allow,
            RiskLevel::High => FraudAction::RequireVerification,
            RiskLevel::VeryHigh => FraudAction::Block,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FraudAction::Allow => "allow",
            FraudAction::RequireVerification => "require_verification",
            FraudAction::Block => "block",
        }
    }
}

/// Account signals supplied by the client. Missing fields are treated as a
/// new, unverified buyer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct UserHistory {
    pub account_age_days: Option<u32>,
    pub previous_orders: Option<u32>,
    pub average_order_value: Option<Decimal>,
    pub chargebacks: Option<u32>,
    pub failed_payments_24h: Option<u32>,
    pub orders_last_24h: Option<u32>,
    pub new_device: Option<bool>,
    pub verified_identity: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FraudAssessment {
    /// 0-100
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub action: FraudAction,
    pub risk_factors: Vec<String>,
    pub country_risk: f64,
    /// False for low risk; the client renders no risk card
    pub visible: bool,
    pub ai_insights: Vec<String>,
}

impl FraudAssessment {
    /// Builds an assessment whose level, action and visibility follow the
    /// fixed gating thresholds.
    pub fn from_score(
        score: f64,
        country_risk: f64,
        risk_factors: Vec<String>,
        ai_insights: Vec<String>,
    ) -> Self {
        let risk_score = round_score(score);
        let risk_level = RiskLevel::from_score(risk_score);
        Self {
            risk_score,
            risk_level,
            action: FraudAction::for_level(risk_level),
            risk_factors,
            country_risk: round_score(country_risk),
            visible: risk_level != RiskLevel::Low,
            ai_insights,
        }
    }

    /// Assessment used when the assessor failed or ran out of time.
    pub fn fail_safe(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::from_score(
            FAIL_SAFE_SCORE,
            0.0,
            vec!["assessment_unavailable".to_string()],
            vec![format!(
                "Fraud assessment unavailable ({reason}); manual verification required"
            )],
        )
    }
}
