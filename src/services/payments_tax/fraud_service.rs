use super::validation::{validate_country_format, validate_positive_amount};
use crate::config::FraudWeights;
use crate::errors::ServiceError;
use crate::models::{round_score, FraudAssessment, RiskLevel, UserHistory};
use async_trait::async_trait;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Risk assigned to countries missing from the table.
pub const DEFAULT_COUNTRY_RISK: f64 = 40.0;
const NEW_ACCOUNT_DAYS: u32 = 30;
const VELOCITY_ORDERS_24H: u32 = 5;
const FAILED_PAYMENTS_24H: u32 = 3;

/// Scores the fraud risk of a checkout against one candidate method.
#[async_trait]
pub trait FraudRiskAssessor: Send + Sync {
    async fn assess(
        &self,
        country: &str,
        amount: Decimal,
        method_type: &str,
        history: Option<&UserHistory>,
    ) -> Result<FraudAssessment, ServiceError>;
}

fn reference_country_risk() -> HashMap<&'static str, f64> {
    let tiers: [(&[&'static str], f64); 5] = [
        (
            &[
                "AT", "BE", "CH", "DE", "DK", "FI", "IE", "JP", "LU", "NL", "NO", "NZ", "SE",
                "SG",
            ],
            10.0,
        ),
        (
            &["AU", "CA", "ES", "FR", "GB", "IT", "KR", "PL", "PT", "US"],
            15.0,
        ),
        (&["AE", "BR", "CN", "IN", "MX", "TR", "ZA"], 25.0),
        (&["ID", "PH", "RU", "UA", "VN"], 35.0),
        (&["GH", "KE", "NG", "PK"], 50.0),
    ];

    tiers
        .iter()
        .flat_map(|(countries, risk)| countries.iter().map(move |c| (*c, *risk)))
        .collect()
}

/// Heuristic assessor with configurable signal weights.
#[derive(Clone)]
pub struct FraudService {
    weights: FraudWeights,
    country_risk: Arc<HashMap<&'static str, f64>>,
}

impl FraudService {
    pub fn new(weights: FraudWeights) -> Self {
        Self {
            weights,
            country_risk: Arc::new(reference_country_risk()),
        }
    }

    pub fn country_risk(&self, country: &str) -> f64 {
        self.country_risk
            .get(country)
            .copied()
            .unwrap_or(DEFAULT_COUNTRY_RISK)
    }

    fn baseline(&self, history: Option<&UserHistory>) -> Decimal {
        history
            .and_then(|h| h.average_order_value)
            .filter(|aov| *aov > Decimal::ZERO)
            .or_else(|| Decimal::from_f64(self.weights.baseline_amount))
            .unwrap_or(Decimal::ONE_HUNDRED)
    }

    fn amount_points(ratio: f64) -> f64 {
        if ratio <= 1.0 {
            0.0
        } else if ratio <= 3.0 {
            10.0
        } else if ratio <= 10.0 {
            20.0
        } else {
            30.0
        }
    }

    fn history_points(&self, history: Option<&UserHistory>, factors: &mut Vec<String>) -> f64 {
        let w = &self.weights;
        let empty = UserHistory::default();
        let h = history.unwrap_or(&empty);
        let mut points = 0.0;

        if h.account_age_days.map_or(true, |days| days < NEW_ACCOUNT_DAYS) {
            points += w.new_account;
            factors.push("new_account".to_string());
        }
        if h.new_device == Some(true) {
            points += w.new_device;
            factors.push("new_device".to_string());
        }
        if h.orders_last_24h.unwrap_or(0) >= VELOCITY_ORDERS_24H {
            points += w.velocity;
            factors.push("high_velocity".to_string());
        }
        let chargebacks = h.chargebacks.unwrap_or(0);
        if chargebacks > 0 {
            points += (f64::from(chargebacks) * w.per_chargeback).min(w.chargeback_cap);
            factors.push("prior_chargebacks".to_string());
        }
        if h.failed_payments_24h.unwrap_or(0) >= FAILED_PAYMENTS_24H {
            points += w.failed_payments;
            factors.push("repeated_payment_failures".to_string());
        }
        if h.verified_identity == Some(true) {
            points -= w.verified_identity_credit;
        }
        points
    }

    pub fn score(
        &self,
        country: &str,
        amount: Decimal,
        method_type: &str,
        history: Option<&UserHistory>,
    ) -> (f64, f64, Vec<String>) {
        let mut factors = Vec::new();

        let country_risk = self.country_risk(country);
        if country_risk >= 35.0 {
            factors.push("high_risk_country".to_string());
        }

        let baseline = self.baseline(history);
        // An unrepresentable ratio is as far above baseline as it gets
        let ratio = amount
            .checked_div(baseline)
            .and_then(|ratio| ratio.to_f64())
            .unwrap_or(f64::MAX);
        let amount_points = Self::amount_points(ratio);
        if amount_points >= 20.0 {
            factors.push("amount_far_above_baseline".to_string());
        } else if amount_points > 0.0 {
            factors.push("amount_above_baseline".to_string());
        }

        let method_points = self.weights.method_weight(method_type);
        if method_points >= self.weights.bnpl.min(self.weights.crypto) {
            factors.push("high_risk_payment_method".to_string());
        }

        let score = country_risk * self.weights.country_weight
            + amount_points
            + method_points
            + self.history_points(history, &mut factors);

        (score, country_risk, factors)
    }
}

fn insights_for(level: RiskLevel, factors: &[String]) -> Vec<String> {
    let mut insights = vec![match level {
        RiskLevel::Low => "Low risk: checkout can proceed without friction".to_string(),
        RiskLevel::Medium => "Moderate risk: proceed and monitor the order".to_string(),
        RiskLevel::High => "High risk: identity verification required before payment".to_string(),
        RiskLevel::VeryHigh => "Very high risk: payment blocked".to_string(),
    }];
    if !factors.is_empty() {
        insights.push(format!("Contributing signals: {}", factors.join(", ")));
    }
    insights
}

#[async_trait]
impl FraudRiskAssessor for FraudService {
    #[instrument(skip(self, history), fields(amount = %amount))]
    async fn assess(
        &self,
        country: &str,
        amount: Decimal,
        method_type: &str,
        history: Option<&UserHistory>,
    ) -> Result<FraudAssessment, ServiceError> {
        validate_country_format(country)?;
        validate_positive_amount("amount", amount)?;

        let (score, country_risk, factors) = self.score(country, amount, method_type, history);
        let level = RiskLevel::from_score(round_score(score));
        let insights = insights_for(level, &factors);
        let assessment = FraudAssessment::from_score(score, country_risk, factors, insights);

        if assessment.visible {
            warn!(
                country,
                risk_score = assessment.risk_score,
                action = assessment.action.as_str(),
                "elevated fraud risk"
            );
        } else {
            info!(country, risk_score = assessment.risk_score, "fraud risk assessed");
        }
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FraudAction;
    use rust_decimal_macros::dec;

    fn service() -> FraudService {
        FraudService::new(FraudWeights::default())
    }

    fn trusted() -> UserHistory {
        UserHistory {
            account_age_days: Some(720),
            previous_orders: Some(40),
            average_order_value: Some(dec!(200)),
            verified_identity: Some(true),
            ..UserHistory::default()
        }
    }

    #[tokio::test]
    async fn clean_german_card_checkout_is_low() {
        let assessment = service()
            .assess("DE", dec!(238.00), "card", None)
            .await
            .unwrap();
        // 10 * 0.3 + 10 (amount) + 10 (card) + 10 (new account)
        assert_eq!(assessment.risk_score, 33.0);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert_eq!(assessment.action, FraudAction::Allow);
        assert!(!assessment.visible);
        assert_eq!(assessment.country_risk, 10.0);
    }

    #[tokio::test]
    async fn trusted_history_lowers_score() {
        let assessment = service()
            .assess("DE", dec!(180), "wallet", Some(&trusted()))
            .await
            .unwrap();
        assert_eq!(assessment.risk_score, 0.0);
        assert!(assessment.risk_factors.is_empty());
    }

    #[tokio::test]
    async fn abusive_profile_is_blocked() {
        let history = UserHistory {
            account_age_days: Some(1),
            new_device: Some(true),
            orders_last_24h: Some(9),
            chargebacks: Some(3),
            failed_payments_24h: Some(4),
            ..UserHistory::default()
        };
        let assessment = service()
            .assess("NG", dec!(5000), "crypto", Some(&history))
            .await
            .unwrap();
        assert_eq!(assessment.risk_score, 100.0);
        assert_eq!(assessment.risk_level, RiskLevel::VeryHigh);
        assert_eq!(assessment.action, FraudAction::Block);
        assert!(assessment
            .risk_factors
            .contains(&"prior_chargebacks".to_string()));
        assert!(assessment
            .risk_factors
            .contains(&"high_risk_country".to_string()));
    }

    #[tokio::test]
    async fn unknown_country_uses_default_risk() {
        assert_eq!(service().country_risk("ZZ"), DEFAULT_COUNTRY_RISK);
    }

    #[tokio::test]
    async fn rejects_non_positive_amount() {
        assert!(service().assess("DE", dec!(0), "card", None).await.is_err());
    }

    #[tokio::test]
    async fn tiny_order_history_saturates_amount_points() {
        let history = UserHistory {
            average_order_value: Some(dec!(0.00000000001)),
            ..trusted()
        };
        let assessment = service()
            .assess("DE", dec!(1000000000000000000), "card", Some(&history))
            .await
            .unwrap();
        assert!(assessment
            .risk_factors
            .contains(&"amount_far_above_baseline".to_string()));

        let oversized = UserHistory {
            average_order_value: Some(dec!(0.0000000001)),
            ..trusted()
        };
        assert_matches::assert_matches!(
            service()
                .assess("DE", dec!(10000000000000000000000000), "card", Some(&oversized))
                .await,
            Err(ServiceError::InvalidRequest(_))
        );
    }
}
