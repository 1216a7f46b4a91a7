use crate::models::{EnhancedPaymentIntent, FraudAction, TaxCalculation};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use utoipa::ToSchema;

/// ISO 4217 code for "no currency involved".
pub const NO_CURRENCY: &str = "XXX";

#[derive(Debug, Clone)]
struct IntentRecord {
    at: DateTime<Utc>,
    country: String,
    currency: String,
    total_with_tax: Decimal,
    risk_score: f64,
    action: FraudAction,
    top_method: Option<String>,
}

#[derive(Debug, Clone)]
struct TaxRecord {
    at: DateTime<Utc>,
    country: String,
    currency: String,
    total_tax: Decimal,
    effective_rate: Decimal,
    reverse_charge: bool,
    mandatory_invoice: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentAnalytics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub period_days: u32,
    pub total_intents: u64,
    pub blocked_intents: u64,
    pub verification_required: u64,
    pub average_risk_score: f64,
    pub volume_by_currency: BTreeMap<String, Decimal>,
    pub top_method_distribution: BTreeMap<String, u64>,
    pub fraud_action_distribution: BTreeMap<String, u64>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CountryTaxSummary {
    pub calculations: u64,
    pub total_tax: Decimal,
    pub average_effective_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaxAnalytics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub period_days: u32,
    pub total_calculations: u64,
    pub tax_collected_by_currency: BTreeMap<String, Decimal>,
    pub by_country: BTreeMap<String, CountryTaxSummary>,
    pub reverse_charge_count: u64,
    pub mandatory_invoice_count: u64,
    pub generated_at: DateTime<Utc>,
}

/// Bounded in-memory log of issued intents and tax calculations.
#[derive(Clone)]
pub struct AnalyticsRecorder {
    max_records: usize,
    intents: Arc<RwLock<VecDeque<IntentRecord>>>,
    taxes: Arc<RwLock<VecDeque<TaxRecord>>>,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    queue.push_back(item);
    while queue.len() > max {
        queue.pop_front();
    }
}

impl AnalyticsRecorder {
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            intents: Arc::new(RwLock::new(VecDeque::new())),
            taxes: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    /// Records an issued intent and, when present, its tax calculation.
    pub async fn record_intent(&self, intent: &EnhancedPaymentIntent) {
        let record = IntentRecord {
            at: intent.timestamp,
            country: intent.country.clone(),
            currency: intent.currency.clone(),
            total_with_tax: intent.total_with_tax,
            risk_score: intent.fraud_assessment.risk_score,
            action: intent.fraud_assessment.action,
            top_method: intent.payment_methods.first().map(|m| m.method_type.clone()),
        };
        push_bounded(&mut *self.intents.write().await, record, self.max_records);

        if let Some(tax) = &intent.tax_calculation {
            self.record_tax_at(tax, &intent.currency, intent.timestamp)
                .await;
        }
        debug!(intent_id = %intent.id, "intent recorded for analytics");
    }

    /// Records a standalone tax calculation.
    pub async fn record_tax(&self, tax: &TaxCalculation, currency: Option<&str>) {
        self.record_tax_at(tax, currency.unwrap_or(NO_CURRENCY), tax.calculated_at)
            .await;
    }

    async fn record_tax_at(&self, tax: &TaxCalculation, currency: &str, at: DateTime<Utc>) {
        let record = TaxRecord {
            at,
            country: tax.country.clone(),
            currency: currency.to_string(),
            total_tax: tax.total_tax,
            effective_rate: tax.effective_rate(),
            reverse_charge: tax.reverse_charge,
            mandatory_invoice: tax.invoice.mandatory,
        };
        push_bounded(&mut *self.taxes.write().await, record, self.max_records);
    }

    pub async fn payment_analytics(&self, country: Option<&str>, days: u32) -> PaymentAnalytics {
        let now = Utc::now();
        let since = now - Duration::days(i64::from(days));
        let intents = self.intents.read().await;
        let window: Vec<&IntentRecord> = intents
            .iter()
            .filter(|r| r.at >= since && country.map_or(true, |c| r.country == c))
            .collect();

        let mut volume_by_currency = BTreeMap::new();
        let mut top_method_distribution = BTreeMap::new();
        let mut fraud_action_distribution = BTreeMap::new();
        let mut risk_sum = 0.0;
        for record in &window {
            *volume_by_currency
                .entry(record.currency.clone())
                .or_insert(Decimal::ZERO) += record.total_with_tax;
            if let Some(method) = &record.top_method {
                *top_method_distribution.entry(method.clone()).or_insert(0) += 1;
            }
            *fraud_action_distribution
                .entry(record.action.as_str().to_string())
                .or_insert(0) += 1;
            risk_sum += record.risk_score;
        }

        let total = window.len() as u64;
        let count_action = |action: FraudAction| {
            window.iter().filter(|r| r.action == action).count() as u64
        };
        PaymentAnalytics {
            country: country.map(str::to_string),
            period_days: days,
            total_intents: total,
            blocked_intents: count_action(FraudAction::Block),
            verification_required: count_action(FraudAction::RequireVerification),
            average_risk_score: if total == 0 {
                0.0
            } else {
                crate::models::round_score(risk_sum / total as f64)
            },
            volume_by_currency,
            top_method_distribution,
            fraud_action_distribution,
            generated_at: now,
        }
    }

    pub async fn tax_analytics(&self, country: Option<&str>, days: u32) -> TaxAnalytics {
        let now = Utc::now();
        let since = now - Duration::days(i64::from(days));
        let taxes = self.taxes.read().await;

        let mut analytics = TaxAnalytics {
            country: country.map(str::to_string),
            period_days: days,
            total_calculations: 0,
            tax_collected_by_currency: BTreeMap::new(),
            by_country: BTreeMap::new(),
            reverse_charge_count: 0,
            mandatory_invoice_count: 0,
            generated_at: now,
        };
        let mut rate_sums: BTreeMap<String, Decimal> = BTreeMap::new();

        for record in taxes
            .iter()
            .filter(|r| r.at >= since && country.map_or(true, |c| r.country == c))
        {
            analytics.total_calculations += 1;
            *analytics
                .tax_collected_by_currency
                .entry(record.currency.clone())
                .or_insert(Decimal::ZERO) += record.total_tax;
            let summary = analytics
                .by_country
                .entry(record.country.clone())
                .or_insert(CountryTaxSummary {
                    calculations: 0,
                    total_tax: Decimal::ZERO,
                    average_effective_rate: Decimal::ZERO,
                });
            summary.calculations += 1;
            summary.total_tax += record.total_tax;
            *rate_sums
                .entry(record.country.clone())
                .or_insert(Decimal::ZERO) += record.effective_rate;
            if record.reverse_charge {
                analytics.reverse_charge_count += 1;
            }
            if record.mandatory_invoice {
                analytics.mandatory_invoice_count += 1;
            }
        }

        for (code, summary) in analytics.by_country.iter_mut() {
            if let Some(sum) = rate_sums.get(code) {
                summary.average_effective_rate =
                    crate::models::round_money(*sum / Decimal::from(summary.calculations), 4);
            }
        }
        analytics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BuyerRole, ComplianceLevel, FraudAssessment, InvoiceRequirements,
        OptimizationFocus, TaxLine, TaxType,
    };
    use rust_decimal_macros::dec;

    fn tax(country: &str, total_tax: Decimal, reverse_charge: bool) -> TaxCalculation {
        let base = dec!(100);
        TaxCalculation {
            country: country.to_string(),
            role: BuyerRole::B2C,
            regime: Some("test".to_string()),
            lines: vec![TaxLine {
                sku: "X".to_string(),
                category: "general".to_string(),
                rate: total_tax / base,
                base_amount: base,
                amount: total_tax,
                tax_type: TaxType::Vat,
            }],
            total_tax,
            reverse_charge,
            invoice: InvoiceRequirements {
                required_fields: vec![],
                threshold_amount: None,
                mandatory: reverse_charge,
                compliance_level: ComplianceLevel::Simplified,
            },
            ai_insights: vec![],
            calculated_at: Utc::now(),
        }
    }

    fn intent(country: &str, score: f64, age: Duration) -> EnhancedPaymentIntent {
        EnhancedPaymentIntent {
            id: "pi_test".to_string(),
            subtotal: dec!(100),
            tax_calculation: Some(tax(country, dec!(19), false)),
            total_with_tax: dec!(119),
            payment_methods: vec![],
            selected_payment_method: None,
            currency_conversion: None,
            fraud_assessment: FraudAssessment::from_score(score, 10.0, vec![], vec![]),
            optimization_focus: OptimizationFocus::Balanced,
            country: country.to_string(),
            currency: "EUR".to_string(),
            role: BuyerRole::B2C,
            payment_allowed: score < 70.0,
            degraded: false,
            insights: vec![],
            timestamp: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn payment_window_and_country_filter() {
        let recorder = AnalyticsRecorder::new(100);
        recorder.record_intent(&intent("DE", 10.0, Duration::zero())).await;
        recorder.record_intent(&intent("DE", 95.0, Duration::days(2))).await;
        recorder.record_intent(&intent("FR", 75.0, Duration::days(1))).await;
        recorder.record_intent(&intent("DE", 20.0, Duration::days(40))).await;

        let all = recorder.payment_analytics(None, 30).await;
        assert_eq!(all.total_intents, 3);
        assert_eq!(all.blocked_intents, 1);
        assert_eq!(all.verification_required, 1);
        assert_eq!(all.volume_by_currency.get("EUR"), Some(&dec!(357)));
        assert_eq!(all.fraud_action_distribution.get("allow"), Some(&1));

        let de = recorder.payment_analytics(Some("DE"), 30).await;
        assert_eq!(de.total_intents, 2);
        assert_eq!(de.average_risk_score, 52.5);

        let recent = recorder.payment_analytics(Some("DE"), 1).await;
        assert_eq!(recent.total_intents, 1);
    }

    #[tokio::test]
    async fn tax_aggregates_by_country() {
        let recorder = AnalyticsRecorder::new(100);
        recorder.record_tax(&tax("DE", dec!(19), false), Some("EUR")).await;
        recorder.record_tax(&tax("DE", dec!(7), false), Some("EUR")).await;
        recorder.record_tax(&tax("FR", dec!(0), true), None).await;

        let analytics = recorder.tax_analytics(None, 30).await;
        assert_eq!(analytics.total_calculations, 3);
        assert_eq!(analytics.reverse_charge_count, 1);
        assert_eq!(analytics.mandatory_invoice_count, 1);
        assert_eq!(analytics.tax_collected_by_currency.get("EUR"), Some(&dec!(26)));
        assert!(analytics.tax_collected_by_currency.contains_key(NO_CURRENCY));

        let de = analytics.by_country.get("DE").unwrap();
        assert_eq!(de.calculations, 2);
        assert_eq!(de.total_tax, dec!(26));
        assert_eq!(de.average_effective_rate, dec!(0.13));
    }

    #[tokio::test]
    async fn oldest_records_are_evicted() {
        let recorder = AnalyticsRecorder::new(2);
        for score in [10.0, 20.0, 30.0] {
            recorder.record_intent(&intent("DE", score, Duration::zero())).await;
        }
        let analytics = recorder.payment_analytics(None, 30).await;
        assert_eq!(analytics.total_intents, 2);
        assert_eq!(analytics.average_risk_score, 25.0);
    }
}
