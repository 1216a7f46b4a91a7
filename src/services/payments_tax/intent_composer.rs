//! Fans a checkout out to the four engine components and fuses their
//! results into one `EnhancedPaymentIntent`.
//!
//! Wave 1 runs tax resolution and payment ranking concurrently. Wave 2 runs
//! the fraud assessment against the chosen method, together with a settlement
//! conversion when that method pays out in another currency. Every sub-call
//! is bounded by its own timeout and by what is left of the overall deadline.

use super::currency_service::CurrencyConverter;
use super::fraud_service::FraudRiskAssessor;
use super::payment_method_service::{reweight, PaymentMethodRanker};
use super::tax_service::TaxResolver;
use super::validation::{validate_country_format, validate_currency, validate_lines};
use crate::config::{EngineConfig, TimeoutConfig};
use crate::errors::ServiceError;
use crate::metrics::IntentMetrics;
use crate::models::{
    round_money, CurrencyConversion, EnhancedPaymentIntent, FraudAction, FraudAssessment,
    IntentRequest, PaymentMethod, PaymentMethodSuggestion, TaxCalculation,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

pub const TAX_COMPONENT: &str = "tax_resolver";
pub const RANKING_COMPONENT: &str = "payment_method_ranker";
pub const FRAUD_COMPONENT: &str = "fraud_assessor";
pub const CONVERSION_COMPONENT: &str = "currency_converter";

/// Method type used for the fraud check when nothing is eligible.
const UNSPECIFIED_METHOD: &str = "unspecified";

/// Composes payment intents from the engine components.
#[derive(Clone)]
pub struct IntentComposer {
    tax: Arc<dyn TaxResolver>,
    ranker: Arc<dyn PaymentMethodRanker>,
    fraud: Arc<dyn FraudRiskAssessor>,
    converter: Arc<dyn CurrencyConverter>,
    timeouts: TimeoutConfig,
    require_settlement_conversion: bool,
    metrics: Arc<IntentMetrics>,
}

/// Overall deadline shared by every sub-call of one composition.
struct Deadline {
    at: Instant,
}

impl Deadline {
    fn new(total: Duration) -> Self {
        Self {
            at: Instant::now() + total,
        }
    }

    fn budget(&self, sub_timeout: Duration) -> Duration {
        sub_timeout.min(self.at.saturating_duration_since(Instant::now()))
    }
}

async fn bounded<T, F>(
    component: &'static str,
    budget: Duration,
    future: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(budget, future).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::UpstreamTimeout {
            component,
            timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

impl IntentComposer {
    pub fn new(
        tax: Arc<dyn TaxResolver>,
        ranker: Arc<dyn PaymentMethodRanker>,
        fraud: Arc<dyn FraudRiskAssessor>,
        converter: Arc<dyn CurrencyConverter>,
        engine: &EngineConfig,
    ) -> Self {
        Self {
            tax,
            ranker,
            fraud,
            converter,
            timeouts: engine.timeouts.clone(),
            require_settlement_conversion: engine.fx.require_settlement_conversion,
            metrics: Arc::new(IntentMetrics::new()),
        }
    }

    /// Builds the intent for one checkout attempt.
    ///
    /// Only input errors, tax errors other than a timeout, and a missing
    /// mandatory settlement conversion abort the call. Everything else
    /// degrades into a complete intent with `payment_allowed = false` where
    /// the gate cannot be satisfied.
    #[instrument(skip(self, request), fields(country = %request.country, currency = %request.currency))]
    pub async fn compose(
        &self,
        request: IntentRequest,
    ) -> Result<EnhancedPaymentIntent, ServiceError> {
        let started = Instant::now();
        let result = self.compose_inner(request).await;
        self.metrics.record_duration(started.elapsed());

        match &result {
            Ok(intent) => {
                self.metrics.composed.inc();
                if intent.degraded {
                    self.metrics.degraded.inc();
                }
                match intent.fraud_assessment.action {
                    FraudAction::Block => self.metrics.blocked.inc(),
                    FraudAction::RequireVerification => self.metrics.verification_required.inc(),
                    FraudAction::Allow => {}
                }
            }
            Err(_) => self.metrics.failed.inc(),
        }
        result
    }

    async fn compose_inner(
        &self,
        request: IntentRequest,
    ) -> Result<EnhancedPaymentIntent, ServiceError> {
        let request = request.normalized();
        validate_lines(&request.items)?;
        validate_country_format(&request.country)?;
        validate_currency(&request.currency)?;

        let deadline = Deadline::new(self.timeouts.total());
        let id = request.intent_id();
        let subtotal = round_money(
            request.items.iter().map(|line| line.line_total()).sum::<Decimal>(),
            2,
        );
        let mut insights = Vec::new();
        let mut degraded = false;

        // Wave 1
        let (tax_result, ranking_result) = tokio::join!(
            bounded(
                TAX_COMPONENT,
                deadline.budget(self.timeouts.tax()),
                self.tax.compute(&request.country, &request.items, request.role),
            ),
            bounded(
                RANKING_COMPONENT,
                deadline.budget(self.timeouts.ranking()),
                self.ranker
                    .rank(&request.country, &request.currency, subtotal, request.role),
            ),
        );

        let tax_calculation: Option<TaxCalculation> = match tax_result {
            Ok(tax) => Some(tax),
            Err(err @ ServiceError::UpstreamTimeout { .. }) => {
                self.metrics.record_timeout(TAX_COMPONENT);
                warn!(error = %err, "tax resolution timed out; intent degraded");
                degraded = true;
                insights.push(
                    "Tax could not be calculated in time; payment is on hold until it is"
                        .to_string(),
                );
                None
            }
            Err(err) => return Err(err),
        };

        let suggestion = match ranking_result {
            Ok(suggestion) => suggestion,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                if matches!(err, ServiceError::UpstreamTimeout { .. }) {
                    self.metrics.record_timeout(RANKING_COMPONENT);
                }
                warn!(error = %err, "payment ranking unavailable; continuing without methods");
                degraded = true;
                PaymentMethodSuggestion {
                    methods: Vec::new(),
                    recommended: None,
                    ai_insights: vec!["Payment methods are temporarily unavailable".to_string()],
                }
            }
        };
        insights.extend(suggestion.ai_insights.iter().cloned());

        let total_tax = tax_calculation
            .as_ref()
            .map(|tax| tax.total_tax)
            .unwrap_or(Decimal::ZERO);
        let total_with_tax = round_money(subtotal + total_tax, 2);

        let selected = select_method(
            &suggestion.methods,
            request.payment_method_preference.as_deref(),
            &mut insights,
        );
        let conversion_target = selected
            .map(|m| m.settlement_currency.clone())
            .filter(|settlement| *settlement != request.currency);
        let selected_payment_method = selected.map(|m| m.method_type.clone());
        let fraud_method = selected_payment_method
            .as_deref()
            .unwrap_or(UNSPECIFIED_METHOD);

        // Wave 2
        let fraud_call = bounded(
            FRAUD_COMPONENT,
            deadline.budget(self.timeouts.fraud()),
            self.fraud.assess(
                &request.country,
                total_with_tax,
                fraud_method,
                request.user_history.as_ref(),
            ),
        );
        let conversion_call = async {
            match &conversion_target {
                Some(target) => Some(
                    bounded(
                        CONVERSION_COMPONENT,
                        deadline.budget(self.timeouts.conversion()),
                        self.converter
                            .convert(&request.currency, target, total_with_tax),
                    )
                    .await,
                ),
                None => None,
            }
        };
        let (fraud_result, conversion_result) = tokio::join!(fraud_call, conversion_call);

        let fraud_assessment = match fraud_result {
            Ok(assessment) => assessment,
            Err(err) => {
                if matches!(err, ServiceError::UpstreamTimeout { .. }) {
                    self.metrics.record_timeout(FRAUD_COMPONENT);
                }
                warn!(error = %err, "fraud assessment unavailable; applying fail-safe");
                degraded = true;
                let reason = match err {
                    ServiceError::UpstreamTimeout { .. } => "timeout",
                    _ => "error",
                };
                FraudAssessment::fail_safe(reason)
            }
        };

        let currency_conversion: Option<CurrencyConversion> = match conversion_result {
            None => None,
            Some(Ok(conversion)) => {
                if conversion.volatility_warning {
                    insights.push(format!(
                        "Exchange rate {}->{} is stale; the settled amount may differ",
                        conversion.from_currency, conversion.to_currency
                    ));
                }
                Some(conversion)
            }
            Some(Err(err @ ServiceError::RateUnavailable { .. }))
                if self.require_settlement_conversion =>
            {
                return Err(err);
            }
            Some(Err(err)) => {
                if matches!(err, ServiceError::UpstreamTimeout { .. }) {
                    self.metrics.record_timeout(CONVERSION_COMPONENT);
                    degraded = true;
                }
                warn!(error = %err, "settlement conversion omitted");
                insights.push(format!("Settlement conversion unavailable: {err}"));
                None
            }
        };

        let payment_methods = reweight(suggestion.methods, request.optimize_for);

        // The gate is evaluated last, over the fully merged state.
        let conversion_satisfied = !self.require_settlement_conversion
            || conversion_target.is_none()
            || currency_conversion.is_some();
        let payment_allowed = fraud_assessment.action == FraudAction::Allow
            && !payment_methods.is_empty()
            && tax_calculation.is_some()
            && conversion_satisfied;

        match fraud_assessment.action {
            FraudAction::Block => {
                insights.push("Payment blocked by fraud screening".to_string())
            }
            FraudAction::RequireVerification => insights
                .push("Identity verification is required before payment".to_string()),
            FraudAction::Allow => {}
        }

        let intent = EnhancedPaymentIntent {
            id,
            subtotal,
            tax_calculation,
            total_with_tax,
            selected_payment_method,
            payment_methods,
            currency_conversion,
            fraud_assessment,
            optimization_focus: request.optimize_for,
            country: request.country,
            currency: request.currency,
            role: request.role,
            payment_allowed,
            degraded,
            insights,
            timestamp: Utc::now(),
        };

        info!(
            intent_id = %intent.id,
            total_with_tax = %intent.total_with_tax,
            action = intent.fraud_assessment.action.as_str(),
            payment_allowed = intent.payment_allowed,
            degraded = intent.degraded,
            "payment intent composed"
        );
        Ok(intent)
    }
}

/// Picks the preferred method when it is eligible, else the top-ranked one.
fn select_method<'a>(
    methods: &'a [PaymentMethod],
    preference: Option<&str>,
    insights: &mut Vec<String>,
) -> Option<&'a PaymentMethod> {
    let top = methods.first();
    let Some(preference) = preference else {
        return top;
    };

    let preferred = methods
        .iter()
        .find(|m| m.scheme == preference || m.method_type == preference);
    match (preferred, top) {
        (Some(method), _) => Some(method),
        (None, Some(fallback)) => {
            insights.push(format!(
                "Preferred payment method '{preference}' is not available; using {}",
                fallback.display_name
            ));
            Some(fallback)
        }
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FraudWeights, FxConfig, RankingWeights};
    use crate::models::{BuyerRole, CartLine, OptimizationFocus, RiskLevel, UserHistory};
    use crate::services::payments_tax::{
        CurrencyService, FraudService, PaymentMethodService, TaxService,
    };
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    struct SlowFraud(Duration);

    #[async_trait]
    impl FraudRiskAssessor for SlowFraud {
        async fn assess(
            &self,
            _country: &str,
            _amount: Decimal,
            _method_type: &str,
            _history: Option<&UserHistory>,
        ) -> Result<FraudAssessment, ServiceError> {
            tokio::time::sleep(self.0).await;
            Ok(FraudAssessment::from_score(5.0, 10.0, vec![], vec![]))
        }
    }

    struct FixedFraud(f64);

    #[async_trait]
    impl FraudRiskAssessor for FixedFraud {
        async fn assess(
            &self,
            _country: &str,
            _amount: Decimal,
            _method_type: &str,
            _history: Option<&UserHistory>,
        ) -> Result<FraudAssessment, ServiceError> {
            Ok(FraudAssessment::from_score(self.0, 10.0, vec![], vec![]))
        }
    }

    struct SlowTax(Duration);

    #[async_trait]
    impl TaxResolver for SlowTax {
        async fn compute(
            &self,
            country: &str,
            lines: &[CartLine],
            role: BuyerRole,
        ) -> Result<TaxCalculation, ServiceError> {
            tokio::time::sleep(self.0).await;
            TaxService::new().compute(country, lines, role).await
        }
    }

    /// Records the method type each assessment was made against.
    #[derive(Default)]
    struct RecordingFraud(std::sync::Mutex<Vec<String>>);

    #[async_trait]
    impl FraudRiskAssessor for RecordingFraud {
        async fn assess(
            &self,
            _country: &str,
            _amount: Decimal,
            method_type: &str,
            _history: Option<&UserHistory>,
        ) -> Result<FraudAssessment, ServiceError> {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(method_type.to_string());
            }
            Ok(FraudAssessment::from_score(5.0, 10.0, vec![], vec![]))
        }
    }

    struct SlowRanker(Duration);

    #[async_trait]
    impl PaymentMethodRanker for SlowRanker {
        async fn rank(
            &self,
            country: &str,
            currency: &str,
            cart_total: Decimal,
            role: BuyerRole,
        ) -> Result<PaymentMethodSuggestion, ServiceError> {
            tokio::time::sleep(self.0).await;
            PaymentMethodService::new(RankingWeights::default())
                .rank(country, currency, cart_total, role)
                .await
        }
    }

    struct SlowConverter(Duration);

    #[async_trait]
    impl CurrencyConverter for SlowConverter {
        async fn convert(
            &self,
            from: &str,
            to: &str,
            amount: Decimal,
        ) -> Result<CurrencyConversion, ServiceError> {
            tokio::time::sleep(self.0).await;
            CurrencyService::new(&FxConfig::default())
                .convert(from, to, amount)
                .await
        }
    }

    fn engine() -> EngineConfig {
        EngineConfig::default()
    }

    fn composer_with(
        engine: &EngineConfig,
        tax: Arc<dyn TaxResolver>,
        fraud: Arc<dyn FraudRiskAssessor>,
    ) -> IntentComposer {
        IntentComposer::new(
            tax,
            Arc::new(PaymentMethodService::new(RankingWeights::default())),
            fraud,
            Arc::new(CurrencyService::new(&engine.fx)),
            engine,
        )
    }

    fn default_composer(engine: &EngineConfig) -> IntentComposer {
        composer_with(
            engine,
            Arc::new(TaxService::new()),
            Arc::new(FraudService::new(FraudWeights::default())),
        )
    }

    fn request() -> IntentRequest {
        IntentRequest {
            items: vec![CartLine::new("X", "electronics", dec!(100.00), 2)],
            country: "DE".to_string(),
            currency: "EUR".to_string(),
            role: BuyerRole::B2C,
            payment_method_preference: None,
            optimize_for: OptimizationFocus::Balanced,
            user_history: None,
        }
    }

    #[tokio::test]
    async fn clean_checkout_is_allowed() {
        let intent = default_composer(&engine()).compose(request()).await.unwrap();

        assert_eq!(intent.subtotal, dec!(200.00));
        let tax = intent.tax_calculation.as_ref().unwrap();
        assert_eq!(tax.total_tax, dec!(38.00));
        assert_eq!(intent.total_with_tax, dec!(238.00));
        assert!(!intent.payment_methods.is_empty());
        assert!(PaymentMethod::is_ranked(&intent.payment_methods));
        assert_eq!(intent.fraud_assessment.risk_level, RiskLevel::Low);
        assert!(intent.payment_allowed);
        assert!(!intent.degraded);
        assert!(intent.currency_conversion.is_none());
    }

    #[tokio::test]
    async fn blocked_intent_is_still_complete() {
        let engine = engine();
        let composer = composer_with(
            &engine,
            Arc::new(TaxService::new()),
            Arc::new(FixedFraud(95.0)),
        );
        let intent = composer.compose(request()).await.unwrap();

        assert_eq!(intent.fraud_assessment.action, FraudAction::Block);
        assert!(!intent.payment_allowed);
        assert!(intent.tax_calculation.is_some());
        assert!(!intent.payment_methods.is_empty());
    }

    #[tokio::test]
    async fn slow_fraud_falls_back_to_verification() {
        let mut engine = engine();
        engine.timeouts.fraud_ms = 50;
        let composer = composer_with(
            &engine,
            Arc::new(TaxService::new()),
            Arc::new(SlowFraud(Duration::from_millis(500))),
        );

        let intent = composer.compose(request()).await.unwrap();
        assert_eq!(intent.fraud_assessment.risk_score, 70.0);
        assert_eq!(
            intent.fraud_assessment.action,
            FraudAction::RequireVerification
        );
        assert!(intent.degraded);
        assert!(!intent.payment_allowed);
    }

    #[tokio::test]
    async fn slow_tax_degrades_instead_of_failing() {
        let mut engine = engine();
        engine.timeouts.tax_ms = 50;
        let composer = composer_with(
            &engine,
            Arc::new(SlowTax(Duration::from_millis(500))),
            Arc::new(FraudService::new(FraudWeights::default())),
        );

        let intent = composer.compose(request()).await.unwrap();
        assert!(intent.tax_calculation.is_none());
        assert_eq!(intent.total_with_tax, intent.subtotal);
        assert!(intent.degraded);
        assert!(!intent.payment_allowed);
    }

    #[tokio::test]
    async fn overall_deadline_caps_sub_timeouts() {
        let mut engine = engine();
        engine.timeouts.total_ms = 80;
        engine.timeouts.tax_ms = 70;
        engine.timeouts.ranking_ms = 70;
        engine.timeouts.fraud_ms = 70;
        engine.timeouts.conversion_ms = 70;
        let composer = composer_with(
            &engine,
            Arc::new(SlowTax(Duration::from_millis(60))),
            Arc::new(SlowFraud(Duration::from_millis(60))),
        );

        let started = std::time::Instant::now();
        let intent = composer.compose(request()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
        // Wave 1 used most of the budget so the fraud call only had the remainder
        assert_eq!(
            intent.fraud_assessment.action,
            FraudAction::RequireVerification
        );
        assert!(intent.degraded);
    }

    #[tokio::test]
    async fn unknown_jurisdiction_is_fatal() {
        let mut req = request();
        req.country = "XX".to_string();
        let result = default_composer(&engine()).compose(req).await;
        assert_matches!(result, Err(ServiceError::InvalidJurisdiction(_)));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_dispatch() {
        let mut req = request();
        req.items[0].quantity = 0;
        assert_matches!(
            default_composer(&engine()).compose(req).await,
            Err(ServiceError::InvalidRequest(_))
        );

        let mut req = request();
        req.currency = "ZZZ".to_string();
        assert_matches!(
            default_composer(&engine()).compose(req).await,
            Err(ServiceError::InvalidRequest(_))
        );
    }

    #[tokio::test]
    async fn preferred_method_drives_fraud_and_conversion() {
        let mut req = request();
        req.payment_method_preference = Some("crypto".to_string());
        let intent = default_composer(&engine()).compose(req).await.unwrap();

        assert_eq!(intent.selected_payment_method.as_deref(), Some("crypto"));
        let conversion = intent.currency_conversion.as_ref().unwrap();
        assert_eq!(conversion.from_currency, "EUR");
        assert_eq!(conversion.to_currency, "USD");
        assert_eq!(conversion.amount, intent.total_with_tax);
        // crypto weighs 15 more than card
        assert!(intent.fraud_assessment.risk_score >= 48.0);
    }

    #[tokio::test]
    async fn unavailable_preference_falls_back_to_top_method() {
        let mut req = request();
        req.payment_method_preference = Some("upi".to_string());
        let intent = default_composer(&engine()).compose(req).await.unwrap();

        assert_eq!(
            intent.selected_payment_method.as_deref(),
            intent.payment_methods.first().map(|m| m.method_type.as_str())
        );
        assert!(intent
            .insights
            .iter()
            .any(|i| i.contains("'upi' is not available")));
    }

    #[tokio::test]
    async fn mandatory_conversion_without_rate_is_fatal() {
        let mut engine = engine();
        engine.fx.require_settlement_conversion = true;
        let composer = IntentComposer::new(
            Arc::new(TaxService::new()),
            Arc::new(PaymentMethodService::new(RankingWeights::default())),
            Arc::new(FraudService::new(FraudWeights::default())),
            Arc::new(CurrencyService::with_rates(
                &FxConfig::default(),
                Default::default(),
            )),
            &engine,
        );

        let mut req = request();
        req.payment_method_preference = Some("crypto".to_string());
        assert_matches!(
            composer.compose(req).await,
            Err(ServiceError::RateUnavailable { .. })
        );
    }

    #[tokio::test]
    async fn optional_conversion_without_rate_is_omitted() {
        let engine = engine();
        let composer = IntentComposer::new(
            Arc::new(TaxService::new()),
            Arc::new(PaymentMethodService::new(RankingWeights::default())),
            Arc::new(FraudService::new(FraudWeights::default())),
            Arc::new(CurrencyService::with_rates(&engine.fx, Default::default())),
            &engine,
        );

        let mut req = request();
        req.payment_method_preference = Some("crypto".to_string());
        let intent = composer.compose(req).await.unwrap();
        assert!(intent.currency_conversion.is_none());
        assert!(intent
            .insights
            .iter()
            .any(|i| i.starts_with("Settlement conversion unavailable")));
    }

    #[tokio::test]
    async fn no_eligible_method_closes_the_gate() {
        let engine = engine();
        let fraud = Arc::new(RecordingFraud::default());
        let composer = IntentComposer::new(
            Arc::new(TaxService::new()),
            Arc::new(PaymentMethodService::with_catalog(
                vec![],
                RankingWeights::default(),
            )),
            fraud.clone(),
            Arc::new(CurrencyService::new(&engine.fx)),
            &engine,
        );

        let intent = composer.compose(request()).await.unwrap();
        assert!(intent.payment_methods.is_empty());
        assert!(intent.selected_payment_method.is_none());
        assert_eq!(intent.fraud_assessment.action, FraudAction::Allow);
        assert!(!intent.payment_allowed);
        assert!(!intent.degraded);
        assert!(intent
            .insights
            .iter()
            .any(|i| i.starts_with("No payment methods are eligible")));
        assert_eq!(*fraud.0.lock().unwrap(), vec![UNSPECIFIED_METHOD.to_string()]);
    }

    #[tokio::test]
    async fn slow_ranking_degrades_to_an_empty_list() {
        let mut engine = engine();
        engine.timeouts.ranking_ms = 50;
        let fraud = Arc::new(RecordingFraud::default());
        let composer = IntentComposer::new(
            Arc::new(TaxService::new()),
            Arc::new(SlowRanker(Duration::from_millis(500))),
            fraud.clone(),
            Arc::new(CurrencyService::new(&engine.fx)),
            &engine,
        );

        let intent = composer.compose(request()).await.unwrap();
        assert!(intent.payment_methods.is_empty());
        assert!(intent.tax_calculation.is_some());
        assert!(intent.degraded);
        assert!(!intent.payment_allowed);
        assert!(intent
            .insights
            .iter()
            .any(|i| i == "Payment methods are temporarily unavailable"));
        assert_eq!(*fraud.0.lock().unwrap(), vec![UNSPECIFIED_METHOD.to_string()]);
    }

    #[tokio::test]
    async fn slow_conversion_is_omitted_and_degrades() {
        let mut engine = engine();
        engine.timeouts.conversion_ms = 50;
        let composer = IntentComposer::new(
            Arc::new(TaxService::new()),
            Arc::new(PaymentMethodService::new(RankingWeights::default())),
            Arc::new(FraudService::new(FraudWeights::default())),
            Arc::new(SlowConverter(Duration::from_millis(500))),
            &engine,
        );

        let mut req = request();
        req.payment_method_preference = Some("crypto".to_string());
        let intent = composer.compose(req).await.unwrap();

        assert_eq!(intent.selected_payment_method.as_deref(), Some("crypto"));
        assert!(intent.currency_conversion.is_none());
        assert!(intent.degraded);
        assert!(intent
            .insights
            .iter()
            .any(|i| i.starts_with("Settlement conversion unavailable")));
        // Conversion is optional by default, so the gate stays open
        assert_eq!(intent.fraud_assessment.action, FraudAction::Allow);
        assert!(intent.payment_allowed);
    }

    #[tokio::test]
    async fn composition_is_idempotent_except_timestamps() {
        let composer = default_composer(&engine());
        let mut first = composer.compose(request()).await.unwrap();
        let mut second = composer.compose(request()).await.unwrap();

        assert_eq!(first.id, second.id);
        second.timestamp = first.timestamp;
        if let (Some(a), Some(b)) = (&mut first.tax_calculation, &mut second.tax_calculation) {
            b.calculated_at = a.calculated_at;
        }
        assert_eq!(first, second);
    }
}
