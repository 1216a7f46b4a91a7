use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::metrics::record_endpoint_call;
use crate::models::{
    BuyerRole, CartLine, CurrencyConversion, EnhancedPaymentIntent, FraudAssessment,
    FxRateQuote, FxRatesRefreshed, IntentRequest, PaymentMethodSuggestion, TaxCalculation,
    UserHistory,
};
use crate::services::payments_tax::intent_composer::{
    CONVERSION_COMPONENT, FRAUD_COMPONENT, RANKING_COMPONENT, TAX_COMPONENT,
};
use crate::services::payments_tax::validation::{
    validate_country_format, validate_currency, validate_days,
};
use crate::services::payments_tax::{
    CurrencyConverter, FraudRiskAssessor, PaymentAnalytics, PaymentMethodRanker, TaxAnalytics,
    TaxResolver,
};
use axum::{
    extract::{Json, Query, State},
    routing::{get, post},
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use utoipa::{IntoParams, ToSchema};

/// Method type assumed when a fraud check names no method.
const DEFAULT_FRAUD_METHOD: &str = "unspecified";

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "country": "DE",
    "items": [{"sku": "SKU-1", "category": "electronics", "price": "100.00", "quantity": 2}],
    "role": "B2C",
    "currency": "EUR"
}))]
pub struct ComputeTaxRequest {
    /// ISO 3166-1 alpha-2 destination country
    pub country: String,
    pub items: Vec<CartLine>,
    #[serde(default)]
    pub role: BuyerRole,
    /// Checkout currency, used only to bucket tax analytics
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "country": "DE",
    "currency": "EUR",
    "cart_total": "238.00",
    "user_type": "B2C"
}))]
pub struct SuggestMethodsRequest {
    pub country: String,
    pub currency: String,
    pub cart_total: Decimal,
    #[serde(default, alias = "role")]
    pub user_type: BuyerRole,
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({"from_currency": "EUR", "to_currency": "USD", "amount": "238.00"}))]
pub struct ConvertCurrencyRequest {
    pub from_currency: String,
    pub to_currency: String,
    pub amount: Decimal,
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "country": "DE",
    "amount": "238.00",
    "payment_method": "card",
    "user_history": {"account_age_days": 400, "previous_orders": 12, "verified_identity": true}
}))]
pub struct AssessFraudRequest {
    pub country: String,
    pub amount: Decimal,
    /// Candidate payment method type (card, wallet, bank_transfer, bnpl, crypto)
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub user_history: Option<UserHistory>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[schema(example = json!({
    "rates": [
        {"currency": "EUR", "per_pivot": "0.9215", "as_of": "2026-10-19T08:00:00Z"},
        {"currency": "GBP", "per_pivot": "0.7890"}
    ]
}))]
pub struct RefreshFxRatesRequest {
    pub rates: Vec<FxRateQuote>,
}

/// Query parameters for the analytics endpoints
#[derive(Debug, Deserialize, IntoParams)]
pub struct AnalyticsQuery {
    /// Restrict to one ISO 3166-1 country
    pub country: Option<String>,
    /// Number of days to look back (default: 30)
    #[param(minimum = 1, maximum = 365)]
    pub days: Option<u32>,
}

/// Build the payments & tax Router scoped under `/payments-tax`.
pub fn payments_tax_routes() -> Router<AppState> {
    Router::new()
        .route("/compute-tax", post(compute_tax))
        .route("/suggest-methods", post(suggest_methods))
        .route("/convert-currency", post(convert_currency))
        .route("/assess-fraud-risk", post(assess_fraud_risk))
        .route(
            "/create-enhanced-payment-intent",
            post(create_enhanced_payment_intent),
        )
        .route("/payment-analytics", get(payment_analytics))
        .route("/tax-analytics", get(tax_analytics))
        .route("/fx-rates", post(refresh_fx_rates))
        .route("/health", get(super::health::payments_tax_health))
}

/// Standalone component calls get the same per-component bound the composer
/// applies, surfaced as a 504 instead of being degraded.
async fn with_timeout<T, F>(
    component: &'static str,
    timeout: Duration,
    future: F,
) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| ServiceError::UpstreamTimeout {
            component,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })?
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn normalize_country_filter(country: Option<String>) -> Result<Option<String>, ServiceError> {
    match country.map(|c| normalize_code(&c)).filter(|c| !c.is_empty()) {
        Some(country) => {
            validate_country_format(&country)?;
            Ok(Some(country))
        }
        None => Ok(None),
    }
}

/// Compute itemized tax for a cart
#[utoipa::path(
    post,
    path = "/payments-tax/compute-tax",
    request_body = ComputeTaxRequest,
    responses(
        (status = 200, description = "Tax computed", body = TaxCalculation),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Unknown jurisdiction", body = crate::errors::ErrorResponse),
        (status = 504, description = "Tax resolver timed out", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn compute_tax(
    State(state): State<AppState>,
    Json(request): Json<ComputeTaxRequest>,
) -> Result<Json<TaxCalculation>, ServiceError> {
    record_endpoint_call("compute_tax");

    let country = normalize_code(&request.country);
    validate_country_format(&country)?;
    let currency = request.currency.as_deref().map(normalize_code);
    if let Some(currency) = currency.as_deref() {
        validate_currency(currency)?;
    }

    let calculation = with_timeout(
        TAX_COMPONENT,
        state.config.engine.timeouts.tax(),
        state
            .services
            .tax
            .compute(&country, &request.items, request.role),
    )
    .await?;

    state
        .services
        .analytics
        .record_tax(&calculation, currency.as_deref())
        .await;

    Ok(Json(calculation))
}

/// Rank the payment methods eligible for a checkout
#[utoipa::path(
    post,
    path = "/payments-tax/suggest-methods",
    request_body = SuggestMethodsRequest,
    responses(
        (status = 200, description = "Ranked payment methods", body = PaymentMethodSuggestion),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 504, description = "Ranker timed out", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn suggest_methods(
    State(state): State<AppState>,
    Json(request): Json<SuggestMethodsRequest>,
) -> Result<Json<PaymentMethodSuggestion>, ServiceError> {
    record_endpoint_call("suggest_methods");

    let country = normalize_code(&request.country);
    let currency = normalize_code(&request.currency);
    let suggestion = with_timeout(
        RANKING_COMPONENT,
        state.config.engine.timeouts.ranking(),
        state
            .services
            .ranker
            .rank(&country, &currency, request.cart_total, request.user_type),
    )
    .await?;

    Ok(Json(suggestion))
}

/// Convert an amount between two currencies
#[utoipa::path(
    post,
    path = "/payments-tax/convert-currency",
    request_body = ConvertCurrencyRequest,
    responses(
        (status = 200, description = "Converted amount", body = CurrencyConversion),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "No exchange rate for the pair", body = crate::errors::ErrorResponse),
        (status = 504, description = "Converter timed out", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn convert_currency(
    State(state): State<AppState>,
    Json(request): Json<ConvertCurrencyRequest>,
) -> Result<Json<CurrencyConversion>, ServiceError> {
    record_endpoint_call("convert_currency");

    let from = normalize_code(&request.from_currency);
    let to = normalize_code(&request.to_currency);
    let conversion = with_timeout(
        CONVERSION_COMPONENT,
        state.config.engine.timeouts.conversion(),
        state.services.currency.convert(&from, &to, request.amount),
    )
    .await?;

    Ok(Json(conversion))
}

/// Push fresh quotes into the exchange-rate table
#[utoipa::path(
    post,
    path = "/payments-tax/fx-rates",
    request_body = RefreshFxRatesRequest,
    responses(
        (status = 200, description = "Quotes applied", body = FxRatesRefreshed),
        (status = 400, description = "A quote is invalid; nothing was applied", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn refresh_fx_rates(
    State(state): State<AppState>,
    Json(request): Json<RefreshFxRatesRequest>,
) -> Result<Json<FxRatesRefreshed>, ServiceError> {
    record_endpoint_call("refresh_fx_rates");
    if request.rates.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "rates must contain at least one quote".to_string(),
        ));
    }

    let currency = &state.services.currency;
    let updated = currency.refresh_rates(&request.rates).await?;
    Ok(Json(FxRatesRefreshed {
        updated,
        pivot_currency: currency.pivot().to_string(),
        rate_count: currency.rate_count().await,
        stale_rates: currency.stale_rate_count().await,
    }))
}

/// Assess the fraud risk of a checkout
#[utoipa::path(
    post,
    path = "/payments-tax/assess-fraud-risk",
    request_body = AssessFraudRequest,
    responses(
        (status = 200, description = "Fraud assessment", body = FraudAssessment),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 504, description = "Assessor timed out", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn assess_fraud_risk(
    State(state): State<AppState>,
    Json(request): Json<AssessFraudRequest>,
) -> Result<Json<FraudAssessment>, ServiceError> {
    record_endpoint_call("assess_fraud_risk");

    let country = normalize_code(&request.country);
    let method = request
        .payment_method
        .as_deref()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_FRAUD_METHOD.to_string());

    let assessment = with_timeout(
        FRAUD_COMPONENT,
        state.config.engine.timeouts.fraud(),
        state.services.fraud.assess(
            &country,
            request.amount,
            &method,
            request.user_history.as_ref(),
        ),
    )
    .await?;

    Ok(Json(assessment))
}

/// Compose the authoritative payment intent for a checkout
#[utoipa::path(
    post,
    path = "/payments-tax/create-enhanced-payment-intent",
    request_body = IntentRequest,
    responses(
        (status = 200, description = "Composed intent, including blocked and degraded outcomes", body = EnhancedPaymentIntent),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 422, description = "Unknown jurisdiction or missing mandatory conversion", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn create_enhanced_payment_intent(
    State(state): State<AppState>,
    Json(request): Json<IntentRequest>,
) -> Result<Json<EnhancedPaymentIntent>, ServiceError> {
    record_endpoint_call("create_enhanced_payment_intent");
    let intent = state.services.composer.compose(request).await?;
    state.services.analytics.record_intent(&intent).await;
    Ok(Json(intent))
}

/// Aggregate payment intents over a trailing window
#[utoipa::path(
    get,
    path = "/payments-tax/payment-analytics",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Payment analytics", body = PaymentAnalytics),
        (status = 400, description = "Invalid window or country", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn payment_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<PaymentAnalytics>, ServiceError> {
    let days = validate_days(query.days)?;
    let country = normalize_country_filter(query.country)?;

    let analytics = state
        .services
        .analytics
        .payment_analytics(country.as_deref(), days)
        .await;
    Ok(Json(analytics))
}

/// Aggregate tax calculations over a trailing window
#[utoipa::path(
    get,
    path = "/payments-tax/tax-analytics",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Tax analytics", body = TaxAnalytics),
        (status = 400, description = "Invalid window or country", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn tax_analytics(
    State(state): State<AppState>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<TaxAnalytics>, ServiceError> {
    let days = validate_days(query.days)?;
    let country = normalize_country_filter(query.country)?;

    let analytics = state
        .services
        .analytics
        .tax_analytics(country.as_deref(), days)
        .await;
    Ok(Json(analytics))
}
