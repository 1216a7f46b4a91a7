use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "StateSet Payments & Tax API",
        version = "1.0.0",
        description = r#"
# StateSet Payments & Tax Intent Engine

Server side of mobile checkout. One call composes tax, payment method
ranking, fraud gating and settlement currency conversion into a single
`EnhancedPaymentIntent` that decides whether checkout may proceed.

## Features

- **Tax Resolution**: Itemized VAT/GST/sales tax with reverse charge and invoice requirements
- **Payment Method Ranking**: Eligible methods scored on reliability, fees, settlement speed and security
- **Fraud Gating**: Risk score with an exact allow / verify / block mapping
- **Currency Conversion**: Pivot-based cross rates rounded to ISO 4217 minor units, refreshable at runtime
- **Analytics**: Rolling aggregates over issued intents and tax calculations

## Error Handling

Every error uses the same body:

```json
{
  "error": "Unprocessable Entity",
  "code": "invalid_jurisdiction",
  "message": "Invalid jurisdiction: 'XX' is not an ISO 3166-1 country",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```

A fraud block is not an error: the intent is returned with `payment_allowed = false`.
        "#,
        contact(
            name = "StateSet Support",
            email = "support@stateset.io",
            url = "https://stateset.io"
        ),
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Payments & Tax", description = "Payment intent composition and its component endpoints")
    ),
    paths(
        crate::handlers::payments_tax::compute_tax,
        crate::handlers::payments_tax::suggest_methods,
        crate::handlers::payments_tax::convert_currency,
        crate::handlers::payments_tax::assess_fraud_risk,
        crate::handlers::payments_tax::create_enhanced_payment_intent,
        crate::handlers::payments_tax::payment_analytics,
        crate::handlers::payments_tax::tax_analytics,
        crate::handlers::payments_tax::refresh_fx_rates,
        crate::handlers::health::payments_tax_health,
    ),
    components(
        schemas(
            // Requests
            crate::handlers::payments_tax::ComputeTaxRequest,
            crate::handlers::payments_tax::SuggestMethodsRequest,
            crate::handlers::payments_tax::ConvertCurrencyRequest,
            crate::handlers::payments_tax::AssessFraudRequest,
            crate::handlers::payments_tax::RefreshFxRatesRequest,
            crate::models::FxRateQuote,
            crate::models::IntentRequest,
            crate::models::CartLine,
            crate::models::BuyerRole,
            crate::models::UserHistory,
            crate::models::OptimizationFocus,

            // Responses
            crate::models::TaxCalculation,
            crate::models::TaxLine,
            crate::models::TaxType,
            crate::models::InvoiceRequirements,
            crate::models::ComplianceLevel,
            crate::models::PaymentMethod,
            crate::models::PaymentMethodSuggestion,
            crate::models::FraudAssessment,
            crate::models::RiskLevel,
            crate::models::FraudAction,
            crate::models::CurrencyConversion,
            crate::models::FxRatesRefreshed,
            crate::models::EnhancedPaymentIntent,
            crate::services::payments_tax::PaymentAnalytics,
            crate::services::payments_tax::TaxAnalytics,
            crate::services::payments_tax::analytics::CountryTaxSummary,
            crate::handlers::health::HealthResponse,
            crate::handlers::health::ComponentHealth,
            crate::handlers::health::ComponentStatus,

            // Error types
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
