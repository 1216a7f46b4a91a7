use super::{
    BuyerRole, CartLine, CurrencyConversion, FraudAssessment, OptimizationFocus, PaymentMethod,
    TaxCalculation, UserHistory,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

/// Checkout attempt submitted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct IntentRequest {
    pub items: Vec<CartLine>,
    pub country: String,
    pub currency: String,
    #[serde(default)]
    pub role: BuyerRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method_preference: Option<String>,
    #[serde(default)]
    pub optimize_for: OptimizationFocus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_history: Option<UserHistory>,
}

impl IntentRequest {
    /// Upper-cases codes and trims the preference so that equivalent requests
    /// canonicalize identically.
    pub fn normalized(mut self) -> Self {
        self.country = self.country.trim().to_ascii_uppercase();
        self.currency = self.currency.trim().to_ascii_uppercase();
        self.payment_method_preference = self
            .payment_method_preference
            .map(|p| p.trim().to_ascii_lowercase())
            .filter(|p| !p.is_empty());
        self
    }

    /// Deterministic intent id: `pi_` followed by the SHA-256 of the request's
    /// canonical JSON encoding.
    pub fn intent_id(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        format!("pi_{}", hex::encode(digest))
    }
}

/// The single composed decision that gates checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EnhancedPaymentIntent {
    pub id: String,
    pub subtotal: Decimal,
    /// Absent only when tax resolution ran out of time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_calculation: Option<TaxCalculation>,
    pub total_with_tax: Decimal,
    pub payment_methods: Vec<PaymentMethod>,
    /// Type of the method the fraud verdict was computed against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_payment_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_conversion: Option<CurrencyConversion>,
    pub fraud_assessment: FraudAssessment,
    pub optimization_focus: OptimizationFocus,
    pub country: String,
    pub currency: String,
    pub role: BuyerRole,
    pub payment_allowed: bool,
    /// True when any component was replaced by its degradation policy
    pub degraded: bool,
    pub insights: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
