use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use utoipa::ToSchema;

/// A ranked, priced payment option for one checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentMethod {
    #[serde(rename = "type")]
    pub method_type: String,
    pub scheme: String,
    pub processor: String,
    pub display_name: String,
    /// 0-100, higher is better
    pub score: f64,
    pub processing_fee: Decimal,
    pub settlement_days: u32,
    pub mobile_optimized: bool,
    /// 0-100
    pub security_score: f64,
    /// Currency the processor disburses funds in
    pub settlement_currency: String,
}

impl PaymentMethod {
    /// Total order over ranked methods: score descending, then lower fee,
    /// then fewer settlement days, then method type and scheme. Catalog
    /// schemes are unique, so no two offerings compare equal.
    pub fn rank_cmp(a: &PaymentMethod, b: &PaymentMethod) -> Ordering {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.processing_fee.cmp(&b.processing_fee))
            .then_with(|| a.settlement_days.cmp(&b.settlement_days))
            .then_with(|| a.method_type.cmp(&b.method_type))
            .then_with(|| a.scheme.cmp(&b.scheme))
    }

    /// True when the list satisfies the ranking order.
    pub fn is_ranked(methods: &[PaymentMethod]) -> bool {
        methods
            .windows(2)
            .all(|pair| Self::rank_cmp(&pair[0], &pair[1]) != Ordering::Greater)
    }
}

/// Ranked methods plus the explanation shown when nothing is eligible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentMethodSuggestion {
    pub methods: Vec<PaymentMethod>,
    /// Type of the first ranked method
    pub recommended: Option<String>,
    pub ai_insights: Vec<String>,
}

/// Display preference applied to an already ranked list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationFocus {
    Cost,
    Speed,
    Security,
    #[default]
    Balanced,
}
