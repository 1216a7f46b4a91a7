use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result of converting an amount between two ISO 4217 currencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CurrencyConversion {
    pub from_currency: String,
    pub to_currency: String,
    pub amount: Decimal,
    /// Rounded to the target currency's minor units
    pub converted_amount: Decimal,
    pub rate: Decimal,
    /// Set when the rate is older than the freshness threshold
    pub volatility_warning: bool,
    pub rate_as_of: DateTime<Utc>,
}

/// One exchange-rate quote pushed into the engine's rate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FxRateQuote {
    pub currency: String,
    /// Units of `currency` per one unit of the pivot currency
    pub per_pivot: Decimal,
    /// Defaults to the time the quote is applied
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

/// Outcome of a rate table refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FxRatesRefreshed {
    pub updated: usize,
    pub pivot_currency: String,
    pub rate_count: usize,
    pub stale_rates: usize,
}
