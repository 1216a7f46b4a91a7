use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One cart line as submitted for a checkout attempt.
///
/// The price is implicitly denominated in the checkout currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub sku: String,
    pub category: String,
    #[serde(rename = "price", alias = "unit_price")]
    pub unit_price: Decimal,
    pub quantity: i64,
}

impl CartLine {
    pub fn new(
        sku: impl Into<String>,
        category: impl Into<String>,
        unit_price: Decimal,
        quantity: i64,
    ) -> Self {
        Self {
            sku: sku.into(),
            category: category.into(),
            unit_price,
            quantity,
        }
    }

    /// Unrounded net amount of the line. Callers validate the line first;
    /// the price and quantity limits keep the product in range.
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Buyer role; drives tax treatment and payment method eligibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum BuyerRole {
    #[serde(rename = "B2B", alias = "b2b")]
    B2B,
    #[default]
    #[serde(rename = "B2C", alias = "b2c")]
    B2C,
}

impl BuyerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuyerRole::B2B => "B2B",
            BuyerRole::B2C => "B2C",
        }
    }
}
