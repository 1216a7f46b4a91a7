use super::BuyerRole;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaxType {
    Vat,
    Gst,
    SalesTax,
    ConsumptionTax,
    ReverseCharge,
    Exempt,
}

/// One itemized tax line; `amount` is `base_amount * rate` rounded half-up to cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaxLine {
    pub sku: String,
    pub category: String,
    /// Fraction between 0 and 1 (0.19 = 19%)
    pub rate: Decimal,
    pub base_amount: Decimal,
    pub amount: Decimal,
    pub tax_type: TaxType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLevel {
    /// No regime applies
    None,
    /// Below the full-invoice threshold
    Simplified,
    /// A full, itemized tax invoice is mandatory
    Full,
}

/// What a compliant invoice for this calculation must carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InvoiceRequirements {
    pub required_fields: Vec<String>,
    pub threshold_amount: Option<Decimal>,
    pub mandatory: bool,
    pub compliance_level: ComplianceLevel,
}

impl InvoiceRequirements {
    pub fn not_applicable() -> Self {
        Self {
            required_fields: Vec::new(),
            threshold_amount: None,
            mandatory: false,
            compliance_level: ComplianceLevel::None,
        }
    }
}

/// Itemized tax for a cart.
///
/// `total_tax` is always the sum of the already rounded line amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaxCalculation {
    pub country: String,
    pub role: BuyerRole,
    /// Name of the applied regime, absent when the country has none configured
    pub regime: Option<String>,
    pub lines: Vec<TaxLine>,
    pub total_tax: Decimal,
    pub reverse_charge: bool,
    pub invoice: InvoiceRequirements,
    pub ai_insights: Vec<String>,
    pub calculated_at: DateTime<Utc>,
}

impl TaxCalculation {
    /// Net amount the tax was computed on.
    pub fn taxable_base(&self) -> Decimal {
        self.lines.iter().map(|line| line.base_amount).sum()
    }

    /// Tax over taxable base, or zero when nothing was taxed.
    pub fn effective_rate(&self) -> Decimal {
        let base = self.taxable_base();
        if base.is_zero() {
            Decimal::ZERO
        } else {
            self.total_tax / base
        }
    }
}
