use super::reference::is_iso_country;
use super::validation::validate_lines;
use crate::config::{TaxConfig, TaxRegimeConfig};
use crate::errors::ServiceError;
use crate::models::{
    round_money, BuyerRole, CartLine, ComplianceLevel, InvoiceRequirements, TaxCalculation,
    TaxLine, TaxType,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Resolves itemized tax for a cart.
#[async_trait]
pub trait TaxResolver: Send + Sync {
    async fn compute(
        &self,
        country: &str,
        lines: &[CartLine],
        role: BuyerRole,
    ) -> Result<TaxCalculation, ServiceError>;
}

/// Tax rules of one country.
#[derive(Debug, Clone)]
pub struct TaxRegime {
    pub country: String,
    pub name: String,
    pub tax_type: TaxType,
    pub standard_rate: Decimal,
    /// Category-specific rates keyed by lowercase category; anything not
    /// listed uses `standard_rate`
    pub category_rates: HashMap<String, Decimal>,
    /// B2B supplies are reverse charged to the buyer
    pub b2b_reverse_charge: bool,
    /// Gross amount from which a full invoice is mandatory
    pub invoice_threshold: Decimal,
    pub required_fields: Vec<String>,
}

impl TaxRegime {
    fn new(
        country: &str,
        name: &str,
        tax_type: TaxType,
        standard_rate: Decimal,
        invoice_threshold: Decimal,
    ) -> Self {
        Self {
            country: country.to_string(),
            name: name.to_string(),
            tax_type,
            standard_rate,
            category_rates: HashMap::new(),
            b2b_reverse_charge: false,
            invoice_threshold,
            required_fields: FULL_INVOICE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }

    fn with_rate(mut self, category: &str, rate: Decimal) -> Self {
        self.category_rates.insert(category.to_string(), rate);
        self
    }

    fn with_reverse_charge(mut self) -> Self {
        self.b2b_reverse_charge = true;
        self
    }

    pub fn rate_for(&self, category: &str) -> Decimal {
        self.category_rates
            .get(category.trim().to_ascii_lowercase().as_str())
            .copied()
            .unwrap_or(self.standard_rate)
    }
}

impl From<&TaxRegimeConfig> for TaxRegime {
    fn from(config: &TaxRegimeConfig) -> Self {
        let mut regime = TaxRegime::new(
            &config.country.to_ascii_uppercase(),
            &config.name,
            config.tax_type,
            config.standard_rate,
            config.invoice_threshold,
        );
        for (category, rate) in &config.category_rates {
            regime = regime.with_rate(&category.trim().to_ascii_lowercase(), *rate);
        }
        regime.b2b_reverse_charge = config.b2b_reverse_charge;
        if let Some(fields) = &config.required_fields {
            regime.required_fields = fields.clone();
        }
        regime
    }
}

const FULL_INVOICE_FIELDS: &[&str] = &[
    "supplier_name",
    "supplier_address",
    "supplier_tax_id",
    "invoice_number",
    "issue_date",
    "buyer_name",
    "buyer_address",
    "line_items",
    "net_amount",
    "tax_rate",
    "tax_amount",
];

const SIMPLIFIED_INVOICE_FIELDS: &[&str] = &[
    "supplier_name",
    "issue_date",
    "line_items",
    "gross_amount",
    "tax_rate",
];

const REVERSE_CHARGE_FIELDS: &[&str] = &["buyer_vat_id", "reverse_charge_notice"];

fn eu_vat(
    country: &str,
    standard: Decimal,
    reduced_food: Decimal,
    reduced_books: Decimal,
    threshold: Decimal,
) -> TaxRegime {
    TaxRegime::new(country, "EU VAT", TaxType::Vat, standard, threshold)
        .with_rate("food", reduced_food)
        .with_rate("books", reduced_books)
        .with_rate("medical", reduced_food)
        .with_reverse_charge()
}

/// Built-in regime table.
pub fn reference_regimes() -> Vec<TaxRegime> {
    vec![
        eu_vat("DE", dec!(0.19), dec!(0.07), dec!(0.07), dec!(250)),
        eu_vat("FR", dec!(0.20), dec!(0.055), dec!(0.055), dec!(150)),
        eu_vat("NL", dec!(0.21), dec!(0.09), dec!(0.09), dec!(100)),
        eu_vat("IT", dec!(0.22), dec!(0.10), dec!(0.04), dec!(400)),
        eu_vat("ES", dec!(0.21), dec!(0.10), dec!(0.04), dec!(400)),
        eu_vat("AT", dec!(0.20), dec!(0.10), dec!(0.10), dec!(400)),
        eu_vat("BE", dec!(0.21), dec!(0.06), dec!(0.06), dec!(100)),
        eu_vat("IE", dec!(0.23), dec!(0), dec!(0), dec!(100)),
        eu_vat("PL", dec!(0.23), dec!(0.05), dec!(0.05), dec!(450)),
        eu_vat("SE", dec!(0.25), dec!(0.12), dec!(0.06), dec!(4000)),
        TaxRegime::new("GB", "UK VAT", TaxType::Vat, dec!(0.20), dec!(250))
            .with_rate("food", dec!(0))
            .with_rate("books", dec!(0))
            .with_rate("children_clothing", dec!(0)),
        TaxRegime::new("CH", "Swiss VAT", TaxType::Vat, dec!(0.081), dec!(400))
            .with_rate("food", dec!(0.026))
            .with_rate("books", dec!(0.026))
            .with_rate("medical", dec!(0.026)),
        TaxRegime::new("NO", "Norwegian VAT", TaxType::Vat, dec!(0.25), dec!(1000))
            .with_rate("food", dec!(0.15)),
        TaxRegime::new("CA", "Canadian GST", TaxType::Gst, dec!(0.05), dec!(30))
            .with_rate("food", dec!(0)),
        TaxRegime::new("AU", "Australian GST", TaxType::Gst, dec!(0.10), dec!(82.50))
            .with_rate("food", dec!(0))
            .with_rate("medical", dec!(0)),
        TaxRegime::new("NZ", "New Zealand GST", TaxType::Gst, dec!(0.15), dec!(200)),
        TaxRegime::new("IN", "Indian GST", TaxType::Gst, dec!(0.18), dec!(200))
            .with_rate("food", dec!(0.05))
            .with_rate("books", dec!(0))
            .with_rate("electronics", dec!(0.18)),
        TaxRegime::new("SG", "Singapore GST", TaxType::Gst, dec!(0.09), dec!(1000)),
        TaxRegime::new("JP", "Japanese Consumption Tax", TaxType::ConsumptionTax, dec!(0.10), dec!(30000))
            .with_rate("food", dec!(0.08)),
        TaxRegime::new("US", "US Sales Tax (national average)", TaxType::SalesTax, dec!(0.0725), dec!(1000))
            .with_rate("food", dec!(0.02))
            .with_rate("medical", dec!(0)),
    ]
}

/// Regime-table backed tax resolver.
#[derive(Clone)]
pub struct TaxService {
    regimes: Arc<HashMap<String, TaxRegime>>,
}

impl Default for TaxService {
    fn default() -> Self {
        Self::new()
    }
}

impl TaxService {
    pub fn new() -> Self {
        Self::with_regimes(reference_regimes())
    }

    /// Reference regimes (unless disabled) overlaid with the configured ones.
    pub fn from_config(config: &TaxConfig) -> Self {
        let mut regimes = if config.use_reference_regimes {
            reference_regimes()
        } else {
            Vec::new()
        };
        regimes.extend(config.regimes.iter().map(TaxRegime::from));
        Self::with_regimes(regimes)
    }

    /// Later regimes replace earlier ones for the same country.
    pub fn with_regimes(regimes: Vec<TaxRegime>) -> Self {
        let regimes = regimes
            .into_iter()
            .map(|r| (r.country.clone(), r))
            .collect();
        Self {
            regimes: Arc::new(regimes),
        }
    }

    pub fn regime_count(&self) -> usize {
        self.regimes.len()
    }

    pub fn regime(&self, country: &str) -> Option<&TaxRegime> {
        self.regimes.get(country)
    }

    fn no_regime(country: &str, role: BuyerRole) -> TaxCalculation {
        TaxCalculation {
            country: country.to_string(),
            role,
            regime: None,
            lines: Vec::new(),
            total_tax: Decimal::ZERO,
            reverse_charge: false,
            invoice: InvoiceRequirements::not_applicable(),
            ai_insights: vec![format!("No tax applicable: {country} has no configured tax regime")],
            calculated_at: Utc::now(),
        }
    }

    fn calculate(regime: &TaxRegime, lines: &[CartLine], role: BuyerRole) -> TaxCalculation {
        let reverse_charge = role == BuyerRole::B2B && regime.b2b_reverse_charge;
        let mut reduced_lines = 0usize;

        let tax_lines: Vec<TaxLine> = lines
            .iter()
            .map(|line| {
                let base_amount = line.line_total();
                let (rate, tax_type) = if reverse_charge {
                    (Decimal::ZERO, TaxType::ReverseCharge)
                } else {
                    let rate = regime.rate_for(&line.category);
                    if rate != regime.standard_rate {
                        reduced_lines += 1;
                    }
                    let tax_type = if rate.is_zero() {
                        TaxType::Exempt
                    } else {
                        regime.tax_type
                    };
                    (rate, tax_type)
                };
                TaxLine {
                    sku: line.sku.clone(),
                    category: line.category.clone(),
                    rate,
                    base_amount,
                    amount: round_money(base_amount * rate, 2),
                    tax_type,
                }
            })
            .collect();

        let total_tax: Decimal = tax_lines.iter().map(|l| l.amount).sum();
        let net: Decimal = tax_lines.iter().map(|l| l.base_amount).sum();
        let gross = net + total_tax;

        let mandatory = reverse_charge || gross >= regime.invoice_threshold;
        let mut required_fields: Vec<String> = if mandatory {
            regime.required_fields.clone()
        } else {
            SIMPLIFIED_INVOICE_FIELDS.iter().map(|f| f.to_string()).collect()
        };
        if reverse_charge {
            required_fields.extend(REVERSE_CHARGE_FIELDS.iter().map(|f| f.to_string()));
        }

        let mut insights = vec![format!(
            "Applied {} at standard rate {}%",
            regime.name,
            (regime.standard_rate * dec!(100)).normalize()
        )];
        if reverse_charge {
            insights.push(
                "Reverse charge applies: the business buyer self-accounts for the tax".to_string(),
            );
        } else if reduced_lines > 0 {
            insights.push(format!(
                "{reduced_lines} line(s) taxed at a reduced or zero rate"
            ));
        }
        if mandatory {
            insights.push(format!(
                "Full tax invoice required (threshold {})",
                regime.invoice_threshold
            ));
        }

        TaxCalculation {
            country: regime.country.clone(),
            role,
            regime: Some(regime.name.clone()),
            lines: tax_lines,
            total_tax,
            reverse_charge,
            invoice: InvoiceRequirements {
                required_fields,
                threshold_amount: Some(regime.invoice_threshold),
                mandatory,
                compliance_level: if mandatory {
                    ComplianceLevel::Full
                } else {
                    ComplianceLevel::Simplified
                },
            },
            ai_insights: insights,
            calculated_at: Utc::now(),
        }
    }
}

#[async_trait]
impl TaxResolver for TaxService {
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    async fn compute(
        &self,
        country: &str,
        lines: &[CartLine],
        role: BuyerRole,
    ) -> Result<TaxCalculation, ServiceError> {
        validate_lines(lines)?;
        if !is_iso_country(country) {
            return Err(ServiceError::InvalidJurisdiction(format!(
                "'{country}' is not an ISO 3166-1 country"
            )));
        }

        let calculation = match self.regimes.get(country) {
            Some(regime) => Self::calculate(regime, lines, role),
            None => {
                debug!(country, "no tax regime configured");
                Self::no_regime(country, role)
            }
        };

        info!(
            country,
            role = role.as_str(),
            total_tax = %calculation.total_tax,
            reverse_charge = calculation.reverse_charge,
            "tax computed"
        );
        Ok(calculation)
    }
}
