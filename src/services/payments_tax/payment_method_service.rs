use super::reference::minor_units;
use super::validation::{validate_country_format, validate_currency, validate_positive_amount};
use crate::config::{CatalogConfig, CatalogMethodConfig, RankingWeights};
use crate::errors::ServiceError;
use crate::models::{
    round_money, round_score, BuyerRole, OptimizationFocus, PaymentMethod,
    PaymentMethodSuggestion,
};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Longest settlement delay that still earns settlement points.
const MAX_SETTLEMENT_DAYS: f64 = 7.0;
/// Effective fee ratio at which the fee component reaches zero.
const MAX_FEE_RATIO: f64 = 0.10;

const EU_SEPA: &[&str] = &[
    "AT", "BE", "DE", "ES", "FI", "FR", "IE", "IT", "LU", "NL", "PL", "PT", "SE",
];

/// Ranks the payment methods eligible for a checkout.
#[async_trait]
pub trait PaymentMethodRanker: Send + Sync {
    async fn rank(
        &self,
        country: &str,
        currency: &str,
        cart_total: Decimal,
        role: BuyerRole,
    ) -> Result<PaymentMethodSuggestion, ServiceError>;
}

/// One offering in the payment catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub method_type: String,
    pub scheme: String,
    pub processor: String,
    pub display_name: String,
    /// `None` means available everywhere
    pub countries: Option<Vec<String>>,
    pub currencies: Option<Vec<String>>,
    pub roles: Vec<BuyerRole>,
    pub fee_pct: Decimal,
    pub fee_fixed: Decimal,
    pub settlement_days: u32,
    pub mobile_optimized: bool,
    pub security_score: f64,
    pub reliability: f64,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    /// Fixed disbursement currency; `None` settles in the checkout currency
    pub settles_in: Option<String>,
}

const ALL_ROLES: &[BuyerRole] = &[BuyerRole::B2C, BuyerRole::B2B];
const CONSUMER: &[BuyerRole] = &[BuyerRole::B2C];
const BUSINESS: &[BuyerRole] = &[BuyerRole::B2B];

impl CatalogEntry {
    fn is_eligible(&self, country: &str, currency: &str, total: Decimal, role: BuyerRole) -> bool {
        self.countries
            .as_ref()
            .map_or(true, |c| c.iter().any(|code| code == country))
            && self.currencies
                .as_ref()
                .map_or(true, |c| c.iter().any(|code| code == currency))
            && self.roles.contains(&role)
            && self.min_amount.map_or(true, |min| total >= min)
            && self.max_amount.map_or(true, |max| total <= max)
    }

    fn fee(&self, total: Decimal, currency: &str) -> Decimal {
        let dp = minor_units(currency).unwrap_or(2);
        let fee = total
            .checked_mul(self.fee_pct)
            .and_then(|fee| fee.checked_add(self.fee_fixed))
            .unwrap_or(Decimal::MAX);
        round_money(fee, dp)
    }
}

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|code| code.to_string()).collect()
}

impl From<&CatalogMethodConfig> for CatalogEntry {
    fn from(config: &CatalogMethodConfig) -> Self {
        let upper = |list: &Vec<String>| -> Vec<String> {
            list.iter().map(|code| code.trim().to_ascii_uppercase()).collect()
        };
        Self {
            method_type: config.method_type.clone(),
            scheme: config.scheme.clone(),
            processor: config.processor.clone(),
            display_name: config.display_name.clone(),
            countries: config.countries.as_ref().map(upper),
            currencies: config.currencies.as_ref().map(upper),
            roles: config.roles.clone(),
            fee_pct: config.fee_pct,
            fee_fixed: config.fee_fixed,
            settlement_days: config.settlement_days,
            mobile_optimized: config.mobile_optimized,
            security_score: config.security_score,
            reliability: config.reliability,
            min_amount: config.min_amount,
            max_amount: config.max_amount,
            settles_in: config
                .settles_in
                .as_ref()
                .map(|code| code.trim().to_ascii_uppercase()),
        }
    }
}

/// Built-in payment catalog.
pub fn reference_catalog() -> Vec<CatalogEntry> {
    vec![
        CatalogEntry {
            method_type: "card".into(),
            scheme: "visa_mastercard".into(),
            processor: "stripe".into(),
            display_name: "Credit / Debit Card".into(),
            countries: None,
            currencies: None,
            roles: ALL_ROLES.to_vec(),
            fee_pct: dec!(0.029),
            fee_fixed: dec!(0.30),
            settlement_days: 2,
            mobile_optimized: true,
            security_score: 85.0,
            reliability: 98.0,
            min_amount: None,
            max_amount: None,
            settles_in: None,
        },
        CatalogEntry {
            method_type: "card".into(),
            scheme: "amex".into(),
            processor: "stripe".into(),
            display_name: "American Express".into(),
            countries: None,
            currencies: None,
            roles: ALL_ROLES.to_vec(),
            fee_pct: dec!(0.035),
            fee_fixed: dec!(0.30),
            settlement_days: 3,
            mobile_optimized: true,
            security_score: 88.0,
            reliability: 96.0,
            min_amount: None,
            max_amount: None,
            settles_in: None,
        },
        CatalogEntry {
            method_type: "wallet".into(),
            scheme: "apple_pay".into(),
            processor: "stripe".into(),
            display_name: "Apple Pay".into(),
            countries: None,
            currencies: None,
            roles: CONSUMER.to_vec(),
            fee_pct: dec!(0.029),
            fee_fixed: dec!(0.30),
            settlement_days: 2,
            mobile_optimized: true,
            security_score: 95.0,
            reliability: 97.0,
            min_amount: None,
            max_amount: None,
            settles_in: None,
        },
        CatalogEntry {
            method_type: "wallet".into(),
            scheme: "google_pay".into(),
            processor: "stripe".into(),
            display_name: "Google Pay".into(),
            countries: None,
            currencies: None,
            roles: CONSUMER.to_vec(),
            fee_pct: dec!(0.029),
            fee_fixed: dec!(0.30),
            settlement_days: 2,
            mobile_optimized: true,
            security_score: 93.0,
            reliability: 97.0,
            min_amount: None,
            max_amount: None,
            settles_in: None,
        },
        CatalogEntry {
            method_type: "wallet".into(),
            scheme: "paypal".into(),
            processor: "paypal".into(),
            display_name: "PayPal".into(),
            countries: None,
            currencies: None,
            roles: ALL_ROLES.to_vec(),
            fee_pct: dec!(0.0349),
            fee_fixed: dec!(0.49),
            settlement_days: 1,
            mobile_optimized: true,
            security_score: 85.0,
            reliability: 95.0,
            min_amount: None,
            max_amount: None,
            settles_in: None,
        },
        CatalogEntry {
            method_type: "bank_transfer".into(),
            scheme: "sepa_debit".into(),
            processor: "stripe".into(),
            display_name: "SEPA Direct Debit".into(),
            countries: Some(codes(EU_SEPA)),
            currencies: Some(codes(&["EUR"])),
            roles: ALL_ROLES.to_vec(),
            fee_pct: dec!(0.008),
            fee_fixed: dec!(0),
            settlement_days: 4,
            mobile_optimized: false,
            security_score: 80.0,
            reliability: 94.0,
            min_amount: None,
            max_amount: None,
            settles_in: None,
        },
        CatalogEntry {
            method_type: "bank_transfer".into(),
            scheme: "ideal".into(),
            processor: "adyen".into(),
            display_name: "iDEAL".into(),
            countries: Some(codes(&["NL"])),
            currencies: Some(codes(&["EUR"])),
            roles: ALL_ROLES.to_vec(),
            fee_pct: dec!(0),
            fee_fixed: dec!(0.29),
            settlement_days: 1,
            mobile_optimized: true,
            security_score: 90.0,
            reliability: 97.0,
            min_amount: None,
            max_amount: None,
            settles_in: None,
        },
        CatalogEntry {
            method_type: "bank_transfer".into(),
            scheme: "ach_debit".into(),
            processor: "stripe".into(),
            display_name: "ACH Direct Debit".into(),
            countries: Some(codes(&["US"])),
            currencies: Some(codes(&["USD"])),
            roles: ALL_ROLES.to_vec(),
            fee_pct: dec!(0.008),
            fee_fixed: dec!(0),
            settlement_days: 4,
            mobile_optimized: false,
            security_score: 80.0,
            reliability: 95.0,
            min_amount: None,
            max_amount: Some(dec!(50000)),
            settles_in: None,
        },
        CatalogEntry {
            method_type: "bank_transfer".into(),
            scheme: "upi".into(),
            processor: "razorpay".into(),
            display_name: "UPI".into(),
            countries: Some(codes(&["IN"])),
            currencies: Some(codes(&["INR"])),
            roles: ALL_ROLES.to_vec(),
            fee_pct: dec!(0),
            fee_fixed: dec!(0),
            settlement_days: 1,
            mobile_optimized: true,
            security_score: 85.0,
            reliability: 94.0,
            min_amount: None,
            max_amount: Some(dec!(100000)),
            settles_in: None,
        },
        CatalogEntry {
            method_type: "bank_transfer".into(),
            scheme: "wire".into(),
            processor: "treasury".into(),
            display_name: "Wire Transfer".into(),
            countries: None,
            currencies: None,
            roles: BUSINESS.to_vec(),
            fee_pct: dec!(0.001),
            fee_fixed: dec!(15),
            settlement_days: 3,
            mobile_optimized: false,
            security_score: 92.0,
            reliability: 99.0,
            min_amount: Some(dec!(500)),
            max_amount: None,
            settles_in: None,
        },
        CatalogEntry {
            method_type: "bnpl".into(),
            scheme: "klarna".into(),
            processor: "klarna".into(),
            display_name: "Klarna Pay Later".into(),
            countries: Some(codes(&["AT", "DE", "FI", "GB", "NL", "NO", "SE", "US"])),
            currencies: Some(codes(&["EUR", "GBP", "NOK", "SEK", "USD"])),
            roles: CONSUMER.to_vec(),
            fee_pct: dec!(0.0499),
            fee_fixed: dec!(0.35),
            settlement_days: 3,
            mobile_optimized: true,
            security_score: 82.0,
            reliability: 93.0,
            min_amount: Some(dec!(35)),
            max_amount: Some(dec!(10000)),
            settles_in: None,
        },
        CatalogEntry {
            method_type: "bnpl".into(),
            scheme: "afterpay".into(),
            processor: "afterpay".into(),
            display_name: "Afterpay".into(),
            countries: Some(codes(&["AU", "CA", "GB", "NZ", "US"])),
            currencies: Some(codes(&["AUD", "CAD", "GBP", "NZD", "USD"])),
            roles: CONSUMER.to_vec(),
            fee_pct: dec!(0.06),
            fee_fixed: dec!(0.30),
            settlement_days: 2,
            mobile_optimized: true,
            security_score: 80.0,
            reliability: 92.0,
            min_amount: Some(dec!(1)),
            max_amount: Some(dec!(2000)),
            settles_in: None,
        },
        CatalogEntry {
            method_type: "crypto".into(),
            scheme: "usdc".into(),
            processor: "coinbase".into(),
            display_name: "USDC".into(),
            countries: None,
            currencies: None,
            roles: ALL_ROLES.to_vec(),
            fee_pct: dec!(0.015),
            fee_fixed: dec!(0),
            settlement_days: 1,
            mobile_optimized: true,
            security_score: 70.0,
            reliability: 85.0,
            min_amount: None,
            max_amount: None,
            settles_in: Some("USD".into()),
        },
    ]
}

/// Catalog-backed ranker with configurable score weights.
#[derive(Clone)]
pub struct PaymentMethodService {
    catalog: Arc<Vec<CatalogEntry>>,
    weights: RankingWeights,
}

impl PaymentMethodService {
    pub fn new(weights: RankingWeights) -> Self {
        Self::with_catalog(reference_catalog(), weights)
    }

    /// Reference catalog (unless disabled) overlaid with the configured
    /// methods; a configured scheme replaces the reference entry in place.
    pub fn from_config(config: &CatalogConfig, weights: RankingWeights) -> Self {
        let mut catalog = if config.use_reference_catalog {
            reference_catalog()
        } else {
            Vec::new()
        };
        for method in &config.methods {
            let entry = CatalogEntry::from(method);
            match catalog.iter_mut().find(|e| e.scheme == entry.scheme) {
                Some(existing) => *existing = entry,
                None => catalog.push(entry),
            }
        }
        Self::with_catalog(catalog, weights)
    }

    pub fn with_catalog(catalog: Vec<CatalogEntry>, weights: RankingWeights) -> Self {
        Self {
            catalog: Arc::new(catalog),
            weights,
        }
    }

    pub fn catalog_size(&self) -> usize {
        self.catalog.len()
    }

    fn score(&self, entry: &CatalogEntry, fee: Decimal, total: Decimal) -> f64 {
        let w = &self.weights;
        let weight_sum = w.total();
        if weight_sum <= 0.0 {
            return 0.0;
        }

        let fee_ratio = if total.is_zero() {
            1.0
        } else {
            fee.checked_div(total)
                .and_then(|ratio| ratio.to_f64())
                .unwrap_or(1.0)
        };
        let fee_component = 1.0 - (fee_ratio / MAX_FEE_RATIO).min(1.0);
        let settlement_component =
            1.0 - (f64::from(entry.settlement_days) / MAX_SETTLEMENT_DAYS).min(1.0);
        let mobile_component = if entry.mobile_optimized { 1.0 } else { 0.0 };

        let weighted = w.reliability * entry.reliability / 100.0
            + w.mobile * mobile_component
            + w.fee * fee_component
            + w.settlement * settlement_component
            + w.security * entry.security_score / 100.0;

        round_score(100.0 * weighted / weight_sum)
    }
}

#[async_trait]
impl PaymentMethodRanker for PaymentMethodService {
    #[instrument(skip(self), fields(cart_total = %cart_total))]
    async fn rank(
        &self,
        country: &str,
        currency: &str,
        cart_total: Decimal,
        role: BuyerRole,
    ) -> Result<PaymentMethodSuggestion, ServiceError> {
        validate_country_format(country)?;
        validate_currency(currency)?;
        validate_positive_amount("cart_total", cart_total)?;

        let mut methods: Vec<PaymentMethod> = self
            .catalog
            .iter()
            .filter(|entry| entry.is_eligible(country, currency, cart_total, role))
            .map(|entry| {
                let processing_fee = entry.fee(cart_total, currency);
                PaymentMethod {
                    method_type: entry.method_type.clone(),
                    scheme: entry.scheme.clone(),
                    processor: entry.processor.clone(),
                    display_name: entry.display_name.clone(),
                    score: self.score(entry, processing_fee, cart_total),
                    processing_fee,
                    settlement_days: entry.settlement_days,
                    mobile_optimized: entry.mobile_optimized,
                    security_score: entry.security_score,
                    settlement_currency: entry
                        .settles_in
                        .clone()
                        .unwrap_or_else(|| currency.to_string()),
                }
            })
            .collect();
        methods.sort_by(PaymentMethod::rank_cmp);

        debug!(country, currency, eligible = methods.len(), "payment methods ranked");
        Ok(suggestion(methods, country, currency, cart_total))
    }
}

fn suggestion(
    methods: Vec<PaymentMethod>,
    country: &str,
    currency: &str,
    cart_total: Decimal,
) -> PaymentMethodSuggestion {
    let mut ai_insights = Vec::new();
    match methods.first() {
        None => ai_insights.push(format!(
            "No payment methods are eligible for {country} in {currency} at {cart_total}"
        )),
        Some(top) => {
            ai_insights.push(format!(
                "Recommended: {} (score {:.2})",
                top.display_name, top.score
            ));
            if let Some(cheapest) = methods.iter().min_by(|a, b| {
                a.processing_fee
                    .cmp(&b.processing_fee)
                    .then_with(|| PaymentMethod::rank_cmp(a, b))
            }) {
                if cheapest.scheme != top.scheme {
                    ai_insights.push(format!(
                        "Lowest fee: {} at {} {}",
                        cheapest.display_name, cheapest.processing_fee, currency
                    ));
                }
            }
            ai_insights.push(format!(
                "{} method(s) available in {country} for {currency}",
                methods.len()
            ));
        }
    }

    PaymentMethodSuggestion {
        recommended: methods.first().map(|m| m.method_type.clone()),
        methods,
        ai_insights,
    }
}

/// Re-scores an already ranked list towards `focus` and restores the ranking
/// order. `Balanced` returns the list unchanged.
pub fn reweight(mut methods: Vec<PaymentMethod>, focus: OptimizationFocus) -> Vec<PaymentMethod> {
    if focus == OptimizationFocus::Balanced || methods.is_empty() {
        return methods;
    }

    let max_fee = methods
        .iter()
        .map(|m| m.processing_fee)
        .max()
        .unwrap_or(Decimal::ZERO);

    for method in methods.iter_mut() {
        let attribute = match focus {
            OptimizationFocus::Cost => {
                if max_fee.is_zero() {
                    100.0
                } else {
                    100.0 * (1.0 - (method.processing_fee / max_fee).to_f64().unwrap_or(1.0))
                }
            }
            OptimizationFocus::Speed => {
                100.0 * (1.0 - (f64::from(method.settlement_days) / MAX_SETTLEMENT_DAYS).min(1.0))
            }
            OptimizationFocus::Security => method.security_score,
            OptimizationFocus::Balanced => method.score,
        };
        method.score = round_score(0.5 * method.score + 0.5 * attribute);
    }

    methods.sort_by(PaymentMethod::rank_cmp);
    methods
}
