//! Wire and domain types shared by the engine components and HTTP handlers.

pub mod cart;
pub mod currency;
pub mod fraud;
pub mod intent;
pub mod payment_method;
pub mod tax;

pub use cart::{BuyerRole, CartLine};
pub use currency::{CurrencyConversion, FxRateQuote, FxRatesRefreshed};
pub use fraud::{FraudAction, FraudAssessment, RiskLevel, UserHistory};
pub use intent::{EnhancedPaymentIntent, IntentRequest};
pub use payment_method::{OptimizationFocus, PaymentMethod, PaymentMethodSuggestion};
pub use tax::{ComplianceLevel, InvoiceRequirements, TaxCalculation, TaxLine, TaxType};

use rust_decimal::{Decimal, RoundingStrategy};

/// Rounds half away from zero to `dp` decimal places.
///
/// Every monetary amount in the engine goes through this helper so that line
/// taxes, totals and conversions agree on one rounding rule.
pub fn round_money(amount: Decimal, dp: u32) -> Decimal {
    amount.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Rounds a score to two decimals and clamps it into `0..=100`.
pub fn round_score(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    ((score.clamp(0.0, 100.0)) * 100.0).round() / 100.0
}
