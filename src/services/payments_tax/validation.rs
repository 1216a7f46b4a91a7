//! Input checks shared by the standalone endpoints and the intent composer.
//! Every failure is an `InvalidRequest` raised before any component runs.

use super::reference::is_iso_currency;
use crate::errors::ServiceError;
use crate::models::CartLine;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Upper bounds on accepted money inputs. A cart at every limit still sums,
/// taxes and prices without overflowing `Decimal`.
pub const MAX_LINES: usize = 1_000;
pub const MAX_QUANTITY: i64 = 1_000_000;
pub const MAX_UNIT_PRICE: Decimal = dec!(1000000000);
pub const MAX_AMOUNT: Decimal = dec!(1000000000000000000);

pub const MIN_ANALYTICS_DAYS: u32 = 1;
pub const MAX_ANALYTICS_DAYS: u32 = 365;
pub const DEFAULT_ANALYTICS_DAYS: u32 = 30;

pub fn validate_lines(lines: &[CartLine]) -> Result<(), ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::InvalidRequest(
            "items must contain at least one line".to_string(),
        ));
    }
    if lines.len() > MAX_LINES {
        return Err(ServiceError::InvalidRequest(format!(
            "items must contain at most {MAX_LINES} lines"
        )));
    }
    for line in lines {
        if line.sku.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("sku must not be empty".to_string()));
        }
        if line.quantity <= 0 || line.quantity > MAX_QUANTITY {
            return Err(ServiceError::InvalidRequest(format!(
                "quantity for '{}' must be between 1 and {MAX_QUANTITY}",
                line.sku
            )));
        }
        if line.unit_price <= Decimal::ZERO || line.unit_price > MAX_UNIT_PRICE {
            return Err(ServiceError::InvalidRequest(format!(
                "price for '{}' must be positive and at most {MAX_UNIT_PRICE}",
                line.sku
            )));
        }
    }
    Ok(())
}

/// Shape check only; whether the code names a real country is the tax
/// resolver's concern.
pub fn validate_country_format(country: &str) -> Result<(), ServiceError> {
    if country.len() == 2 && country.bytes().all(|b| b.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(ServiceError::InvalidRequest(format!(
            "country '{country}' must be a 2-letter code"
        )))
    }
}

pub fn validate_currency(currency: &str) -> Result<(), ServiceError> {
    if is_iso_currency(currency) {
        Ok(())
    } else {
        Err(ServiceError::InvalidRequest(format!(
            "currency '{currency}' is not a known ISO 4217 code"
        )))
    }
}

pub fn validate_positive_amount(field: &str, amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        Err(ServiceError::InvalidRequest(format!(
            "{field} must be positive"
        )))
    } else if amount > MAX_AMOUNT {
        Err(ServiceError::InvalidRequest(format!(
            "{field} must be at most {MAX_AMOUNT}"
        )))
    } else {
        Ok(())
    }
}

/// Resolves the analytics window, defaulting to 30 days.
pub fn validate_days(days: Option<u32>) -> Result<u32, ServiceError> {
    let days = days.unwrap_or(DEFAULT_ANALYTICS_DAYS);
    if (MIN_ANALYTICS_DAYS..=MAX_ANALYTICS_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ServiceError::InvalidRequest(format!(
            "days must be between {MIN_ANALYTICS_DAYS} and {MAX_ANALYTICS_DAYS}"
        )))
    }
}
