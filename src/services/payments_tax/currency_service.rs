use super::reference::minor_units;
use super::validation::{validate_currency, validate_positive_amount};
use crate::config::FxConfig;
use crate::errors::ServiceError;
use crate::models::{round_money, CurrencyConversion, FxRateQuote};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Decimal places kept on reported exchange rates.
const RATE_DP: u32 = 8;
const MAX_FRESHNESS_SECS: u64 = 365 * 24 * 3600;

/// Converts amounts between ISO 4217 currencies.
#[async_trait]
pub trait CurrencyConverter: Send + Sync {
    async fn convert(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<CurrencyConversion, ServiceError>;
}

/// Units of a currency per one unit of the pivot currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotRate {
    pub per_pivot: Decimal,
    pub as_of: DateTime<Utc>,
}

fn reference_rates() -> Vec<(&'static str, Decimal)> {
    vec![
        ("AED", dec!(3.6725)),
        ("AUD", dec!(1.52)),
        ("BHD", dec!(0.376)),
        ("BRL", dec!(5.05)),
        ("CAD", dec!(1.36)),
        ("CHF", dec!(0.88)),
        ("CNY", dec!(7.24)),
        ("DKK", dec!(6.87)),
        ("EUR", dec!(0.92)),
        ("GBP", dec!(0.79)),
        ("INR", dec!(83.30)),
        ("JOD", dec!(0.709)),
        ("JPY", dec!(151.50)),
        ("KRW", dec!(1350)),
        ("KWD", dec!(0.307)),
        ("MXN", dec!(17.10)),
        ("NOK", dec!(10.80)),
        ("NZD", dec!(1.66)),
        ("OMR", dec!(0.385)),
        ("PLN", dec!(3.98)),
        ("SEK", dec!(10.70)),
        ("SGD", dec!(1.35)),
        ("TND", dec!(3.12)),
    ]
}

fn configured_quotes(config: &FxConfig) -> Vec<FxRateQuote> {
    config
        .rates
        .iter()
        .map(|(code, rate)| FxRateQuote {
            currency: code.clone(),
            per_pivot: rate.per_pivot,
            as_of: rate.as_of,
        })
        .collect()
}

/// Periodically re-reads the configured quotes through `load` and applies
/// them. Load or validation failures keep the current table and are logged.
pub fn spawn_rate_reload<F, E>(
    service: Arc<CurrencyService>,
    every: std::time::Duration,
    load: F,
) -> JoinHandle<()>
where
    F: Fn() -> Result<FxConfig, E> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; the table is already seeded
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match load() {
                Ok(config) => {
                    if let Err(err) = service.reload(&config).await {
                        warn!(error = %err, "rejected reloaded exchange rates");
                    }
                }
                Err(err) => warn!(error = %err, "failed to reload exchange rates"),
            }
        }
    })
}

/// In-memory rate table quoted against a single pivot currency. Cross rates
/// are derived through the pivot.
#[derive(Clone)]
pub struct CurrencyService {
    pivot: String,
    freshness: Duration,
    rates: Arc<RwLock<HashMap<String, PivotRate>>>,
}

impl CurrencyService {
    /// Reference quotes (unless disabled) overlaid with the configured ones.
    /// Quotes without a timestamp are stamped now. Configured entries that
    /// fail validation are skipped with a warning.
    pub fn new(config: &FxConfig) -> Self {
        let now = Utc::now();
        let mut rates: HashMap<String, PivotRate> = if config.use_reference_rates {
            reference_rates()
                .into_iter()
                .map(|(code, per_pivot)| (code.to_string(), PivotRate { per_pivot, as_of: now }))
                .collect()
        } else {
            HashMap::new()
        };

        let service = Self::with_rates(config, HashMap::new());
        for quote in configured_quotes(config) {
            match service.check_quote(&quote, now) {
                Ok((code, rate)) => {
                    rates.insert(code, rate);
                }
                Err(err) => {
                    warn!(currency = %quote.currency, error = %err, "skipping configured rate")
                }
            }
        }
        Self::with_rates(config, rates)
    }

    pub fn with_rates(config: &FxConfig, rates: HashMap<String, PivotRate>) -> Self {
        let freshness_secs = i64::try_from(config.freshness_secs.min(MAX_FRESHNESS_SECS))
            .unwrap_or(MAX_FRESHNESS_SECS as i64);
        Self {
            pivot: config.pivot_currency.to_ascii_uppercase(),
            freshness: Duration::seconds(freshness_secs),
            rates: Arc::new(RwLock::new(rates)),
        }
    }

    pub fn pivot(&self) -> &str {
        &self.pivot
    }

    /// Replaces the quote for `currency`, e.g. after an upstream refresh.
    pub async fn set_rate(
        &self,
        currency: &str,
        per_pivot: Decimal,
        as_of: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let quote = FxRateQuote {
            currency: currency.to_string(),
            per_pivot,
            as_of: Some(as_of),
        };
        let (code, rate) = self.check_quote(&quote, as_of)?;
        self.rates.write().await.insert(code, rate);
        Ok(())
    }

    fn check_quote(
        &self,
        quote: &FxRateQuote,
        now: DateTime<Utc>,
    ) -> Result<(String, PivotRate), ServiceError> {
        let currency = quote.currency.trim().to_ascii_uppercase();
        validate_currency(&currency)?;
        if currency == self.pivot {
            return Err(ServiceError::InvalidRequest(format!(
                "{currency} is the pivot currency; its rate is fixed at 1"
            )));
        }
        validate_positive_amount("rate", quote.per_pivot)?;
        Ok((
            currency,
            PivotRate {
                per_pivot: quote.per_pivot,
                as_of: quote.as_of.unwrap_or(now),
            },
        ))
    }

    /// Applies a batch of quotes. The batch is validated as a whole; nothing
    /// is written when any quote is invalid.
    pub async fn refresh_rates(&self, quotes: &[FxRateQuote]) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let checked = quotes
            .iter()
            .map(|quote| self.check_quote(quote, now))
            .collect::<Result<Vec<_>, _>>()?;

        let updated = checked.len();
        self.rates.write().await.extend(checked);
        info!(updated, "exchange rates refreshed");
        Ok(updated)
    }

    /// Re-applies the quotes configured in `config`.
    pub async fn reload(&self, config: &FxConfig) -> Result<usize, ServiceError> {
        self.refresh_rates(&configured_quotes(config)).await
    }

    pub async fn rate_count(&self) -> usize {
        self.rates.read().await.len()
    }

    /// Number of quotes older than the freshness threshold.
    pub async fn stale_rate_count(&self) -> usize {
        let now = Utc::now();
        self.rates
            .read()
            .await
            .values()
            .filter(|rate| now - rate.as_of > self.freshness)
            .count()
    }

    fn lookup(
        &self,
        rates: &HashMap<String, PivotRate>,
        code: &str,
        now: DateTime<Utc>,
    ) -> Option<PivotRate> {
        if code == self.pivot {
            Some(PivotRate {
                per_pivot: Decimal::ONE,
                as_of: now,
            })
        } else {
            rates.get(code).copied()
        }
    }
}

#[async_trait]
impl CurrencyConverter for CurrencyService {
    #[instrument(skip(self), fields(amount = %amount))]
    async fn convert(
        &self,
        from: &str,
        to: &str,
        amount: Decimal,
    ) -> Result<CurrencyConversion, ServiceError> {
        validate_currency(from)?;
        validate_currency(to)?;
        validate_positive_amount("amount", amount)?;

        let now = Utc::now();
        let target_dp = minor_units(to).unwrap_or(2);

        if from == to {
            return Ok(CurrencyConversion {
                from_currency: from.to_string(),
                to_currency: to.to_string(),
                amount,
                converted_amount: round_money(amount, target_dp),
                rate: Decimal::ONE,
                volatility_warning: false,
                rate_as_of: now,
            });
        }

        let (from_rate, to_rate) = {
            let rates = self.rates.read().await;
            (
                self.lookup(&rates, from, now),
                self.lookup(&rates, to, now),
            )
        };
        let (from_rate, to_rate) = match (from_rate, to_rate) {
            (Some(f), Some(t)) => (f, t),
            _ => {
                debug!(from, to, "no exchange rate");
                return Err(ServiceError::RateUnavailable {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        };

        let unrepresentable = || {
            ServiceError::InvalidRequest(format!(
                "{amount} {from} cannot be represented in {to}"
            ))
        };
        let cross = to_rate
            .per_pivot
            .checked_div(from_rate.per_pivot)
            .ok_or_else(unrepresentable)?;
        let converted = amount.checked_mul(cross).ok_or_else(unrepresentable)?;
        let rate_as_of = from_rate.as_of.min(to_rate.as_of);
        let volatility_warning = now - rate_as_of > self.freshness;
        if volatility_warning {
            warn!(from, to, %rate_as_of, "converting with a stale exchange rate");
        }

        Ok(CurrencyConversion {
            from_currency: from.to_string(),
            to_currency: to.to_string(),
            amount,
            converted_amount: round_money(converted, target_dp),
            rate: round_money(cross, RATE_DP),
            volatility_warning,
            rate_as_of,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FxRateConfig;
    use assert_matches::assert_matches;

    fn fx() -> FxConfig {
        FxConfig::default()
    }

    fn fixed_rates(entries: &[(&str, Decimal)]) -> HashMap<String, PivotRate> {
        let now = Utc::now();
        entries
            .iter()
            .map(|(code, rate)| {
                (
                    code.to_string(),
                    PivotRate {
                        per_pivot: *rate,
                        as_of: now,
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn converts_from_pivot() {
        let service = CurrencyService::with_rates(&fx(), fixed_rates(&[("EUR", dec!(0.90))]));
        let conversion = service.convert("USD", "EUR", dec!(100)).await.unwrap();
        assert_eq!(conversion.rate, dec!(0.9));
        assert_eq!(conversion.converted_amount, dec!(90.00));
        assert!(!conversion.volatility_warning);
    }

    #[tokio::test]
    async fn cross_rate_goes_through_pivot() {
        let service = CurrencyService::with_rates(
            &fx(),
            fixed_rates(&[("EUR", dec!(0.80)), ("GBP", dec!(0.60))]),
        );
        let conversion = service.convert("EUR", "GBP", dec!(100)).await.unwrap();
        assert_eq!(conversion.rate, dec!(0.75));
        assert_eq!(conversion.converted_amount, dec!(75.00));
    }

    #[tokio::test]
    async fn rounds_to_target_minor_units() {
        let service = CurrencyService::with_rates(
            &fx(),
            fixed_rates(&[("JPY", dec!(151.567)), ("KWD", dec!(0.30712))]),
        );

        let jpy = service.convert("USD", "JPY", dec!(10.01)).await.unwrap();
        assert_eq!(jpy.converted_amount, dec!(1517));
        assert_eq!(jpy.converted_amount.scale(), 0);

        let kwd = service.convert("USD", "KWD", dec!(10)).await.unwrap();
        assert_eq!(kwd.converted_amount, dec!(3.071));
    }

    #[tokio::test]
    async fn same_currency_is_identity() {
        let service = CurrencyService::new(&fx());
        let conversion = service.convert("EUR", "EUR", dec!(12.5)).await.unwrap();
        assert_eq!(conversion.rate, Decimal::ONE);
        assert_eq!(conversion.converted_amount, dec!(12.50));
    }

    #[tokio::test]
    async fn missing_rate_is_rate_unavailable() {
        let service = CurrencyService::with_rates(&fx(), HashMap::new());
        assert_matches!(
            service.convert("EUR", "USD", dec!(1)).await,
            Err(ServiceError::RateUnavailable { .. })
        );
    }

    #[tokio::test]
    async fn stale_rate_warns_but_converts() {
        let service = CurrencyService::new(&fx());
        service
            .set_rate("EUR", dec!(0.95), Utc::now() - Duration::hours(6))
            .await
            .unwrap();

        let conversion = service.convert("USD", "EUR", dec!(100)).await.unwrap();
        assert!(conversion.volatility_warning);
        assert_eq!(conversion.converted_amount, dec!(95.00));
        assert_eq!(service.stale_rate_count().await, 1);
    }

    #[tokio::test]
    async fn oversized_conversions_are_rejected() {
        let service = CurrencyService::new(&fx());
        assert_matches!(
            service
                .convert("USD", "KRW", dec!(70000000000000000000000000000))
                .await,
            Err(ServiceError::InvalidRequest(_))
        );

        let extreme = CurrencyService::with_rates(
            &fx(),
            fixed_rates(&[("KRW", dec!(100000000000000000000))]),
        );
        assert_matches!(
            extreme
                .convert("USD", "KRW", dec!(1000000000000000000))
                .await,
            Err(ServiceError::InvalidRequest(_))
        );
    }

    #[tokio::test]
    async fn configured_rates_override_reference_quotes() {
        let as_of = Utc::now() - Duration::minutes(5);
        let mut config = fx();
        config.rates.insert(
            "eur".to_string(),
            FxRateConfig {
                per_pivot: dec!(0.50),
                as_of: Some(as_of),
            },
        );
        config.rates.insert(
            "THB".to_string(),
            FxRateConfig {
                per_pivot: dec!(36),
                as_of: None,
            },
        );
        config.rates.insert(
            "NOPE".to_string(),
            FxRateConfig {
                per_pivot: dec!(1),
                as_of: None,
            },
        );

        let service = CurrencyService::new(&config);
        assert_eq!(service.rate_count().await, reference_rates().len() + 1);

        let eur = service.convert("USD", "EUR", dec!(10)).await.unwrap();
        assert_eq!(eur.converted_amount, dec!(5.00));
        assert_eq!(eur.rate_as_of, as_of);
        assert!(service.convert("USD", "THB", dec!(1)).await.is_ok());

        config.use_reference_rates = false;
        assert_eq!(CurrencyService::new(&config).rate_count().await, 2);
    }

    #[tokio::test]
    async fn refresh_clears_staleness_and_is_all_or_nothing() {
        let service = CurrencyService::new(&fx());
        service
            .set_rate("EUR", dec!(0.95), Utc::now() - Duration::days(2))
            .await
            .unwrap();
        assert_eq!(service.stale_rate_count().await, 1);

        let bad_batch = vec![
            FxRateQuote {
                currency: "EUR".to_string(),
                per_pivot: dec!(0.91),
                as_of: None,
            },
            FxRateQuote {
                currency: "USD".to_string(),
                per_pivot: dec!(1),
                as_of: None,
            },
        ];
        assert_matches!(
            service.refresh_rates(&bad_batch).await,
            Err(ServiceError::InvalidRequest(_))
        );
        assert_eq!(service.stale_rate_count().await, 1);

        let updated = service.refresh_rates(&bad_batch[..1]).await.unwrap();
        assert_eq!(updated, 1);
        assert_eq!(service.stale_rate_count().await, 0);
        let eur = service.convert("USD", "EUR", dec!(100)).await.unwrap();
        assert_eq!(eur.converted_amount, dec!(91.00));
        assert!(!eur.volatility_warning);
    }

    #[tokio::test]
    async fn reload_task_applies_loaded_quotes() {
        let service = Arc::new(CurrencyService::new(&fx()));
        service
            .set_rate("EUR", dec!(0.95), Utc::now() - Duration::days(2))
            .await
            .unwrap();

        let handle = spawn_rate_reload(
            service.clone(),
            std::time::Duration::from_millis(20),
            || -> Result<FxConfig, String> {
                let mut config = FxConfig::default();
                config.rates.insert(
                    "EUR".to_string(),
                    FxRateConfig {
                        per_pivot: dec!(0.90),
                        as_of: None,
                    },
                );
                Ok(config)
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        handle.abort();

        assert_eq!(service.stale_rate_count().await, 0);
        let eur = service.convert("USD", "EUR", dec!(100)).await.unwrap();
        assert_eq!(eur.converted_amount, dec!(90.00));
    }

    #[tokio::test]
    async fn set_rate_rejects_pivot_and_bad_values() {
        let service = CurrencyService::new(&fx());
        assert!(service.set_rate("USD", dec!(1), Utc::now()).await.is_err());
        assert!(service.set_rate("EUR", dec!(0), Utc::now()).await.is_err());
        assert!(service.set_rate("XXX1", dec!(1), Utc::now()).await.is_err());
    }
}
