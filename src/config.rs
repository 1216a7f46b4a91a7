use crate::models::{BuyerRole, TaxType};
use chrono::{DateTime, Utc};
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PIVOT_CURRENCY: &str = "USD";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[validate(length(min = 1))]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// Intent engine tuning
    #[serde(default)]
    #[validate]
    pub engine: EngineConfig,

    #[serde(default)]
    #[validate]
    pub analytics: AnalyticsConfig,
}

/// Deadlines, weights and reference-data policy for the intent engine.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    #[validate]
    pub timeouts: TimeoutConfig,
    #[validate]
    pub ranking: RankingWeights,
    #[validate]
    pub fraud: FraudWeights,
    #[validate]
    pub fx: FxConfig,
    #[validate]
    pub tax: TaxConfig,
    #[validate]
    pub catalog: CatalogConfig,
}

impl EngineConfig {
    /// Range checks on configured rates, regimes and catalog entries.
    fn validate_reference_data(&self, errors: &mut ValidationErrors) {
        let fraction = |value: Decimal| value >= Decimal::ZERO && value <= Decimal::ONE;

        for (code, quote) in &self.fx.rates {
            if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
                errors.add("engine.fx.rates", invalid("fx_rate_code", format!(
                    "'{code}' is not a 3-letter currency code"
                )));
            }
            if quote.per_pivot <= Decimal::ZERO {
                errors.add("engine.fx.rates", invalid("fx_rate_value", format!(
                    "rate for '{code}' must be positive"
                )));
            }
        }

        for regime in &self.tax.regimes {
            let rates_ok = fraction(regime.standard_rate)
                && regime.category_rates.values().all(|rate| fraction(*rate));
            if !rates_ok {
                errors.add("engine.tax.regimes", invalid("tax_rate_range", format!(
                    "rates for '{}' must lie between 0 and 1",
                    regime.country
                )));
            }
            if regime.invoice_threshold < Decimal::ZERO {
                errors.add("engine.tax.regimes", invalid("invoice_threshold", format!(
                    "invoice threshold for '{}' must not be negative",
                    regime.country
                )));
            }
        }

        let mut schemes = std::collections::HashSet::new();
        for method in &self.catalog.methods {
            if !schemes.insert(method.scheme.as_str()) {
                errors.add("engine.catalog.methods", invalid("duplicate_scheme", format!(
                    "scheme '{}' is configured twice",
                    method.scheme
                )));
            }
            if !fraction(method.fee_pct) || method.fee_fixed < Decimal::ZERO {
                errors.add("engine.catalog.methods", invalid("fee_range", format!(
                    "fees for '{}' must be a 0-1 percentage and a non-negative fixed part",
                    method.scheme
                )));
            }
            if let (Some(min), Some(max)) = (method.min_amount, method.max_amount) {
                if min > max {
                    errors.add("engine.catalog.methods", invalid("amount_limits", format!(
                        "min_amount for '{}' exceeds max_amount",
                        method.scheme
                    )));
                }
            }
        }
    }
}

fn invalid(code: &'static str, message: String) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Per-component deadlines in milliseconds. Every sub-timeout must be
/// strictly below `total_ms`.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    #[validate(range(min = 1))]
    pub total_ms: u64,
    #[validate(range(min = 1))]
    pub tax_ms: u64,
    #[validate(range(min = 1))]
    pub ranking_ms: u64,
    #[validate(range(min = 1))]
    pub fraud_ms: u64,
    #[validate(range(min = 1))]
    pub conversion_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            total_ms: 2_000,
            tax_ms: 800,
            ranking_ms: 600,
            fraud_ms: 800,
            conversion_ms: 500,
        }
    }
}

impl TimeoutConfig {
    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }

    pub fn tax(&self) -> Duration {
        Duration::from_millis(self.tax_ms)
    }

    pub fn ranking(&self) -> Duration {
        Duration::from_millis(self.ranking_ms)
    }

    pub fn fraud(&self) -> Duration {
        Duration::from_millis(self.fraud_ms)
    }

    pub fn conversion(&self) -> Duration {
        Duration::from_millis(self.conversion_ms)
    }
}

/// Weights of the payment method score components.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct RankingWeights {
    #[validate(custom = "validate_weight")]
    pub reliability: f64,
    #[validate(custom = "validate_weight")]
    pub mobile: f64,
    #[validate(custom = "validate_weight")]
    pub fee: f64,
    #[validate(custom = "validate_weight")]
    pub settlement: f64,
    #[validate(custom = "validate_weight")]
    pub security: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            reliability: 0.30,
            mobile: 0.10,
            fee: 0.25,
            settlement: 0.15,
            security: 0.20,
        }
    }
}

impl RankingWeights {
    pub fn total(&self) -> f64 {
        self.reliability + self.mobile + self.fee + self.settlement + self.security
    }
}

/// Points contributed by each fraud signal.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct FraudWeights {
    /// Multiplier applied to the 0-100 country risk
    #[validate(custom = "validate_weight")]
    pub country_weight: f64,
    /// Order value used as the baseline when the buyer has no history
    #[validate(range(min = 1.0))]
    pub baseline_amount: f64,
    #[validate(custom = "validate_weight")]
    pub card: f64,
    #[validate(custom = "validate_weight")]
    pub wallet: f64,
    #[validate(custom = "validate_weight")]
    pub bank_transfer: f64,
    #[validate(custom = "validate_weight")]
    pub bnpl: f64,
    #[validate(custom = "validate_weight")]
    pub crypto: f64,
    #[validate(custom = "validate_weight")]
    pub new_account: f64,
    #[validate(custom = "validate_weight")]
    pub new_device: f64,
    #[validate(custom = "validate_weight")]
    pub velocity: f64,
    #[validate(custom = "validate_weight")]
    pub per_chargeback: f64,
    #[validate(custom = "validate_weight")]
    pub chargeback_cap: f64,
    #[validate(custom = "validate_weight")]
    pub failed_payments: f64,
    /// Subtracted for buyers with a verified identity
    #[validate(custom = "validate_weight")]
    pub verified_identity_credit: f64,
}

impl Default for FraudWeights {
    fn default() -> Self {
        Self {
            country_weight: 0.3,
            baseline_amount: 150.0,
            card: 10.0,
            wallet: 5.0,
            bank_transfer: 3.0,
            bnpl: 15.0,
            crypto: 25.0,
            new_account: 10.0,
            new_device: 10.0,
            velocity: 15.0,
            per_chargeback: 20.0,
            chargeback_cap: 40.0,
            failed_payments: 10.0,
            verified_identity_credit: 10.0,
        }
    }
}

impl FraudWeights {
    /// Risk weight of a payment method type; unknown types count as cards.
    pub fn method_weight(&self, method_type: &str) -> f64 {
        match method_type {
            "wallet" => self.wallet,
            "bank_transfer" => self.bank_transfer,
            "bnpl" => self.bnpl,
            "crypto" => self.crypto,
            _ => self.card,
        }
    }
}

/// Exchange-rate policy and rate table.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct FxConfig {
    #[validate(length(equal = 3))]
    pub pivot_currency: String,
    /// Rates older than this raise a volatility warning
    #[validate(range(min = 1))]
    pub freshness_secs: u64,
    /// When set, a missing settlement conversion aborts the intent
    pub require_settlement_conversion: bool,
    /// Seed the table with the built-in reference quotes
    pub use_reference_rates: bool,
    /// Quotes keyed by ISO 4217 code, in units per one pivot unit.
    /// Configured quotes replace reference quotes for the same currency.
    pub rates: HashMap<String, FxRateConfig>,
    /// Re-read the configured quotes this often; 0 disables reloading
    pub reload_secs: u64,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            pivot_currency: DEFAULT_PIVOT_CURRENCY.to_string(),
            freshness_secs: 3_600,
            require_settlement_conversion: false,
            use_reference_rates: true,
            rates: HashMap::new(),
            reload_secs: 0,
        }
    }
}

impl FxConfig {
    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_secs > 0).then(|| Duration::from_secs(self.reload_secs))
    }
}

/// One configured exchange rate. A quote without `as_of` is stamped when it
/// is loaded.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FxRateConfig {
    pub per_pivot: Decimal,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

/// Tax regime table.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct TaxConfig {
    /// Seed the table with the built-in regimes
    pub use_reference_regimes: bool,
    /// Configured regimes replace reference regimes for the same country
    #[validate]
    pub regimes: Vec<TaxRegimeConfig>,
}

impl Default for TaxConfig {
    fn default() -> Self {
        Self {
            use_reference_regimes: true,
            regimes: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct TaxRegimeConfig {
    #[validate(length(equal = 2))]
    pub country: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub tax_type: TaxType,
    pub standard_rate: Decimal,
    /// Rates by lowercase product category
    #[serde(default)]
    pub category_rates: HashMap<String, Decimal>,
    #[serde(default)]
    pub b2b_reverse_charge: bool,
    pub invoice_threshold: Decimal,
    /// Full-invoice fields; defaults to the standard set
    #[serde(default)]
    pub required_fields: Option<Vec<String>>,
}

/// Payment method catalog.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// Seed the catalog with the built-in offerings
    pub use_reference_catalog: bool,
    /// Configured methods replace reference methods with the same scheme
    #[validate]
    pub methods: Vec<CatalogMethodConfig>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            use_reference_catalog: true,
            methods: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CatalogMethodConfig {
    #[validate(length(min = 1))]
    pub method_type: String,
    #[validate(length(min = 1))]
    pub scheme: String,
    #[validate(length(min = 1))]
    pub processor: String,
    #[validate(length(min = 1))]
    pub display_name: String,
    /// Omit to offer the method in every country
    #[serde(default)]
    pub countries: Option<Vec<String>>,
    /// Omit to accept every checkout currency
    #[serde(default)]
    pub currencies: Option<Vec<String>>,
    #[serde(default = "all_roles")]
    #[validate(length(min = 1))]
    pub roles: Vec<BuyerRole>,
    pub fee_pct: Decimal,
    #[serde(default)]
    pub fee_fixed: Decimal,
    pub settlement_days: u32,
    #[serde(default)]
    pub mobile_optimized: bool,
    #[validate(range(min = 0.0, max = 100.0))]
    pub security_score: f64,
    #[validate(range(min = 0.0, max = 100.0))]
    pub reliability: f64,
    #[serde(default)]
    pub min_amount: Option<Decimal>,
    #[serde(default)]
    pub max_amount: Option<Decimal>,
    /// Fixed disbursement currency
    #[serde(default)]
    pub settles_in: Option<String>,
}

fn all_roles() -> Vec<BuyerRole> {
    vec![BuyerRole::B2C, BuyerRole::B2B]
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyticsConfig {
    /// Oldest records are evicted past this many intents
    #[validate(range(min = 1))]
    pub max_records: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_records: 50_000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            engine: EngineConfig::default(),
            analytics: AnalyticsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Checks if running in production
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_deref()
            .map(|origins| origins.split(',').any(|o| !o.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether the server may fall back to a permissive CORS layer
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.cors_allow_any_origin || self.is_development()
    }

    /// Cross-field checks that the derive cannot express.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        let timeouts = &self.engine.timeouts;
        let subs = [
            ("engine.timeouts.tax_ms", timeouts.tax_ms),
            ("engine.timeouts.ranking_ms", timeouts.ranking_ms),
            ("engine.timeouts.fraud_ms", timeouts.fraud_ms),
            ("engine.timeouts.conversion_ms", timeouts.conversion_ms),
        ];
        for (field, value) in subs {
            if value >= timeouts.total_ms {
                let mut err = ValidationError::new("sub_timeout_not_below_total");
                err.message = Some(
                    format!(
                        "{field} ({value}ms) must be strictly below engine.timeouts.total_ms ({}ms)",
                        timeouts.total_ms
                    )
                    .into(),
                );
                errors.add(field, err);
            }
        }

        if self.engine.ranking.total() <= 0.0 {
            let mut err = ValidationError::new("ranking_weights_all_zero");
            err.message = Some("At least one ranking weight must be positive".into());
            errors.add("engine.ranking", err);
        }

        self.engine.validate_reference_data(&mut errors);

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_weight(weight: f64) -> Result<(), ValidationError> {
    if !weight.is_finite() || weight < 0.0 {
        let mut err = ValidationError::new("weight");
        err.message = Some("Weights must be finite and non-negative".into());
        return Err(err);
    }
    Ok(())
}

fn filter_directive(level: &str) -> String {
    env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("stateset_payments_tax={},tower_http=debug", level))
}

/// Runs `f` under a temporary console subscriber. Used around config loading,
/// which logs before the configured subscriber can be installed.
pub fn with_bootstrap_logging<T>(f: impl FnOnce() -> T) -> T {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter_directive(
            DEFAULT_LOG_LEVEL,
        )))
        .finish();
    tracing::subscriber::with_default(bootstrap, f)
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter_directive = filter_directive(level);

    // Optional OpenTelemetry initialization via env (APP__OTEL_ENABLED or OTEL_EXPORTER_OTLP_ENDPOINT)
    let otel_enabled = env::var("APP__OTEL_ENABLED")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
        || env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();

    if otel_enabled {
        use opentelemetry::KeyValue;
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::{trace as sdktrace, Resource};

        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:4317".to_string());
        let service_name = env::var("OTEL_SERVICE_NAME")
            .unwrap_or_else(|_| "stateset-payments-tax".to_string());

        let resource = Resource::new(vec![KeyValue::new("service.name", service_name)]);
        let tracer = match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(sdktrace::config().with_resource(resource))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => tracer,
            Err(err) => {
                if json {
                    let _ = fmt().with_env_filter(filter_directive).json().try_init();
                } else {
                    let _ = fmt().with_env_filter(filter_directive).try_init();
                }
                error!("Failed to install OTLP pipeline: {}", err);
                return;
            }
        };

        let base = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(EnvFilter::new(filter_directive));

        if json {
            let _ = base.with(fmt::layer().json()).try_init();
        } else {
            let _ = base.with(fmt::layer()).try_init();
        }
    } else if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration from `./config`.
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Same layering as [`load_config`] rooted at an explicit directory.
pub fn load_config_from(dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(content: &str, name: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(name), content).unwrap();
        dir
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn sub_timeout_must_be_below_total() {
        let mut cfg = AppConfig::default();
        cfg.engine.timeouts.fraud_ms = cfg.engine.timeouts.total_ms;
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors
            .field_errors()
            .contains_key("engine.timeouts.fraud_ms"));
    }

    #[test]
    fn all_zero_ranking_weights_rejected() {
        let mut cfg = AppConfig::default();
        cfg.engine.ranking = RankingWeights {
            reliability: 0.0,
            mobile: 0.0,
            fee: 0.0,
            settlement: 0.0,
            security: 0.0,
        };
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn negative_weight_rejected() {
        let mut cfg = AppConfig::default();
        cfg.engine.fraud.crypto = -1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let mut cfg = AppConfig::default();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn file_layers_override_defaults() {
        let dir = write_config(
            r#"
                host = "127.0.0.1"
                port = 9090
                environment = "development"

                [engine.timeouts]
                total_ms = 1500
                tax_ms = 400

                [engine.fx]
                require_settlement_conversion = true
            "#,
            "default.toml",
        );

        let cfg = load_config_from(dir.path(), "development").unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.engine.timeouts.total_ms, 1500);
        assert_eq!(cfg.engine.timeouts.tax_ms, 400);
        assert_eq!(cfg.engine.timeouts.fraud_ms, 800);
        assert!(cfg.engine.fx.require_settlement_conversion);
        assert_eq!(cfg.engine.fx.pivot_currency, "USD");
    }

    #[test]
    fn bootstrap_logging_covers_config_loading() {
        let dir = write_config(
            r#"
                host = "127.0.0.1"
                environment = "development"
            "#,
            "default.toml",
        );

        let (cfg, logging) = with_bootstrap_logging(|| {
            (
                load_config_from(dir.path(), "development"),
                tracing::enabled!(tracing::Level::ERROR),
            )
        });
        assert!(logging);
        assert_eq!(cfg.unwrap().host, "127.0.0.1");
    }

    #[test]
    fn reference_data_sections_load_from_file() {
        let dir = write_config(
            r#"
                host = "127.0.0.1"
                environment = "development"

                [engine.fx]
                reload_secs = 300

                [engine.fx.rates.EUR]
                per_pivot = "0.91"
                as_of = "2026-10-19T08:00:00Z"

                [[engine.tax.regimes]]
                country = "AE"
                name = "UAE VAT"
                tax_type = "vat"
                standard_rate = "0.05"
                invoice_threshold = "10000"

                [[engine.catalog.methods]]
                method_type = "wallet"
                scheme = "twint"
                processor = "adyen"
                display_name = "TWINT"
                countries = ["CH"]
                currencies = ["CHF"]
                fee_pct = "0.013"
                settlement_days = 1
                mobile_optimized = true
                security_score = 90.0
                reliability = 95.0
            "#,
            "default.toml",
        );

        let cfg = load_config_from(dir.path(), "development").unwrap();
        assert_eq!(cfg.engine.fx.reload_interval(), Some(Duration::from_secs(300)));
        let (_, eur) = cfg
            .engine
            .fx
            .rates
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case("EUR"))
            .unwrap();
        assert_eq!(eur.per_pivot, Decimal::new(91, 2));
        assert!(eur.as_of.is_some());

        assert!(cfg.engine.tax.use_reference_regimes);
        assert_eq!(cfg.engine.tax.regimes.len(), 1);
        assert_eq!(cfg.engine.tax.regimes[0].tax_type, TaxType::Vat);
        assert_eq!(cfg.engine.catalog.methods.len(), 1);
        assert_eq!(cfg.engine.catalog.methods[0].roles.len(), 2);
    }

    #[test]
    fn out_of_range_reference_data_rejected() {
        let mut cfg = AppConfig::default();
        cfg.engine.fx.rates.insert(
            "EURO".to_string(),
            FxRateConfig {
                per_pivot: Decimal::ONE,
                as_of: None,
            },
        );
        cfg.engine.tax.regimes.push(TaxRegimeConfig {
            country: "AE".to_string(),
            name: "UAE VAT".to_string(),
            tax_type: TaxType::Vat,
            standard_rate: Decimal::new(15, 1),
            category_rates: HashMap::new(),
            b2b_reverse_charge: false,
            invoice_threshold: Decimal::ZERO,
            required_fields: None,
        });

        let errors = cfg.validate_additional_constraints().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("engine.fx.rates"));
        assert!(fields.contains_key("engine.tax.regimes"));
    }

    #[test]
    fn invalid_file_fails_validation() {
        let dir = write_config(
            r#"
                host = "127.0.0.1"
                environment = "development"
                log_level = "loud"

                [engine.timeouts]
                total_ms = 100
            "#,
            "default.toml",
        );

        let result = load_config_from(dir.path(), "development");
        assert!(matches!(result, Err(AppConfigError::Validation(_))));
    }
}
