//! Payments & tax intent engine.
//!
//! Four leaf components (tax resolution, payment method ranking, fraud
//! assessment, currency conversion) each sit behind a trait so the composer
//! can be driven by the built-in reference implementations or by any other
//! backend.

pub mod analytics;
pub mod currency_service;
pub mod fraud_service;
pub mod intent_composer;
pub mod payment_method_service;
pub mod reference;
pub mod tax_service;
pub mod validation;

pub use analytics::{AnalyticsRecorder, PaymentAnalytics, TaxAnalytics};
pub use currency_service::{spawn_rate_reload, CurrencyConverter, CurrencyService};
pub use fraud_service::{FraudRiskAssessor, FraudService};
pub use intent_composer::IntentComposer;
pub use payment_method_service::{reweight, PaymentMethodRanker, PaymentMethodService};
pub use tax_service::{TaxResolver, TaxService};
