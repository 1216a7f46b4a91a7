pub mod health;
pub mod payments_tax;

use crate::config::AppConfig;
use crate::services::payments_tax::{
    AnalyticsRecorder, CurrencyService, FraudService, IntentComposer, PaymentMethodService,
    TaxService,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub tax: Arc<TaxService>,
    pub ranker: Arc<PaymentMethodService>,
    pub fraud: Arc<FraudService>,
    pub currency: Arc<CurrencyService>,
    pub composer: Arc<IntentComposer>,
    pub analytics: AnalyticsRecorder,
}

impl AppServices {
    /// Build the engine over the configured reference data.
    pub fn new(config: &AppConfig) -> Self {
        let engine = &config.engine;
        let tax = Arc::new(TaxService::from_config(&engine.tax));
        let ranker = Arc::new(PaymentMethodService::from_config(
            &engine.catalog,
            engine.ranking.clone(),
        ));
        let fraud = Arc::new(FraudService::new(engine.fraud.clone()));
        let currency = Arc::new(CurrencyService::new(&engine.fx));

        // The composer shares the same component instances as the standalone
        // endpoints, so a rate refresh is visible to both.
        let composer = Arc::new(IntentComposer::new(
            tax.clone(),
            ranker.clone(),
            fraud.clone(),
            currency.clone(),
            engine,
        ));

        Self {
            tax,
            ranker,
            fraud,
            currency,
            composer,
            analytics: AnalyticsRecorder::new(config.analytics.max_records),
        }
    }
}
