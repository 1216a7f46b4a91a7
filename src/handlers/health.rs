use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;
use utoipa::ToSchema;

use crate::handlers::AppState;
use crate::metrics::set_gauge;

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Degraded,
    Down,
}

/// Individual component health details
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Engine health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub services: BTreeMap<String, ComponentHealth>,
}

/// Tracks application start time for uptime calculation
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the start time (call this on application startup)
pub fn init_start_time() {
    let _ = START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

/// Worst status wins.
fn overall(services: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
    if services.values().any(|c| c.status == ComponentStatus::Down) {
        ComponentStatus::Down
    } else if services.values().any(|c| c.status == ComponentStatus::Degraded) {
        ComponentStatus::Degraded
    } else {
        ComponentStatus::Up
    }
}

/// Reports the state of every engine component
#[utoipa::path(
    get,
    path = "/payments-tax/health",
    responses(
        (status = 200, description = "Engine is up or degraded", body = HealthResponse),
        (status = 503, description = "A component has no reference data", body = HealthResponse)
    ),
    tag = "Payments & Tax"
)]
pub async fn payments_tax_health(State(state): State<AppState>) -> impl IntoResponse {
    let services = &state.services;
    let mut components = BTreeMap::new();

    let regimes = services.tax.regime_count();
    components.insert(
        "tax_resolver".to_string(),
        if regimes > 0 {
            ComponentHealth::new(ComponentStatus::Up, format!("{regimes} tax regimes loaded"))
        } else {
            ComponentHealth::new(ComponentStatus::Down, "No tax regimes loaded")
        },
    );

    let catalog = services.ranker.catalog_size();
    components.insert(
        "payment_method_ranker".to_string(),
        if catalog > 0 {
            ComponentHealth::new(
                ComponentStatus::Up,
                format!("{catalog} payment methods in catalog"),
            )
        } else {
            ComponentHealth::new(ComponentStatus::Down, "Payment method catalog is empty")
        },
    );

    components.insert(
        "fraud_assessor".to_string(),
        ComponentHealth::new(ComponentStatus::Up, "Rule-based scoring active"),
    );

    let rates = services.currency.rate_count().await;
    let stale = services.currency.stale_rate_count().await;
    set_gauge("fx_rates_stale", stale as f64);
    components.insert(
        "currency_converter".to_string(),
        if rates == 0 {
            ComponentHealth::new(ComponentStatus::Degraded, "No exchange rates loaded")
        } else if stale > 0 {
            ComponentHealth::new(
                ComponentStatus::Degraded,
                format!("{stale} of {rates} exchange rates are stale"),
            )
        } else {
            ComponentHealth::new(
                ComponentStatus::Up,
                format!("{rates} exchange rates against {}", services.currency.pivot()),
            )
        },
    );

    let status = overall(&components);
    let status_code = match status {
        ComponentStatus::Up | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: get_uptime_secs(),
        services: components,
    };

    (status_code, Json(response))
}
