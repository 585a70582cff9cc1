//! pgsource-api — REST API for pgsource.
//!
//! Clients apply and delete pipelines here; the external agent that runs
//! receivers and bindings polls the desired records and reports their status
//! back through the same API.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/pipelines` | List all pipelines |
//! | POST | `/api/v1/pipelines` | Apply a pipeline (create or update spec) |
//! | GET | `/api/v1/pipelines/{namespace}/{name}` | Get a pipeline with status |
//! | DELETE | `/api/v1/pipelines/{namespace}/{name}` | Request deletion |
//! | GET | `/api/v1/receivers` | List requested receivers |
//! | PUT | `/api/v1/receivers/{namespace}/{name}/status` | Report receiver availability |
//! | GET | `/api/v1/bindings` | List requested bindings |
//! | PUT | `/api/v1/bindings/{namespace}/{name}/status` | Report binding readiness |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use axum::Router;
use axum::routing::{get, put};
use pgsource_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
}

/// Build the complete API router.
pub fn build_router(store: StateStore) -> Router {
    let api_state = ApiState { store };

    let api_routes = Router::new()
        .route("/pipelines", get(handlers::list_pipelines).post(handlers::apply_pipeline))
        .route(
            "/pipelines/{namespace}/{name}",
            get(handlers::get_pipeline).delete(handlers::delete_pipeline),
        )
        .route("/receivers", get(handlers::list_receivers))
        .route("/receivers/{namespace}/{name}/status", put(handlers::report_receiver))
        .route("/bindings", get(handlers::list_bindings))
        .route("/bindings/{namespace}/{name}/status", put(handlers::report_binding))
        .with_state(api_state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
