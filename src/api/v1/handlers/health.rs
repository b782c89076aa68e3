/*
 * Responsibility
 * - GET /health (liveness + session cache reachability)
 * - Public; the auth middleware never runs here
 */
use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::services::cache::CacheClient;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let cache_ok = match state.cache.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "health: session cache ping failed");
            false
        }
    };

    Json(json!({
        "status": "ok",
        "cache": {
            "backend": state.cache.backend_name(),
            "ok": cache_ok,
        }
    }))
}
