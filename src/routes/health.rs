use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// Liveness plus dependency probes. `degraded` still answers 200 so load
/// balancers keep the instance visible while an operator investigates.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();
    let redis_ok = state.cache.health_check().await;

    let status = if db_ok && redis_ok { "healthy" } else { "degraded" };
    Json(json!({
        "status": status,
        "service": "learnstack-api",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.app_env,
        "checks": {
            "postgres": db_ok,
            "redis": redis_ok,
        },
        "pool": {
            "size": state.db.size(),
            "idle": state.db.num_idle(),
        },
        "timestamp": chrono::Utc::now(),
    }))
}
