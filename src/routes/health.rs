use axum::{Json, response::IntoResponse};
use serde_json::{Value, json};
use utoipa_axum::router::OpenApiRouter;

use crate::app_state::AppState;

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(test))
        .routes(utoipa_axum::routes!(test_json))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/test",
    tags = ["Health"],
    responses((status = 200, description = "Service is live"))
)]
async fn test() -> impl IntoResponse {
    Json(json!({"success": true, "message": "OrderService is live"}))
}

/// Echoes the request body, for integration smoke checks.
#[utoipa::path(
    post,
    path = "/testJson",
    tags = ["Health"],
    responses((status = 200, description = "Echoed request body"))
)]
async fn test_json(Json(body): Json<Value>) -> impl IntoResponse {
    Json(body)
}
