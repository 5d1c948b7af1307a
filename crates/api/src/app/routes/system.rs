use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

/// Liveness probe (unauthenticated).
pub async fn health() -> axum::response::Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
}

/// Echo the clinic context derived by the middleware.
pub async fn whoami(
    Extension(clinic): Extension<crate::context::ClinicContext>,
) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "clinic_id": clinic.clinic_id().to_string() })),
    )
        .into_response()
}
