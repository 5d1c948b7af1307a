use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use clinicore_core::ClinicId;

use crate::context::ClinicContext;

pub const CLINIC_HEADER: &str = "x-clinic-id";

/// Derive the clinic context from the `x-clinic-id` header.
///
/// Requests without the header are rejected; a malformed id is a client
/// error, not a missing credential.
pub async fn clinic_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let clinic_id = extract_clinic_id(req.headers())?;

    req.extensions_mut().insert(ClinicContext::new(clinic_id));

    Ok(next.run(req).await)
}

fn extract_clinic_id(headers: &HeaderMap) -> Result<ClinicId, StatusCode> {
    let header = headers.get(CLINIC_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::BAD_REQUEST)?;

    header
        .trim()
        .parse::<ClinicId>()
        .map_err(|_| StatusCode::BAD_REQUEST)
}
