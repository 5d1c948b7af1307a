use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};

use crate::app::services::ClinicServices;
use crate::app::{dto, errors};

fn parse_bound(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, axum::response::Response> {
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_date_range",
                    "start/end must be RFC3339",
                )
            }),
    }
}

pub async fn report(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Query(query): Query<dto::RevenueQuery>,
) -> axum::response::Response {
    let start = match parse_bound(query.start.as_deref()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end = match parse_bound(query.end.as_deref()) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let report = services.revenue(clinic.clinic_id(), start, end);
    (StatusCode::OK, Json(dto::revenue_to_json(&report))).into_response()
}
