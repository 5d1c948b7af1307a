use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use clinicore_charting::{OdontogramId, ToothRecordId};
use clinicore_core::{AggregateId, PatientId};

use crate::app::services::ClinicServices;
use crate::app::{dto, errors};

pub fn parse_patient_id(raw: &str) -> Result<PatientId, axum::response::Response> {
    raw.parse::<PatientId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid patient id")
    })
}

pub fn parse_odontogram_id(raw: &str) -> Result<OdontogramId, axum::response::Response> {
    raw.parse::<AggregateId>().map(OdontogramId::new).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid odontogram id")
    })
}

fn parse_tooth_id(raw: &str) -> Result<ToothRecordId, axum::response::Response> {
    raw.parse::<ToothRecordId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid tooth record id")
    })
}

pub async fn create(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(patient_id): Path<String>,
) -> axum::response::Response {
    let patient_id = match parse_patient_id(&patient_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.create_odontogram(clinic.clinic_id(), patient_id) {
        Ok(chart) => {
            (StatusCode::CREATED, Json(dto::odontogram_to_json(&chart))).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn supersede(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(patient_id): Path<String>,
) -> axum::response::Response {
    let patient_id = match parse_patient_id(&patient_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.supersede_odontogram(clinic.clinic_id(), patient_id) {
        Ok(chart) => {
            (StatusCode::CREATED, Json(dto::odontogram_to_json(&chart))).into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn current(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(patient_id): Path<String>,
) -> axum::response::Response {
    let patient_id = match parse_patient_id(&patient_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.current_odontogram(clinic.clinic_id(), patient_id) {
        Some(chart) => (StatusCode::OK, Json(dto::odontogram_to_json(&chart))).into_response(),
        None => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "patient has no current odontogram",
        ),
    }
}

pub async fn history(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(patient_id): Path<String>,
) -> axum::response::Response {
    let patient_id = match parse_patient_id(&patient_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let items = services
        .odontogram_history(clinic.clinic_id(), patient_id)
        .iter()
        .map(dto::odontogram_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn get_by_id(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_odontogram(clinic.clinic_id(), &odontogram_id) {
        Some(chart) => (StatusCode::OK, Json(dto::odontogram_to_json(&chart))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "odontogram not found"),
    }
}

pub async fn update_tooth_condition(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path((id, tooth_id)): Path<(String, String)>,
    Json(body): Json<dto::UpdateToothConditionRequest>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let tooth_record_id = match parse_tooth_id(&tooth_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.update_tooth(
        clinic.clinic_id(),
        odontogram_id,
        tooth_record_id,
        body.condition,
        body.expected_version,
    ) {
        Ok(chart) => (StatusCode::OK, Json(dto::odontogram_to_json(&chart))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn record_surface(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path((id, tooth_id)): Path<(String, String)>,
    Json(body): Json<dto::RecordSurfaceRequest>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let tooth_record_id = match parse_tooth_id(&tooth_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.record_surface(
        clinic.clinic_id(),
        odontogram_id,
        tooth_record_id,
        body.surface,
        body.condition,
        body.supersede,
        body.expected_version,
    ) {
        Ok(chart) => (StatusCode::OK, Json(dto::odontogram_to_json(&chart))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
