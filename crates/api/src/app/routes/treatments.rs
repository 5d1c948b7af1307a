use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use clinicore_charting::{ToothRecordId, TreatmentRecordId};
use clinicore_core::DoctorId;

use crate::app::routes::odontograms::parse_odontogram_id;
use crate::app::services::{AddTreatmentInput, ClinicServices};
use crate::app::{dto, errors};

fn parse_treatment_id(raw: &str) -> Result<TreatmentRecordId, axum::response::Response> {
    raw.parse::<TreatmentRecordId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid treatment id")
    })
}

pub async fn add(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddTreatmentRequest>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tooth_record_id = match body.tooth_record_id.as_deref() {
        Some(raw) => match raw.parse::<ToothRecordId>() {
            Ok(v) => Some(v),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    "invalid tooth record id",
                );
            }
        },
        None => None,
    };

    let doctor_id = match body.doctor_id.as_deref() {
        Some(raw) => match raw.parse::<DoctorId>() {
            Ok(v) => v,
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_id",
                    "invalid doctor id",
                );
            }
        },
        None => DoctorId::new(),
    };

    let performed_at = match body.performed_at.as_deref() {
        Some(raw) => match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(_) => {
                return errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_performed_at",
                    "performed_at must be RFC3339",
                );
            }
        },
        None => None,
    };

    let input = AddTreatmentInput {
        tooth_record_id,
        treatment_code: body.treatment_code,
        doctor_id,
        doctor_name: body.doctor_name,
        price: body.price,
        performed_at,
    };

    match services.add_treatment(clinic.clinic_id(), odontogram_id, input) {
        Ok((chart, treatment_id)) => {
            let treatment = chart
                .treatment(treatment_id)
                .map(dto::treatment_to_json)
                .unwrap_or(serde_json::Value::Null);
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "treatment": treatment,
                    "odontogram": dto::odontogram_to_json(&chart),
                })),
            )
                .into_response()
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.list_treatments(clinic.clinic_id(), &odontogram_id) {
        Some(treatments) => {
            let items = treatments.iter().map(dto::treatment_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "odontogram not found"),
    }
}

pub async fn complete(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path((id, treatment_id)): Path<(String, String)>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let treatment_id = match parse_treatment_id(&treatment_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.complete_treatment(clinic.clinic_id(), odontogram_id, treatment_id) {
        Ok(chart) => (StatusCode::OK, Json(dto::odontogram_to_json(&chart))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn retract(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path((id, treatment_id)): Path<(String, String)>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let treatment_id = match parse_treatment_id(&treatment_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.retract_treatment(clinic.clinic_id(), odontogram_id, treatment_id) {
        Ok(chart) => (StatusCode::OK, Json(dto::odontogram_to_json(&chart))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
