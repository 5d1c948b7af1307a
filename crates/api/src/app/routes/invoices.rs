use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use clinicore_charting::TreatmentRecordId;
use clinicore_core::InvoiceId;

use crate::app::routes::odontograms::{parse_odontogram_id, parse_patient_id};
use crate::app::services::ClinicServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_by_id))
        .route("/:id/payments", post(register_payment))
        .route("/:id/cancel", post(cancel))
}

fn parse_invoice_id(raw: &str) -> Result<InvoiceId, axum::response::Response> {
    raw.parse::<InvoiceId>().map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid invoice id")
    })
}

pub async fn preview(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.preview_invoice(clinic.clinic_id(), odontogram_id) {
        Ok(preview) => (StatusCode::OK, Json(dto::preview_to_json(&preview))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn commit(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CommitInvoiceRequest>,
) -> axum::response::Response {
    let odontogram_id = match parse_odontogram_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let selection = match body.treatment_ids {
        None => None,
        Some(raw_ids) => {
            let mut ids = Vec::with_capacity(raw_ids.len());
            for raw in raw_ids {
                match raw.parse::<TreatmentRecordId>() {
                    Ok(id) => ids.push(id),
                    Err(_) => {
                        return errors::json_error(
                            StatusCode::BAD_REQUEST,
                            "invalid_id",
                            "invalid treatment id in selection",
                        );
                    }
                }
            }
            Some(ids)
        }
    };

    match services.commit_invoice(clinic.clinic_id(), odontogram_id, selection) {
        Ok(invoice) => (StatusCode::CREATED, Json(dto::invoice_to_json(&invoice))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn get_by_id(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.get_invoice(clinic.clinic_id(), &invoice_id) {
        Some(invoice) => (StatusCode::OK, Json(dto::invoice_to_json(&invoice))).into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
    }
}

pub async fn list_for_patient(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(patient_id): Path<String>,
) -> axum::response::Response {
    let patient_id = match parse_patient_id(&patient_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let items = services
        .invoices_for_patient(clinic.clinic_id(), patient_id)
        .iter()
        .map(dto::invoice_to_json)
        .collect::<Vec<_>>();
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub async fn register_payment(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RegisterPaymentRequest>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let method = match errors::parse_payment_method(&body.method) {
        Ok(m) => m,
        Err(resp) => return resp,
    };

    match services.register_payment(clinic.clinic_id(), invoice_id, body.amount, method) {
        Ok(invoice) => (StatusCode::OK, Json(dto::invoice_to_json(&invoice))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn cancel(
    Extension(services): Extension<Arc<ClinicServices>>,
    Extension(clinic): Extension<crate::context::ClinicContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::CancelInvoiceRequest>,
) -> axum::response::Response {
    let invoice_id = match parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.cancel_invoice(clinic.clinic_id(), invoice_id, body.reason) {
        Ok(invoice) => (StatusCode::OK, Json(dto::invoice_to_json(&invoice))).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}
