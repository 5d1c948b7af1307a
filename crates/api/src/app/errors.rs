use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use clinicore_billing::PaymentMethod;
use clinicore_catalog::{CatalogError, TaxError};
use clinicore_core::DomainError;
use clinicore_infra::DispatchError;

use crate::app::services::ServiceError;

pub fn service_error_to_response(err: ServiceError) -> axum::response::Response {
    match err {
        ServiceError::Dispatch(e) => dispatch_error_to_response(e),
        ServiceError::Catalog(e) => catalog_error_to_response(e),
        ServiceError::Tax(e) => tax_error_to_response(e),
    }
}

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Concurrency(msg) => {
            json_error(StatusCode::CONFLICT, "concurrent_modification", msg)
        }
        DispatchError::ClinicIsolation(msg) => {
            json_error(StatusCode::FORBIDDEN, "clinic_isolation", msg)
        }
        DispatchError::Domain(e) => domain_error_to_response(e),
        DispatchError::Deserialize(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", msg)
        }
        DispatchError::Store(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            format!("{e:?}"),
        ),
        DispatchError::Publish(msg) => json_error(StatusCode::BAD_GATEWAY, "publish_error", msg),
    }
}

/// One HTTP code + error string per domain error kind, so clients can tell
/// retryable conflicts from terminal input/state problems without parsing
/// messages.
pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        DomainError::InvalidId(_) => json_error(StatusCode::BAD_REQUEST, "invalid_id", message),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::ConcurrentModification(_) => {
            json_error(StatusCode::CONFLICT, "concurrent_modification", message)
        }
        DomainError::StaleLine(_) => json_error(StatusCode::CONFLICT, "stale_line", message),
        DomainError::DuplicateActiveOdontogram(_) => {
            json_error(StatusCode::CONFLICT, "duplicate_active_odontogram", message)
        }
        DomainError::InvalidState(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_state", message)
        }
        DomainError::EmptySelection => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "empty_selection", message)
        }
        DomainError::OverpaymentRejected(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "overpayment_rejected", message)
        }
        DomainError::UnknownTreatmentCode(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "unknown_treatment_code", message)
        }
        DomainError::AlreadyCancelled => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "already_cancelled", message)
        }
        DomainError::AlreadyPaid => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "already_paid", message)
        }
    }
}

fn catalog_error_to_response(err: CatalogError) -> axum::response::Response {
    match err {
        CatalogError::NotFound(code) => json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "unknown_treatment_code",
            format!("no catalog entry for treatment code '{code}'"),
        ),
        retryable => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "catalog_unavailable",
            retryable.to_string(),
        ),
    }
}

fn tax_error_to_response(err: TaxError) -> axum::response::Response {
    match err {
        TaxError::UnknownJurisdiction(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "tax_misconfigured",
            err.to_string(),
        ),
        TaxError::Unavailable(_) => json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "tax_unavailable",
            err.to_string(),
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn parse_payment_method(s: &str) -> Result<PaymentMethod, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "cash" => Ok(PaymentMethod::Cash),
        "card" => Ok(PaymentMethod::Card),
        "bank_transfer" => Ok(PaymentMethod::BankTransfer),
        "insurance" => Ok(PaymentMethod::Insurance),
        "other" => Ok(PaymentMethod::Other),
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "invalid_payment_method",
            "method must be one of: cash, card, bank_transfer, insurance, other",
        )),
    }
}
