use rust_decimal::Decimal;
use serde::Deserialize;

use clinicore_core::AggregateRoot;

use clinicore_billing::{InvoiceLine, Payment};
use clinicore_charting::{
    Odontogram, SurfaceCondition, ToothCondition, ToothRecord, ToothSurface, TreatmentRecord,
};
use clinicore_infra::projections::{InvoiceReadModel, RevenueReport};

use crate::app::services::InvoicePreview;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct UpdateToothConditionRequest {
    pub condition: ToothCondition,
    /// Last chart version the caller observed (optimistic concurrency).
    pub expected_version: u64,
}

#[derive(Debug, Deserialize)]
pub struct RecordSurfaceRequest {
    pub surface: ToothSurface,
    pub condition: SurfaceCondition,
    /// Replace an active condition already on the surface.
    #[serde(default)]
    pub supersede: bool,
    pub expected_version: u64,
}

#[derive(Debug, Deserialize)]
pub struct AddTreatmentRequest {
    /// Tooth-specific when set; whole-mouth otherwise.
    pub tooth_record_id: Option<String>,
    pub treatment_code: String,
    pub doctor_id: Option<String>,
    pub doctor_name: String,
    /// Overrides the catalog default price.
    pub price: Option<Decimal>,
    pub performed_at: Option<String>, // RFC3339
}

#[derive(Debug, Deserialize)]
pub struct CommitInvoiceRequest {
    /// Subset of the preview; omitted means "all billable lines".
    pub treatment_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPaymentRequest {
    pub amount: Decimal,
    pub method: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelInvoiceRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RevenueQuery {
    pub start: Option<String>, // RFC3339
    pub end: Option<String>,   // RFC3339
}

// -------------------------
// JSON mapping helpers
// -------------------------
//
// Enums and Decimal values are embedded with their serde representations so
// responses round-trip with the request formats ("root-canal",
// "partially_paid", "500.00").

fn tooth_to_json(tooth: &ToothRecord) -> serde_json::Value {
    serde_json::json!({
        "id": tooth.id.to_string(),
        "tooth_number": tooth.tooth_number,
        "tooth_type": tooth.tooth_type,
        "condition": tooth.condition,
        "surfaces": tooth.surfaces.iter().map(|s| serde_json::json!({
            "surface": s.surface,
            "condition": s.condition,
            "recorded_at": s.recorded_at.to_rfc3339(),
        })).collect::<Vec<_>>(),
    })
}

pub fn treatment_to_json(treatment: &TreatmentRecord) -> serde_json::Value {
    serde_json::json!({
        "id": treatment.id.to_string(),
        "target": treatment.target,
        "treatment_code": treatment.treatment_code,
        "treatment_name": treatment.treatment_name,
        "category": treatment.category,
        "doctor_id": treatment.doctor_id.to_string(),
        "doctor_name": treatment.doctor_name,
        "performed_at": treatment.performed_at.to_rfc3339(),
        "price": treatment.price,
        "is_completed": treatment.completed,
        "invoice_id": treatment.invoice_id.map(|id| id.to_string()),
    })
}

pub fn odontogram_to_json(chart: &Odontogram) -> serde_json::Value {
    serde_json::json!({
        "id": chart.id_typed().to_string(),
        "patient_id": chart.patient_id().map(|id| id.to_string()),
        "created_at": chart.created_at().map(|t| t.to_rfc3339()),
        "updated_at": chart.updated_at().map(|t| t.to_rfc3339()),
        "archived": chart.is_archived(),
        "version": chart.version(),
        "teeth": chart.teeth().iter().map(tooth_to_json).collect::<Vec<_>>(),
        "treatments": chart.treatments().iter().map(treatment_to_json).collect::<Vec<_>>(),
    })
}

fn invoice_line_to_json(line: &InvoiceLine) -> serde_json::Value {
    serde_json::json!({
        "line_no": line.line_no,
        "treatment_record_id": line.treatment_record_id.to_string(),
        "treatment_code": line.treatment_code,
        "description": line.description,
        "price": line.price,
    })
}

fn payment_to_json(payment: &Payment) -> serde_json::Value {
    serde_json::json!({
        "id": payment.id.to_string(),
        "amount": payment.amount,
        "method": payment.method,
        "paid_at": payment.paid_at.to_rfc3339(),
    })
}

pub fn invoice_to_json(rm: &InvoiceReadModel) -> serde_json::Value {
    serde_json::json!({
        "id": rm.invoice_id.to_string(),
        "patient_id": rm.patient_id.to_string(),
        "odontogram_id": rm.odontogram_id.to_string(),
        "issued_at": rm.issued_at.to_rfc3339(),
        "status": rm.status,
        "subtotal": rm.subtotal,
        "tax_rate": rm.tax_rate,
        "tax": rm.tax,
        "total": rm.total,
        "total_paid": rm.total_paid,
        "balance": rm.balance(),
        "cancellation_reason": rm.cancellation_reason,
        "lines": rm.lines.iter().map(invoice_line_to_json).collect::<Vec<_>>(),
        "payments": rm.payments.iter().map(payment_to_json).collect::<Vec<_>>(),
    })
}

pub fn preview_to_json(preview: &InvoicePreview) -> serde_json::Value {
    serde_json::json!({
        "odontogram_id": preview.odontogram_id.to_string(),
        "patient_id": preview.patient_id.to_string(),
        "lines": preview.lines.iter().map(invoice_line_to_json).collect::<Vec<_>>(),
        "subtotal": preview.subtotal,
        "tax_rate": preview.tax_rate,
        "tax": preview.tax,
        "total": preview.total,
    })
}

pub fn revenue_to_json(report: &RevenueReport) -> serde_json::Value {
    serde_json::json!({
        "invoice_count": report.invoice_count,
        "billed_total": report.billed_total,
        "collected_total": report.collected_total,
    })
}
