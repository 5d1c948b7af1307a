//! Service wiring and application-level orchestration.
//!
//! `ClinicServices` owns the event-sourcing infrastructure (store, bus,
//! dispatcher), the read models, and the external collaborators (treatment
//! catalog, tax configuration). Committed envelopes are applied to the
//! projections synchronously before a mutating call returns, so every
//! endpoint reads its own writes and no cache layer is needed for
//! correctness.
//!
//! The invoice commit is the one cross-aggregate flow: claim the treatment
//! lines on the chart stream first (the contended step), then issue the
//! invoice; if issuing fails the claims are released as compensation so the
//! commit is all-or-nothing from the caller's view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use clinicore_billing::{
    CancelInvoice, Invoice, InvoiceCommand, InvoiceLine, IssueInvoice, PaymentId, PaymentMethod,
    RegisterPayment, Totals, invoice_totals, round2,
};
use clinicore_catalog::{CatalogError, TaxConfig, TaxError, TreatmentCatalog};
use clinicore_charting::{
    ArchiveOdontogram, ClaimTreatments, CreateOdontogram, MarkTreatmentCompleted, Odontogram,
    OdontogramCommand, OdontogramId, RecordSurfaceCondition, RecordTreatment, ReleaseClaims,
    RetractTreatment, SurfaceCondition, TOOTH_COUNT, ToothCondition, ToothRecordId, ToothSurface,
    TreatmentRecord, TreatmentRecordId, TreatmentTarget, UpdateToothCondition,
};
use clinicore_core::{
    AggregateId, ClinicId, DoctorId, DomainError, ExpectedVersion, InvoiceId, PatientId,
};
use clinicore_events::{EventEnvelope, InMemoryEventBus};
use clinicore_infra::{
    ActiveChartIndex, CommandDispatcher, DispatchError, InMemoryClinicStore, InMemoryEventStore,
    StoredEvent,
    projections::{
        ChartsProjection, InvoiceReadModel, InvoicesProjection, RevenueProjection, RevenueRecord,
        RevenueReport,
    },
};

const CHART_AGGREGATE: &str = "charting.odontogram";
const INVOICE_AGGREGATE: &str = "billing.invoice";

type Dispatcher = CommandDispatcher<
    Arc<InMemoryEventStore>,
    Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>,
>;
type Charts = ChartsProjection<Arc<InMemoryClinicStore<OdontogramId, Odontogram>>>;
type Invoices = InvoicesProjection<Arc<InMemoryClinicStore<InvoiceId, InvoiceReadModel>>>;
type Revenue = RevenueProjection<Arc<InMemoryClinicStore<InvoiceId, RevenueRecord>>>;

/// Application-level failure: dispatch/domain outcomes plus external
/// collaborator errors.
#[derive(Debug)]
pub enum ServiceError {
    Dispatch(DispatchError),
    Catalog(CatalogError),
    Tax(TaxError),
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        ServiceError::Dispatch(value)
    }
}

impl From<DomainError> for ServiceError {
    fn from(value: DomainError) -> Self {
        ServiceError::Dispatch(DispatchError::from(value))
    }
}

impl From<TaxError> for ServiceError {
    fn from(value: TaxError) -> Self {
        ServiceError::Tax(value)
    }
}

/// Read-only invoice preview: the billable treatment set with computed
/// totals. Produces no persistent state; may be recomputed freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoicePreview {
    pub odontogram_id: OdontogramId,
    pub patient_id: PatientId,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Input for recording a treatment against a chart.
#[derive(Debug, Clone)]
pub struct AddTreatmentInput {
    pub tooth_record_id: Option<ToothRecordId>,
    pub treatment_code: String,
    pub doctor_id: DoctorId,
    pub doctor_name: String,
    /// Overrides the catalog default price when set.
    pub price: Option<Decimal>,
    pub performed_at: Option<DateTime<Utc>>,
}

pub struct ClinicServices {
    dispatcher: Dispatcher,
    charts: Arc<Charts>,
    invoices: Arc<Invoices>,
    revenue: Arc<Revenue>,
    active_charts: ActiveChartIndex,
    catalog: Arc<dyn TreatmentCatalog>,
    tax: Arc<dyn TaxConfig>,
    jurisdiction: String,
}

impl ClinicServices {
    pub fn new(
        catalog: Arc<dyn TreatmentCatalog>,
        tax: Arc<dyn TaxConfig>,
        jurisdiction: impl Into<String>,
    ) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());

        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            charts: Arc::new(ChartsProjection::new(Arc::new(InMemoryClinicStore::new()))),
            invoices: Arc::new(InvoicesProjection::new(Arc::new(InMemoryClinicStore::new()))),
            revenue: Arc::new(RevenueProjection::new(Arc::new(InMemoryClinicStore::new()))),
            active_charts: ActiveChartIndex::new(),
            catalog,
            tax,
            jurisdiction: jurisdiction.into(),
        }
    }

    // ---------------------------------------------------------------
    // Dispatch + synchronous projection (read-after-write)
    // ---------------------------------------------------------------

    fn project(&self, committed: &[StoredEvent]) {
        for stored in committed {
            let envelope = stored.to_envelope();
            if let Err(e) = self.charts.apply_envelope(&envelope) {
                tracing::warn!("chart projection apply failed: {e}");
            }
            if let Err(e) = self.invoices.apply_envelope(&envelope) {
                tracing::warn!("invoice projection apply failed: {e}");
            }
            if let Err(e) = self.revenue.apply_envelope(&envelope) {
                tracing::warn!("revenue projection apply failed: {e}");
            }
        }
    }

    fn dispatch_chart(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        expected: ExpectedVersion,
        command: OdontogramCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let committed = self.dispatcher.dispatch::<Odontogram>(
            clinic_id,
            aggregate_id,
            CHART_AGGREGATE,
            expected,
            command,
            |_c, id| Odontogram::empty(OdontogramId::new(id)),
        )?;
        self.project(&committed);
        Ok(committed)
    }

    fn dispatch_invoice(
        &self,
        clinic_id: ClinicId,
        invoice_id: InvoiceId,
        command: InvoiceCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let committed = self.dispatcher.dispatch::<Invoice>(
            clinic_id,
            invoice_id.into(),
            INVOICE_AGGREGATE,
            ExpectedVersion::Any,
            command,
            |_c, id| Invoice::empty(InvoiceId::from_uuid(*id.as_uuid())),
        )?;
        self.project(&committed);
        Ok(committed)
    }

    fn chart_checked(
        &self,
        clinic_id: ClinicId,
        odontogram_id: &OdontogramId,
    ) -> Result<Odontogram, ServiceError> {
        self.charts
            .get(clinic_id, odontogram_id)
            .ok_or_else(|| DomainError::not_found().into())
    }

    fn tax_rate(&self) -> Result<Decimal, ServiceError> {
        Ok(self.tax.rate_for(&self.jurisdiction)?)
    }

    // ---------------------------------------------------------------
    // Odontogram operations
    // ---------------------------------------------------------------

    pub fn create_odontogram(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
    ) -> Result<Odontogram, ServiceError> {
        let aggregate_id = AggregateId::new();
        let odontogram_id = OdontogramId::new(aggregate_id);

        // Reserve the one-active-chart slot before any events exist.
        if let Err(existing) = self
            .active_charts
            .try_register(clinic_id, patient_id, odontogram_id)
        {
            return Err(DomainError::duplicate_active_odontogram(format!(
                "patient {patient_id} already has current odontogram {existing}"
            ))
            .into());
        }

        let result = self.dispatch_chart(
            clinic_id,
            aggregate_id,
            ExpectedVersion::Exact(0),
            OdontogramCommand::CreateOdontogram(CreateOdontogram {
                clinic_id,
                odontogram_id,
                patient_id,
                tooth_record_ids: (0..TOOTH_COUNT).map(|_| ToothRecordId::new()).collect(),
                occurred_at: Utc::now(),
            }),
        );

        if let Err(e) = result {
            // Give the reservation back; nothing was persisted.
            self.active_charts.remove(clinic_id, patient_id, odontogram_id);
            return Err(e.into());
        }

        self.chart_checked(clinic_id, &odontogram_id)
    }

    /// Archive the patient's current chart and open a fresh one.
    ///
    /// Prior charts stay readable as immutable history.
    pub fn supersede_odontogram(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
    ) -> Result<Odontogram, ServiceError> {
        let current = self
            .active_charts
            .current(clinic_id, patient_id)
            .ok_or_else(DomainError::not_found)?;

        self.dispatch_chart(
            clinic_id,
            current.0,
            ExpectedVersion::Any,
            OdontogramCommand::ArchiveOdontogram(ArchiveOdontogram {
                clinic_id,
                odontogram_id: current,
                occurred_at: Utc::now(),
            }),
        )?;

        let aggregate_id = AggregateId::new();
        let odontogram_id = OdontogramId::new(aggregate_id);
        self.active_charts.replace(clinic_id, patient_id, odontogram_id);

        self.dispatch_chart(
            clinic_id,
            aggregate_id,
            ExpectedVersion::Exact(0),
            OdontogramCommand::CreateOdontogram(CreateOdontogram {
                clinic_id,
                odontogram_id,
                patient_id,
                tooth_record_ids: (0..TOOTH_COUNT).map(|_| ToothRecordId::new()).collect(),
                occurred_at: Utc::now(),
            }),
        )?;

        self.chart_checked(clinic_id, &odontogram_id)
    }

    pub fn get_odontogram(
        &self,
        clinic_id: ClinicId,
        odontogram_id: &OdontogramId,
    ) -> Option<Odontogram> {
        self.charts.get(clinic_id, odontogram_id)
    }

    pub fn current_odontogram(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
    ) -> Option<Odontogram> {
        self.charts.current_for_patient(clinic_id, patient_id)
    }

    pub fn odontogram_history(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
    ) -> Vec<Odontogram> {
        self.charts.history_for_patient(clinic_id, patient_id)
    }

    pub fn update_tooth(
        &self,
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
        tooth_record_id: ToothRecordId,
        condition: ToothCondition,
        expected_version: u64,
    ) -> Result<Odontogram, ServiceError> {
        self.dispatch_chart(
            clinic_id,
            odontogram_id.0,
            ExpectedVersion::Exact(expected_version),
            OdontogramCommand::UpdateToothCondition(UpdateToothCondition {
                clinic_id,
                odontogram_id,
                tooth_record_id,
                condition,
                occurred_at: Utc::now(),
            }),
        )?;
        self.chart_checked(clinic_id, &odontogram_id)
    }

    pub fn record_surface(
        &self,
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
        tooth_record_id: ToothRecordId,
        surface: ToothSurface,
        condition: SurfaceCondition,
        supersede: bool,
        expected_version: u64,
    ) -> Result<Odontogram, ServiceError> {
        self.dispatch_chart(
            clinic_id,
            odontogram_id.0,
            ExpectedVersion::Exact(expected_version),
            OdontogramCommand::RecordSurfaceCondition(RecordSurfaceCondition {
                clinic_id,
                odontogram_id,
                tooth_record_id,
                surface,
                condition,
                supersede,
                occurred_at: Utc::now(),
            }),
        )?;
        self.chart_checked(clinic_id, &odontogram_id)
    }

    // ---------------------------------------------------------------
    // Treatment ledger operations
    // ---------------------------------------------------------------

    pub fn add_treatment(
        &self,
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
        input: AddTreatmentInput,
    ) -> Result<(Odontogram, TreatmentRecordId), ServiceError> {
        // Resolve against the catalog at call time; the record keeps the
        // snapshot even if the catalog changes afterwards.
        let entry = match self.catalog.lookup(&input.treatment_code) {
            Ok(entry) => entry,
            Err(CatalogError::NotFound(code)) => {
                return Err(DomainError::unknown_treatment_code(code).into());
            }
            Err(retryable) => return Err(ServiceError::Catalog(retryable)),
        };

        let treatment_id = TreatmentRecordId::new();
        let target = match input.tooth_record_id {
            Some(tooth_record_id) => TreatmentTarget::Tooth(tooth_record_id),
            None => TreatmentTarget::WholeMouth,
        };
        let now = Utc::now();

        self.dispatch_chart(
            clinic_id,
            odontogram_id.0,
            ExpectedVersion::Any,
            OdontogramCommand::RecordTreatment(RecordTreatment {
                clinic_id,
                odontogram_id,
                treatment_id,
                target,
                treatment_code: entry.code,
                treatment_name: entry.name,
                category: entry.category,
                doctor_id: input.doctor_id,
                doctor_name: input.doctor_name,
                price: input.price.unwrap_or(entry.default_price),
                performed_at: input.performed_at.unwrap_or(now),
                occurred_at: now,
            }),
        )?;

        Ok((self.chart_checked(clinic_id, &odontogram_id)?, treatment_id))
    }

    pub fn complete_treatment(
        &self,
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
        treatment_id: TreatmentRecordId,
    ) -> Result<Odontogram, ServiceError> {
        self.dispatch_chart(
            clinic_id,
            odontogram_id.0,
            ExpectedVersion::Any,
            OdontogramCommand::MarkTreatmentCompleted(MarkTreatmentCompleted {
                clinic_id,
                odontogram_id,
                treatment_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.chart_checked(clinic_id, &odontogram_id)
    }

    pub fn retract_treatment(
        &self,
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
        treatment_id: TreatmentRecordId,
    ) -> Result<Odontogram, ServiceError> {
        self.dispatch_chart(
            clinic_id,
            odontogram_id.0,
            ExpectedVersion::Any,
            OdontogramCommand::RetractTreatment(RetractTreatment {
                clinic_id,
                odontogram_id,
                treatment_id,
                occurred_at: Utc::now(),
            }),
        )?;
        self.chart_checked(clinic_id, &odontogram_id)
    }

    pub fn list_treatments(
        &self,
        clinic_id: ClinicId,
        odontogram_id: &OdontogramId,
    ) -> Option<Vec<TreatmentRecord>> {
        self.charts
            .get(clinic_id, odontogram_id)
            .map(|chart| chart.treatments().to_vec())
    }

    // ---------------------------------------------------------------
    // Invoicing
    // ---------------------------------------------------------------

    fn preview_lines(billable: &[TreatmentRecord]) -> Vec<InvoiceLine> {
        billable
            .iter()
            .enumerate()
            .map(|(idx, treatment)| InvoiceLine {
                line_no: (idx as u32) + 1,
                treatment_record_id: treatment.id,
                treatment_code: treatment.treatment_code.clone(),
                description: treatment.treatment_name.clone(),
                price: round2(treatment.price),
            })
            .collect()
    }

    pub fn preview_invoice(
        &self,
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
    ) -> Result<InvoicePreview, ServiceError> {
        let chart = self.chart_checked(clinic_id, &odontogram_id)?;
        let patient_id = chart.patient_id().ok_or_else(DomainError::not_found)?;

        let billable: Vec<TreatmentRecord> = chart.billable_treatments().cloned().collect();
        let lines = Self::preview_lines(&billable);

        let tax_rate = self.tax_rate()?;
        let Totals { subtotal, tax, total } =
            invoice_totals(lines.iter().map(|l| l.price), tax_rate);

        Ok(InvoicePreview {
            odontogram_id,
            patient_id,
            lines,
            subtotal,
            tax_rate,
            tax,
            total,
        })
    }

    /// Commit an invoice over the selected billable treatments.
    ///
    /// With `selection = None` every currently billable treatment is
    /// claimed. The claim is re-validated against live state, so a line
    /// grabbed by a concurrent commit surfaces as `StaleLine` and nothing
    /// is persisted for the loser.
    pub fn commit_invoice(
        &self,
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
        selection: Option<Vec<TreatmentRecordId>>,
    ) -> Result<InvoiceReadModel, ServiceError> {
        let chart = self.chart_checked(clinic_id, &odontogram_id)?;
        let patient_id = chart.patient_id().ok_or_else(DomainError::not_found)?;

        // An explicit selection is taken at face value: lines that lost
        // their eligibility since the preview surface as StaleLine from the
        // claim, never as a silently smaller invoice.
        let selected: Vec<TreatmentRecord> = match &selection {
            None => chart.billable_treatments().cloned().collect(),
            Some(ids) => {
                let mut records = Vec::with_capacity(ids.len());
                for id in ids {
                    let record = chart
                        .treatments()
                        .iter()
                        .find(|t| t.id == *id)
                        .ok_or_else(DomainError::not_found)?;
                    records.push(record.clone());
                }
                records
            }
        };

        if selected.is_empty() {
            return Err(DomainError::EmptySelection.into());
        }

        let tax_rate = self.tax_rate()?;
        let lines = Self::preview_lines(&selected);
        let invoice_id = InvoiceId::new();
        let now = Utc::now();

        // Claim first: the atomic conditional update that makes double
        // billing impossible.
        self.dispatch_chart(
            clinic_id,
            odontogram_id.0,
            ExpectedVersion::Any,
            OdontogramCommand::ClaimTreatments(ClaimTreatments {
                clinic_id,
                odontogram_id,
                invoice_id,
                treatment_ids: lines.iter().map(|l| l.treatment_record_id).collect(),
                occurred_at: now,
            }),
        )?;

        let issued = self.dispatch_invoice(
            clinic_id,
            invoice_id,
            InvoiceCommand::IssueInvoice(IssueInvoice {
                clinic_id,
                invoice_id,
                patient_id,
                odontogram_id,
                lines,
                tax_rate,
                occurred_at: now,
            }),
        );

        if let Err(issue_err) = issued {
            // Compensate: the claim must not outlive a failed issue.
            let release = self.dispatch_chart(
                clinic_id,
                odontogram_id.0,
                ExpectedVersion::Any,
                OdontogramCommand::ReleaseClaims(ReleaseClaims {
                    clinic_id,
                    odontogram_id,
                    invoice_id,
                    occurred_at: Utc::now(),
                }),
            );
            if let Err(release_err) = release {
                tracing::error!(
                    "failed to release claims for aborted invoice {invoice_id}: {release_err:?}"
                );
            }
            return Err(issue_err.into());
        }

        self.invoices
            .get(clinic_id, &invoice_id)
            .ok_or_else(|| DomainError::not_found().into())
    }

    pub fn get_invoice(
        &self,
        clinic_id: ClinicId,
        invoice_id: &InvoiceId,
    ) -> Option<InvoiceReadModel> {
        self.invoices.get(clinic_id, invoice_id)
    }

    pub fn invoices_for_patient(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
    ) -> Vec<InvoiceReadModel> {
        self.invoices.list_for_patient(clinic_id, patient_id)
    }

    pub fn register_payment(
        &self,
        clinic_id: ClinicId,
        invoice_id: InvoiceId,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<InvoiceReadModel, ServiceError> {
        self.dispatch_invoice(
            clinic_id,
            invoice_id,
            InvoiceCommand::RegisterPayment(RegisterPayment {
                clinic_id,
                invoice_id,
                payment_id: PaymentId::new(),
                amount,
                method,
                occurred_at: Utc::now(),
            }),
        )?;

        self.invoices
            .get(clinic_id, &invoice_id)
            .ok_or_else(|| DomainError::not_found().into())
    }

    /// Cancel an invoice and release its claimed treatment records.
    ///
    /// The release is what keeps billing history from becoming permanently
    /// orphaned: the lines become eligible for a future invoice.
    pub fn cancel_invoice(
        &self,
        clinic_id: ClinicId,
        invoice_id: InvoiceId,
        reason: String,
    ) -> Result<InvoiceReadModel, ServiceError> {
        self.dispatch_invoice(
            clinic_id,
            invoice_id,
            InvoiceCommand::CancelInvoice(CancelInvoice {
                clinic_id,
                invoice_id,
                reason,
                occurred_at: Utc::now(),
            }),
        )?;

        let cancelled = self
            .invoices
            .get(clinic_id, &invoice_id)
            .ok_or_else(|| -> ServiceError { DomainError::not_found().into() })?;

        self.dispatch_chart(
            clinic_id,
            cancelled.odontogram_id.0,
            ExpectedVersion::Any,
            OdontogramCommand::ReleaseClaims(ReleaseClaims {
                clinic_id,
                odontogram_id: cancelled.odontogram_id,
                invoice_id,
                occurred_at: Utc::now(),
            }),
        )?;

        Ok(cancelled)
    }

    // ---------------------------------------------------------------
    // Revenue
    // ---------------------------------------------------------------

    pub fn revenue(
        &self,
        clinic_id: ClinicId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> RevenueReport {
        self.revenue.report(clinic_id, start, end)
    }
}
