use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clinicore_charting::{OdontogramId, TreatmentRecordId};
use clinicore_core::{Aggregate, AggregateRoot, ClinicId, DomainError, InvoiceId, PatientId};
use clinicore_events::Event;

use crate::money::{Totals, invoice_totals};

/// Identifier of one payment on an invoice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for PaymentId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| DomainError::invalid_id(format!("PaymentId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Invoice status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Cancelled,
}

/// Invoice line: the billing projection of exactly one treatment record.
///
/// `price` is a snapshot taken at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub line_no: u32,
    pub treatment_record_id: TreatmentRecordId,
    pub treatment_code: String,
    pub description: String,
    pub price: Decimal,
}

/// How a payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Insurance,
    Other,
}

/// One payment against an invoice (append-only; never edited or deleted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
}

/// Aggregate root: Invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    id: InvoiceId,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    odontogram_id: Option<OdontogramId>,
    issued_at: Option<DateTime<Utc>>,
    status: InvoiceStatus,
    lines: Vec<InvoiceLine>,
    subtotal: Decimal,
    tax_rate: Decimal,
    tax: Decimal,
    total: Decimal,
    total_paid: Decimal,
    payments: Vec<Payment>,
    cancellation_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Invoice {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InvoiceId) -> Self {
        Self {
            id,
            clinic_id: None,
            patient_id: None,
            odontogram_id: None,
            issued_at: None,
            status: InvoiceStatus::Draft,
            lines: Vec::new(),
            subtotal: Decimal::ZERO,
            tax_rate: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            payments: Vec::new(),
            cancellation_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InvoiceId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn odontogram_id(&self) -> Option<OdontogramId> {
        self.odontogram_id
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn status(&self) -> InvoiceStatus {
        self.status
    }

    pub fn lines(&self) -> &[InvoiceLine] {
        &self.lines
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn tax(&self) -> Decimal {
        self.tax
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn total_paid(&self) -> Decimal {
        self.total_paid
    }

    pub fn balance(&self) -> Decimal {
        self.total - self.total_paid
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// Invariant: only issued / partially paid invoices accept payments.
    pub fn is_payable(&self) -> bool {
        matches!(
            self.status,
            InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid
        )
    }
}

impl AggregateRoot for Invoice {
    type Id = InvoiceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueInvoice.
///
/// Lines arrive pre-claimed on the source odontogram; the aggregate computes
/// subtotal/tax/total from the line price snapshots and the jurisdiction
/// rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueInvoice {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub odontogram_id: OdontogramId,
    pub lines: Vec<InvoiceLine>,
    pub tax_rate: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RegisterPayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayment {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub payment_id: PaymentId,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelInvoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelInvoice {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceCommand {
    IssueInvoice(IssueInvoice),
    RegisterPayment(RegisterPayment),
    CancelInvoice(CancelInvoice),
}

/// Event: InvoiceIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceIssued {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub odontogram_id: OdontogramId,
    pub lines: Vec<InvoiceLine>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRegistered.
///
/// Carries the recomputed running total and status so read models replay
/// without re-deriving arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRegistered {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub payment: Payment,
    pub new_total_paid: Decimal,
    pub new_status: InvoiceStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: InvoiceCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCancelled {
    pub clinic_id: ClinicId,
    pub invoice_id: InvoiceId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceEvent {
    InvoiceIssued(InvoiceIssued),
    PaymentRegistered(PaymentRegistered),
    InvoiceCancelled(InvoiceCancelled),
}

impl InvoiceEvent {
    pub fn clinic_id(&self) -> ClinicId {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.clinic_id,
            InvoiceEvent::PaymentRegistered(e) => e.clinic_id,
            InvoiceEvent::InvoiceCancelled(e) => e.clinic_id,
        }
    }

    pub fn invoice_id(&self) -> InvoiceId {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.invoice_id,
            InvoiceEvent::PaymentRegistered(e) => e.invoice_id,
            InvoiceEvent::InvoiceCancelled(e) => e.invoice_id,
        }
    }
}

impl Event for InvoiceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InvoiceEvent::InvoiceIssued(_) => "billing.invoice.issued",
            InvoiceEvent::PaymentRegistered(_) => "billing.invoice.payment_registered",
            InvoiceEvent::InvoiceCancelled(_) => "billing.invoice.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InvoiceEvent::InvoiceIssued(e) => e.occurred_at,
            InvoiceEvent::PaymentRegistered(e) => e.occurred_at,
            InvoiceEvent::InvoiceCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Invoice {
    type Command = InvoiceCommand;
    type Event = InvoiceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InvoiceEvent::InvoiceIssued(e) => {
                self.id = e.invoice_id;
                self.clinic_id = Some(e.clinic_id);
                self.patient_id = Some(e.patient_id);
                self.odontogram_id = Some(e.odontogram_id);
                self.issued_at = Some(e.occurred_at);
                self.lines = e.lines.clone();
                self.subtotal = e.subtotal;
                self.tax_rate = e.tax_rate;
                self.tax = e.tax;
                self.total = e.total;
                self.total_paid = Decimal::ZERO;
                self.status = InvoiceStatus::Issued;
                self.created = true;
            }
            InvoiceEvent::PaymentRegistered(e) => {
                self.payments.push(e.payment.clone());
                self.total_paid = e.new_total_paid;
                self.status = e.new_status;
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                self.status = InvoiceStatus::Cancelled;
                self.cancellation_reason = Some(e.reason.clone());
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InvoiceCommand::IssueInvoice(cmd) => self.handle_issue(cmd),
            InvoiceCommand::RegisterPayment(cmd) => self.handle_register_payment(cmd),
            InvoiceCommand::CancelInvoice(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Invoice {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invalid_state("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_invoice_id(&self, invoice_id: InvoiceId) -> Result<(), DomainError> {
        if self.id != invoice_id {
            return Err(DomainError::invalid_state("invoice_id mismatch"));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("invoice already exists"));
        }

        if cmd.lines.is_empty() {
            return Err(DomainError::EmptySelection);
        }

        if cmd.tax_rate < Decimal::ZERO {
            return Err(DomainError::validation("tax rate must not be negative"));
        }

        let mut seen: Vec<TreatmentRecordId> =
            cmd.lines.iter().map(|l| l.treatment_record_id).collect();
        seen.sort_by_key(|id| *id.as_uuid().as_bytes());
        seen.dedup();
        if seen.len() != cmd.lines.len() {
            return Err(DomainError::validation(
                "an invoice may reference each treatment record once",
            ));
        }

        for line in &cmd.lines {
            if line.price < Decimal::ZERO {
                return Err(DomainError::validation(
                    "invoice line price must not be negative",
                ));
            }
        }

        let Totals { subtotal, tax, total } =
            invoice_totals(cmd.lines.iter().map(|l| l.price), cmd.tax_rate);

        Ok(vec![InvoiceEvent::InvoiceIssued(InvoiceIssued {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            patient_id: cmd.patient_id,
            odontogram_id: cmd.odontogram_id,
            lines: cmd.lines.clone(),
            subtotal,
            tax_rate: cmd.tax_rate,
            tax,
            total,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_payment(
        &self,
        cmd: &RegisterPayment,
    ) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if cmd.amount <= Decimal::ZERO {
            return Err(DomainError::validation("payment amount must be positive"));
        }

        match self.status {
            InvoiceStatus::Draft => {
                return Err(DomainError::invalid_state("draft invoices are not payable"));
            }
            InvoiceStatus::Cancelled => {
                return Err(DomainError::invalid_state(
                    "cancelled invoices are not payable",
                ));
            }
            InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid => {}
        }

        let new_total_paid = self.total_paid + cmd.amount;
        if new_total_paid > self.total {
            return Err(DomainError::overpayment(format!(
                "payment of {} exceeds outstanding balance {}",
                cmd.amount,
                self.balance()
            )));
        }

        let new_status = if new_total_paid == self.total {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        };

        Ok(vec![InvoiceEvent::PaymentRegistered(PaymentRegistered {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            payment: Payment {
                id: cmd.payment_id,
                amount: cmd.amount,
                method: cmd.method,
                paid_at: cmd.occurred_at,
            },
            new_total_paid,
            new_status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelInvoice) -> Result<Vec<InvoiceEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(cmd.clinic_id)?;
        self.ensure_invoice_id(cmd.invoice_id)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation requires a reason"));
        }

        match self.status {
            InvoiceStatus::Cancelled => return Err(DomainError::AlreadyCancelled),
            // A fully paid invoice needs a refund workflow, not a cancellation.
            InvoiceStatus::Paid => return Err(DomainError::AlreadyPaid),
            InvoiceStatus::Draft | InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid => {}
        }

        Ok(vec![InvoiceEvent::InvoiceCancelled(InvoiceCancelled {
            clinic_id: cmd.clinic_id,
            invoice_id: cmd.invoice_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
