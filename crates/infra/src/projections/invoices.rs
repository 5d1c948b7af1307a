//! Queryable invoice read model (header + lines + payments).

use std::collections::HashMap;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_billing::{InvoiceEvent, InvoiceLine, InvoiceStatus, Payment};
use clinicore_charting::OdontogramId;
use clinicore_core::{AggregateId, ClinicId, InvoiceId, PatientId};
use clinicore_events::EventEnvelope;

use crate::read_model::ClinicStore;

pub const AGGREGATE_TYPE: &str = "billing.invoice";

/// Read model: full invoice state for the API layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceReadModel {
    pub invoice_id: InvoiceId,
    pub patient_id: PatientId,
    pub odontogram_id: OdontogramId,
    pub issued_at: chrono::DateTime<chrono::Utc>,
    pub status: InvoiceStatus,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub total_paid: Decimal,
    pub cancellation_reason: Option<String>,
    pub lines: Vec<InvoiceLine>,
    pub payments: Vec<Payment>,
}

impl InvoiceReadModel {
    pub fn balance(&self) -> Decimal {
        self.total - self.total_paid
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum InvoicesProjectionError {
    #[error("failed to deserialize invoice event: {0}")]
    Deserialize(String),

    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("event for unknown invoice {0}")]
    UnknownInvoice(InvoiceId),
}

#[derive(Debug)]
pub struct InvoicesProjection<S>
where
    S: ClinicStore<InvoiceId, InvoiceReadModel>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> InvoicesProjection<S>
where
    S: ClinicStore<InvoiceId, InvoiceReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    fn get_cursor(&self, clinic_id: ClinicId, aggregate_id: AggregateId) -> u64 {
        match self.cursors.read() {
            Ok(cursors) => *cursors
                .get(&CursorKey { clinic_id, aggregate_id })
                .unwrap_or(&0),
            Err(_) => 0,
        }
    }

    fn update_cursor(&self, clinic_id: ClinicId, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.insert(CursorKey { clinic_id, aggregate_id }, seq);
        }
    }

    fn clear_cursors(&self, clinic_id: ClinicId) {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.retain(|k, _| k.clinic_id != clinic_id);
        }
    }

    pub fn get(&self, clinic_id: ClinicId, invoice_id: &InvoiceId) -> Option<InvoiceReadModel> {
        self.store.get(clinic_id, invoice_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<InvoiceReadModel> {
        self.store.list(clinic_id)
    }

    pub fn list_for_patient(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
    ) -> Vec<InvoiceReadModel> {
        let mut invoices: Vec<InvoiceReadModel> = self
            .store
            .list(clinic_id)
            .into_iter()
            .filter(|rm| rm.patient_id == patient_id)
            .collect();
        invoices.sort_by_key(|rm| std::cmp::Reverse(rm.issued_at));
        invoices
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), InvoicesProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(clinic_id, aggregate_id);
        if seq == 0 {
            return Err(InvoicesProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(InvoicesProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| InvoicesProjectionError::Deserialize(e.to_string()))?;

        if ev.clinic_id() != clinic_id {
            return Err(InvoicesProjectionError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        let invoice_id = ev.invoice_id();
        if AggregateId::from(invoice_id) != aggregate_id {
            return Err(InvoicesProjectionError::ClinicIsolation(
                "event invoice_id does not match envelope aggregate_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::InvoiceIssued(e) => {
                self.store.upsert(
                    clinic_id,
                    e.invoice_id,
                    InvoiceReadModel {
                        invoice_id: e.invoice_id,
                        patient_id: e.patient_id,
                        odontogram_id: e.odontogram_id,
                        issued_at: e.occurred_at,
                        status: InvoiceStatus::Issued,
                        subtotal: e.subtotal,
                        tax_rate: e.tax_rate,
                        tax: e.tax,
                        total: e.total,
                        total_paid: Decimal::ZERO,
                        cancellation_reason: None,
                        lines: e.lines,
                        payments: Vec::new(),
                    },
                );
            }
            InvoiceEvent::PaymentRegistered(e) => {
                let mut rm = self
                    .store
                    .get(clinic_id, &e.invoice_id)
                    .ok_or(InvoicesProjectionError::UnknownInvoice(e.invoice_id))?;
                rm.payments.push(e.payment);
                rm.total_paid = e.new_total_paid;
                rm.status = e.new_status;
                self.store.upsert(clinic_id, e.invoice_id, rm);
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                let mut rm = self
                    .store
                    .get(clinic_id, &e.invoice_id)
                    .ok_or(InvoicesProjectionError::UnknownInvoice(e.invoice_id))?;
                rm.status = InvoiceStatus::Cancelled;
                rm.cancellation_reason = Some(e.reason);
                self.store.upsert(clinic_id, e.invoice_id, rm);
            }
        }

        self.update_cursor(clinic_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), InvoicesProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();

        {
            let mut clinics = envs.iter().map(|e| e.clinic_id()).collect::<Vec<_>>();
            clinics.sort_by_key(|c| *c.as_uuid().as_bytes());
            clinics.dedup();
            for clinic in clinics {
                self.store.clear_clinic(clinic);
                self.clear_cursors(clinic);
            }
        }

        envs.sort_by_key(|e| {
            (
                *e.clinic_id().as_uuid().as_bytes(),
                *e.aggregate_id().as_uuid().as_bytes(),
                e.sequence_number(),
            )
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}
