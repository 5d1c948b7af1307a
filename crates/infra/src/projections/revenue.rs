//! Revenue rollups over committed invoices.
//!
//! Read-only aggregation: Draft invoices are not yet obligations and
//! Cancelled invoices were reversed, so neither contributes.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_billing::{InvoiceEvent, InvoiceStatus};
use clinicore_core::{AggregateId, ClinicId, InvoiceId};
use clinicore_events::EventEnvelope;

use crate::read_model::ClinicStore;

pub const AGGREGATE_TYPE: &str = "billing.invoice";

/// Per-invoice rollup record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueRecord {
    pub invoice_id: InvoiceId,
    pub issued_at: DateTime<Utc>,
    pub total: Decimal,
    pub collected: Decimal,
    pub status: InvoiceStatus,
}

impl RevenueRecord {
    /// Issued, partially paid and paid invoices count; Draft and Cancelled
    /// do not.
    fn is_committed(&self) -> bool {
        matches!(
            self.status,
            InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid
        )
    }
}

/// Rollup for a date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueReport {
    pub invoice_count: usize,
    pub billed_total: Decimal,
    pub collected_total: Decimal,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum RevenueProjectionError {
    #[error("failed to deserialize invoice event: {0}")]
    Deserialize(String),

    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

#[derive(Debug)]
pub struct RevenueProjection<S>
where
    S: ClinicStore<InvoiceId, RevenueRecord>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> RevenueProjection<S>
where
    S: ClinicStore<InvoiceId, RevenueRecord>,
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

    /// Sum committed, non-cancelled invoices with `issued_at` inside the
    /// inclusive `[start, end]` range (either bound optional).
    pub fn report(
        &self,
        clinic_id: ClinicId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> RevenueReport {
        let mut invoice_count = 0usize;
        let mut billed_total = Decimal::ZERO;
        let mut collected_total = Decimal::ZERO;

        for record in self.store.list(clinic_id) {
            if !record.is_committed() {
                continue;
            }
            if let Some(start) = start {
                if record.issued_at < start {
                    continue;
                }
            }
            if let Some(end) = end {
                if record.issued_at > end {
                    continue;
                }
            }

            invoice_count += 1;
            billed_total += record.total;
            collected_total += record.collected;
        }

        RevenueReport {
            invoice_count,
            billed_total,
            collected_total,
        }
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), RevenueProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(clinic_id, aggregate_id);
        if seq == 0 {
            return Err(RevenueProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(RevenueProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: InvoiceEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| RevenueProjectionError::Deserialize(e.to_string()))?;

        if ev.clinic_id() != clinic_id {
            return Err(RevenueProjectionError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }

        match ev {
            InvoiceEvent::InvoiceIssued(e) => {
                self.store.upsert(
                    clinic_id,
                    e.invoice_id,
                    RevenueRecord {
                        invoice_id: e.invoice_id,
                        issued_at: e.occurred_at,
                        total: e.total,
                        collected: Decimal::ZERO,
                        status: InvoiceStatus::Issued,
                    },
                );
            }
            InvoiceEvent::PaymentRegistered(e) => {
                if let Some(mut record) = self.store.get(clinic_id, &e.invoice_id) {
                    record.collected = e.new_total_paid;
                    record.status = e.new_status;
                    self.store.upsert(clinic_id, e.invoice_id, record);
                }
            }
            InvoiceEvent::InvoiceCancelled(e) => {
                if let Some(mut record) = self.store.get(clinic_id, &e.invoice_id) {
                    record.status = InvoiceStatus::Cancelled;
                    self.store.upsert(clinic_id, e.invoice_id, record);
                }
            }
        }

        self.update_cursor(clinic_id, aggregate_id, seq);
        Ok(())
    }
}
