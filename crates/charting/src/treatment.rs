//! Treatment ledger entries: one billable or planned clinical action, tied
//! to a tooth or recorded whole-mouth.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clinicore_catalog::TreatmentCategory;
use clinicore_core::{DoctorId, DomainError, InvoiceId};

use crate::tooth::ToothRecordId;

/// Identifier of one treatment ledger entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreatmentRecordId(Uuid);

impl TreatmentRecordId {
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

impl Default for TreatmentRecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for TreatmentRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for TreatmentRecordId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("TreatmentRecordId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// What a treatment applies to.
///
/// Tagged variant instead of a flag + nullable tooth reference: a record can
/// never carry both or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "tooth_record_id")]
pub enum TreatmentTarget {
    Tooth(ToothRecordId),
    WholeMouth,
}

impl TreatmentTarget {
    pub fn tooth_record_id(&self) -> Option<ToothRecordId> {
        match self {
            TreatmentTarget::Tooth(id) => Some(*id),
            TreatmentTarget::WholeMouth => None,
        }
    }
}

/// One treatment ledger entry.
///
/// Code, name, category and price are snapshots taken from the catalog when
/// the treatment was recorded; later catalog edits do not touch them.
/// `invoice_id`, once set, only ever returns to `None` through invoice
/// cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentRecord {
    pub id: TreatmentRecordId,
    pub target: TreatmentTarget,
    pub treatment_code: String,
    pub treatment_name: String,
    pub category: TreatmentCategory,
    pub doctor_id: DoctorId,
    pub doctor_name: String,
    pub performed_at: DateTime<Utc>,
    pub price: Decimal,
    pub completed: bool,
    pub invoice_id: Option<InvoiceId>,
}

impl TreatmentRecord {
    /// Completed and not yet claimed by any invoice.
    pub fn is_billable(&self) -> bool {
        self.completed && self.invoice_id.is_none()
    }
}
