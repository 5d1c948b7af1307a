use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use clinicore_catalog::TreatmentCategory;
use clinicore_core::{
    Aggregate, AggregateId, AggregateRoot, ClinicId, DoctorId, DomainError, InvoiceId, PatientId,
};
use clinicore_events::Event;

use crate::tooth::{
    SurfaceCondition, TOOTH_COUNT, ToothCondition, ToothRecord, ToothRecordId, ToothSurface,
    ToothSurfaceState, ToothType,
};
use crate::treatment::{TreatmentRecord, TreatmentRecordId, TreatmentTarget};

/// Odontogram identifier (clinic-scoped via `clinic_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OdontogramId(pub AggregateId);

impl OdontogramId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OdontogramId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: Odontogram.
///
/// Owns the 32 tooth records (created atomically, never deleted) and the
/// treatment ledger recorded against the chart. Archived charts are
/// historical snapshots: clinical state is frozen, but ledger entries keep
/// their billing lifecycle (completion, claim, release).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Odontogram {
    id: OdontogramId,
    clinic_id: Option<ClinicId>,
    patient_id: Option<PatientId>,
    teeth: Vec<ToothRecord>,
    treatments: Vec<TreatmentRecord>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    archived: bool,
    version: u64,
    created: bool,
}

impl Odontogram {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OdontogramId) -> Self {
        Self {
            id,
            clinic_id: None,
            patient_id: None,
            teeth: Vec::new(),
            treatments: Vec::new(),
            created_at: None,
            updated_at: None,
            archived: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OdontogramId {
        self.id
    }

    pub fn clinic_id(&self) -> Option<ClinicId> {
        self.clinic_id
    }

    pub fn patient_id(&self) -> Option<PatientId> {
        self.patient_id
    }

    pub fn teeth(&self) -> &[ToothRecord] {
        &self.teeth
    }

    pub fn treatments(&self) -> &[TreatmentRecord] {
        &self.treatments
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn tooth(&self, tooth_record_id: ToothRecordId) -> Option<&ToothRecord> {
        self.teeth.iter().find(|t| t.id == tooth_record_id)
    }

    pub fn treatment(&self, treatment_id: TreatmentRecordId) -> Option<&TreatmentRecord> {
        self.treatments.iter().find(|t| t.id == treatment_id)
    }

    /// Completed, unclaimed ledger entries (eligible for invoicing).
    pub fn billable_treatments(&self) -> impl Iterator<Item = &TreatmentRecord> {
        self.treatments.iter().filter(|t| t.is_billable())
    }
}

impl AggregateRoot for Odontogram {
    type Id = OdontogramId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOdontogram.
///
/// `tooth_record_ids` are generated by the caller (32 ids, one per tooth
/// number in ascending order) so that decision logic stays deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOdontogram {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub patient_id: PatientId,
    pub tooth_record_ids: Vec<ToothRecordId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArchiveOdontogram (chart superseded by a newer one).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOdontogram {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateToothCondition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateToothCondition {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub tooth_record_id: ToothRecordId,
    pub condition: ToothCondition,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordSurfaceCondition.
///
/// `supersede` must be set to replace an active condition already recorded
/// on the surface; the replacement is a state transition carried in the
/// event, not a silent overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSurfaceCondition {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub tooth_record_id: ToothRecordId,
    pub surface: ToothSurface,
    pub condition: SurfaceCondition,
    pub supersede: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordTreatment.
///
/// Code, name, category and price arrive already resolved against the
/// treatment catalog; the aggregate stores them as snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTreatment {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub treatment_id: TreatmentRecordId,
    pub target: TreatmentTarget,
    pub treatment_code: String,
    pub treatment_name: String,
    pub category: TreatmentCategory,
    pub doctor_id: DoctorId,
    pub doctor_name: String,
    pub price: Decimal,
    pub performed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkTreatmentCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkTreatmentCompleted {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub treatment_id: TreatmentRecordId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RetractTreatment (delete a plan that was never completed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetractTreatment {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub treatment_id: TreatmentRecordId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ClaimTreatments (invoice commit claiming its source lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimTreatments {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub invoice_id: InvoiceId,
    pub treatment_ids: Vec<TreatmentRecordId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseClaims (invoice cancelled; lines become billable again).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseClaims {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub invoice_id: InvoiceId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OdontogramCommand {
    CreateOdontogram(CreateOdontogram),
    ArchiveOdontogram(ArchiveOdontogram),
    UpdateToothCondition(UpdateToothCondition),
    RecordSurfaceCondition(RecordSurfaceCondition),
    RecordTreatment(RecordTreatment),
    MarkTreatmentCompleted(MarkTreatmentCompleted),
    RetractTreatment(RetractTreatment),
    ClaimTreatments(ClaimTreatments),
    ReleaseClaims(ReleaseClaims),
}

/// Event: OdontogramCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdontogramCreated {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub patient_id: PatientId,
    pub tooth_record_ids: Vec<ToothRecordId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OdontogramArchived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OdontogramArchived {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ToothConditionChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToothConditionChanged {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub tooth_record_id: ToothRecordId,
    pub tooth_number: u8,
    pub previous: ToothCondition,
    pub condition: ToothCondition,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SurfaceConditionRecorded.
///
/// `superseded` carries the active condition that was replaced, if any, so
/// per-surface history lives in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceConditionRecorded {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub tooth_record_id: ToothRecordId,
    pub tooth_number: u8,
    pub surface: ToothSurface,
    pub condition: SurfaceCondition,
    pub superseded: Option<SurfaceCondition>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreatmentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentRecorded {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub treatment_id: TreatmentRecordId,
    pub target: TreatmentTarget,
    pub treatment_code: String,
    pub treatment_name: String,
    pub category: TreatmentCategory,
    pub doctor_id: DoctorId,
    pub doctor_name: String,
    pub price: Decimal,
    pub performed_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreatmentCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentCompleted {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub treatment_id: TreatmentRecordId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreatmentRetracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentRetracted {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub treatment_id: TreatmentRecordId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreatmentsClaimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentsClaimed {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub invoice_id: InvoiceId,
    pub treatment_ids: Vec<TreatmentRecordId>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TreatmentsReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreatmentsReleased {
    pub clinic_id: ClinicId,
    pub odontogram_id: OdontogramId,
    pub invoice_id: InvoiceId,
    pub treatment_ids: Vec<TreatmentRecordId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OdontogramEvent {
    OdontogramCreated(OdontogramCreated),
    OdontogramArchived(OdontogramArchived),
    ToothConditionChanged(ToothConditionChanged),
    SurfaceConditionRecorded(SurfaceConditionRecorded),
    TreatmentRecorded(TreatmentRecorded),
    TreatmentCompleted(TreatmentCompleted),
    TreatmentRetracted(TreatmentRetracted),
    TreatmentsClaimed(TreatmentsClaimed),
    TreatmentsReleased(TreatmentsReleased),
}

impl OdontogramEvent {
    pub fn clinic_id(&self) -> ClinicId {
        match self {
            OdontogramEvent::OdontogramCreated(e) => e.clinic_id,
            OdontogramEvent::OdontogramArchived(e) => e.clinic_id,
            OdontogramEvent::ToothConditionChanged(e) => e.clinic_id,
            OdontogramEvent::SurfaceConditionRecorded(e) => e.clinic_id,
            OdontogramEvent::TreatmentRecorded(e) => e.clinic_id,
            OdontogramEvent::TreatmentCompleted(e) => e.clinic_id,
            OdontogramEvent::TreatmentRetracted(e) => e.clinic_id,
            OdontogramEvent::TreatmentsClaimed(e) => e.clinic_id,
            OdontogramEvent::TreatmentsReleased(e) => e.clinic_id,
        }
    }

    pub fn odontogram_id(&self) -> OdontogramId {
        match self {
            OdontogramEvent::OdontogramCreated(e) => e.odontogram_id,
            OdontogramEvent::OdontogramArchived(e) => e.odontogram_id,
            OdontogramEvent::ToothConditionChanged(e) => e.odontogram_id,
            OdontogramEvent::SurfaceConditionRecorded(e) => e.odontogram_id,
            OdontogramEvent::TreatmentRecorded(e) => e.odontogram_id,
            OdontogramEvent::TreatmentCompleted(e) => e.odontogram_id,
            OdontogramEvent::TreatmentRetracted(e) => e.odontogram_id,
            OdontogramEvent::TreatmentsClaimed(e) => e.odontogram_id,
            OdontogramEvent::TreatmentsReleased(e) => e.odontogram_id,
        }
    }
}

impl Event for OdontogramEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OdontogramEvent::OdontogramCreated(_) => "charting.odontogram.created",
            OdontogramEvent::OdontogramArchived(_) => "charting.odontogram.archived",
            OdontogramEvent::ToothConditionChanged(_) => "charting.odontogram.tooth_condition_changed",
            OdontogramEvent::SurfaceConditionRecorded(_) => "charting.odontogram.surface_recorded",
            OdontogramEvent::TreatmentRecorded(_) => "charting.odontogram.treatment_recorded",
            OdontogramEvent::TreatmentCompleted(_) => "charting.odontogram.treatment_completed",
            OdontogramEvent::TreatmentRetracted(_) => "charting.odontogram.treatment_retracted",
            OdontogramEvent::TreatmentsClaimed(_) => "charting.odontogram.treatments_claimed",
            OdontogramEvent::TreatmentsReleased(_) => "charting.odontogram.treatments_released",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OdontogramEvent::OdontogramCreated(e) => e.occurred_at,
            OdontogramEvent::OdontogramArchived(e) => e.occurred_at,
            OdontogramEvent::ToothConditionChanged(e) => e.occurred_at,
            OdontogramEvent::SurfaceConditionRecorded(e) => e.occurred_at,
            OdontogramEvent::TreatmentRecorded(e) => e.occurred_at,
            OdontogramEvent::TreatmentCompleted(e) => e.occurred_at,
            OdontogramEvent::TreatmentRetracted(e) => e.occurred_at,
            OdontogramEvent::TreatmentsClaimed(e) => e.occurred_at,
            OdontogramEvent::TreatmentsReleased(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Odontogram {
    type Command = OdontogramCommand;
    type Event = OdontogramEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OdontogramEvent::OdontogramCreated(e) => {
                self.id = e.odontogram_id;
                self.clinic_id = Some(e.clinic_id);
                self.patient_id = Some(e.patient_id);
                self.teeth = e
                    .tooth_record_ids
                    .iter()
                    .enumerate()
                    .map(|(idx, id)| {
                        let number = (idx as u8) + 1;
                        let tooth_type =
                            ToothType::for_number(number).unwrap_or(ToothType::Molar);
                        ToothRecord::healthy(*id, number, tooth_type)
                    })
                    .collect();
                self.treatments.clear();
                self.created_at = Some(e.occurred_at);
                self.archived = false;
                self.created = true;
            }
            OdontogramEvent::OdontogramArchived(_) => {
                self.archived = true;
            }
            OdontogramEvent::ToothConditionChanged(e) => {
                if let Some(tooth) = self.teeth.iter_mut().find(|t| t.id == e.tooth_record_id) {
                    tooth.condition = e.condition;
                }
            }
            OdontogramEvent::SurfaceConditionRecorded(e) => {
                if let Some(tooth) = self.teeth.iter_mut().find(|t| t.id == e.tooth_record_id) {
                    let state = ToothSurfaceState {
                        surface: e.surface,
                        condition: e.condition,
                        recorded_at: e.occurred_at,
                    };
                    match tooth.surfaces.iter_mut().find(|s| s.surface == e.surface) {
                        Some(existing) => *existing = state,
                        None => tooth.surfaces.push(state),
                    }
                }
            }
            OdontogramEvent::TreatmentRecorded(e) => {
                self.treatments.push(TreatmentRecord {
                    id: e.treatment_id,
                    target: e.target,
                    treatment_code: e.treatment_code.clone(),
                    treatment_name: e.treatment_name.clone(),
                    category: e.category,
                    doctor_id: e.doctor_id,
                    doctor_name: e.doctor_name.clone(),
                    performed_at: e.performed_at,
                    price: e.price,
                    completed: false,
                    invoice_id: None,
                });
            }
            OdontogramEvent::TreatmentCompleted(e) => {
                if let Some(t) = self.treatments.iter_mut().find(|t| t.id == e.treatment_id) {
                    t.completed = true;
                }
            }
            OdontogramEvent::TreatmentRetracted(e) => {
                self.treatments.retain(|t| t.id != e.treatment_id);
            }
            OdontogramEvent::TreatmentsClaimed(e) => {
                for t in &mut self.treatments {
                    if e.treatment_ids.contains(&t.id) {
                        t.invoice_id = Some(e.invoice_id);
                    }
                }
            }
            OdontogramEvent::TreatmentsReleased(e) => {
                for t in &mut self.treatments {
                    if t.invoice_id == Some(e.invoice_id) {
                        t.invoice_id = None;
                    }
                }
            }
        }

        self.updated_at = Some(event.occurred_at());

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OdontogramCommand::CreateOdontogram(cmd) => self.handle_create(cmd),
            OdontogramCommand::ArchiveOdontogram(cmd) => self.handle_archive(cmd),
            OdontogramCommand::UpdateToothCondition(cmd) => self.handle_update_tooth(cmd),
            OdontogramCommand::RecordSurfaceCondition(cmd) => self.handle_record_surface(cmd),
            OdontogramCommand::RecordTreatment(cmd) => self.handle_record_treatment(cmd),
            OdontogramCommand::MarkTreatmentCompleted(cmd) => self.handle_mark_completed(cmd),
            OdontogramCommand::RetractTreatment(cmd) => self.handle_retract(cmd),
            OdontogramCommand::ClaimTreatments(cmd) => self.handle_claim(cmd),
            OdontogramCommand::ReleaseClaims(cmd) => self.handle_release(cmd),
        }
    }
}

impl Odontogram {
    fn ensure_clinic(&self, clinic_id: ClinicId) -> Result<(), DomainError> {
        if !self.created {
            return Ok(());
        }
        if self.clinic_id != Some(clinic_id) {
            return Err(DomainError::invalid_state("clinic mismatch"));
        }
        Ok(())
    }

    fn ensure_odontogram_id(&self, odontogram_id: OdontogramId) -> Result<(), DomainError> {
        if self.id != odontogram_id {
            return Err(DomainError::invalid_state("odontogram_id mismatch"));
        }
        Ok(())
    }

    fn ensure_created(&self, clinic_id: ClinicId, odontogram_id: OdontogramId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_clinic(clinic_id)?;
        self.ensure_odontogram_id(odontogram_id)
    }

    fn ensure_chartable(&self) -> Result<(), DomainError> {
        if self.archived {
            return Err(DomainError::invalid_state(
                "odontogram is archived; clinical state is frozen",
            ));
        }
        Ok(())
    }

    fn tooth_checked(&self, tooth_record_id: ToothRecordId) -> Result<&ToothRecord, DomainError> {
        self.tooth(tooth_record_id).ok_or(DomainError::NotFound)
    }

    fn handle_create(&self, cmd: &CreateOdontogram) -> Result<Vec<OdontogramEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invalid_state("odontogram already exists"));
        }

        if cmd.tooth_record_ids.len() != TOOTH_COUNT {
            return Err(DomainError::validation(format!(
                "an odontogram needs exactly {TOOTH_COUNT} tooth records, got {}",
                cmd.tooth_record_ids.len()
            )));
        }

        let mut seen = cmd.tooth_record_ids.clone();
        seen.sort_by_key(|id| *id.as_uuid().as_bytes());
        seen.dedup();
        if seen.len() != TOOTH_COUNT {
            return Err(DomainError::validation(
                "tooth record ids must be distinct",
            ));
        }

        Ok(vec![OdontogramEvent::OdontogramCreated(OdontogramCreated {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            patient_id: cmd.patient_id,
            tooth_record_ids: cmd.tooth_record_ids.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_archive(&self, cmd: &ArchiveOdontogram) -> Result<Vec<OdontogramEvent>, DomainError> {
        self.ensure_created(cmd.clinic_id, cmd.odontogram_id)?;

        if self.archived {
            return Err(DomainError::invalid_state("odontogram is already archived"));
        }

        Ok(vec![OdontogramEvent::OdontogramArchived(OdontogramArchived {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_tooth(
        &self,
        cmd: &UpdateToothCondition,
    ) -> Result<Vec<OdontogramEvent>, DomainError> {
        self.ensure_created(cmd.clinic_id, cmd.odontogram_id)?;
        self.ensure_chartable()?;

        let tooth = self.tooth_checked(cmd.tooth_record_id)?;

        // Same condition is a no-op, even on a missing/extracted tooth.
        if tooth.condition == cmd.condition {
            return Ok(vec![]);
        }

        if tooth.condition.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "tooth {} is {:?}; its chart entry no longer accepts changes",
                tooth.tooth_number, tooth.condition
            )));
        }

        Ok(vec![OdontogramEvent::ToothConditionChanged(ToothConditionChanged {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            tooth_record_id: cmd.tooth_record_id,
            tooth_number: tooth.tooth_number,
            previous: tooth.condition,
            condition: cmd.condition,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_surface(
        &self,
        cmd: &RecordSurfaceCondition,
    ) -> Result<Vec<OdontogramEvent>, DomainError> {
        self.ensure_created(cmd.clinic_id, cmd.odontogram_id)?;
        self.ensure_chartable()?;

        let tooth = self.tooth_checked(cmd.tooth_record_id)?;

        if tooth.condition.is_terminal() {
            return Err(DomainError::invalid_state(format!(
                "tooth {} is {:?}; surfaces cannot be charted",
                tooth.tooth_number, tooth.condition
            )));
        }

        let superseded = match tooth.surface_state(cmd.surface) {
            Some(existing) if existing.condition.is_active() => {
                if !cmd.supersede {
                    return Err(DomainError::invalid_state(format!(
                        "surface {:?} on tooth {} already has an active condition; \
                         set supersede to replace it",
                        cmd.surface, tooth.tooth_number
                    )));
                }
                Some(existing.condition)
            }
            _ => None,
        };

        Ok(vec![OdontogramEvent::SurfaceConditionRecorded(SurfaceConditionRecorded {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            tooth_record_id: cmd.tooth_record_id,
            tooth_number: tooth.tooth_number,
            surface: cmd.surface,
            condition: cmd.condition,
            superseded,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_treatment(
        &self,
        cmd: &RecordTreatment,
    ) -> Result<Vec<OdontogramEvent>, DomainError> {
        self.ensure_created(cmd.clinic_id, cmd.odontogram_id)?;
        self.ensure_chartable()?;

        if cmd.treatment_code.trim().is_empty() {
            return Err(DomainError::validation("treatment_code cannot be empty"));
        }
        if cmd.treatment_name.trim().is_empty() {
            return Err(DomainError::validation("treatment_name cannot be empty"));
        }
        if cmd.price < Decimal::ZERO {
            return Err(DomainError::validation("price must not be negative"));
        }
        if self.treatment(cmd.treatment_id).is_some() {
            return Err(DomainError::validation("treatment_id already recorded"));
        }

        if let TreatmentTarget::Tooth(tooth_record_id) = cmd.target {
            if self.tooth(tooth_record_id).is_none() {
                return Err(DomainError::validation(format!(
                    "tooth record {tooth_record_id} does not belong to this odontogram"
                )));
            }
        }

        Ok(vec![OdontogramEvent::TreatmentRecorded(TreatmentRecorded {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            treatment_id: cmd.treatment_id,
            target: cmd.target,
            treatment_code: cmd.treatment_code.clone(),
            treatment_name: cmd.treatment_name.clone(),
            category: cmd.category,
            doctor_id: cmd.doctor_id,
            doctor_name: cmd.doctor_name.clone(),
            price: cmd.price,
            performed_at: cmd.performed_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_completed(
        &self,
        cmd: &MarkTreatmentCompleted,
    ) -> Result<Vec<OdontogramEvent>, DomainError> {
        self.ensure_created(cmd.clinic_id, cmd.odontogram_id)?;

        let treatment = self.treatment(cmd.treatment_id).ok_or(DomainError::NotFound)?;

        if treatment.invoice_id.is_some() {
            return Err(DomainError::invalid_state(
                "treatment is invoiced and can no longer change",
            ));
        }
        if treatment.completed {
            return Err(DomainError::invalid_state("treatment is already completed"));
        }

        Ok(vec![OdontogramEvent::TreatmentCompleted(TreatmentCompleted {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            treatment_id: cmd.treatment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retract(&self, cmd: &RetractTreatment) -> Result<Vec<OdontogramEvent>, DomainError> {
        self.ensure_created(cmd.clinic_id, cmd.odontogram_id)?;

        let treatment = self.treatment(cmd.treatment_id).ok_or(DomainError::NotFound)?;

        if treatment.invoice_id.is_some() {
            return Err(DomainError::invalid_state(
                "treatment is invoiced and can no longer change",
            ));
        }
        if treatment.completed {
            return Err(DomainError::invalid_state(
                "completed treatments are clinical history and cannot be retracted",
            ));
        }

        Ok(vec![OdontogramEvent::TreatmentRetracted(TreatmentRetracted {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            treatment_id: cmd.treatment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_claim(&self, cmd: &ClaimTreatments) -> Result<Vec<OdontogramEvent>, DomainError> {
        self.ensure_created(cmd.clinic_id, cmd.odontogram_id)?;

        if cmd.treatment_ids.is_empty() {
            return Err(DomainError::EmptySelection);
        }

        let mut distinct = cmd.treatment_ids.clone();
        distinct.sort_by_key(|id| *id.as_uuid().as_bytes());
        distinct.dedup();
        if distinct.len() != cmd.treatment_ids.len() {
            return Err(DomainError::validation("duplicate treatment ids in claim"));
        }

        for id in &cmd.treatment_ids {
            let treatment = self.treatment(*id).ok_or(DomainError::NotFound)?;

            if let Some(owner) = treatment.invoice_id {
                return Err(DomainError::stale_line(format!(
                    "treatment {id} was already claimed by invoice {owner}"
                )));
            }
            if !treatment.completed {
                return Err(DomainError::stale_line(format!(
                    "treatment {id} is no longer eligible (not completed)"
                )));
            }
        }

        Ok(vec![OdontogramEvent::TreatmentsClaimed(TreatmentsClaimed {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            invoice_id: cmd.invoice_id,
            treatment_ids: cmd.treatment_ids.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseClaims) -> Result<Vec<OdontogramEvent>, DomainError> {
        self.ensure_created(cmd.clinic_id, cmd.odontogram_id)?;

        let released: Vec<TreatmentRecordId> = self
            .treatments
            .iter()
            .filter(|t| t.invoice_id == Some(cmd.invoice_id))
            .map(|t| t.id)
            .collect();

        if released.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![OdontogramEvent::TreatmentsReleased(TreatmentsReleased {
            clinic_id: cmd.clinic_id,
            odontogram_id: cmd.odontogram_id,
            invoice_id: cmd.invoice_id,
            treatment_ids: released,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicore_core::AggregateId;

    fn test_clinic_id() -> ClinicId {
        ClinicId::new()
    }

    fn test_patient_id() -> PatientId {
        PatientId::new()
    }

    fn test_odontogram_id() -> OdontogramId {
        OdontogramId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn fresh_tooth_ids() -> Vec<ToothRecordId> {
        (0..TOOTH_COUNT).map(|_| ToothRecordId::new()).collect()
    }

    fn created_chart() -> (Odontogram, ClinicId, OdontogramId) {
        let clinic_id = test_clinic_id();
        let odontogram_id = test_odontogram_id();
        let mut chart = Odontogram::empty(odontogram_id);

        let cmd = CreateOdontogram {
            clinic_id,
            odontogram_id,
            patient_id: test_patient_id(),
            tooth_record_ids: fresh_tooth_ids(),
            occurred_at: test_time(),
        };
        let events = chart
            .handle(&OdontogramCommand::CreateOdontogram(cmd))
            .unwrap();
        chart.apply(&events[0]);

        (chart, clinic_id, odontogram_id)
    }

    fn record_treatment_cmd(
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
        target: TreatmentTarget,
        code: &str,
        price: Decimal,
    ) -> RecordTreatment {
        RecordTreatment {
            clinic_id,
            odontogram_id,
            treatment_id: TreatmentRecordId::new(),
            target,
            treatment_code: code.to_string(),
            treatment_name: format!("{code} treatment"),
            category: TreatmentCategory::Restorative,
            doctor_id: DoctorId::new(),
            doctor_name: "Dr. Adler".to_string(),
            price,
            performed_at: test_time(),
            occurred_at: test_time(),
        }
    }

    fn record_and_complete(
        chart: &mut Odontogram,
        clinic_id: ClinicId,
        odontogram_id: OdontogramId,
        target: TreatmentTarget,
        code: &str,
        price: Decimal,
    ) -> TreatmentRecordId {
        let cmd = record_treatment_cmd(clinic_id, odontogram_id, target, code, price);
        let treatment_id = cmd.treatment_id;
        let events = chart
            .handle(&OdontogramCommand::RecordTreatment(cmd))
            .unwrap();
        chart.apply(&events[0]);

        let events = chart
            .handle(&OdontogramCommand::MarkTreatmentCompleted(MarkTreatmentCompleted {
                clinic_id,
                odontogram_id,
                treatment_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        chart.apply(&events[0]);

        treatment_id
    }

    #[test]
    fn create_materializes_32_healthy_teeth_with_distinct_numbers() {
        let (chart, _, _) = created_chart();

        assert_eq!(chart.teeth().len(), TOOTH_COUNT);

        let mut numbers: Vec<u8> = chart.teeth().iter().map(|t| t.tooth_number).collect();
        numbers.sort_unstable();
        numbers.dedup();
        assert_eq!(numbers.len(), TOOTH_COUNT);
        assert_eq!(*numbers.first().unwrap(), 1);
        assert_eq!(*numbers.last().unwrap(), 32);

        for tooth in chart.teeth() {
            assert_eq!(tooth.condition, ToothCondition::Healthy);
            assert!(tooth.surfaces.is_empty());
            assert_eq!(
                Some(tooth.tooth_type),
                ToothType::for_number(tooth.tooth_number)
            );
        }
    }

    #[test]
    fn create_rejects_wrong_tooth_count_and_duplicates() {
        let odontogram_id = test_odontogram_id();
        let chart = Odontogram::empty(odontogram_id);

        let short = CreateOdontogram {
            clinic_id: test_clinic_id(),
            odontogram_id,
            patient_id: test_patient_id(),
            tooth_record_ids: (0..5).map(|_| ToothRecordId::new()).collect(),
            occurred_at: test_time(),
        };
        let err = chart
            .handle(&OdontogramCommand::CreateOdontogram(short))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let duplicated_id = ToothRecordId::new();
        let dup = CreateOdontogram {
            clinic_id: test_clinic_id(),
            odontogram_id,
            patient_id: test_patient_id(),
            tooth_record_ids: vec![duplicated_id; TOOTH_COUNT],
            occurred_at: test_time(),
        };
        let err = chart
            .handle(&OdontogramCommand::CreateOdontogram(dup))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let (chart, clinic_id, odontogram_id) = created_chart();

        let cmd = CreateOdontogram {
            clinic_id,
            odontogram_id,
            patient_id: test_patient_id(),
            tooth_record_ids: fresh_tooth_ids(),
            occurred_at: test_time(),
        };
        let err = chart
            .handle(&OdontogramCommand::CreateOdontogram(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn update_tooth_changes_condition_and_stamps_updated_at() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let tooth_id = chart.teeth()[13].id; // tooth number 14

        let when = test_time();
        let events = chart
            .handle(&OdontogramCommand::UpdateToothCondition(UpdateToothCondition {
                clinic_id,
                odontogram_id,
                tooth_record_id: tooth_id,
                condition: ToothCondition::Caries,
                occurred_at: when,
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
        chart.apply(&events[0]);

        let tooth = chart.tooth(tooth_id).unwrap();
        assert_eq!(tooth.condition, ToothCondition::Caries);
        assert_eq!(chart.updated_at(), Some(when));
        assert_eq!(chart.version(), 2);
    }

    #[test]
    fn noop_condition_update_emits_nothing() {
        let (chart, clinic_id, odontogram_id) = created_chart();
        let tooth_id = chart.teeth()[0].id;

        let events = chart
            .handle(&OdontogramCommand::UpdateToothCondition(UpdateToothCondition {
                clinic_id,
                odontogram_id,
                tooth_record_id: tooth_id,
                condition: ToothCondition::Healthy,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn extracted_tooth_rejects_further_changes() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let tooth_id = chart.teeth()[2].id;

        let events = chart
            .handle(&OdontogramCommand::UpdateToothCondition(UpdateToothCondition {
                clinic_id,
                odontogram_id,
                tooth_record_id: tooth_id,
                condition: ToothCondition::Extracted,
                occurred_at: test_time(),
            }))
            .unwrap();
        chart.apply(&events[0]);

        let err = chart
            .handle(&OdontogramCommand::UpdateToothCondition(UpdateToothCondition {
                clinic_id,
                odontogram_id,
                tooth_record_id: tooth_id,
                condition: ToothCondition::Filled,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let err = chart
            .handle(&OdontogramCommand::RecordSurfaceCondition(RecordSurfaceCondition {
                clinic_id,
                odontogram_id,
                tooth_record_id: tooth_id,
                surface: ToothSurface::Occlusal,
                condition: SurfaceCondition::Caries,
                supersede: false,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn occupied_surface_requires_supersede() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let tooth_id = chart.teeth()[4].id;

        let record = |condition, supersede| RecordSurfaceCondition {
            clinic_id,
            odontogram_id,
            tooth_record_id: tooth_id,
            surface: ToothSurface::Mesial,
            condition,
            supersede,
            occurred_at: test_time(),
        };

        let events = chart
            .handle(&OdontogramCommand::RecordSurfaceCondition(record(
                SurfaceCondition::Caries,
                false,
            )))
            .unwrap();
        chart.apply(&events[0]);

        // Same surface again without supersede: rejected.
        let err = chart
            .handle(&OdontogramCommand::RecordSurfaceCondition(record(
                SurfaceCondition::Filled,
                false,
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        // With supersede: the event carries the replaced condition.
        let events = chart
            .handle(&OdontogramCommand::RecordSurfaceCondition(record(
                SurfaceCondition::Filled,
                true,
            )))
            .unwrap();
        match &events[0] {
            OdontogramEvent::SurfaceConditionRecorded(e) => {
                assert_eq!(e.condition, SurfaceCondition::Filled);
                assert_eq!(e.superseded, Some(SurfaceCondition::Caries));
            }
            other => panic!("expected SurfaceConditionRecorded, got {other:?}"),
        }
        chart.apply(&events[0]);

        let tooth = chart.tooth(tooth_id).unwrap();
        assert_eq!(tooth.surfaces.len(), 1);
        assert_eq!(
            tooth.surface_state(ToothSurface::Mesial).unwrap().condition,
            SurfaceCondition::Filled
        );
    }

    #[test]
    fn record_treatment_snapshots_catalog_fields() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let tooth_id = chart.teeth()[13].id;

        let cmd = record_treatment_cmd(
            clinic_id,
            odontogram_id,
            TreatmentTarget::Tooth(tooth_id),
            "D101",
            Decimal::new(50000, 2),
        );
        let events = chart
            .handle(&OdontogramCommand::RecordTreatment(cmd.clone()))
            .unwrap();
        chart.apply(&events[0]);

        let treatment = chart.treatment(cmd.treatment_id).unwrap();
        assert_eq!(treatment.treatment_code, "D101");
        assert_eq!(treatment.price, Decimal::new(50000, 2));
        assert_eq!(treatment.target.tooth_record_id(), Some(tooth_id));
        assert!(!treatment.completed);
        assert!(treatment.invoice_id.is_none());
    }

    #[test]
    fn record_treatment_rejects_negative_price_and_foreign_tooth() {
        let (chart, clinic_id, odontogram_id) = created_chart();

        let negative = record_treatment_cmd(
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D900",
            Decimal::new(-100, 2),
        );
        let err = chart
            .handle(&OdontogramCommand::RecordTreatment(negative))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let foreign = record_treatment_cmd(
            clinic_id,
            odontogram_id,
            TreatmentTarget::Tooth(ToothRecordId::new()),
            "D101",
            Decimal::new(100, 2),
        );
        let err = chart
            .handle(&OdontogramCommand::RecordTreatment(foreign))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn plan_can_be_retracted_but_completed_history_cannot() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();

        let plan = record_treatment_cmd(
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D900",
            Decimal::new(20000, 2),
        );
        let plan_id = plan.treatment_id;
        let events = chart.handle(&OdontogramCommand::RecordTreatment(plan)).unwrap();
        chart.apply(&events[0]);

        let events = chart
            .handle(&OdontogramCommand::RetractTreatment(RetractTreatment {
                clinic_id,
                odontogram_id,
                treatment_id: plan_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        chart.apply(&events[0]);
        assert!(chart.treatment(plan_id).is_none());

        let done_id = record_and_complete(
            &mut chart,
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D901",
            Decimal::new(15000, 2),
        );
        let err = chart
            .handle(&OdontogramCommand::RetractTreatment(RetractTreatment {
                clinic_id,
                odontogram_id,
                treatment_id: done_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn double_completion_is_rejected() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let treatment_id = record_and_complete(
            &mut chart,
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D900",
            Decimal::new(20000, 2),
        );

        let err = chart
            .handle(&OdontogramCommand::MarkTreatmentCompleted(MarkTreatmentCompleted {
                clinic_id,
                odontogram_id,
                treatment_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn claim_marks_treatments_and_rejects_double_claims() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let tooth_id = chart.teeth()[13].id;

        let first = record_and_complete(
            &mut chart,
            clinic_id,
            odontogram_id,
            TreatmentTarget::Tooth(tooth_id),
            "D101",
            Decimal::new(50000, 2),
        );
        let second = record_and_complete(
            &mut chart,
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D900",
            Decimal::new(20000, 2),
        );

        let invoice_a = InvoiceId::new();
        let events = chart
            .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                clinic_id,
                odontogram_id,
                invoice_id: invoice_a,
                treatment_ids: vec![first, second],
                occurred_at: test_time(),
            }))
            .unwrap();
        chart.apply(&events[0]);

        assert_eq!(chart.treatment(first).unwrap().invoice_id, Some(invoice_a));
        assert_eq!(chart.treatment(second).unwrap().invoice_id, Some(invoice_a));
        assert_eq!(chart.billable_treatments().count(), 0);

        // A second claim over any of the same lines loses.
        let err = chart
            .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                clinic_id,
                odontogram_id,
                invoice_id: InvoiceId::new(),
                treatment_ids: vec![first],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::StaleLine(_)));
    }

    #[test]
    fn claim_rejects_uncompleted_lines_and_empty_selection() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();

        let plan = record_treatment_cmd(
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D900",
            Decimal::new(20000, 2),
        );
        let plan_id = plan.treatment_id;
        let events = chart.handle(&OdontogramCommand::RecordTreatment(plan)).unwrap();
        chart.apply(&events[0]);

        let err = chart
            .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                clinic_id,
                odontogram_id,
                invoice_id: InvoiceId::new(),
                treatment_ids: vec![plan_id],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::StaleLine(_)));

        let err = chart
            .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                clinic_id,
                odontogram_id,
                invoice_id: InvoiceId::new(),
                treatment_ids: vec![],
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::EmptySelection));
    }

    #[test]
    fn release_resets_claims_so_lines_become_billable_again() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let treatment_id = record_and_complete(
            &mut chart,
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D900",
            Decimal::new(20000, 2),
        );

        let invoice_id = InvoiceId::new();
        let events = chart
            .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                clinic_id,
                odontogram_id,
                invoice_id,
                treatment_ids: vec![treatment_id],
                occurred_at: test_time(),
            }))
            .unwrap();
        chart.apply(&events[0]);
        assert_eq!(chart.billable_treatments().count(), 0);

        let events = chart
            .handle(&OdontogramCommand::ReleaseClaims(ReleaseClaims {
                clinic_id,
                odontogram_id,
                invoice_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        match &events[0] {
            OdontogramEvent::TreatmentsReleased(e) => {
                assert_eq!(e.treatment_ids, vec![treatment_id]);
            }
            other => panic!("expected TreatmentsReleased, got {other:?}"),
        }
        chart.apply(&events[0]);

        assert!(chart.treatment(treatment_id).unwrap().invoice_id.is_none());
        assert_eq!(chart.billable_treatments().count(), 1);

        // Releasing again is a no-op.
        let events = chart
            .handle(&OdontogramCommand::ReleaseClaims(ReleaseClaims {
                clinic_id,
                odontogram_id,
                invoice_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn invoiced_treatment_is_immutable() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let treatment_id = record_and_complete(
            &mut chart,
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D900",
            Decimal::new(20000, 2),
        );

        let events = chart
            .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                clinic_id,
                odontogram_id,
                invoice_id: InvoiceId::new(),
                treatment_ids: vec![treatment_id],
                occurred_at: test_time(),
            }))
            .unwrap();
        chart.apply(&events[0]);

        let err = chart
            .handle(&OdontogramCommand::RetractTreatment(RetractTreatment {
                clinic_id,
                odontogram_id,
                treatment_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn archived_chart_freezes_clinical_state_but_not_claim_release() {
        let (mut chart, clinic_id, odontogram_id) = created_chart();
        let tooth_id = chart.teeth()[0].id;
        let treatment_id = record_and_complete(
            &mut chart,
            clinic_id,
            odontogram_id,
            TreatmentTarget::WholeMouth,
            "D900",
            Decimal::new(20000, 2),
        );

        let events = chart
            .handle(&OdontogramCommand::ArchiveOdontogram(ArchiveOdontogram {
                clinic_id,
                odontogram_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        chart.apply(&events[0]);
        assert!(chart.is_archived());

        let err = chart
            .handle(&OdontogramCommand::UpdateToothCondition(UpdateToothCondition {
                clinic_id,
                odontogram_id,
                tooth_record_id: tooth_id,
                condition: ToothCondition::Caries,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let err = chart
            .handle(&OdontogramCommand::RecordTreatment(record_treatment_cmd(
                clinic_id,
                odontogram_id,
                TreatmentTarget::WholeMouth,
                "D902",
                Decimal::new(5000, 2),
            )))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        // Billing lifecycle of existing entries continues.
        let invoice_id = InvoiceId::new();
        let events = chart
            .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                clinic_id,
                odontogram_id,
                invoice_id,
                treatment_ids: vec![treatment_id],
                occurred_at: test_time(),
            }))
            .unwrap();
        chart.apply(&events[0]);

        let events = chart
            .handle(&OdontogramCommand::ReleaseClaims(ReleaseClaims {
                clinic_id,
                odontogram_id,
                invoice_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (chart, clinic_id, odontogram_id) = created_chart();
        let before = chart.clone();
        let tooth_id = chart.teeth()[7].id;

        let cmd = OdontogramCommand::UpdateToothCondition(UpdateToothCondition {
            clinic_id,
            odontogram_id,
            tooth_record_id: tooth_id,
            condition: ToothCondition::Caries,
            occurred_at: test_time(),
        });

        let events1 = chart.handle(&cmd).unwrap();
        let events2 = chart.handle(&cmd).unwrap();

        assert_eq!(chart, before);
        assert_eq!(events1, events2);
    }

    #[test]
    fn apply_is_deterministic() {
        let clinic_id = test_clinic_id();
        let odontogram_id = test_odontogram_id();
        let patient_id = test_patient_id();
        let tooth_ids = fresh_tooth_ids();
        let when = test_time();

        let created = OdontogramEvent::OdontogramCreated(OdontogramCreated {
            clinic_id,
            odontogram_id,
            patient_id,
            tooth_record_ids: tooth_ids.clone(),
            occurred_at: when,
        });
        let changed = OdontogramEvent::ToothConditionChanged(ToothConditionChanged {
            clinic_id,
            odontogram_id,
            tooth_record_id: tooth_ids[5],
            tooth_number: 6,
            previous: ToothCondition::Healthy,
            condition: ToothCondition::Crowned,
            occurred_at: when,
        });

        let mut chart1 = Odontogram::empty(odontogram_id);
        chart1.apply(&created);
        chart1.apply(&changed);

        let mut chart2 = Odontogram::empty(odontogram_id);
        chart2.apply(&created);
        chart2.apply(&changed);

        assert_eq!(chart1, chart2);
        assert_eq!(chart1.version(), 2);
        assert_eq!(
            chart1.tooth(tooth_ids[5]).unwrap().condition,
            ToothCondition::Crowned
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn surface_strategy() -> impl Strategy<Value = ToothSurface> {
            prop_oneof![
                Just(ToothSurface::Mesial),
                Just(ToothSurface::Distal),
                Just(ToothSurface::Buccal),
                Just(ToothSurface::Lingual),
                Just(ToothSurface::Occlusal),
            ]
        }

        fn condition_strategy() -> impl Strategy<Value = SurfaceCondition> {
            prop_oneof![
                Just(SurfaceCondition::Healthy),
                Just(SurfaceCondition::Caries),
                Just(SurfaceCondition::Filled),
                Just(SurfaceCondition::Sealed),
                Just(SurfaceCondition::Fractured),
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of surface recordings is applied
            /// (always superseding), every tooth holds at most one state per
            /// surface and the chart keeps exactly 32 teeth.
            #[test]
            fn at_most_one_state_per_tooth_surface(
                ops in prop::collection::vec(
                    (0usize..TOOTH_COUNT, surface_strategy(), condition_strategy()),
                    1..40,
                )
            ) {
                let (mut chart, clinic_id, odontogram_id) = created_chart();

                for (tooth_idx, surface, condition) in ops {
                    let tooth_id = chart.teeth()[tooth_idx].id;
                    let cmd = OdontogramCommand::RecordSurfaceCondition(RecordSurfaceCondition {
                        clinic_id,
                        odontogram_id,
                        tooth_record_id: tooth_id,
                        surface,
                        condition,
                        supersede: true,
                        occurred_at: test_time(),
                    });
                    let events = chart.handle(&cmd).unwrap();
                    for event in &events {
                        chart.apply(event);
                    }
                }

                prop_assert_eq!(chart.teeth().len(), TOOTH_COUNT);
                for tooth in chart.teeth() {
                    let mut surfaces: Vec<ToothSurface> =
                        tooth.surfaces.iter().map(|s| s.surface).collect();
                    let before = surfaces.len();
                    surfaces.sort_by_key(|s| *s as u8);
                    surfaces.dedup();
                    prop_assert_eq!(surfaces.len(), before);
                }
            }

            /// Property: claims never stack. After any claim/release
            /// interleaving, each treatment is claimed by at most one invoice
            /// and released treatments are billable again.
            #[test]
            fn claims_never_stack(release_first in proptest::bool::ANY) {
                let (mut chart, clinic_id, odontogram_id) = created_chart();
                let treatment_id = record_and_complete(
                    &mut chart,
                    clinic_id,
                    odontogram_id,
                    TreatmentTarget::WholeMouth,
                    "D900",
                    Decimal::new(20000, 2),
                );

                let invoice_a = InvoiceId::new();
                let invoice_b = InvoiceId::new();

                let events = chart
                    .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                        clinic_id,
                        odontogram_id,
                        invoice_id: invoice_a,
                        treatment_ids: vec![treatment_id],
                        occurred_at: test_time(),
                    }))
                    .unwrap();
                chart.apply(&events[0]);

                if release_first {
                    let events = chart
                        .handle(&OdontogramCommand::ReleaseClaims(ReleaseClaims {
                            clinic_id,
                            odontogram_id,
                            invoice_id: invoice_a,
                            occurred_at: test_time(),
                        }))
                        .unwrap();
                    chart.apply(&events[0]);

                    let events = chart
                        .handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                            clinic_id,
                            odontogram_id,
                            invoice_id: invoice_b,
                            treatment_ids: vec![treatment_id],
                            occurred_at: test_time(),
                        }))
                        .unwrap();
                    chart.apply(&events[0]);
                    prop_assert_eq!(
                        chart.treatment(treatment_id).unwrap().invoice_id,
                        Some(invoice_b)
                    );
                } else {
                    let second = chart.handle(&OdontogramCommand::ClaimTreatments(ClaimTreatments {
                        clinic_id,
                        odontogram_id,
                        invoice_id: invoice_b,
                        treatment_ids: vec![treatment_id],
                        occurred_at: test_time(),
                    }));
                    prop_assert!(matches!(second, Err(DomainError::StaleLine(_))));
                    prop_assert_eq!(
                        chart.treatment(treatment_id).unwrap().invoice_id,
                        Some(invoice_a)
                    );
                }
            }
        }
    }
}
