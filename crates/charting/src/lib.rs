//! Dental charting domain module (event-sourced).
//!
//! One aggregate per odontogram: the full-mouth chart (32 tooth records with
//! surface conditions) plus the treatment ledger recorded against it. Billing
//! claims are part of the same stream so that "at most one invoice ever
//! claims a treatment record" reduces to a single optimistic append.

pub mod odontogram;
pub mod tooth;
pub mod treatment;

pub use odontogram::{
    ArchiveOdontogram, ClaimTreatments, CreateOdontogram, MarkTreatmentCompleted, Odontogram,
    OdontogramArchived, OdontogramCommand, OdontogramCreated, OdontogramEvent, OdontogramId,
    RecordSurfaceCondition, RecordTreatment, ReleaseClaims, RetractTreatment,
    SurfaceConditionRecorded, ToothConditionChanged, TreatmentCompleted, TreatmentRecorded,
    TreatmentRetracted, TreatmentsClaimed, TreatmentsReleased, UpdateToothCondition,
};
pub use tooth::{
    SurfaceCondition, ToothCondition, ToothRecord, ToothRecordId, ToothSurface, ToothSurfaceState,
    ToothType, TOOTH_COUNT,
};
pub use treatment::{TreatmentRecord, TreatmentRecordId, TreatmentTarget};
