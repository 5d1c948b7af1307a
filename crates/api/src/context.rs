use clinicore_core::ClinicId;

/// Clinic context for a request.
///
/// This is immutable and must be present for all domain routes. Session and
/// token handling live outside this service; the clinic id arriving on the
/// request is the isolation key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClinicContext {
    clinic_id: ClinicId,
}

impl ClinicContext {
    pub fn new(clinic_id: ClinicId) -> Self {
        Self { clinic_id }
    }

    pub fn clinic_id(&self) -> ClinicId {
        self.clinic_id
    }
}
