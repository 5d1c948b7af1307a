//! One-active-chart-per-patient registry.
//!
//! Chart uniqueness per patient is cross-aggregate state, so the aggregate
//! cannot enforce it alone; this index gives the service layer an atomic
//! compare-and-insert to decide between "create" and
//! `DuplicateActiveOdontogram` before any events are appended.

use std::collections::HashMap;
use std::sync::RwLock;

use clinicore_charting::OdontogramId;
use clinicore_core::{ClinicId, PatientId};

#[derive(Debug, Default)]
pub struct ActiveChartIndex {
    inner: RwLock<HashMap<(ClinicId, PatientId), OdontogramId>>,
}

impl ActiveChartIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// The patient's current chart, if one is registered.
    pub fn current(&self, clinic_id: ClinicId, patient_id: PatientId) -> Option<OdontogramId> {
        self.inner
            .read()
            .ok()
            .and_then(|map| map.get(&(clinic_id, patient_id)).copied())
    }

    /// Register `odontogram_id` as the patient's current chart.
    ///
    /// Fails with the already-registered chart id if the slot is taken; the
    /// check and the insert happen under one lock.
    pub fn try_register(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
        odontogram_id: OdontogramId,
    ) -> Result<(), OdontogramId> {
        let mut map = match self.inner.write() {
            Ok(map) => map,
            // A poisoned lock means a writer panicked; refuse new registrations.
            Err(_) => return Err(odontogram_id),
        };

        match map.entry((clinic_id, patient_id)) {
            std::collections::hash_map::Entry::Occupied(existing) => Err(*existing.get()),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(odontogram_id);
                Ok(())
            }
        }
    }

    /// Drop the registration, but only if it still points at
    /// `odontogram_id` (rollback of a failed creation).
    pub fn remove(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
        odontogram_id: OdontogramId,
    ) -> bool {
        match self.inner.write() {
            Ok(mut map) => match map.get(&(clinic_id, patient_id)) {
                Some(current) if *current == odontogram_id => {
                    map.remove(&(clinic_id, patient_id));
                    true
                }
                _ => false,
            },
            Err(_) => false,
        }
    }

    /// Swap the patient's current chart for a new one (supersede flow).
    ///
    /// Returns the previous chart id, which the caller archives.
    pub fn replace(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
        odontogram_id: OdontogramId,
    ) -> Option<OdontogramId> {
        self.inner
            .write()
            .ok()
            .and_then(|mut map| map.insert((clinic_id, patient_id), odontogram_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinicore_core::AggregateId;

    fn chart_id() -> OdontogramId {
        OdontogramId::new(AggregateId::new())
    }

    #[test]
    fn second_registration_for_same_patient_fails() {
        let index = ActiveChartIndex::new();
        let clinic_id = ClinicId::new();
        let patient_id = PatientId::new();
        let first = chart_id();

        index.try_register(clinic_id, patient_id, first).unwrap();

        let err = index
            .try_register(clinic_id, patient_id, chart_id())
            .unwrap_err();
        assert_eq!(err, first);
        assert_eq!(index.current(clinic_id, patient_id), Some(first));
    }

    #[test]
    fn patients_and_clinics_are_independent() {
        let index = ActiveChartIndex::new();
        let clinic_id = ClinicId::new();

        index
            .try_register(clinic_id, PatientId::new(), chart_id())
            .unwrap();
        index
            .try_register(clinic_id, PatientId::new(), chart_id())
            .unwrap();
        index
            .try_register(ClinicId::new(), PatientId::new(), chart_id())
            .unwrap();
    }

    #[test]
    fn remove_only_clears_the_matching_registration() {
        let index = ActiveChartIndex::new();
        let clinic_id = ClinicId::new();
        let patient_id = PatientId::new();
        let registered = chart_id();

        index.try_register(clinic_id, patient_id, registered).unwrap();

        assert!(!index.remove(clinic_id, patient_id, chart_id()));
        assert_eq!(index.current(clinic_id, patient_id), Some(registered));

        assert!(index.remove(clinic_id, patient_id, registered));
        assert_eq!(index.current(clinic_id, patient_id), None);
    }

    #[test]
    fn replace_returns_the_superseded_chart() {
        let index = ActiveChartIndex::new();
        let clinic_id = ClinicId::new();
        let patient_id = PatientId::new();
        let first = chart_id();
        let second = chart_id();

        index.try_register(clinic_id, patient_id, first).unwrap();
        assert_eq!(index.replace(clinic_id, patient_id, second), Some(first));
        assert_eq!(index.current(clinic_id, patient_id), Some(second));
    }
}
