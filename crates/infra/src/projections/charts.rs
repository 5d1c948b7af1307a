//! Odontogram read model.
//!
//! Keeps a rehydrated `Odontogram` per stream by replaying the same `apply`
//! the aggregate uses, so the chart a clinician reads back is exactly the
//! chart the command side decided on. Queries (current chart per patient,
//! billable treatments) sit on top.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use clinicore_charting::{Odontogram, OdontogramEvent, OdontogramId, TreatmentRecord};
use clinicore_core::{Aggregate, AggregateId, ClinicId, PatientId};
use clinicore_events::EventEnvelope;

use crate::read_model::ClinicStore;

pub const AGGREGATE_TYPE: &str = "charting.odontogram";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
}

#[derive(Debug, Error)]
pub enum ChartsProjectionError {
    #[error("failed to deserialize odontogram event: {0}")]
    Deserialize(String),

    #[error("clinic isolation violation: {0}")]
    ClinicIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Chart projection: one rehydrated odontogram per stream.
#[derive(Debug)]
pub struct ChartsProjection<S>
where
    S: ClinicStore<OdontogramId, Odontogram>,
{
    store: S,
    cursors: RwLock<HashMap<CursorKey, u64>>,
}

impl<S> ChartsProjection<S>
where
    S: ClinicStore<OdontogramId, Odontogram>,
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

    pub fn get(&self, clinic_id: ClinicId, odontogram_id: &OdontogramId) -> Option<Odontogram> {
        self.store.get(clinic_id, odontogram_id)
    }

    pub fn list(&self, clinic_id: ClinicId) -> Vec<Odontogram> {
        self.store.list(clinic_id)
    }

    /// The patient's current (non-archived) chart.
    pub fn current_for_patient(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
    ) -> Option<Odontogram> {
        self.store
            .list(clinic_id)
            .into_iter()
            .find(|chart| chart.patient_id() == Some(patient_id) && !chart.is_archived())
    }

    /// All charts ever kept for the patient, newest first.
    pub fn history_for_patient(
        &self,
        clinic_id: ClinicId,
        patient_id: PatientId,
    ) -> Vec<Odontogram> {
        let mut charts: Vec<Odontogram> = self
            .store
            .list(clinic_id)
            .into_iter()
            .filter(|chart| chart.patient_id() == Some(patient_id))
            .collect();
        charts.sort_by_key(|chart| std::cmp::Reverse(chart.created_at()));
        charts
    }

    /// Completed, unclaimed treatments on a chart (the invoice preview set).
    pub fn billable(
        &self,
        clinic_id: ClinicId,
        odontogram_id: &OdontogramId,
    ) -> Option<Vec<TreatmentRecord>> {
        self.store
            .get(clinic_id, odontogram_id)
            .map(|chart| chart.billable_treatments().cloned().collect())
    }

    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), ChartsProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE {
            return Ok(());
        }

        let clinic_id = envelope.clinic_id();
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let last = self.get_cursor(clinic_id, aggregate_id);
        if seq == 0 {
            return Err(ChartsProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(());
        }
        if seq != last + 1 && last != 0 {
            return Err(ChartsProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let ev: OdontogramEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| ChartsProjectionError::Deserialize(e.to_string()))?;

        if ev.clinic_id() != clinic_id {
            return Err(ChartsProjectionError::ClinicIsolation(
                "event clinic_id does not match envelope clinic_id".to_string(),
            ));
        }
        let odontogram_id = ev.odontogram_id();
        if odontogram_id.0 != aggregate_id {
            return Err(ChartsProjectionError::ClinicIsolation(
                "event odontogram_id does not match envelope aggregate_id".to_string(),
            ));
        }

        let mut chart = self
            .store
            .get(clinic_id, &odontogram_id)
            .unwrap_or_else(|| Odontogram::empty(odontogram_id));
        chart.apply(&ev);
        self.store.upsert(clinic_id, odontogram_id, chart);

        self.update_cursor(clinic_id, aggregate_id, seq);
        Ok(())
    }

    /// Rebuild the read model from scratch.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ChartsProjectionError> {
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
