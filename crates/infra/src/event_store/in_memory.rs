use std::collections::HashMap;
use std::sync::RwLock;

use clinicore_core::{AggregateId, ClinicId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<StreamKey, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        // All events must target the same clinic + aggregate stream.
        let clinic_id = events[0].clinic_id;
        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.clinic_id != clinic_id {
                return Err(EventStoreError::ClinicIsolation(format!(
                    "batch contains multiple clinic_ids (index {idx})"
                )));
            }
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let key = StreamKey {
            clinic_id,
            aggregate_id,
        };

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(key).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        // Enforce aggregate type stability across the stream.
        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        // Assign sequence numbers and append (append-only).
        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                clinic_id: e.clinic_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let key = StreamKey {
            clinic_id,
            aggregate_id,
        };

        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn uncommitted(clinic_id: ClinicId, aggregate_id: AggregateId) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            clinic_id,
            aggregate_id,
            aggregate_type: "charting.odontogram".to_string(),
            event_type: "charting.odontogram.created".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn append_assigns_monotonic_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();

        let first = store
            .append(vec![uncommitted(clinic_id, aggregate_id)], ExpectedVersion::Exact(0))
            .unwrap();
        assert_eq!(first[0].sequence_number, 1);

        let second = store
            .append(
                vec![
                    uncommitted(clinic_id, aggregate_id),
                    uncommitted(clinic_id, aggregate_id),
                ],
                ExpectedVersion::Exact(1),
            )
            .unwrap();
        assert_eq!(second[0].sequence_number, 2);
        assert_eq!(second[1].sequence_number, 3);

        let loaded = store.load_stream(clinic_id, aggregate_id).unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn two_appends_racing_on_the_same_version_admit_one_winner() {
        let store = InMemoryEventStore::new();
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();

        store
            .append(vec![uncommitted(clinic_id, aggregate_id)], ExpectedVersion::Exact(0))
            .unwrap();

        // Both writers read version 1 before either appends.
        let winner = store.append(
            vec![uncommitted(clinic_id, aggregate_id)],
            ExpectedVersion::Exact(1),
        );
        let loser = store.append(
            vec![uncommitted(clinic_id, aggregate_id)],
            ExpectedVersion::Exact(1),
        );

        assert!(winner.is_ok());
        assert!(matches!(loser, Err(EventStoreError::Concurrency(_))));
        assert_eq!(store.load_stream(clinic_id, aggregate_id).unwrap().len(), 2);
    }

    #[test]
    fn cross_clinic_batches_are_rejected() {
        let store = InMemoryEventStore::new();
        let aggregate_id = AggregateId::new();

        let result = store.append(
            vec![
                uncommitted(ClinicId::new(), aggregate_id),
                uncommitted(ClinicId::new(), aggregate_id),
            ],
            ExpectedVersion::Any,
        );
        assert!(matches!(result, Err(EventStoreError::ClinicIsolation(_))));
    }

    #[test]
    fn streams_are_clinic_scoped() {
        let store = InMemoryEventStore::new();
        let clinic_a = ClinicId::new();
        let clinic_b = ClinicId::new();
        let aggregate_id = AggregateId::new();

        store
            .append(vec![uncommitted(clinic_a, aggregate_id)], ExpectedVersion::Exact(0))
            .unwrap();

        assert!(store.load_stream(clinic_b, aggregate_id).unwrap().is_empty());
    }
}
