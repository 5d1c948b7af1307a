//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store (clinic-scoped)
//!   ↓
//! 2. Check the caller's expected version (optimistic concurrency)
//!   ↓
//! 3. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 4. Handle command (pure decision logic, produces events)
//!   ↓
//! 5. Persist events to store (append-only, store-level version check)
//!   ↓
//! 6. Publish events to bus (for projections)
//! ```
//!
//! Two version checks guard a mutation: the caller-supplied expectation
//! (what the client last read; `ExpectedVersion::Any` when the operation is
//! not version-gated) and the store-level check against the version loaded
//! at step 1, which closes the load/append window. Either failure surfaces
//! as `DispatchError::Concurrency` and the caller retries with fresh data.
//!
//! This module contains no IO itself; it composes infrastructure traits.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use clinicore_core::{Aggregate, AggregateId, ClinicId, DomainError, ExpectedVersion};
use clinicore_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale caller version or lost append
    /// race). Retryable with fresh data.
    Concurrency(String),
    /// Clinic isolation violation (cross-clinic stream mixing).
    ClinicIsolation(String),
    /// Deterministic domain failure (validation, invariant, lifecycle).
    Domain(DomainError),
    /// Failed to deserialize historical event payloads into the aggregate
    /// event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
    /// Publication failed after a successful append (at-least-once; retry
    /// may duplicate).
    Publish(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match &value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg.clone()),
            EventStoreError::ClinicIsolation(msg) => DispatchError::ClinicIsolation(msg.clone()),
            _ => DispatchError::Store(value),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::ConcurrentModification(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Domain(other),
        }
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Sits between the HTTP layer and the infrastructure traits, providing one
/// consistent execution model for every command while keeping domain code
/// pure and testable with in-memory implementations.
///
/// Guarantees:
/// - events are persisted before publication (failed append publishes nothing)
/// - clinic isolation and optimistic concurrency are enforced on every path
/// - each command operates on a single aggregate stream
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// `caller_expected` is the aggregate version the caller last observed;
    /// pass `ExpectedVersion::Any` for operations that are not version-gated.
    /// The `make_aggregate` factory keeps the dispatcher generic over
    /// aggregate construction (e.g. `Odontogram::empty(id)`).
    ///
    /// Returns the committed `StoredEvent`s with assigned sequence numbers;
    /// an empty vector means the command was a no-op.
    pub fn dispatch<A>(
        &self,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        caller_expected: ExpectedVersion,
        command: A::Command,
        make_aggregate: impl FnOnce(ClinicId, AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: clinicore_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history (clinic-scoped)
        let history = self.store.load_stream(clinic_id, aggregate_id)?;
        validate_loaded_stream(clinic_id, aggregate_id, &history)?;
        let current = stream_version(&history);

        // 2) The caller's expectation is checked against what is persisted,
        //    before any decision logic runs.
        caller_expected.check(current).map_err(DispatchError::from)?;

        // 3) Rehydrate aggregate
        let mut aggregate = make_aggregate(clinic_id, aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 4) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 5) Persist (append-only, optimistic against the loaded version)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    clinic_id,
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self
            .store
            .append(uncommitted, ExpectedVersion::Exact(current))?;

        // 6) Publish committed events (after append)
        for stored in &committed {
            self.bus
                .publish(stored.to_envelope())
                .map_err(|e| DispatchError::Publish(format!("{e:?}")))?;
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    clinic_id: ClinicId,
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    // Enforce clinic isolation even if a buggy backend returns cross-clinic
    // data. Also ensure the stream is monotonically increasing by sequence
    // number.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.clinic_id != clinic_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong clinic_id at index {idx}"
            )));
        }
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::ClinicIsolation(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number == 0 {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(
                "stored event has sequence_number=0".to_string(),
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    // Ensure deterministic ordering.
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clinicore_charting::{
        CreateOdontogram, Odontogram, OdontogramCommand, OdontogramId, TOOTH_COUNT, ToothCondition,
        ToothRecordId, UpdateToothCondition,
    };
    use clinicore_core::PatientId;
    use clinicore_events::InMemoryEventBus;
    use std::sync::Arc;

    use crate::event_store::InMemoryEventStore;

    type TestDispatcher =
        CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> TestDispatcher {
        CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        )
    }

    fn create_cmd(clinic_id: ClinicId, aggregate_id: AggregateId) -> OdontogramCommand {
        OdontogramCommand::CreateOdontogram(CreateOdontogram {
            clinic_id,
            odontogram_id: OdontogramId::new(aggregate_id),
            patient_id: PatientId::new(),
            tooth_record_ids: (0..TOOTH_COUNT).map(|_| ToothRecordId::new()).collect(),
            occurred_at: Utc::now(),
        })
    }

    fn dispatch_create(
        dispatcher: &TestDispatcher,
        clinic_id: ClinicId,
        aggregate_id: AggregateId,
    ) -> Vec<StoredEvent> {
        dispatcher
            .dispatch::<Odontogram>(
                clinic_id,
                aggregate_id,
                "charting.odontogram",
                ExpectedVersion::Any,
                create_cmd(clinic_id, aggregate_id),
                |_c, id| Odontogram::empty(OdontogramId::new(id)),
            )
            .unwrap()
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let dispatcher = dispatcher();
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();

        let committed = dispatch_create(&dispatcher, clinic_id, aggregate_id);
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);
        assert_eq!(committed[0].event_type, "charting.odontogram.created");
    }

    #[test]
    fn stale_caller_version_is_a_concurrency_error() {
        let dispatcher = dispatcher();
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();

        let committed = dispatch_create(&dispatcher, clinic_id, aggregate_id);
        let tooth_record_id = match serde_json::from_value::<clinicore_charting::OdontogramEvent>(
            committed[0].payload.clone(),
        )
        .unwrap()
        {
            clinicore_charting::OdontogramEvent::OdontogramCreated(e) => e.tooth_record_ids[0],
            other => panic!("unexpected event {other:?}"),
        };

        let update = OdontogramCommand::UpdateToothCondition(UpdateToothCondition {
            clinic_id,
            odontogram_id: OdontogramId::new(aggregate_id),
            tooth_record_id,
            condition: ToothCondition::Caries,
            occurred_at: Utc::now(),
        });

        // Caller read version 0 before the create landed: rejected.
        let err = dispatcher
            .dispatch::<Odontogram>(
                clinic_id,
                aggregate_id,
                "charting.odontogram",
                ExpectedVersion::Exact(0),
                update.clone(),
                |_c, id| Odontogram::empty(OdontogramId::new(id)),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));

        // With the fresh version the same command goes through.
        let committed = dispatcher
            .dispatch::<Odontogram>(
                clinic_id,
                aggregate_id,
                "charting.odontogram",
                ExpectedVersion::Exact(1),
                update,
                |_c, id| Odontogram::empty(OdontogramId::new(id)),
            )
            .unwrap();
        assert_eq!(committed.len(), 1);
    }

    #[test]
    fn domain_errors_pass_through() {
        let dispatcher = dispatcher();
        let clinic_id = ClinicId::new();
        let aggregate_id = AggregateId::new();

        dispatch_create(&dispatcher, clinic_id, aggregate_id);

        // Creating the same aggregate twice is a lifecycle violation.
        let err = dispatcher
            .dispatch::<Odontogram>(
                clinic_id,
                aggregate_id,
                "charting.odontogram",
                ExpectedVersion::Any,
                create_cmd(clinic_id, aggregate_id),
                |_c, id| Odontogram::empty(OdontogramId::new(id)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Domain(DomainError::InvalidState(_))
        ));
    }
}
