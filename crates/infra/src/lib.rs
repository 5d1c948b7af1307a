//! Infrastructure layer: event persistence, command dispatch, read models.

pub mod active_charts;
pub mod command_dispatcher;
pub mod event_store;
pub mod projections;
pub mod read_model;

pub use active_charts::ActiveChartIndex;
pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use read_model::{ClinicStore, InMemoryClinicStore};
