//! Projection implementations (read model builders).
//!
//! Projections consume domain events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event stream
//! - **Clinic-isolated**: data is partitioned by clinic
//! - **Idempotent**: safe for at-least-once delivery

pub mod charts;
pub mod invoices;
pub mod revenue;

pub use charts::{ChartsProjection, ChartsProjectionError};
pub use invoices::{InvoiceReadModel, InvoicesProjection, InvoicesProjectionError};
pub use revenue::{RevenueProjection, RevenueProjectionError, RevenueRecord, RevenueReport};
