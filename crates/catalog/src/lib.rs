//! External collaborators consumed (not owned) by the clinical core:
//! the treatment catalog and the jurisdiction tax configuration.
//!
//! Treatment records snapshot catalog data at recording time; later catalog
//! edits never rewrite clinical or billing history.

pub mod catalog;
pub mod tax;

pub use catalog::{
    BoundedCatalog, CatalogEntry, CatalogError, InMemoryTreatmentCatalog, TreatmentCatalog,
    TreatmentCategory,
};
pub use tax::{FixedTaxConfig, TaxConfig, TaxError};
