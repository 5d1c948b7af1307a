//! Treatment catalog lookup boundary.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, mpsc};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Clinical category of a catalog treatment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreatmentCategory {
    Diagnostic,
    Preventive,
    Restorative,
    Endodontic,
    Surgical,
    Prosthetic,
    Orthodontic,
    Other,
}

/// One catalog entry: code, display name, category, default price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub code: String,
    pub name: String,
    pub category: TreatmentCategory,
    pub default_price: Decimal,
}

/// Catalog lookup error.
///
/// `Timeout` and `Unavailable` are retryable: the caller should surface them
/// as transient and try again, never hang.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("no catalog entry for treatment code '{0}'")]
    NotFound(String),

    #[error("catalog lookup for '{code}' exceeded {budget_ms}ms")]
    Timeout { code: String, budget_ms: u64 },

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Timeout { .. } | CatalogError::Unavailable(_))
    }
}

/// Treatment catalog boundary (external reference data).
pub trait TreatmentCatalog: Send + Sync {
    fn lookup(&self, code: &str) -> Result<CatalogEntry, CatalogError>;
}

impl<C> TreatmentCatalog for Arc<C>
where
    C: TreatmentCatalog + ?Sized,
{
    fn lookup(&self, code: &str) -> Result<CatalogEntry, CatalogError> {
        (**self).lookup(code)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTreatmentCatalog {
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl InMemoryTreatmentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: impl IntoIterator<Item = CatalogEntry>) -> Self {
        let catalog = Self::new();
        for entry in entries {
            catalog.upsert(entry);
        }
        catalog
    }

    pub fn upsert(&self, entry: CatalogEntry) {
        if let Ok(mut map) = self.entries.write() {
            map.insert(entry.code.clone(), entry);
        }
    }
}

impl TreatmentCatalog for InMemoryTreatmentCatalog {
    fn lookup(&self, code: &str) -> Result<CatalogEntry, CatalogError> {
        let map = self
            .entries
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;

        map.get(code)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(code.to_string()))
    }
}

/// Decorator enforcing a bounded lookup time.
///
/// Runs the inner lookup on a worker thread and waits at most `budget`;
/// a slow or hung backend surfaces as a retryable `Timeout` instead of
/// blocking the clinical request.
#[derive(Debug, Clone)]
pub struct BoundedCatalog<C> {
    inner: Arc<C>,
    budget: Duration,
}

impl<C> BoundedCatalog<C>
where
    C: TreatmentCatalog + 'static,
{
    pub fn new(inner: Arc<C>, budget: Duration) -> Self {
        Self { inner, budget }
    }
}

impl<C> TreatmentCatalog for BoundedCatalog<C>
where
    C: TreatmentCatalog + 'static,
{
    fn lookup(&self, code: &str) -> Result<CatalogEntry, CatalogError> {
        let (tx, rx) = mpsc::channel();
        let inner = self.inner.clone();
        let owned_code = code.to_string();

        std::thread::spawn(move || {
            // Receiver may be gone after a timeout; the send result is moot then.
            let _ = tx.send(inner.lookup(&owned_code));
        });

        match rx.recv_timeout(self.budget) {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(code, budget_ms = self.budget.as_millis() as u64, "catalog lookup timed out");
                Err(CatalogError::Timeout {
                    code: code.to_string(),
                    budget_ms: self.budget.as_millis() as u64,
                })
            }
        }
    }
}
