use std::sync::Arc;

use rust_decimal::Decimal;

use clinicore_api::app;
use clinicore_api::app::services::ClinicServices;
use clinicore_catalog::{
    BoundedCatalog, CatalogEntry, FixedTaxConfig, InMemoryTreatmentCatalog, TreatmentCategory,
};

/// Built-in demo catalog for dev/test deployments; production points the
/// service at the clinic's real fee schedule.
fn demo_catalog() -> InMemoryTreatmentCatalog {
    InMemoryTreatmentCatalog::with_entries([
        CatalogEntry {
            code: "D101".to_string(),
            name: "Composite filling".to_string(),
            category: TreatmentCategory::Restorative,
            default_price: Decimal::new(50000, 2),
        },
        CatalogEntry {
            code: "D900".to_string(),
            name: "Full mouth debridement".to_string(),
            category: TreatmentCategory::Preventive,
            default_price: Decimal::new(20000, 2),
        },
        CatalogEntry {
            code: "D0120".to_string(),
            name: "Periodic oral evaluation".to_string(),
            category: TreatmentCategory::Diagnostic,
            default_price: Decimal::new(6500, 2),
        },
        CatalogEntry {
            code: "D3310".to_string(),
            name: "Root canal, anterior".to_string(),
            category: TreatmentCategory::Endodontic,
            default_price: Decimal::new(95000, 2),
        },
        CatalogEntry {
            code: "D7140".to_string(),
            name: "Extraction, erupted tooth".to_string(),
            category: TreatmentCategory::Surgical,
            default_price: Decimal::new(21500, 2),
        },
    ])
}

#[tokio::main]
async fn main() {
    clinicore_observability::init();

    let jurisdiction =
        std::env::var("CLINIC_TAX_JURISDICTION").unwrap_or_else(|_| "default".to_string());
    let tax_rate = std::env::var("CLINIC_TAX_RATE")
        .ok()
        .and_then(|raw| raw.parse::<Decimal>().ok())
        .unwrap_or_else(|| {
            tracing::warn!("CLINIC_TAX_RATE not set; using 7.5%");
            Decimal::new(75, 3)
        });

    let catalog = BoundedCatalog::new(
        Arc::new(demo_catalog()),
        std::time::Duration::from_millis(500),
    );
    let tax = FixedTaxConfig::single(jurisdiction.clone(), tax_rate);

    let services = Arc::new(ClinicServices::new(
        Arc::new(catalog),
        Arc::new(tax),
        jurisdiction,
    ));

    let app = app::build_app(services);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
