use axum::{Router, routing::get};

pub mod invoices;
pub mod odontograms;
pub mod revenue;
pub mod system;
pub mod treatments;

/// Router for all clinic-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/patients", patients_router())
        .nest("/odontograms", odontograms_router())
        .nest("/invoices", invoices::router())
        .route("/revenue", get(revenue::report))
}

/// Patient-scoped entry points (chart lifecycle, invoice listing).
fn patients_router() -> Router {
    Router::new()
        .route(
            "/:patient_id/odontograms",
            axum::routing::post(odontograms::create).get(odontograms::history),
        )
        .route(
            "/:patient_id/odontograms/current",
            get(odontograms::current),
        )
        .route(
            "/:patient_id/odontograms/supersede",
            axum::routing::post(odontograms::supersede),
        )
        .route("/:patient_id/invoices", get(invoices::list_for_patient))
}

/// Chart-scoped entry points (teeth, surfaces, treatments, invoicing).
fn odontograms_router() -> Router {
    Router::new()
        .route("/:id", get(odontograms::get_by_id))
        .route(
            "/:id/teeth/:tooth_id/condition",
            axum::routing::post(odontograms::update_tooth_condition),
        )
        .route(
            "/:id/teeth/:tooth_id/surfaces",
            axum::routing::post(odontograms::record_surface),
        )
        .route(
            "/:id/treatments",
            axum::routing::post(treatments::add).get(treatments::list),
        )
        .route(
            "/:id/treatments/:treatment_id/complete",
            axum::routing::post(treatments::complete),
        )
        .route(
            "/:id/treatments/:treatment_id",
            axum::routing::delete(treatments::retract),
        )
        .route("/:id/invoice-preview", get(invoices::preview))
        .route("/:id/invoices", axum::routing::post(invoices::commit))
}
