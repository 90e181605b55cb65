//! HTTP API server with observability for the student library.
//!
//! Provides REST endpoints for the catalog, student login and the lending
//! workflows, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use chrono::Utc;
use common::{BookId, InvalidId, StudentId};
use lending::Clock;
use library_store::{Book, InMemoryLibraryStore, LibraryStore, Student};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, C>(state: Arc<AppState<S, C>>, metrics_handle: PrometheusHandle) -> Router
where
    S: LibraryStore + 'static,
    C: Clock + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/books", get(routes::books::list::<S, C>))
        .route("/books/search", get(routes::books::search::<S, C>))
        .route("/books/{id}", get(routes::books::get::<S, C>))
        .route("/student/login", post(routes::students::login::<S, C>))
        .route("/student/info", get(routes::students::info::<S, C>))
        .route("/borrow/borrow", post(routes::borrow::borrow::<S, C>))
        .route("/borrow/return", post(routes::borrow::return_book::<S, C>))
        .route("/borrow/pay-fine", post(routes::borrow::pay_fine::<S, C>))
        .route("/borrow/record", get(routes::borrow::record::<S, C>))
        .route("/borrow/records", get(routes::borrow::records::<S, C>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Registers descriptions for the lending metrics.
pub fn describe_metrics() {
    metrics::describe_counter!("lending_borrows_total", "Committed borrows");
    metrics::describe_counter!("lending_returns_total", "Committed returns");
    metrics::describe_counter!("lending_fine_payments_total", "Committed fine payments");
    metrics::describe_counter!(
        "lending_rejections_total",
        "Workflows refused for a business reason, by reason"
    );
    metrics::describe_counter!(
        "lending_fines_assessed_cents",
        "Sum of fines assessed at return, in cents"
    );
    metrics::describe_histogram!(
        "lending_workflow_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of one workflow, by workflow"
    );
}

/// Fills an in-memory store with a small demo catalog and two students.
pub async fn seed_demo_catalog(store: &InMemoryLibraryStore) -> Result<(), InvalidId> {
    let now = Utc::now();
    let books = [
        ("B001", "The Rust Programming Language", "Steve Klabnik", 3),
        ("B002", "Programming Rust", "Jim Blandy", 2),
        ("B003", "Structure and Interpretation of Computer Programs", "Harold Abelson", 1),
        ("B004", "Introduction to Algorithms", "Thomas H. Cormen", 2),
        ("B005", "Database System Concepts", "Abraham Silberschatz", 1),
    ];
    for (id, title, author, copies) in books {
        store
            .insert_book(Book::new(BookId::new(id)?, title, author, copies, now))
            .await;
    }

    let students = [("2024001", "Lin Wei"), ("2024002", "Maria Costa")];
    for (id, name) in students {
        store
            .insert_student(Student::new(StudentId::new(id)?, name, "123456", now))
            .await;
    }
    Ok(())
}
