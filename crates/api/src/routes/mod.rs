//! HTTP route handlers.

pub mod books;
pub mod borrow;
pub mod health;
pub mod metrics;
pub mod students;

use lending::{Clock, LendingEngine};
use library_store::LibraryStore;
use serde::Serialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, C> {
    pub engine: LendingEngine<S, C>,
}

impl<S: LibraryStore, C: Clock> AppState<S, C> {
    /// Wraps a lending engine.
    pub fn new(engine: LendingEngine<S, C>) -> Self {
        Self { engine }
    }
}

/// Envelope for successful payloads.
#[derive(Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Returns the query parameter or a 400 naming it.
fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))
}
