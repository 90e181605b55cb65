//! Catalog endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::BookId;
use lending::Clock;
use library_store::{Book, LibraryStore};
use serde::Deserialize;

use super::{AppState, DataResponse, required};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub keyword: Option<String>,
}

/// GET /books: the whole catalog, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
) -> Result<Json<DataResponse<Vec<Book>>>, ApiError> {
    let books = state.engine.list_books().await?;
    Ok(Json(DataResponse::new(books)))
}

/// GET /books/search?keyword=: lendable books matching title or author.
#[tracing::instrument(skip(state))]
pub async fn search<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<DataResponse<Vec<Book>>>, ApiError> {
    let keyword = required(query.keyword, "keyword")?;
    let books = state.engine.search_books(&keyword).await?;
    Ok(Json(DataResponse::new(books)))
}

/// GET /books/{id}: one book with its copy counts.
#[tracing::instrument(skip(state))]
pub async fn get<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Book>>, ApiError> {
    let book_id = BookId::new(&id)?;
    let book = state.engine.get_book(&book_id).await?;
    Ok(Json(DataResponse::new(book)))
}
