//! Borrow, return and fine-payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use common::{BookId, StudentId};
use lending::Clock;
use library_store::{ActiveLoan, BorrowRecord, LibraryStore};
use serde::{Deserialize, Serialize};

use super::{AppState, DataResponse, required};
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct LoanRequest {
    pub stu_id: String,
    pub book_id: String,
}

impl LoanRequest {
    fn ids(&self) -> Result<(StudentId, BookId), ApiError> {
        Ok((StudentId::new(&self.stu_id)?, BookId::new(&self.book_id)?))
    }
}

#[derive(Debug, Deserialize)]
pub struct PayFineRequest {
    pub stu_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LoanQuery {
    pub stu_id: Option<String>,
    pub book_id: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ReturnResponse {
    pub message: String,
    /// Fine in currency units, e.g. `1.5`.
    pub fine_amount: f64,
    pub record: BorrowRecord,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

// -- Handlers --

/// POST /borrow/borrow: lends one copy to the student.
#[tracing::instrument(skip(state))]
pub async fn borrow<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(req): Json<LoanRequest>,
) -> Result<(StatusCode, Json<DataResponse<BorrowRecord>>), ApiError> {
    let (stu_id, book_id) = req.ids()?;
    let record = state.engine.borrow(&stu_id, &book_id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(record))))
}

/// POST /borrow/return: takes the copy back and reports any fine.
#[tracing::instrument(skip(state))]
pub async fn return_book<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(req): Json<LoanRequest>,
) -> Result<Json<ReturnResponse>, ApiError> {
    let (stu_id, book_id) = req.ids()?;
    let receipt = state.engine.return_book(&stu_id, &book_id).await?;

    let message = if receipt.fine.is_positive() {
        format!(
            "Book returned late, fine of {} due before borrowing again",
            receipt.fine
        )
    } else {
        "Book returned".to_string()
    };
    Ok(Json(ReturnResponse {
        message,
        fine_amount: receipt.fine.as_decimal(),
        record: receipt.record,
    }))
}

/// POST /borrow/pay-fine: settles fines and restores borrowing.
#[tracing::instrument(skip(state))]
pub async fn pay_fine<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(req): Json<PayFineRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let stu_id = StudentId::new(&req.stu_id)?;
    state.engine.pay_fine(&stu_id).await?;
    Ok(Json(MessageResponse {
        message: "Fine paid, borrowing restored",
    }))
}

/// GET /borrow/record?stu_id=&book_id=: the open loan for a pair.
#[tracing::instrument(skip(state))]
pub async fn record<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Query(query): Query<LoanQuery>,
) -> Result<Json<DataResponse<BorrowRecord>>, ApiError> {
    let stu_id = StudentId::new(required(query.stu_id, "stu_id")?)?;
    let book_id = BookId::new(required(query.book_id, "book_id")?)?;
    let record = state.engine.get_active_loan(&stu_id, &book_id).await?;
    Ok(Json(DataResponse::new(record)))
}

/// GET /borrow/records?stu_id=: a student's open loans with book details.
#[tracing::instrument(skip(state))]
pub async fn records<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Query(query): Query<LoanQuery>,
) -> Result<Json<DataResponse<Vec<ActiveLoan>>>, ApiError> {
    let stu_id = StudentId::new(required(query.stu_id, "stu_id")?)?;
    let loans = state.engine.list_active_loans(&stu_id).await?;
    Ok(Json(DataResponse::new(loans)))
}
