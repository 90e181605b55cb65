//! Student login and profile endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use common::StudentId;
use lending::{Clock, Eligibility};
use library_store::{LibraryStore, Student};
use serde::{Deserialize, Serialize};

use super::{AppState, DataResponse, required};
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub stu_id: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct StudentQuery {
    pub stu_id: Option<String>,
}

/// A profile together with the borrower checks.
#[derive(Serialize)]
pub struct StudentResponse {
    pub student: Student,
    pub eligibility: Eligibility,
}

/// POST /student/login: checks credentials and returns the profile.
#[tracing::instrument(skip(state, req), fields(stu_id = %req.stu_id))]
pub async fn login<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<DataResponse<StudentResponse>>, ApiError> {
    let stu_id = StudentId::new(&req.stu_id)?;
    let (student, eligibility) = state.engine.authenticate(&stu_id, &req.password).await?;
    tracing::info!("student logged in");
    Ok(Json(DataResponse::new(StudentResponse {
        student,
        eligibility,
    })))
}

/// GET /student/info?stu_id=: profile without the credential.
#[tracing::instrument(skip(state))]
pub async fn info<S: LibraryStore + 'static, C: Clock + 'static>(
    State(state): State<Arc<AppState<S, C>>>,
    Query(query): Query<StudentQuery>,
) -> Result<Json<DataResponse<StudentResponse>>, ApiError> {
    let stu_id = StudentId::new(required(query.stu_id, "stu_id")?)?;
    let student = state.engine.get_student(&stu_id).await?;
    let eligibility = state.engine.eligibility(&stu_id).await?;
    Ok(Json(DataResponse::new(StudentResponse {
        student,
        eligibility,
    })))
}
