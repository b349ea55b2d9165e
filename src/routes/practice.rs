use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::response::{AppError, SuccessResponse};
use crate::services::{self, StartSession, SubmitAnswer};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start))
        .route("/next", post(next))
        .route("/answer", post(answer))
        .route("/end", post(end))
        .route("/sessions/:session_id", get(progress))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StartRequest {
    learner_id: Option<String>,
    exam_id: Option<String>,
    subject_id: Option<String>,
    mode: Option<String>,
    xp_goal: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartResponse {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SessionRequest {
    learner_id: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AnswerRequest {
    learner_id: Option<String>,
    session_id: Option<String>,
    delivery_id: Option<String>,
    answer: Option<serde_json::Value>,
    time_taken_seconds: Option<f64>,
    confidence_level: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ProgressQuery {
    learner_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct Empty {}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::invalid_argument(rejection.body_text()))
}

pub(super) async fn start(
    State(state): State<AppState>,
    payload: Result<Json<StartRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;

    let session_id = services::start_session(
        state.store(),
        StartSession {
            learner_id: req.learner_id.unwrap_or_default(),
            exam_id: req.exam_id.unwrap_or_default(),
            subject_id: req.subject_id.unwrap_or_default(),
            mode: req.mode.unwrap_or_default(),
            xp_goal: req.xp_goal.unwrap_or(0),
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse::new(StartResponse { session_id })),
    ))
}

pub(super) async fn next(
    State(state): State<AppState>,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let learner_id = req.learner_id.unwrap_or_default();
    let session_id = req.session_id.unwrap_or_default();

    let next = services::next_question(
        state.store(),
        state.engine_config(),
        &learner_id,
        &session_id,
    )
    .await?;

    Ok(Json(SuccessResponse::new(next)))
}

pub(super) async fn answer(
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;

    let outcome = services::submit_answer(
        state.store(),
        state.engine_config(),
        SubmitAnswer {
            learner_id: req.learner_id.unwrap_or_default(),
            session_id: req.session_id.unwrap_or_default(),
            delivery_id: req.delivery_id.unwrap_or_default(),
            answer: req.answer,
            time_taken_seconds: req.time_taken_seconds,
            confidence_level: req.confidence_level,
        },
    )
    .await?;

    Ok(Json(SuccessResponse::new(outcome)))
}

pub(super) async fn end(
    State(state): State<AppState>,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let learner_id = req.learner_id.unwrap_or_default();
    let session_id = req.session_id.unwrap_or_default();

    services::end_session(state.store(), &learner_id, &session_id).await?;

    Ok(Json(SuccessResponse::new(Empty {})))
}

pub(super) async fn progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    query: Result<Query<ProgressQuery>, QueryRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::invalid_argument(rejection.body_text()))?;
    let learner_id = query.learner_id.unwrap_or_default();

    let progress = services::session_progress(state.store(), &learner_id, &session_id).await?;

    Ok(Json(SuccessResponse::new(progress)))
}
