use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use super::{
    dto::{AnswerRequest, QuestionItem},
    repo::{self, Answer},
};
use crate::{error::AppError, state::AppState};

pub fn question_routes() -> Router<AppState> {
    Router::new()
        .route("/questions", get(list_questions))
        .route("/questions/answer", post(answer_question))
}

#[instrument(skip(state))]
pub async fn list_questions(
    State(state): State<AppState>,
) -> Result<Json<Vec<QuestionItem>>, AppError> {
    let rows = repo::list_with_answers(&state.db).await?;
    Ok(Json(rows.into_iter().map(QuestionItem::from).collect()))
}

#[instrument(skip(state, payload))]
pub async fn answer_question(
    State(state): State<AppState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Answer>), AppError> {
    let Json(payload) = payload?;
    let question_id = payload
        .question_id
        .ok_or_else(|| AppError::Validation("questionId is required".into()))?;
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(AppError::Validation("Answer text is required".into()));
    }

    if !repo::question_exists(&state.db, question_id).await? {
        return Err(AppError::NotFound("Question not found".into()));
    }

    let answer = repo::insert_answer(&state.db, question_id, text).await?;
    info!(answer_id = %answer.id, question_id, "answer stored");
    Ok((StatusCode::CREATED, Json(answer)))
}
