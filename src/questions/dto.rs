use serde::{Deserialize, Serialize};

use super::repo::QuestionRow;

#[derive(Debug, Serialize)]
pub struct QuestionItem {
    pub id: i32,
    pub text: String,
    pub answer: String,
}

impl From<QuestionRow> for QuestionItem {
    fn from(row: QuestionRow) -> Self {
        Self {
            id: row.id,
            text: row.text,
            answer: row.answer.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question_id: Option<i32>,
    #[serde(default)]
    pub text: String,
}
