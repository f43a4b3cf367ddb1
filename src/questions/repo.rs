use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

pub const MAX_QUESTIONS: i64 = 10;

/// Question joined to the text of its most recent answer.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRow {
    pub id: i32,
    pub text: String,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: Uuid,
    pub question_id: i32,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

pub async fn list_with_answers(db: &PgPool) -> anyhow::Result<Vec<QuestionRow>> {
    let rows = sqlx::query_as::<_, QuestionRow>(
        r#"
        SELECT q.id, q.text,
               (SELECT a.text
                  FROM answers a
                 WHERE a.question_id = q.id
                 ORDER BY a.created_at DESC
                 LIMIT 1) AS answer
          FROM questions q
         ORDER BY q.id ASC
         LIMIT $1
        "#,
    )
    .bind(MAX_QUESTIONS)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn question_exists(db: &PgPool, question_id: i32) -> anyhow::Result<bool> {
    let found: Option<(i32,)> = sqlx::query_as("SELECT id FROM questions WHERE id = $1")
        .bind(question_id)
        .fetch_optional(db)
        .await?;
    Ok(found.is_some())
}

pub async fn insert_answer(db: &PgPool, question_id: i32, text: &str) -> anyhow::Result<Answer> {
    let answer = sqlx::query_as::<_, Answer>(
        r#"
        INSERT INTO answers (question_id, text)
        VALUES ($1, $2)
        RETURNING id, question_id, text, created_at
        "#,
    )
    .bind(question_id)
    .bind(text)
    .fetch_one(db)
    .await?;
    Ok(answer)
}
