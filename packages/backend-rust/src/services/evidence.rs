//! Assessment submission: validates the payload, grades answers against the
//! question bank, persists the attempt, and triggers the mastery update for
//! the submitted assessment type.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use thiserror::Error;

use crate::db::DatabaseProxy;
use crate::services::bkt::{
    self, AssessmentType, BktError, PostUpdateSummary, PreUpdateSummary,
};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Bkt(#[from] BktError),
}

impl From<EvidenceError> for crate::response::AppError {
    fn from(err: EvidenceError) -> Self {
        match err {
            EvidenceError::Validation(message) => Self::validation(message),
            EvidenceError::Store(source) => Self::store(source.to_string()),
            EvidenceError::Bkt(inner) => inner.into(),
        }
    }
}

/// Answer payload, tagged by question type so malformed shapes are rejected
/// at deserialization instead of deep inside grading.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "question_type", rename_all = "snake_case")]
pub enum SubmittedAnswer {
    MultipleChoice { selected_choice: String },
    Typing { typed_answer: String },
    DragDrop { placements: BTreeMap<String, String> },
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionResponse {
    pub question_id: i64,
    #[serde(flatten)]
    pub answer: Option<SubmittedAnswer>,
    /// Client-side verdict, used only where the server cannot regrade
    /// (drag-drop) or no answer payload was sent. Absent means incorrect.
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitAssessmentRequest {
    pub user_id: i64,
    pub course_id: i64,
    pub assessment_type: String,
    pub responses: Vec<QuestionResponse>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BktOutcome {
    Pre(PreUpdateSummary),
    Post(PostUpdateSummary),
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub assessment_id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub assessment_type: AssessmentType,
    pub score: usize,
    pub total: usize,
    pub skipped_questions: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_eligible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligibility_reason: Option<&'static str>,
    pub bkt_analysis: BktOutcome,
}

#[derive(Debug, Clone)]
struct QuestionRow {
    lesson_id: Option<i64>,
    correct_answer: String,
}

#[derive(Debug, Clone)]
struct GradedResponse {
    question_id: i64,
    lesson_id: Option<i64>,
    selected_choice: Option<String>,
    is_correct: bool,
}

/// Full submission flow. Serialized per (user_id, course_id) so concurrent
/// submissions for the same enrollment cannot interleave mastery batches.
pub async fn submit_assessment(
    state: &AppState,
    proxy: &DatabaseProxy,
    request: SubmitAssessmentRequest,
) -> Result<SubmissionOutcome, EvidenceError> {
    let assessment_type = AssessmentType::parse(&request.assessment_type)
        .map_err(|e| EvidenceError::Validation(e.to_string()))?;
    if request.responses.is_empty() {
        return Err(EvidenceError::Validation(
            "responses must not be empty".to_string(),
        ));
    }
    if request.user_id <= 0 || request.course_id <= 0 {
        return Err(EvidenceError::Validation(
            "user_id and course_id must be positive".to_string(),
        ));
    }

    let lock = state.submission_lock(request.user_id, request.course_id);
    let _guard = lock.lock().await;

    let questions = fetch_questions(proxy, request.course_id, &request.responses).await?;

    let mut graded = Vec::with_capacity(request.responses.len());
    let mut skipped = Vec::new();
    for response in &request.responses {
        match questions.get(&response.question_id) {
            Some(question) => graded.push(grade(response, question)),
            None => {
                tracing::warn!(
                    question_id = response.question_id,
                    course_id = request.course_id,
                    "response references unknown question; skipping"
                );
                skipped.push(response.question_id);
            }
        }
    }
    if graded.is_empty() {
        return Err(EvidenceError::Validation(
            "no response matched a known question".to_string(),
        ));
    }

    let score = graded.iter().filter(|g| g.is_correct).count();
    let total = graded.len();
    let assessment_id = persist_attempt(
        proxy,
        request.user_id,
        request.course_id,
        assessment_type,
        score,
        total,
        &graded,
    )
    .await?;

    // Mastery recompute happens after the attempt commits; the per-key lock
    // keeps read-modify-write cycles from racing across submissions.
    let settings = state.bkt();
    let (bkt_analysis, completion_eligible, eligibility_reason) = match assessment_type {
        AssessmentType::Pre => {
            let summary =
                bkt::update_from_pre(proxy, settings, request.user_id, request.course_id).await?;
            (BktOutcome::Pre(summary), None, None)
        }
        AssessmentType::Post => {
            let summary =
                bkt::update_from_post(proxy, settings, request.user_id, request.course_id).await?;
            record_eligibility(proxy, assessment_id, &summary).await?;
            let eligible = summary.course_mastered;
            let reason = summary.eligibility_reason;
            (BktOutcome::Post(summary), Some(eligible), Some(reason))
        }
        AssessmentType::Quiz => {
            bkt::refresh_from_all_responses(
                proxy,
                settings,
                request.user_id,
                request.course_id,
                "quiz",
            )
            .await?;
            (BktOutcome::None, None, None)
        }
    };

    Ok(SubmissionOutcome {
        assessment_id,
        user_id: request.user_id,
        course_id: request.course_id,
        assessment_type,
        score,
        total,
        skipped_questions: skipped,
        completion_eligible,
        eligibility_reason,
        bkt_analysis,
    })
}

fn grade(response: &QuestionResponse, question: &QuestionRow) -> GradedResponse {
    let (selected_choice, is_correct) = match &response.answer {
        Some(SubmittedAnswer::MultipleChoice { selected_choice }) => (
            Some(selected_choice.clone()),
            answers_match(selected_choice, &question.correct_answer),
        ),
        Some(SubmittedAnswer::Typing { typed_answer }) => (
            Some(typed_answer.clone()),
            typed_answer.trim().eq_ignore_ascii_case(question.correct_answer.trim()),
        ),
        // Drag-drop is graded in the client against zone layouts the engine
        // does not store; trust the reported verdict.
        Some(SubmittedAnswer::DragDrop { placements }) => (
            serde_json::to_string(placements).ok(),
            response.is_correct.unwrap_or(false),
        ),
        None => (None, response.is_correct.unwrap_or(false)),
    };

    GradedResponse {
        question_id: response.question_id,
        lesson_id: question.lesson_id,
        selected_choice,
        is_correct,
    }
}

/// Choice comparison tolerant of image answers: when either side looks like a
/// path, only the final segment is compared.
fn answers_match(selected: &str, correct: &str) -> bool {
    let selected = selected.trim();
    let correct = correct.trim();
    if selected.eq_ignore_ascii_case(correct) {
        return true;
    }
    let tail = |s: &str| {
        s.rsplit('/')
            .next()
            .unwrap_or(s)
            .to_ascii_lowercase()
    };
    (selected.contains('/') || correct.contains('/')) && tail(selected) == tail(correct)
}

async fn fetch_questions(
    proxy: &DatabaseProxy,
    course_id: i64,
    responses: &[QuestionResponse],
) -> Result<HashMap<i64, QuestionRow>, EvidenceError> {
    let mut ids: Vec<i64> = responses.iter().map(|r| r.question_id).collect();
    ids.sort_unstable();
    ids.dedup();

    let placeholders = vec!["?"; ids.len()].join(", ");
    let sql = format!(
        "SELECT id, lesson_id, correct_answer FROM questions WHERE course_id = ? AND id IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql).bind(course_id);
    for id in &ids {
        query = query.bind(id);
    }

    let rows = query.fetch_all(proxy.pool()).await?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let id = row.try_get::<i64, _>("id").ok()?;
            Some((
                id,
                QuestionRow {
                    lesson_id: row.try_get::<Option<i64>, _>("lesson_id").ok().flatten(),
                    correct_answer: row
                        .try_get::<String, _>("correct_answer")
                        .unwrap_or_default(),
                },
            ))
        })
        .collect())
}

/// Writes the attempt and its per-question responses in one transaction. A
/// repeated post assessment replaces the previous attempt in place.
async fn persist_attempt(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
    assessment_type: AssessmentType,
    score: usize,
    total: usize,
    graded: &[GradedResponse],
) -> Result<i64, EvidenceError> {
    let mut tx = proxy.pool().begin().await?;
    let now = Utc::now().to_rfc3339();

    let existing_post = if assessment_type == AssessmentType::Post {
        sqlx::query(
            "SELECT id FROM assessment_results WHERE user_id = ? AND course_id = ? AND assessment_type = 'post'",
        )
        .bind(user_id)
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?
        .and_then(|row| row.try_get::<i64, _>("id").ok())
    } else {
        None
    };

    let assessment_id = match existing_post {
        Some(id) => {
            sqlx::query(
                "UPDATE assessment_results SET score = ?, total = ?, date_taken = ?, completion_eligible = 0, eligibility_reason = NULL WHERE id = ?",
            )
            .bind(score as i64)
            .bind(total as i64)
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM assessment_question_responses WHERE assessment_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            id
        }
        None => sqlx::query(
            "INSERT INTO assessment_results (user_id, course_id, assessment_type, score, total, date_taken) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(course_id)
        .bind(assessment_type.as_str())
        .bind(score as i64)
        .bind(total as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid(),
    };

    for response in graded {
        sqlx::query(
            "INSERT INTO assessment_question_responses (user_id, assessment_id, question_id, selected_choice, is_correct, lesson_id, timestamp) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(assessment_id)
        .bind(response.question_id)
        .bind(response.selected_choice.as_deref())
        .bind(response.is_correct)
        .bind(response.lesson_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(assessment_id)
}

async fn record_eligibility(
    proxy: &DatabaseProxy,
    assessment_id: i64,
    summary: &PostUpdateSummary,
) -> Result<(), EvidenceError> {
    sqlx::query(
        "UPDATE assessment_results SET completion_eligible = ?, eligibility_reason = ? WHERE id = ?",
    )
    .bind(summary.course_mastered)
    .bind(summary.eligibility_reason)
    .bind(assessment_id)
    .execute(proxy.pool())
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_answers_compare_by_trailing_segment() {
        assert!(answers_match(
            "/assets/icons/mouse.png",
            "https://cdn.example.com/img/MOUSE.png"
        ));
        assert!(!answers_match(
            "/assets/icons/mouse.png",
            "/assets/icons/keyboard.png"
        ));
    }

    #[test]
    fn plain_choices_compare_case_insensitively() {
        assert!(answers_match(" Monitor ", "monitor"));
        assert!(!answers_match("Monitor", "Keyboard"));
    }

    #[test]
    fn tagged_answer_shapes_deserialize() {
        let mc: QuestionResponse = serde_json::from_value(serde_json::json!({
            "question_id": 7,
            "question_type": "multiple_choice",
            "selected_choice": "RAM"
        }))
        .unwrap();
        assert!(matches!(
            mc.answer,
            Some(SubmittedAnswer::MultipleChoice { .. })
        ));

        let bare: QuestionResponse = serde_json::from_value(serde_json::json!({
            "question_id": 8,
            "is_correct": true
        }))
        .unwrap();
        assert!(bare.answer.is_none());
        assert_eq!(bare.is_correct, Some(true));
    }
}
