//! Lesson progress tracking and the study-path gate that decides when the
//! post assessment unlocks.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use thiserror::Error;

use crate::db::DatabaseProxy;
use crate::services::bkt::{self, BktError, MasteryUpdate};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error(transparent)]
    Bkt(#[from] BktError),
}

impl From<ProgressError> for crate::response::AppError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::Validation(message) => Self::validation(message),
            ProgressError::Store(source) => Self::store(source.to_string()),
            ProgressError::Bkt(inner) => inner.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProgressRequest {
    pub user_id: i64,
    pub course_id: i64,
    pub lesson_id: i64,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateProgressOutcome {
    pub message: &'static str,
    pub lesson_id: i64,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastery_updates: Option<Vec<MasteryUpdate>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecord {
    pub course_id: i64,
    pub lesson_id: i64,
    pub completed: bool,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecommendations {
    pub recommended_lessons: Vec<i64>,
    pub completed_lessons: Vec<i64>,
    pub completed_recommended: Vec<i64>,
    pub total_recommended: usize,
    pub total_completed_recommended: usize,
    pub post_assessment_completed: bool,
    pub post_assessment_passed: bool,
    pub post_assessment_unlocked: bool,
    pub course_completed: bool,
    pub unlock_reason: &'static str,
    pub data_status: &'static str,
}

/// Upsert a progress row. Marking a lesson complete for the first time
/// triggers an event-driven mastery refresh over all stored evidence.
pub async fn update_progress(
    state: &AppState,
    proxy: &DatabaseProxy,
    request: UpdateProgressRequest,
) -> Result<UpdateProgressOutcome, ProgressError> {
    if request.user_id <= 0 || request.course_id <= 0 || request.lesson_id <= 0 {
        return Err(ProgressError::Validation(
            "user_id, course_id and lesson_id must be positive".to_string(),
        ));
    }

    let was_completed = sqlx::query(
        "SELECT completed FROM progress WHERE user_id = ? AND course_id = ? AND lesson_id = ?",
    )
    .bind(request.user_id)
    .bind(request.course_id)
    .bind(request.lesson_id)
    .fetch_optional(proxy.pool())
    .await?
    .and_then(|row| row.try_get::<bool, _>("completed").ok())
    .unwrap_or(false);

    let completed_at = request.completed.then(|| Utc::now().to_rfc3339());
    sqlx::query(
        r#"
        INSERT INTO progress (user_id, course_id, lesson_id, completed, completed_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (user_id, course_id, lesson_id) DO UPDATE SET
            completed = excluded.completed,
            completed_at = COALESCE(excluded.completed_at, progress.completed_at)
        "#,
    )
    .bind(request.user_id)
    .bind(request.course_id)
    .bind(request.lesson_id)
    .bind(request.completed)
    .bind(completed_at.as_deref())
    .execute(proxy.pool())
    .await?;

    let newly_completed = request.completed && !was_completed;
    let mastery_updates = if newly_completed {
        let lock = state.submission_lock(request.user_id, request.course_id);
        let _guard = lock.lock().await;
        Some(
            bkt::refresh_from_all_responses(
                proxy,
                state.bkt(),
                request.user_id,
                request.course_id,
                "lesson_completion",
            )
            .await?,
        )
    } else {
        None
    };

    Ok(UpdateProgressOutcome {
        message: if newly_completed {
            "Lesson completed, mastery refreshed"
        } else {
            "Progress updated"
        },
        lesson_id: request.lesson_id,
        completed: request.completed,
        mastery_updates,
    })
}

pub async fn get_progress(
    proxy: &DatabaseProxy,
    user_id: i64,
) -> Result<Vec<ProgressRecord>, ProgressError> {
    let rows = sqlx::query(
        r#"
        SELECT course_id, lesson_id, completed, completed_at
        FROM progress
        WHERE user_id = ?
        ORDER BY course_id ASC, lesson_id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| ProgressRecord {
            course_id: row.try_get::<i64, _>("course_id").unwrap_or_default(),
            lesson_id: row.try_get::<i64, _>("lesson_id").unwrap_or_default(),
            completed: row.try_get::<bool, _>("completed").unwrap_or(false),
            completed_at: row
                .try_get::<Option<String>, _>("completed_at")
                .ok()
                .flatten(),
        })
        .collect())
}

/// Cross-references recommended lessons with completion state. The post
/// assessment unlocks once every recommended lesson is done and stays
/// unlocked until it is passed.
pub async fn progress_recommendations(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
    threshold: f64,
) -> Result<ProgressRecommendations, ProgressError> {
    let recommendations = bkt::get_recommendations(
        proxy,
        user_id,
        course_id,
        threshold,
        bkt::DEFAULT_RECOMMEND_LIMIT,
    )
    .await?;

    let completed_lessons: Vec<i64> = sqlx::query(
        "SELECT lesson_id FROM progress WHERE user_id = ? AND course_id = ? AND completed = 1 ORDER BY lesson_id ASC",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await?
    .into_iter()
    .filter_map(|row| row.try_get::<i64, _>("lesson_id").ok())
    .collect();

    let post_row = sqlx::query(
        "SELECT completion_eligible FROM assessment_results WHERE user_id = ? AND course_id = ? AND assessment_type = 'post'",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(proxy.pool())
    .await?;
    let post_assessment_completed = post_row.is_some();
    let post_assessment_passed = post_row
        .and_then(|row| row.try_get::<bool, _>("completion_eligible").ok())
        .unwrap_or(false);

    if !recommendations.has_data() {
        return Ok(ProgressRecommendations {
            recommended_lessons: Vec::new(),
            completed_lessons,
            completed_recommended: Vec::new(),
            total_recommended: 0,
            total_completed_recommended: 0,
            post_assessment_completed,
            post_assessment_passed,
            post_assessment_unlocked: false,
            course_completed: false,
            unlock_reason: "complete_pre_assessment_first",
            data_status: "no_assessments_taken",
        });
    }

    let completed_set: HashSet<i64> = completed_lessons.iter().copied().collect();
    let completed_recommended: Vec<i64> = recommendations
        .recommended_lessons
        .iter()
        .copied()
        .filter(|id| completed_set.contains(id))
        .collect();
    let all_recommended_done =
        completed_recommended.len() == recommendations.recommended_lessons.len();

    let course_completed = all_recommended_done && post_assessment_passed;
    let post_assessment_unlocked = all_recommended_done && !post_assessment_passed;
    let unlock_reason = if course_completed {
        "course_completed"
    } else if post_assessment_unlocked {
        "all_recommended_lessons_completed"
    } else {
        "recommended_lessons_remaining"
    };

    Ok(ProgressRecommendations {
        total_recommended: recommendations.recommended_lessons.len(),
        total_completed_recommended: completed_recommended.len(),
        recommended_lessons: recommendations.recommended_lessons,
        completed_lessons,
        completed_recommended,
        post_assessment_completed,
        post_assessment_passed,
        post_assessment_unlocked,
        course_completed,
        unlock_reason,
        data_status: "recommendations_ready",
    })
}
