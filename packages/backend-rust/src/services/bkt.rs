//! BKT orchestration: turns persisted assessment responses into per-lesson
//! mastery estimates, completion eligibility, improvement analysis, and
//! lesson recommendations.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use sqlx::Row;
use thiserror::Error;

use teki_bkt::{MasteryTier, Priority};

use crate::db::DatabaseProxy;
use crate::state::BktSettings;

pub const DEFAULT_RECOMMEND_LIMIT: i64 = 5;

#[derive(Debug, Error)]
pub enum BktError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<BktError> for crate::response::AppError {
    fn from(err: BktError) -> Self {
        match err {
            BktError::Validation(message) => Self::validation(message),
            BktError::Store(source) => Self::store(source.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentType {
    Pre,
    Post,
    Quiz,
}

impl AssessmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
            Self::Quiz => "quiz",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, BktError> {
        match raw {
            "pre" => Ok(Self::Pre),
            "post" => Ok(Self::Post),
            "quiz" => Ok(Self::Quiz),
            other => Err(BktError::Validation(format!(
                "unknown assessment_type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MasteryUpdate {
    pub lesson_id: i64,
    pub mastery: f64,
    pub is_mastered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub responses_found: usize,
    pub mastery_count: usize,
    pub total_lessons: usize,
    pub overall_correct: usize,
    pub overall_total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonImprovement {
    pub pre_mastery: f64,
    pub post_mastery: f64,
    pub improvement: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub improvement_percentage: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImprovementAnalysis {
    pub avg_improvement: f64,
    pub lessons_improved: usize,
    pub total_lessons: usize,
    pub detailed_improvements: BTreeMap<i64, LessonImprovement>,
    pub overall_growth: &'static str,
}

impl ImprovementAnalysis {
    fn empty() -> Self {
        Self {
            avg_improvement: 0.0,
            lessons_improved: 0,
            total_lessons: 0,
            detailed_improvements: BTreeMap::new(),
            overall_growth: "Minimal",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PreUpdateSummary {
    pub status: &'static str,
    pub assessment_type: AssessmentType,
    pub updated_mastery: Vec<MasteryUpdate>,
    pub recommend: Vec<i64>,
    pub recommendations_note: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostUpdateSummary {
    pub status: &'static str,
    pub assessment_type: AssessmentType,
    pub updated_mastery: Vec<MasteryUpdate>,
    pub recommend: Vec<i64>,
    pub course_mastered: bool,
    pub overall_score: f64,
    pub total_correct: usize,
    pub total_questions: usize,
    pub bkt_eligible: bool,
    pub score_eligible: bool,
    pub eligibility_reason: &'static str,
    pub improvement_analysis: ImprovementAnalysis,
    pub debug_info: DebugInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_lessons_after_post: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonAnalysis {
    pub current_mastery: f64,
    pub reason: &'static str,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecommendationSummary {
    pub recommended_lessons: Vec<i64>,
    pub next_priority: Option<i64>,
    pub mastery_analysis: BTreeMap<i64, LessonAnalysis>,
    pub suggested_path: Vec<i64>,
    pub time_estimate: String,
    pub data_status: &'static str,
}

impl RecommendationSummary {
    /// Safe fallback when the user has no mastery rows yet. Callers that want
    /// the mastered-by-default escape hatch key off `data_status`.
    pub fn no_data() -> Self {
        Self {
            recommended_lessons: Vec::new(),
            next_priority: None,
            mastery_analysis: BTreeMap::new(),
            suggested_path: Vec::new(),
            time_estimate: "Unknown".to_string(),
            data_status: "no_assessments_taken",
        }
    }

    pub fn has_data(&self) -> bool {
        self.data_status == "recommendations_ready"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LessonMasteryStatus {
    pub mastery: f64,
    pub is_mastered: bool,
    pub status: &'static str,
    pub status_color: &'static str,
    pub last_updated: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MasteryStatusSummary {
    pub lesson_masteries: BTreeMap<i64, LessonMasteryStatus>,
    pub total_lessons: usize,
    pub mastered_count: usize,
}

#[derive(Debug, Clone)]
struct ResponseRow {
    lesson_id: Option<i64>,
    is_correct: bool,
}

#[derive(Debug, Clone)]
struct MasteryRow {
    lesson_id: i64,
    estimated_mastery: f64,
    is_mastered: bool,
    last_updated: String,
}

/// Recompute mastery from pre-assessment evidence and snapshot the baseline
/// used later for improvement tracking.
pub async fn update_from_pre(
    proxy: &DatabaseProxy,
    settings: &BktSettings,
    user_id: i64,
    course_id: i64,
) -> Result<PreUpdateSummary, BktError> {
    let responses = fetch_responses(proxy, user_id, course_id, AssessmentType::Pre).await?;
    if responses.is_empty() {
        return Ok(PreUpdateSummary {
            status: "no_pre_data",
            assessment_type: AssessmentType::Pre,
            updated_mastery: Vec::new(),
            recommend: Vec::new(),
            recommendations_note: "No diagnostic data yet",
        });
    }

    let updated = process_responses(
        proxy,
        settings,
        user_id,
        course_id,
        &responses,
        "pre_assessment",
        true,
    )
    .await?;

    let threshold = settings.mastery_threshold;
    let recommend = updated
        .iter()
        .filter(|u| u.mastery < threshold)
        .map(|u| u.lesson_id)
        .collect();

    Ok(PreUpdateSummary {
        status: if updated.is_empty() { "no_updates" } else { "ok" },
        assessment_type: AssessmentType::Pre,
        updated_mastery: updated,
        recommend,
        recommendations_note: "Based on diagnostic assessment - focus areas identified",
    })
}

/// Recompute mastery from post-assessment evidence and apply the hybrid
/// completion rule: BKT mastery on every lesson OR a raw score at or above
/// the score-eligibility cutoff.
pub async fn update_from_post(
    proxy: &DatabaseProxy,
    settings: &BktSettings,
    user_id: i64,
    course_id: i64,
) -> Result<PostUpdateSummary, BktError> {
    let responses = fetch_responses(proxy, user_id, course_id, AssessmentType::Post).await?;
    if responses.is_empty() {
        return Ok(PostUpdateSummary {
            status: "no_post_data",
            assessment_type: AssessmentType::Post,
            updated_mastery: Vec::new(),
            recommend: Vec::new(),
            course_mastered: false,
            overall_score: 0.0,
            total_correct: 0,
            total_questions: 0,
            bkt_eligible: false,
            score_eligible: false,
            eligibility_reason: "no_data",
            improvement_analysis: ImprovementAnalysis::empty(),
            debug_info: DebugInfo {
                responses_found: 0,
                mastery_count: 0,
                total_lessons: 0,
                overall_correct: 0,
                overall_total: 0,
            },
            recommended_lessons_after_post: None,
        });
    }

    let updated = process_responses(
        proxy,
        settings,
        user_id,
        course_id,
        &responses,
        "post_assessment",
        false,
    )
    .await?;

    let total = responses.len();
    let correct = responses.iter().filter(|r| r.is_correct).count();
    let overall_score = if total > 0 {
        correct as f64 / total as f64
    } else {
        0.0
    };

    let threshold = settings.mastery_threshold;
    let bkt_eligible = !updated.is_empty() && updated.iter().all(|u| u.mastery >= threshold);
    let score_eligible = overall_score >= teki_bkt::SCORE_ELIGIBLE_THRESHOLD;

    let (course_mastered, eligibility_reason) = match (bkt_eligible, score_eligible) {
        (true, true) => (true, "both_bkt_and_score"),
        (true, false) => (true, "bkt_mastery_only"),
        (false, true) => (true, "score_only"),
        (false, false) => (false, "failed_both"),
    };

    let recommend: Vec<i64> = updated
        .iter()
        .filter(|u| u.mastery < threshold)
        .map(|u| u.lesson_id)
        .collect();

    let mastery_count = updated.iter().filter(|u| u.mastery >= threshold).count();
    let improvement_analysis =
        analyze_improvement(proxy, user_id, course_id, &updated).await?;

    let recommended_lessons_after_post = if course_mastered {
        None
    } else {
        match get_recommendations(proxy, user_id, course_id, threshold, DEFAULT_RECOMMEND_LIMIT)
            .await
        {
            Ok(rec) => Some(rec.recommended_lessons),
            Err(err) => {
                tracing::warn!(error = %err, user_id, course_id, "post-assessment recommendations failed");
                Some(Vec::new())
            }
        }
    };

    Ok(PostUpdateSummary {
        status: if updated.is_empty() { "no_updates" } else { "ok" },
        assessment_type: AssessmentType::Post,
        debug_info: DebugInfo {
            responses_found: total,
            mastery_count,
            total_lessons: updated.len(),
            overall_correct: correct,
            overall_total: total,
        },
        updated_mastery: updated,
        recommend,
        course_mastered,
        overall_score,
        total_correct: correct,
        total_questions: total,
        bkt_eligible,
        score_eligible,
        eligibility_reason,
        improvement_analysis,
        recommended_lessons_after_post,
    })
}

/// Event-driven refresh over every stored response for the course, used when
/// a lesson is completed outside an assessment.
pub async fn refresh_from_all_responses(
    proxy: &DatabaseProxy,
    settings: &BktSettings,
    user_id: i64,
    course_id: i64,
    source: &str,
) -> Result<Vec<MasteryUpdate>, BktError> {
    let responses = fetch_all_responses(proxy, user_id, course_id).await?;
    if responses.is_empty() {
        return Ok(Vec::new());
    }
    process_responses(proxy, settings, user_id, course_id, &responses, source, false).await
}

/// Rank lessons below the threshold, weakest first, ties by ascending
/// lesson_id. With nothing below threshold the minimum-mastery lessons are
/// still suggested so the UI always has a study path.
pub async fn get_recommendations(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
    threshold: f64,
    limit: i64,
) -> Result<RecommendationSummary, BktError> {
    if !(0.0..=1.0).contains(&threshold) || threshold.is_nan() {
        return Err(BktError::Validation(format!(
            "threshold must be within [0,1], got {threshold}"
        )));
    }
    let limit = limit.clamp(1, 50) as usize;

    let rows = fetch_masteries(proxy, user_id, course_id).await?;
    if rows.is_empty() {
        return Ok(RecommendationSummary::no_data());
    }

    // Rows arrive sorted by (estimated_mastery ASC, lesson_id ASC).
    let below: Vec<&MasteryRow> = rows
        .iter()
        .filter(|r| r.estimated_mastery < threshold)
        .collect();

    let top: Vec<i64> = if below.is_empty() {
        let min_val = rows[0].estimated_mastery;
        rows.iter()
            .filter(|r| r.estimated_mastery == min_val)
            .map(|r| r.lesson_id)
            .collect()
    } else {
        below.iter().take(limit).map(|r| r.lesson_id).collect()
    };

    let mastery_by_lesson: BTreeMap<i64, f64> = rows
        .iter()
        .map(|r| (r.lesson_id, r.estimated_mastery))
        .collect();

    let mut mastery_analysis = BTreeMap::new();
    for lesson_id in top.iter().take(3) {
        let mastery = mastery_by_lesson.get(lesson_id).copied().unwrap_or(0.0);
        mastery_analysis.insert(
            *lesson_id,
            LessonAnalysis {
                current_mastery: (mastery * 1000.0).round() / 1000.0,
                reason: teki_bkt::recommendation_reason(mastery, threshold),
                priority: Priority::for_mastery(mastery, threshold),
            },
        );
    }

    let time_estimate = if top.is_empty() {
        "15-25 minutes".to_string()
    } else {
        format!("{}-{} minutes", top.len() * 15, top.len() * 25)
    };

    Ok(RecommendationSummary {
        next_priority: top.first().copied(),
        suggested_path: rows.iter().map(|r| r.lesson_id).collect(),
        recommended_lessons: top,
        mastery_analysis,
        time_estimate,
        data_status: "recommendations_ready",
    })
}

/// Read-only mastery snapshot with UI tier status per lesson. Triggers no
/// updates, so back-to-back calls with no new evidence are identical.
pub async fn mastery_status(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
) -> Result<MasteryStatusSummary, BktError> {
    let rows = fetch_masteries(proxy, user_id, course_id).await?;

    let mut lesson_masteries = BTreeMap::new();
    let mut mastered_count = 0usize;
    for row in &rows {
        if row.is_mastered {
            mastered_count += 1;
        }
        let tier = MasteryTier::from_mastery(row.estimated_mastery);
        lesson_masteries.insert(
            row.lesson_id,
            LessonMasteryStatus {
                mastery: row.estimated_mastery,
                is_mastered: row.is_mastered,
                status: tier.status(),
                status_color: tier.color(),
                last_updated: row.last_updated.clone(),
            },
        );
    }

    Ok(MasteryStatusSummary {
        total_lessons: lesson_masteries.len(),
        mastered_count,
        lesson_masteries,
    })
}

/// Compare current mastery against the pre-assessment baseline from history.
pub async fn improvement_analysis(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
) -> Result<ImprovementAnalysis, BktError> {
    let rows = fetch_masteries(proxy, user_id, course_id).await?;
    let current: Vec<MasteryUpdate> = rows
        .iter()
        .map(|r| MasteryUpdate {
            lesson_id: r.lesson_id,
            mastery: r.estimated_mastery,
            is_mastered: r.is_mastered,
        })
        .collect();
    analyze_improvement(proxy, user_id, course_id, &current).await
}

async fn analyze_improvement(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
    current: &[MasteryUpdate],
) -> Result<ImprovementAnalysis, BktError> {
    if current.is_empty() {
        return Ok(ImprovementAnalysis::empty());
    }

    let baselines = fetch_pre_baselines(proxy, user_id, course_id).await?;

    let mut detailed = BTreeMap::new();
    let mut total_improvement = 0.0;
    let mut improved_count = 0usize;

    for update in current {
        let pre = baselines.get(&update.lesson_id).copied().unwrap_or(0.0);
        let delta = update.mastery - pre;
        total_improvement += delta;
        if delta > 0.1 {
            improved_count += 1;
        }

        detailed.insert(
            update.lesson_id,
            LessonImprovement {
                pre_mastery: round3(pre),
                post_mastery: round3(update.mastery),
                improvement: round3(delta),
                improvement_percentage: (pre > 0.0)
                    .then(|| ((delta / pre.max(0.1)) * 1000.0).round() / 10.0),
            },
        );
    }

    let avg = total_improvement / current.len() as f64;
    Ok(ImprovementAnalysis {
        avg_improvement: round3(avg),
        lessons_improved: improved_count,
        total_lessons: current.len(),
        detailed_improvements: detailed,
        overall_growth: if avg > 0.3 {
            "Strong"
        } else if avg > 0.1 {
            "Moderate"
        } else {
            "Minimal"
        },
    })
}

/// Group correctness by lesson preserving submission order, fold each series
/// through the BKT update, and persist mastery plus a history record. The
/// whole batch commits or rolls back as one transaction.
async fn process_responses(
    proxy: &DatabaseProxy,
    settings: &BktSettings,
    user_id: i64,
    course_id: i64,
    responses: &[ResponseRow],
    source: &str,
    set_baseline: bool,
) -> Result<Vec<MasteryUpdate>, BktError> {
    let params = &settings.params;
    params
        .validate()
        .map_err(|e| BktError::Validation(e.to_string()))?;
    if params.is_degenerate() {
        tracing::warn!(
            p_slip = params.p_slip,
            p_guess = params.p_guess,
            "degenerate BKT parameters (p_slip + p_guess >= 1); updates will be clamped"
        );
    }

    let mut per_lesson: BTreeMap<i64, Vec<bool>> = BTreeMap::new();
    for response in responses {
        let Some(lesson_id) = response.lesson_id else {
            continue;
        };
        per_lesson.entry(lesson_id).or_default().push(response.is_correct);
    }

    let assessment_type = if source.contains("pre") {
        Some("pre")
    } else if source.contains("post") {
        Some("post")
    } else {
        None
    };

    let mut tx = proxy.pool().begin().await.map_err(BktError::Store)?;
    let mut updated = Vec::with_capacity(per_lesson.len());
    let now = Utc::now().to_rfc3339();

    for (lesson_id, series) in &per_lesson {
        let mastery = teki_bkt::run_series(params, series);
        let is_mastered = mastery >= settings.mastery_threshold;

        upsert_mastery(
            &mut tx,
            user_id,
            course_id,
            *lesson_id,
            mastery,
            is_mastered,
            set_baseline,
            &now,
        )
        .await?;
        insert_history(
            &mut tx,
            user_id,
            course_id,
            *lesson_id,
            mastery,
            is_mastered,
            assessment_type,
            source,
            &now,
        )
        .await?;

        updated.push(MasteryUpdate {
            lesson_id: *lesson_id,
            mastery,
            is_mastered,
        });
    }

    tx.commit().await.map_err(BktError::Store)?;

    tracing::info!(
        user_id,
        course_id,
        source,
        lessons = updated.len(),
        "mastery batch applied"
    );
    Ok(updated)
}

#[allow(clippy::too_many_arguments)]
async fn upsert_mastery(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: i64,
    course_id: i64,
    lesson_id: i64,
    mastery: f64,
    is_mastered: bool,
    set_baseline: bool,
    now: &str,
) -> Result<(), BktError> {
    // baseline_mastery is only written by pre-assessment processing; quiz
    // practice and post runs must not disturb the improvement baseline.
    let baseline_clause = if set_baseline {
        "baseline_mastery = excluded.estimated_mastery"
    } else {
        "baseline_mastery = user_lesson_mastery.baseline_mastery"
    };
    let sql = format!(
        r#"
        INSERT INTO user_lesson_mastery
            (user_id, course_id, lesson_id, estimated_mastery, baseline_mastery, is_mastered, version, last_updated)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?)
        ON CONFLICT (user_id, course_id, lesson_id) DO UPDATE SET
            estimated_mastery = excluded.estimated_mastery,
            {baseline_clause},
            is_mastered = excluded.is_mastered,
            version = user_lesson_mastery.version + 1,
            last_updated = excluded.last_updated
        "#
    );

    sqlx::query(&sql)
        .bind(user_id)
        .bind(course_id)
        .bind(lesson_id)
        .bind(mastery)
        .bind(set_baseline.then_some(mastery))
        .bind(is_mastered)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(BktError::Store)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_history(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: i64,
    course_id: i64,
    lesson_id: i64,
    mastery: f64,
    is_mastered: bool,
    assessment_type: Option<&str>,
    source: &str,
    now: &str,
) -> Result<(), BktError> {
    sqlx::query(
        r#"
        INSERT INTO user_lesson_mastery_history
            (user_id, course_id, lesson_id, estimated_mastery, is_mastered, assessment_type, source, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(lesson_id)
    .bind(mastery)
    .bind(is_mastered)
    .bind(assessment_type)
    .bind(source)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(BktError::Store)?;
    Ok(())
}

async fn fetch_responses(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
    assessment_type: AssessmentType,
) -> Result<Vec<ResponseRow>, BktError> {
    let rows = sqlx::query(
        r#"
        SELECT r.lesson_id, r.is_correct
        FROM assessment_question_responses r
        JOIN assessment_results a ON r.assessment_id = a.id
        WHERE r.user_id = ?
          AND a.course_id = ?
          AND a.assessment_type = ?
        ORDER BY r.id ASC
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .bind(assessment_type.as_str())
    .fetch_all(proxy.pool())
    .await
    .map_err(BktError::Store)?;

    Ok(rows.into_iter().map(map_response_row).collect())
}

async fn fetch_all_responses(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
) -> Result<Vec<ResponseRow>, BktError> {
    let rows = sqlx::query(
        r#"
        SELECT r.lesson_id, r.is_correct
        FROM assessment_question_responses r
        JOIN assessment_results a ON r.assessment_id = a.id
        WHERE r.user_id = ? AND a.course_id = ?
        ORDER BY r.id ASC
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await
    .map_err(BktError::Store)?;

    Ok(rows.into_iter().map(map_response_row).collect())
}

fn map_response_row(row: sqlx::sqlite::SqliteRow) -> ResponseRow {
    ResponseRow {
        lesson_id: row.try_get::<Option<i64>, _>("lesson_id").ok().flatten(),
        is_correct: row.try_get::<bool, _>("is_correct").unwrap_or(false),
    }
}

async fn fetch_masteries(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
) -> Result<Vec<MasteryRow>, BktError> {
    let rows = sqlx::query(
        r#"
        SELECT lesson_id, estimated_mastery, is_mastered, last_updated
        FROM user_lesson_mastery
        WHERE user_id = ? AND course_id = ?
        ORDER BY estimated_mastery ASC, lesson_id ASC
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await
    .map_err(BktError::Store)?;

    Ok(rows
        .into_iter()
        .map(|row| MasteryRow {
            lesson_id: row.try_get::<i64, _>("lesson_id").unwrap_or_default(),
            estimated_mastery: row.try_get::<f64, _>("estimated_mastery").unwrap_or(0.0),
            is_mastered: row.try_get::<bool, _>("is_mastered").unwrap_or(false),
            last_updated: row.try_get::<String, _>("last_updated").unwrap_or_default(),
        })
        .collect())
}

/// Most recent pre-assessment snapshot per lesson from the history table.
async fn fetch_pre_baselines(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
) -> Result<BTreeMap<i64, f64>, BktError> {
    let rows = sqlx::query(
        r#"
        SELECT lesson_id, estimated_mastery
        FROM user_lesson_mastery_history
        WHERE id IN (
            SELECT MAX(id)
            FROM user_lesson_mastery_history
            WHERE user_id = ? AND course_id = ? AND assessment_type = 'pre'
            GROUP BY lesson_id
        )
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await
    .map_err(BktError::Store)?;

    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let lesson_id = row.try_get::<i64, _>("lesson_id").ok()?;
            let mastery = row.try_get::<f64, _>("estimated_mastery").ok()?;
            Some((lesson_id, mastery))
        })
        .collect())
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

pub type HistoryRecords = Vec<HistoryRecord>;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryRecord {
    pub lesson_id: i64,
    pub estimated_mastery: f64,
    pub is_mastered: bool,
    pub assessment_type: Option<String>,
    pub source: String,
    pub created_at: String,
}

pub async fn mastery_history(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
) -> Result<HistoryRecords, BktError> {
    let rows = sqlx::query(
        r#"
        SELECT lesson_id, estimated_mastery, is_mastered, assessment_type, source, created_at
        FROM user_lesson_mastery_history
        WHERE user_id = ? AND course_id = ?
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_all(proxy.pool())
    .await
    .map_err(BktError::Store)?;

    Ok(rows
        .into_iter()
        .map(|row| HistoryRecord {
            lesson_id: row.try_get::<i64, _>("lesson_id").unwrap_or_default(),
            estimated_mastery: row.try_get::<f64, _>("estimated_mastery").unwrap_or(0.0),
            is_mastered: row.try_get::<bool, _>("is_mastered").unwrap_or(false),
            assessment_type: row
                .try_get::<Option<String>, _>("assessment_type")
                .ok()
                .flatten(),
            source: row.try_get::<String, _>("source").unwrap_or_default(),
            created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct UserMasteryRecord {
    pub course_id: i64,
    pub lesson_id: i64,
    pub estimated_mastery: f64,
    pub is_mastered: bool,
    pub last_updated: String,
}

/// All mastery rows for a user across courses (the /bkt/status view).
pub async fn user_mastery_records(
    proxy: &DatabaseProxy,
    user_id: i64,
) -> Result<Vec<UserMasteryRecord>, BktError> {
    let rows = sqlx::query(
        r#"
        SELECT course_id, lesson_id, estimated_mastery, is_mastered, last_updated
        FROM user_lesson_mastery
        WHERE user_id = ?
        ORDER BY course_id ASC, lesson_id ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(proxy.pool())
    .await
    .map_err(BktError::Store)?;

    Ok(rows
        .into_iter()
        .map(|row| UserMasteryRecord {
            course_id: row.try_get::<i64, _>("course_id").unwrap_or_default(),
            lesson_id: row.try_get::<i64, _>("lesson_id").unwrap_or_default(),
            estimated_mastery: row.try_get::<f64, _>("estimated_mastery").unwrap_or(0.0),
            is_mastered: row.try_get::<bool, _>("is_mastered").unwrap_or(false),
            last_updated: row.try_get::<String, _>("last_updated").unwrap_or_default(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_proxy() -> DatabaseProxy {
        DatabaseProxy::connect("sqlite::memory:")
            .await
            .expect("in-memory db")
    }

    fn correct_responses(lesson_id: i64, count: usize) -> Vec<ResponseRow> {
        (0..count)
            .map(|_| ResponseRow {
                lesson_id: Some(lesson_id),
                is_correct: true,
            })
            .collect()
    }

    #[tokio::test]
    async fn stored_mastered_flag_follows_configured_threshold() {
        let proxy = memory_proxy().await;
        let settings = BktSettings {
            mastery_threshold: 0.95,
            ..Default::default()
        };

        // Two correct answers land near 0.89 with default parameters: above
        // the stock cutoff but below the configured one.
        let updated = process_responses(
            &proxy,
            &settings,
            1,
            1,
            &correct_responses(7, 2),
            "pre_assessment",
            true,
        )
        .await
        .expect("batch applies");

        assert_eq!(updated.len(), 1);
        assert!(updated[0].mastery > 0.8);
        assert!(updated[0].mastery < 0.95);
        assert!(!updated[0].is_mastered);

        let rows = fetch_masteries(&proxy, 1, 1).await.expect("read back");
        assert!(!rows[0].is_mastered);
    }

    #[tokio::test]
    async fn stored_mastered_flag_set_at_default_threshold() {
        let proxy = memory_proxy().await;
        let settings = BktSettings::default();

        let updated = process_responses(
            &proxy,
            &settings,
            1,
            1,
            &correct_responses(7, 2),
            "pre_assessment",
            true,
        )
        .await
        .expect("batch applies");

        assert!(updated[0].is_mastered);
        let rows = fetch_masteries(&proxy, 1, 1).await.expect("read back");
        assert!(rows[0].is_mastered);
    }
}
