use sqlx::SqlitePool;

/// Bootstrap DDL, applied at startup. Content rows (lessons, questions) are
/// seeded by the course tooling; the engine only reads them.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS lessons (
        id INTEGER PRIMARY KEY,
        course_id INTEGER NOT NULL,
        title TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS questions (
        id INTEGER PRIMARY KEY,
        course_id INTEGER NOT NULL,
        lesson_id INTEGER,
        question_type TEXT,
        assessment_type TEXT,
        correct_answer TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS assessment_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        assessment_type TEXT NOT NULL,
        score REAL NOT NULL,
        total INTEGER NOT NULL,
        date_taken TEXT NOT NULL,
        completion_eligible INTEGER NOT NULL DEFAULT 0,
        eligibility_reason TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS assessment_question_responses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        assessment_id INTEGER NOT NULL REFERENCES assessment_results(id) ON DELETE CASCADE,
        question_id INTEGER NOT NULL,
        selected_choice TEXT,
        is_correct INTEGER NOT NULL,
        lesson_id INTEGER,
        timestamp TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_lesson_mastery (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        lesson_id INTEGER NOT NULL,
        estimated_mastery REAL NOT NULL,
        baseline_mastery REAL,
        is_mastered INTEGER NOT NULL DEFAULT 0,
        version INTEGER NOT NULL DEFAULT 0,
        last_updated TEXT NOT NULL,
        UNIQUE (user_id, course_id, lesson_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_lesson_mastery_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        lesson_id INTEGER NOT NULL,
        estimated_mastery REAL NOT NULL,
        is_mastered INTEGER NOT NULL DEFAULT 0,
        assessment_type TEXT,
        source TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS progress (
        progress_id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        course_id INTEGER NOT NULL,
        lesson_id INTEGER NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        completed_at TEXT,
        UNIQUE (user_id, course_id, lesson_id)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_responses_user_assessment
        ON assessment_question_responses (user_id, assessment_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_mastery_user_course
        ON user_lesson_mastery (user_id, course_id)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_mastery_history_user_course
        ON user_lesson_mastery_history (user_id, course_id, assessment_type)
    "#,
];

pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
