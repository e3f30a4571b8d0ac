use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use tempfile::TempDir;

use techguro_backend_rust::db::DatabaseProxy;
use techguro_backend_rust::routes;
use techguro_backend_rust::state::{AppState, BktSettings};

pub struct TestApp {
    pub router: Router,
    pub proxy: Arc<DatabaseProxy>,
    _dir: TempDir,
}

pub async fn create_test_app() -> TestApp {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("test.db");
    let url = format!("sqlite://{}", db_path.display());

    let proxy = Arc::new(DatabaseProxy::connect(&url).await.expect("connect test db"));
    let state = AppState::new(Some(Arc::clone(&proxy)), BktSettings::default());

    TestApp {
        router: routes::router(state),
        proxy,
        _dir: dir,
    }
}

pub async fn seed_lessons(proxy: &DatabaseProxy, course_id: i64, lesson_ids: &[i64]) {
    for lesson_id in lesson_ids {
        sqlx::query("INSERT INTO lessons (id, course_id, title) VALUES (?, ?, ?)")
            .bind(lesson_id)
            .bind(course_id)
            .bind(format!("Lesson {lesson_id}"))
            .execute(proxy.pool())
            .await
            .expect("seed lesson");
    }
}

pub async fn seed_question(
    proxy: &DatabaseProxy,
    question_id: i64,
    course_id: i64,
    lesson_id: i64,
    correct_answer: &str,
) {
    sqlx::query(
        "INSERT INTO questions (id, course_id, lesson_id, question_type, correct_answer) VALUES (?, ?, ?, 'multiple_choice', ?)",
    )
    .bind(question_id)
    .bind(course_id)
    .bind(lesson_id)
    .bind(correct_answer)
    .execute(proxy.pool())
    .await
    .expect("seed question");
}

pub async fn seed_mastery(
    proxy: &DatabaseProxy,
    user_id: i64,
    course_id: i64,
    lesson_id: i64,
    mastery: f64,
) {
    sqlx::query(
        "INSERT INTO user_lesson_mastery (user_id, course_id, lesson_id, estimated_mastery, is_mastered, version, last_updated) VALUES (?, ?, ?, ?, ?, 1, '2026-01-01T00:00:00Z')",
    )
    .bind(user_id)
    .bind(course_id)
    .bind(lesson_id)
    .bind(mastery)
    .bind(mastery >= 0.8)
    .execute(proxy.pool())
    .await
    .expect("seed mastery");
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

pub fn post_json(uri: &str, payload: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(payload).expect("serialize")))
        .expect("build request")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse json body")
}
