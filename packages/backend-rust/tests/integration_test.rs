use axum::http::StatusCode;
use tower::ServiceExt;

mod common;

#[tokio::test]
async fn test_health() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(common::get("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = common::body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"]["healthy"], true);
}

#[tokio::test]
async fn test_404_envelope() {
    let app = common::create_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(common::get("/nonexistent/path"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = common::body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_unknown_assessment_type_rejected() {
    let app = common::create_test_app().await;

    let payload = serde_json::json!({
        "user_id": 1,
        "course_id": 1,
        "assessment_type": "midterm",
        "responses": [{ "question_id": 1, "is_correct": true }]
    });
    let response = app
        .router
        .clone()
        .oneshot(common::post_json("/assessment/submit", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = common::body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_empty_responses_rejected() {
    let app = common::create_test_app().await;

    let payload = serde_json::json!({
        "user_id": 1,
        "course_id": 1,
        "assessment_type": "pre",
        "responses": []
    });
    let response = app
        .router
        .clone()
        .oneshot(common::post_json("/assessment/submit", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recommendation_threshold_out_of_range_rejected() {
    let app = common::create_test_app().await;
    common::seed_mastery(&app.proxy, 1, 1, 1, 0.5).await;

    let response = app
        .router
        .clone()
        .oneshot(common::get("/bkt/recommendations/1/1?threshold=1.5"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = common::body_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
}
