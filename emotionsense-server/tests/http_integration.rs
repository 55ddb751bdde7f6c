//! HTTP integration tests for the EmotionSense REST API.
//!
//! The router runs against the in-memory store; the face inference service is
//! stood in for by wiremock. Requests go through `oneshot` so extractors,
//! status codes and error bodies are exercised end to end.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use emotionsense_core::{EmotionSenseConfig, MemoryStore};
use emotionsense_server::http::{build_router, HttpState};
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOUNDARY: &str = "emotionsense-test-boundary";

/// Router over a fresh in-memory store.
fn app(face_url: Option<&str>, voice: bool) -> Router {
    let mut config = EmotionSenseConfig::from_toml_str(
        r#"
        [database]
        url = "postgresql://localhost/unused"

        [detection]
        max_retries = 0
        retry_delay_ms = 1
        timeout_seconds = 5
        "#,
    )
    .unwrap();
    match face_url {
        Some(url) => {
            config.detection.face_backend = "http".into();
            config.detection.face_url = url.to_string();
        }
        None => config.detection.face_backend = "disabled".into(),
    }
    config.detection.voice_backend = if voice { "placeholder" } else { "disabled" }.into();

    let state = HttpState::new(Arc::new(MemoryStore::new()), None, config).unwrap();
    build_router(Arc::new(state))
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-user-id", "1")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("x-user-id", "1")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

fn post_multipart(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::post(uri)
        .header("x-user-id", "1")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

fn face_scores(dominant: &str) -> Value {
    json!({
        "results": [{
            "dominant_emotion": dominant,
            "emotion": {
                "angry": 1.0, "disgust": 0.0, "fear": 2.0, "happy": 4.0,
                "sad": 88.0, "surprise": 1.0, "neutral": 4.0
            }
        }]
    })
}

// ===========================================================================
// Open endpoints and auth
// ===========================================================================

#[tokio::test]
async fn test_version_and_health_need_no_identity() {
    let app = app(None, false);

    let (status, body) = send(&app, Request::get("/version").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["api"], "emotionsense/1");

    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_missing_user_header_is_401() {
    let app = app(None, false);
    let req = Request::get("/api/emotions/sessions")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_service_token_is_checked_when_configured() {
    let config = EmotionSenseConfig::from_toml_str(
        r#"
        [database]
        url = "postgresql://localhost/unused"

        [auth]
        service_token = "gateway-secret"

        [detection]
        face_backend = "disabled"
        "#,
    )
    .unwrap();
    let state = HttpState::new(Arc::new(MemoryStore::new()), None, config).unwrap();
    let app = build_router(Arc::new(state));

    let with_token = |token: &str| {
        Request::get("/api/emotions/sessions")
            .header("x-user-id", "1")
            .header("authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(&app, with_token("gateway-secret")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, with_token("gateway-secre")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");

    let (status, _) = send(&app, get("/api/emotions/sessions")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_json_is_400_in_error_shape() {
    let app = app(None, false);
    let req = post_json(
        "/api/emotions/logs",
        json!({ "emotion_type": "elated", "confidence": 0.5, "source": "face" }),
    );
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

// ===========================================================================
// Sessions
// ===========================================================================

#[tokio::test]
async fn test_explicit_open_twice_is_409() {
    let app = app(None, false);
    let (status, _) = send(&app, post_json("/api/emotions/sessions", json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, post_json("/api/emotions/sessions", json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn test_close_twice_returns_identical_aggregates() {
    let app = app(None, false);
    let (_, session) = send(&app, get("/api/emotions/sessions/active")).await;
    let id = session["id"].as_str().unwrap().to_string();

    for (emotion, confidence) in [("happy", 0.9), ("happy", 0.7), ("sad", 0.5)] {
        let (status, _) = send(
            &app,
            post_json(
                "/api/emotions/logs",
                json!({
                    "emotion_type": emotion,
                    "confidence": confidence,
                    "source": "face",
                    "session_id": id,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let end = format!("/api/emotions/sessions/{id}/end");
    let (status, first) = send(&app, post_json(&end, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["dominant_emotion"], "happy");
    assert_eq!(first["total_emotions_detected"], 3);
    let avg = first["average_confidence"].as_f64().unwrap();
    assert!((avg - 0.7).abs() < 1e-9);

    let (status, second) = send(&app, post_json(&end, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);

    let (status, _) = send(
        &app,
        post_json(
            "/api/emotions/logs",
            json!({ "emotion_type": "sad", "confidence": 0.2, "source": "face", "session_id": id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_empty_session_closes_with_null_stats() {
    let app = app(None, false);
    let (_, session) = send(&app, get("/api/emotions/sessions/active")).await;
    let id = session["id"].as_str().unwrap();

    let end = format!("/api/emotions/sessions/{id}/end");
    let (status, closed) = send(&app, post_json(&end, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(closed["total_emotions_detected"], 0);
    assert!(closed["dominant_emotion"].is_null());
    assert!(closed["average_confidence"].is_null());
}

#[tokio::test]
async fn test_other_owner_gets_404() {
    let app = app(None, false);
    let (_, session) = send(&app, get("/api/emotions/sessions/active")).await;
    let id = session["id"].as_str().unwrap();

    let req = Request::get(format!("/api/emotions/sessions/{id}"))
        .header("x-user-id", "2")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ===========================================================================
// Detection
// ===========================================================================

#[tokio::test]
async fn test_detect_rejects_text_file_without_logging() {
    let app = app(Some("http://127.0.0.1:9"), false);
    let req = post_multipart(
        "/api/emotions/logs/detect",
        &[
            Part::Text("source", "face"),
            Part::File("image", "notes.txt", b"hello"),
        ],
    );
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("notes.txt"));

    let (_, logs) = send(&app, get("/api/emotions/logs")).await;
    assert_eq!(logs.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_detect_face_creates_log_in_active_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(200).set_body_json(face_scores("sad")))
        .mount(&server)
        .await;

    let app = app(Some(&server.uri()), false);
    let req = post_multipart(
        "/api/emotions/logs/detect",
        &[
            Part::Text("source", "face"),
            Part::File("image", "me.jpg", b"\xff\xd8\xff\xe0jpeg"),
        ],
    );
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["detected"], true);
    assert_eq!(body["emotion"], "sad");
    assert!((body["confidence"].as_f64().unwrap() - 0.88).abs() < 1e-9);
    assert_eq!(body["log"]["source"], "face");

    let (_, active) = send(&app, get("/api/emotions/sessions/active")).await;
    assert_eq!(body["session_id"], active["id"]);

    let (_, logs) = send(&app, get("/api/emotions/logs?emotion=sad")).await;
    assert_eq!(logs.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_detect_no_face_is_200_without_log() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "error": "Face could not be detected in numpy array." })),
        )
        .mount(&server)
        .await;

    let app = app(Some(&server.uri()), false);
    let req = post_multipart(
        "/api/emotions/logs/detect",
        &[
            Part::Text("source", "face"),
            Part::File("image", "wall.png", b"png-bytes"),
        ],
    );
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["detected"], false);
    assert!(body["log"].is_null());

    let (_, logs) = send(&app, get("/api/emotions/logs")).await;
    assert!(logs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_detect_service_failure_is_500() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "model crashed" })))
        .mount(&server)
        .await;

    let app = app(Some(&server.uri()), false);
    let req = post_multipart(
        "/api/emotions/logs/detect",
        &[
            Part::Text("source", "face"),
            Part::File("image", "me.webp", b"webp"),
        ],
    );
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("model crashed"));
}

#[tokio::test]
async fn test_detect_into_closed_or_unknown_session_skips_inference() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(200).set_body_json(face_scores("happy")))
        .expect(0)
        .mount(&server)
        .await;

    let app = app(Some(&server.uri()), false);
    let (_, session) = send(&app, get("/api/emotions/sessions/active")).await;
    let id = session["id"].as_str().unwrap().to_string();
    let end = format!("/api/emotions/sessions/{id}/end");
    let (status, _) = send(&app, post_json(&end, json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let upload = |session_id: &str| {
        post_multipart(
            "/api/emotions/logs/detect",
            &[
                Part::Text("source", "face"),
                Part::Text("session_id", session_id),
                Part::File("image", "me.png", b"png-bytes"),
            ],
        )
    };

    let (status, body) = send(&app, upload(&id)).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let unknown = uuid::Uuid::new_v4().to_string();
    let (status, _) = send(&app, upload(&unknown)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    server.verify().await;
}

#[tokio::test]
async fn test_detect_voice_disabled_is_501_and_placeholder_when_enabled() {
    let upload = || {
        post_multipart(
            "/api/emotions/logs/detect",
            &[
                Part::Text("source", "voice"),
                Part::File("audio", "clip.wav", b"RIFFwave"),
            ],
        )
    };

    let (status, _) = send(&app(None, false), upload()).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);

    let (status, body) = send(&app(None, true), upload()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["emotion"], "neutral");
    assert_eq!(body["log"]["source"], "voice");
}

// ===========================================================================
// Chatbot
// ===========================================================================

#[tokio::test]
async fn test_chat_sad_gets_comfort_reply() {
    let app = app(None, false);
    let (status, body) = send(
        &app,
        post_json(
            "/api/chatbot/messages/send",
            json!({ "message": "I had a rough day", "emotion": "sad", "confidence": 0.8 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["bot_message"]["message"],
        "I'm here to listen. Would you like to talk about what's making you feel this way?"
    );
    assert_eq!(body["bot_message"]["response_type"], "comfort");

    let id = body["session_id"].as_str().unwrap();
    let (_, detail) = send(&app, get(&format!("/api/chatbot/sessions/{id}"))).await;
    assert_eq!(detail["messages"].as_array().unwrap().len(), 2);
    assert_eq!(detail["initial_emotion"], "sad");
}

// ===========================================================================
// Recommendations
// ===========================================================================

#[tokio::test]
async fn test_for_emotion_returns_at_most_five_matching_items() {
    let app = app(None, false);
    for i in 0..8 {
        let (status, _) = send(
            &app,
            post_json(
                "/api/recommendations/items",
                json!({
                    "content_type": "music",
                    "emotion_trigger": "sad",
                    "title": format!("Track {i}"),
                    "content": "A gentle song",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }
    send(
        &app,
        post_json(
            "/api/recommendations/items",
            json!({
                "content_type": "quote",
                "emotion_trigger": "sad",
                "title": "q",
                "content": "q",
            }),
        ),
    )
    .await;

    let (status, body) = send(
        &app,
        get("/api/recommendations/items/for_emotion?emotion=sad&type=music"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 5);
    for item in items {
        assert_eq!(item["emotion_trigger"], "sad");
        assert_eq!(item["content_type"], "music");
    }
}

#[tokio::test]
async fn test_history_bumps_usage_and_takes_feedback() {
    let app = app(None, false);
    let (_, item) = send(
        &app,
        post_json(
            "/api/recommendations/items",
            json!({
                "content_type": "activity",
                "emotion_trigger": "angry",
                "title": "Walk",
                "content": "Ten minutes outside",
            }),
        ),
    )
    .await;
    let item_id = item["id"].as_str().unwrap();

    let (status, history) = send(
        &app,
        post_json(
            "/api/recommendations/history",
            json!({
                "recommendation_id": item_id,
                "detected_emotion": "angry",
                "emotion_confidence": 0.7,
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, item) = send(&app, get(&format!("/api/recommendations/items/{item_id}"))).await;
    assert_eq!(item["usage_count"], 1);

    let history_id = history["id"].as_str().unwrap();
    let (status, rated) = send(
        &app,
        post_json(
            &format!("/api/recommendations/history/{history_id}/feedback"),
            json!({ "feedback": "helpful", "comment": "worked" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rated["user_feedback"], "helpful");

    let (status, _) = send(
        &app,
        post_json(
            &format!("/api/recommendations/history/{}/feedback", uuid::Uuid::new_v4()),
            json!({ "feedback": "helpful" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_generate_insight_for_today() {
    let app = app(None, false);
    for emotion in ["worried", "worried", "happy"] {
        send(
            &app,
            post_json(
                "/api/emotions/logs",
                json!({ "emotion_type": emotion, "confidence": 0.6, "source": "face" }),
            ),
        )
        .await;
    }

    let today = chrono::Utc::now().date_naive().to_string();
    let (status, insight) = send(
        &app,
        post_json(
            "/api/recommendations/insights/generate",
            json!({ "start_date": today, "end_date": today }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(insight["most_common_emotion"], "worried");
    assert_eq!(insight["emotion_distribution"]["worried"], 2);

    let (_, listed) = send(&app, get("/api/recommendations/insights")).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}
