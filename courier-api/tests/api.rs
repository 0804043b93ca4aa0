#![allow(clippy::unwrap_used)]

mod support;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use courier_api::{ApiConfig, RateLimit};
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{FakeRelay, TestApp, json, smtp};

#[tokio::test]
async fn test_health_reports_version() {
    let app = TestApp::new(FakeRelay::default());
    let response = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    let (status, body) = json(response).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "API is running");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let app = TestApp::new(FakeRelay::default());
    let response = app
        .send(Request::get("/api/providers").body(Body::empty()).unwrap())
        .await;
    let (status, body) = json(response).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false, "error": "Endpoint not found" }));
}

#[tokio::test]
async fn test_smtp_succeeds_and_fails() {
    let app = TestApp::new(FakeRelay::default());
    let (status, body) = app.post("/api/test-smtp", &smtp()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "success": true, "message": "SMTP connection successful" })
    );

    let app = TestApp::new(FakeRelay {
        refuse_connections: true,
        ..FakeRelay::default()
    });
    let (status, body) = app.post("/api/test-smtp", &smtp()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "SMTP connection failed");
    assert!(body["details"].as_str().unwrap().contains("connection refused"));
    assert!(!body.to_string().contains("super-secret"));
}

#[tokio::test]
async fn test_smtp_rejects_bad_port() {
    let app = TestApp::new(FakeRelay::default());
    let mut relay = smtp();
    relay["port"] = json!(70000);

    let (status, body) = app.post("/api/test-smtp", &relay).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation error");
    assert!(body["details"].as_str().unwrap().starts_with("smtp.port"));
}

#[tokio::test]
async fn test_bulk_send_reports_results_and_errors() {
    let app = TestApp::new(FakeRelay {
        rejected: vec!["b@x.com".to_string()],
        ..FakeRelay::default()
    });

    let (status, body) = app
        .post(
            "/api/send-bulk-email",
            &json!({
                "smtp": smtp(),
                "recipients": ["a@x.com", "b@x.com", "c@x.com"],
                "subject": "Hello",
                "text": "Hi",
                "html": "",
                "sendMethod": "individual",
                "batchSize": 2,
                "delayBetweenBatches": 0
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Bulk email operation completed");
    assert_eq!(
        body["summary"],
        json!({ "total": 3, "successful": 2, "failed": 1 })
    );
    assert_eq!(
        body["results"][0],
        json!({ "recipient": "a@x.com", "success": true, "messageId": "<a@x.com@fake>" })
    );
    assert_eq!(body["errors"][0]["recipient"], "b@x.com");
    assert!(
        body["errors"][0]["error"]
            .as_str()
            .unwrap()
            .contains("User unknown")
    );

    let envelopes = app.relay.envelopes.lock().unwrap();
    assert_eq!(envelopes.len(), 3);
    assert_eq!(envelopes[0].body.html, None);
    assert_eq!(envelopes[0].display_name.as_deref(), Some("Example"));
}

#[tokio::test]
async fn test_batch_send_reports_recipients_together() {
    let app = TestApp::new(FakeRelay::default());

    let (status, body) = app
        .post(
            "/api/send-bulk-email",
            &json!({
                "smtp": smtp(),
                "recipients": ["a@x.com", "b@x.com"],
                "subject": "Hello",
                "html": "<p>Hi</p>",
                "sendMethod": "batch"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["results"][0]["recipients"], json!(["a@x.com", "b@x.com"]));
    assert_eq!(
        body["summary"],
        json!({ "total": 2, "successful": 2, "failed": 0 })
    );
}

#[tokio::test]
async fn test_bulk_send_validation_errors_are_400() {
    let app = TestApp::new(FakeRelay::default());

    let (status, body) = app
        .post(
            "/api/send-bulk-email",
            &json!({
                "smtp": smtp(),
                "recipients": ["a@x.com", "nope"],
                "subject": "Hello",
                "text": "Hi"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation error");
    assert!(body["details"].as_str().unwrap().starts_with("recipients[1]"));
    assert!(app.relay.envelopes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_json_is_a_validation_error() {
    let app = TestApp::new(FakeRelay::default());
    let response = app
        .send(
            Request::post("/api/send-email")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{ not json"))
                .unwrap(),
        )
        .await;
    let (status, body) = json(response).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Validation error");
}

#[tokio::test]
async fn test_send_email_returns_message_id() {
    let app = TestApp::new(FakeRelay::default());

    let (status, body) = app
        .post(
            "/api/send-email",
            &json!({
                "smtp": smtp(),
                "to": ["a@x.com"],
                "bcc": ["hidden@x.com"],
                "subject": "Report",
                "text": "Attached",
                "attachments": [
                    { "filename": "r.csv", "content": "YSxiCg==", "contentType": "text/csv" }
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Email sent successfully");
    assert_eq!(body["messageId"], "<a@x.com@fake>");

    let envelopes = app.relay.envelopes.lock().unwrap();
    assert_eq!(envelopes[0].bcc, vec!["hidden@x.com".to_string()]);
    assert_eq!(envelopes[0].attachments[0].data, b"a,b\n");
}

#[tokio::test]
async fn test_send_email_relay_failure_is_500() {
    let app = TestApp::new(FakeRelay {
        rejected: vec!["a@x.com".to_string()],
        ..FakeRelay::default()
    });

    let (status, body) = app
        .post(
            "/api/send-email",
            &json!({
                "smtp": smtp(),
                "to": ["a@x.com"],
                "subject": "Hi",
                "text": "Hi"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to send email");
}

#[tokio::test]
async fn test_endpoint_is_rate_limited() {
    let config = ApiConfig {
        verify_rate_limit: RateLimit {
            requests: 2,
            window_secs: 300,
        },
        ..ApiConfig::default()
    };
    let app = TestApp::with_config(FakeRelay::default(), &config);

    for _ in 0..2 {
        let (status, _) = app.post("/api/test-smtp", &smtp()).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app.post("/api/test-smtp", &smtp()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({ "success": false, "error": "test limited" }));

    // The send limiter is separate
    let (status, _) = app
        .post(
            "/api/send-email",
            &json!({ "smtp": smtp(), "to": ["a@x.com"], "subject": "s", "text": "t" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cors_allows_configured_origin() {
    let config = ApiConfig {
        allowed_origins: vec!["https://app.example.com".to_string()],
        ..ApiConfig::default()
    };
    let app = TestApp::with_config(FakeRelay::default(), &config);

    let response = app
        .send(
            Request::get("/health")
                .header(header::ORIGIN, "https://app.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://app.example.com"
    );
}

#[tokio::test]
async fn test_shutdown_cancels_bulk_sends() {
    let app = TestApp::new(FakeRelay::default());
    app.shutdown.cancel();

    let (status, body) = app
        .post(
            "/api/send-bulk-email",
            &json!({
                "smtp": smtp(),
                "recipients": ["a@x.com", "b@x.com"],
                "subject": "Hello",
                "text": "Hi"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);
    assert_eq!(body["summary"]["failed"], 2);
    assert!(app.relay.envelopes.lock().unwrap().is_empty());
}
