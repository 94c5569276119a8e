#[cfg(test)]
mod tests {
    use crate::api::test_util::test_app;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send_json(
        app: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _dir) = test_app();
        let (status, body) = send_json(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["service"], json!("motion-productions"));

        let (status, _) = send_json(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let (app, _dir) = test_app();

        // Create
        let (status, job) = send_json(
            &app,
            "POST",
            "/jobs",
            Some(json!({ "prompt": "Sunset over the ocean", "duration_seconds": 6 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(job["status"], json!("pending"));
        let id = job["id"].as_str().unwrap().to_string();

        // Empty upload is rejected
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/jobs/{id}/upload"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Raw upload completes the job
        let video = b"fake video bytes".to_vec();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/jobs/{id}/upload"))
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .body(Body::from(video.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Second upload is rejected
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/jobs/{id}/upload"))
                    .header(header::CONTENT_TYPE, "application/octet-stream")
                    .body(Body::from(video.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Completed job resolves a download URL
        let (status, body) = send_json(&app, "GET", &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("completed"));
        assert_eq!(body["download_url"], json!(format!("/jobs/{id}/download")));

        // Download returns the exact bytes with a matching length header
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/jobs/{id}/download"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let length: usize = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.as_ref(), video.as_slice());
        assert_eq!(length, video.len());
    }

    #[tokio::test]
    async fn test_job_validation() {
        let (app, _dir) = test_app();

        let (status, _) = send_json(&app, "POST", "/jobs", Some(json!({ "prompt": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send_json(
            &app,
            "POST",
            "/jobs",
            Some(json!({ "prompt": "x", "workflow_type": "renegade" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("workflow_type"));

        let (status, _) = send_json(&app, "GET", "/jobs/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pending_queue_ordering() {
        let (app, _dir) = test_app();
        for prompt in ["first", "second"] {
            let (status, _) =
                send_json(&app, "POST", "/jobs", Some(json!({ "prompt": prompt }))).await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, body) = send_json(&app, "GET", "/jobs?status=pending", None).await;
        assert_eq!(status, StatusCode::OK);
        let prompts: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["prompt"].as_str().unwrap())
            .collect();
        assert_eq!(prompts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_feedback_upsert() {
        let (app, _dir) = test_app();
        let (_, job) = send_json(
            &app,
            "POST",
            "/jobs",
            Some(json!({ "prompt": "drifting clouds" })),
        )
        .await;
        let id = job["id"].as_str().unwrap().to_string();

        let (status, _) = send_json(
            &app,
            "POST",
            &format!("/jobs/{id}/feedback"),
            Some(json!({ "rating": 3 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        for rating in [1, 2] {
            let (status, body) = send_json(
                &app,
                "POST",
                &format!("/jobs/{id}/feedback"),
                Some(json!({ "rating": rating })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["rating"], json!(rating));
        }

        // Feedback also shows up as an event.
        let (status, events) = send_json(&app, "GET", "/events?type=feedback", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(events.as_array().unwrap().len(), 2);
    }
}
