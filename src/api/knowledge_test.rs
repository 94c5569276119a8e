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
    async fn test_discoveries_cap_trips_at_fourteen() {
        let (app, _dir) = test_app();

        let items: Vec<Value> = (0..20)
            .map(|i| json!({ "key": format!("{i},{i},{i}") }))
            .collect();
        let (status, body) = send_json(
            &app,
            "POST",
            "/knowledge/discoveries",
            Some(json!({ "static_colors": items })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["truncated"], json!(true));
        assert_eq!(body["results"]["static_colors"], json!(14));
    }

    #[tokio::test]
    async fn test_discoveries_rejects_unknown_aspect() {
        let (app, _dir) = test_app();
        let (status, body) = send_json(
            &app,
            "POST",
            "/knowledge/discoveries",
            Some(json!({ "narrative": { "vibes": [{ "key": "wavy" }] } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("vibes"));
    }

    #[tokio::test]
    async fn test_registries_normalizes_color_keys() {
        let (app, _dir) = test_app();

        let (status, _) = send_json(
            &app,
            "POST",
            "/knowledge/discoveries",
            Some(json!({ "static_colors": [{ "key": "100,125,150_1.0" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send_json(&app, "GET", "/registries", None).await;
        assert_eq!(status, StatusCode::OK);
        let colors = body["static"]["colors"].as_array().unwrap();
        let entry = colors
            .iter()
            .find(|c| c["key"] == json!("100,125,150"))
            .expect("normalized key present");
        assert_eq!(entry["opacity_pct"], json!(100));
        assert_eq!(entry["count"], json!(1));
        // Luminance model: L = 375/765, black wins at 51.
        assert_eq!(entry["depth_pct"], json!(51.0));
    }

    #[tokio::test]
    async fn test_registries_includes_origins_with_zero_count() {
        let (app, _dir) = test_app();
        let (status, body) = send_json(&app, "GET", "/registries", None).await;
        assert_eq!(status, StatusCode::OK);

        let colors = body["static"]["colors"].as_array().unwrap();
        assert_eq!(colors.len(), 16);
        assert!(colors.iter().all(|c| c["count"] == json!(0)));

        let gradients = body["dynamic"]["gradient"].as_array().unwrap();
        assert!(gradients.iter().any(|g| g["key"] == json!("radial")));
        let motion = body["dynamic"]["motion"].as_array().unwrap();
        assert!(motion.iter().any(|m| m["key"] == json!("drift")));
    }

    #[tokio::test]
    async fn test_narrative_low_count_uses_value() {
        let (app, _dir) = test_app();

        let ingest = json!({
            "narrative": { "genre": [{ "key": "noir", "value": "noir", "name": "midnightveil" }] }
        });
        let (status, _) =
            send_json(&app, "POST", "/knowledge/discoveries", Some(ingest.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, body) = send_json(&app, "GET", "/registries", None).await;
        let genre = body["narrative"]["genre"].as_array().unwrap();
        let entry = genre.iter().find(|e| e["key"] == json!("noir")).unwrap();
        // count < 5: the raw value is the display name.
        assert_eq!(entry["name"], json!("noir"));

        for _ in 0..4 {
            send_json(&app, "POST", "/knowledge/discoveries", Some(ingest.clone())).await;
        }
        let (_, body) = send_json(&app, "GET", "/registries", None).await;
        let genre = body["narrative"]["genre"].as_array().unwrap();
        let entry = genre.iter().find(|e| e["key"] == json!("noir")).unwrap();
        assert_eq!(entry["count"], json!(5));
        assert_eq!(entry["name"], json!("midnightveil"));
    }

    #[tokio::test]
    async fn test_for_creation_shape() {
        let (app, _dir) = test_app();
        let (status, body) = send_json(&app, "GET", "/knowledge/for-creation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["learned_colors"].is_object());
        assert!(body["learned_motion"].is_array());
        assert_eq!(
            body["origin_gradient"].as_array().unwrap().len(),
            crate::services::origins::GRADIENT_TYPES.len()
        );
        assert!(body["interpretation_prompts"].is_array());
    }

    #[tokio::test]
    async fn test_interpretations_gibberish_gate() {
        let (app, _dir) = test_app();

        let (status, _) = send_json(
            &app,
            "POST",
            "/interpretations",
            Some(json!({ "prompt": "glow of dsc_ab12", "source": "worker" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // The loop source bypasses the detector.
        let (status, _) = send_json(
            &app,
            "POST",
            "/interpretations",
            Some(json!({ "prompt": "glow of dsc_ab12", "source": "loop" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        // Batch items are dropped silently.
        let (status, body) = send_json(
            &app,
            "POST",
            "/interpretations/batch",
            Some(json!({ "items": [
                { "prompt": "amber tide at dusk" },
                { "prompt": "Novel00042 field" },
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["inserted"], json!(1));
        assert_eq!(body["skipped"], json!(1));
    }

    #[tokio::test]
    async fn test_interpret_queue_web_first() {
        let (app, _dir) = test_app();

        send_json(
            &app,
            "POST",
            "/interpret/queue",
            Some(json!({ "prompt": "from a worker", "source": "worker" })),
        )
        .await;
        send_json(
            &app,
            "POST",
            "/interpret/queue",
            Some(json!({ "prompt": "from the web", "source": "web" })),
        )
        .await;

        let (status, body) = send_json(&app, "GET", "/interpret/queue", None).await;
        assert_eq!(status, StatusCode::OK);
        let queue = body.as_array().unwrap();
        assert_eq!(queue[0]["prompt"], json!("from the web"));
        assert_eq!(queue[1]["prompt"], json!("from a worker"));

        // Resolving one removes it from the queue.
        let id = queue[0]["id"].as_str().unwrap().to_string();
        let (status, resolved) = send_json(
            &app,
            "PATCH",
            &format!("/interpret/{id}"),
            Some(json!({ "instruction": { "palette": ["amber"] } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["status"], json!("done"));

        let (_, body) = send_json(&app, "GET", "/interpret/queue", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }
}
