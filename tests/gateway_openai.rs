mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clipsolve::gateway::{
    Attribution, CompletionInvoker, CompletionRequest, CompletionService, ImageInput,
    InvokeOptions, Message, OpenAiResponsesAdapter, ProviderError, ResponseStatus,
};
use common::RecordingTelemetry;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> OpenAiResponsesAdapter {
    OpenAiResponsesAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn responses_adapter_reads_output_text_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o", "temperature": 0.0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "output": [{
                "type": "message",
                "content": [
                    { "type": "output_text", "text": "FINAL ANSWER:\n" },
                    { "type": "output_text", "text": "x = 2" }
                ]
            }],
            "usage": { "input_tokens": 12, "output_tokens": 7 }
        })))
        .mount(&server)
        .await;

    let req = CompletionRequest::new(
        "gpt-4o",
        vec![Message::system("solve"), Message::user_text("2x = 4")],
        Attribution::new("test"),
    )
    .temperature(0.0);

    let resp = adapter(&server).complete(&req).await.unwrap();
    assert_eq!(resp.content, "FINAL ANSWER:\nx = 2");
    assert_eq!(resp.input_tokens, Some(12));
    assert_eq!(resp.output_tokens, Some(7));
    assert_eq!(resp.status, ResponseStatus::Completed);
}

#[tokio::test]
async fn images_are_sent_as_data_urls_in_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_partial_json(json!({
            "input": [{
                "role": "user",
                "content": [
                    { "type": "input_text", "text": "look" },
                    { "type": "input_image", "image_url": "data:image/png;base64,AQID" }
                ]
            }]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "output_text": "VISUAL" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let req = CompletionRequest::new(
        "gpt-4o",
        vec![Message::user(vec![
            clipsolve::gateway::ContentPart::text("look"),
            clipsolve::gateway::ContentPart::Image(ImageInput::png(vec![1, 2, 3])),
        ])],
        Attribution::new("test"),
    );

    let resp = adapter(&server).complete(&req).await.unwrap();
    assert_eq!(resp.content, "VISUAL");
}

#[tokio::test]
async fn status_codes_map_to_error_kinds() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_partial_json(json!({ "model": "limited" })))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "3")
                .set_body_json(json!({ "error": { "message": "slow down" } })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_partial_json(json!({ "model": "broken" })))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(body_partial_json(json!({ "model": "bad" })))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({
                "error": { "message": "no such model", "code": "model_not_found" }
            })),
        )
        .mount(&server)
        .await;

    let adapter = adapter(&server);
    let call = |model: &'static str| {
        let adapter = adapter.clone();
        async move {
            let req = CompletionRequest::new(model, vec![Message::user_text("hi")], Attribution::new("test"));
            adapter.complete(&req).await.unwrap_err()
        }
    };

    match call("limited").await {
        ProviderError::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, Duration::from_secs(3))
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    let err = call("broken").await;
    assert_eq!(err.code(), "provider_error");
    assert!(err.is_retryable());

    let err = call("bad").await;
    assert_eq!(err.code(), "invalid_request");
    assert!(!err.is_retryable());
    assert_eq!(
        err.context().and_then(|c| c.provider_code.as_deref()),
        Some("model_not_found")
    );
}

struct TemperatureGate {
    calls: Arc<AtomicUsize>,
}

impl Respond for TemperatureGate {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        if body.get("temperature").is_some() {
            ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "Unsupported parameter: 'temperature' is not supported with this model.",
                    "code": "unsupported_parameter",
                    "param": "temperature"
                }
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({ "output_text": "ok" }))
        }
    }
}

#[tokio::test]
async fn invoker_retries_once_without_rejected_temperature() {
    let server = MockServer::start().await;
    let calls = Arc::new(AtomicUsize::new(0));

    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(TemperatureGate {
            calls: calls.clone(),
        })
        .mount(&server)
        .await;

    let telemetry = RecordingTelemetry::new();
    let invoker = CompletionInvoker::new(Arc::new(adapter(&server)), telemetry.clone());

    // A standard-family model still sends temperature; the service rejects it.
    let resp = invoker
        .invoke(
            "gpt-4o-custom",
            vec![Message::user_text("hi")],
            InvokeOptions::new(Duration::from_secs(5), 50).temperature(0.2),
            Attribution::new("test"),
        )
        .await
        .unwrap();

    assert_eq!(resp.content, "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let attempts: Vec<_> = telemetry
        .events()
        .into_iter()
        .filter(|e| e.event == "completion_call")
        .collect();
    assert!(attempts.iter().any(|e| {
        e.get("attempt") == Some(&json!(2)) && e.get("temperature_sent") == Some(&json!(false))
    }));
}

#[tokio::test]
async fn reasoning_family_is_shaped_without_temperature() {
    let req = CompletionInvoker::shape(
        "gpt-5.2",
        vec![Message::user_text("hi")],
        InvokeOptions::new(Duration::from_secs(5), 16).temperature(0.0),
        Attribution::new("test"),
    );
    assert_eq!(req.temperature, None);
    assert_eq!(req.max_output_tokens, 128);
    assert_eq!(req.reasoning_effort, Some("low"));

    let req = CompletionInvoker::shape(
        "gpt-4o",
        vec![Message::user_text("hi")],
        InvokeOptions::new(Duration::from_secs(5), 16).temperature(0.0),
        Attribution::new("test"),
    );
    assert_eq!(req.temperature, Some(0.0));
    assert_eq!(req.reasoning_effort, None);
}
