//! Startup ordering: launch, readiness, then serving.

use std::num::NonZeroU32;
use std::time::Duration;

use vllm_sidecar::{
    engine_args, EngineConfig, EngineEndpoint, Error, ExitReason, LifecycleError, ModelCategory,
    ProbeSettings, Sidecar, MULTIMODAL_FLAGS,
};

use crate::fixture::{fast_options, free_port, stand_in_engine, FakeEngine, RunningSidecar, NEVER};

const REQUEST: &str = r#"{"messages":[{"role":"user","content":"hello"}]}"#;
const RESPONSE: &str = r#"{"choices":[{"message":{"content":"hi"}}],"usage":{"total_tokens":5}}"#;

/// Text config, engine healthy on the third poll, literal relay both ways.
#[tokio::test]
async fn test_end_to_end_text_relay() {
    let config = EngineConfig {
        category: ModelCategory::Text,
        max_model_len: NonZeroU32::new(4096).unwrap(),
        ..Default::default()
    };
    let args = engine_args(&config, &EngineEndpoint::default());
    assert!(MULTIMODAL_FLAGS
        .iter()
        .all(|flag| !args.iter().any(|a| a == flag)));

    let engine = FakeEngine::start(3).await;
    let sidecar = RunningSidecar::start(stand_in_engine(), fast_options(engine.endpoint())).await;
    assert_eq!(engine.health_calls(), 3, "ready on the third health check");

    let resp = reqwest::Client::new()
        .post(sidecar.url("/invocations"))
        .header("content-type", "application/json")
        .body(REQUEST)
        .send()
        .await
        .expect("invocation failed");

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), RESPONSE);
    assert_eq!(engine.last_body().unwrap(), REQUEST.as_bytes());

    assert_eq!(sidecar.stop().await, ExitReason::Requested);
}

/// Nothing listens, and nothing reaches the engine, until health answers 200.
#[tokio::test]
async fn test_no_invocation_reaches_engine_before_ready() {
    let engine = FakeEngine::start(NEVER).await;
    let port = free_port();
    let addr = format!("127.0.0.1:{}", port).parse().unwrap();
    let options = fast_options(engine.endpoint());

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let run = tokio::spawn(async move {
        vllm_sidecar::run(&stand_in_engine(), options, addr, async move {
            let _ = stop_rx.await;
        })
        .await
    });

    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/invocations", port);

    for _ in 0..5 {
        let attempt = client.post(&url).body(REQUEST).send().await;
        assert!(attempt.is_err(), "sidecar accepted traffic before the engine was ready");
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert!(engine.health_calls() > 0);
    assert_eq!(engine.completion_calls(), 0);

    engine.make_healthy();

    let mut relayed = false;
    for _ in 0..100 {
        if let Ok(resp) = client.post(&url).body(REQUEST).send().await {
            assert_eq!(resp.status(), 200);
            relayed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(relayed, "sidecar never started serving");
    assert_eq!(engine.early_completions(), 0);
    assert_eq!(engine.completion_calls(), 1);

    stop_tx.send(()).unwrap();
    let reason = run.await.unwrap().unwrap();
    assert_eq!(reason, ExitReason::Requested);
}

/// An engine that never becomes healthy fails startup after exactly the
/// attempt budget, and no listener is ever opened.
#[tokio::test]
async fn test_startup_fails_when_engine_never_ready() {
    let engine = FakeEngine::start(NEVER).await;
    let mut options = fast_options(engine.endpoint());
    options.probe = ProbeSettings {
        interval: Duration::from_millis(20),
        max_attempts: 5,
        attempt_timeout: Duration::from_millis(500),
    };

    let result = Sidecar::start(&stand_in_engine(), options).await;
    match result {
        Err(Error::Lifecycle(LifecycleError::ReadinessTimeout(window))) => {
            assert_eq!(window, Duration::from_millis(100));
        }
        Err(e) => panic!("expected a readiness timeout, got {}", e),
        Ok(_) => panic!("sidecar started without a healthy engine"),
    }

    assert_eq!(engine.health_calls(), 5);
    assert_eq!(engine.completion_calls(), 0);
}

/// A missing engine executable fails startup without probing.
#[tokio::test]
async fn test_missing_engine_binary_fails_startup() {
    let engine = FakeEngine::start(0).await;
    let command = vllm_sidecar::EngineCommand::new("/nonexistent/vllm");

    let result = Sidecar::start(&command, fast_options(engine.endpoint())).await;
    assert!(matches!(
        result,
        Err(Error::Lifecycle(LifecycleError::SpawnFailed { .. }))
    ));
    assert_eq!(engine.health_calls(), 0);
}
