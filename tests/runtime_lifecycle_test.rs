use std::sync::Arc;
use uni_relay::api::{AdapterSpec, ProviderKind, Turn};
use uni_relay::config::{AdapterConfig, StaticKeyStore};
use uni_relay::error::RelayError;
use uni_relay::reliability::{CircuitBreakerConfig, DISCONNECT_FALLBACK};
use uni_relay::runtime::RelayRuntime;
use uni_relay::traits::{ChatRequest, ProviderTransport};
mod common;
use common::mock_support::{ScriptedTransport, Step, all_keys};

fn factory(
    transport: Arc<ScriptedTransport>,
) -> impl Fn(&AdapterConfig) -> uni_relay::error::Result<Arc<dyn ProviderTransport>>
+ Send
+ Sync
+ 'static {
    move |_| Ok(transport.clone() as Arc<dyn ProviderTransport>)
}

#[tokio::test]
async fn test_catalog_from_json_builds_every_alias() -> anyhow::Result<()> {
    let transport = Arc::new(ScriptedTransport::always(Step::text("ok")));
    let runtime = RelayRuntime::builder()
        .key_store(all_keys())
        .transport_factory(ProviderKind::Anthropic, factory(transport.clone()))
        .transport_factory(ProviderKind::Gemini, factory(transport.clone()))
        .catalog_from_str(
            r#"[
                {"alias": "chat/claude", "provider": "anthropic", "model": "claude-sonnet"},
                {"alias": "chat/gemini", "provider": "gemini", "model": "gemini-flash"}
            ]"#,
        )?
        .build()?;

    assert_eq!(runtime.aliases().await, vec!["chat/claude", "chat/gemini"]);
    let gemini = runtime.provider_adapter("chat/gemini").await?;
    assert_eq!(gemini.config().model, "gemini-flash");
    assert_eq!(
        gemini.config().base_url,
        "https://generativelanguage.googleapis.com/v1beta"
    );
    Ok(())
}

#[tokio::test]
async fn test_factory_receives_resolved_config() {
    let transport = Arc::new(ScriptedTransport::always(Step::text("ok")));
    let seen = Arc::new(std::sync::Mutex::new(None));
    let seen_in_factory = seen.clone();

    let mut spec = AdapterSpec::new("chat/custom", ProviderKind::Replicate, "meta/llama");
    spec.api_key_name = Some("MY_REPLICATE".into());
    spec.base_url = Some("https://proxy.internal/v1/".into());

    let _runtime = RelayRuntime::builder()
        .key_store(StaticKeyStore::new().with_key("MY_REPLICATE", "r8_secret"))
        .transport_factory(ProviderKind::Replicate, move |config: &AdapterConfig| {
            *seen_in_factory.lock().unwrap() = Some(config.clone());
            Ok(transport.clone() as Arc<dyn ProviderTransport>)
        })
        .catalog(vec![spec])
        .build()
        .unwrap();

    let config = seen.lock().unwrap().clone().unwrap();
    assert_eq!(config.api_key.as_deref(), Some("r8_secret"));
    assert_eq!(config.base_url, "https://proxy.internal/v1");
    assert!(!format!("{config:?}").contains("r8_secret"));
}

#[tokio::test]
async fn test_invalid_spec_fails_build() {
    let err = RelayRuntime::builder()
        .key_store(all_keys())
        .catalog(vec![AdapterSpec::new("no-slash", ProviderKind::OpenAi, "m")])
        .build()
        .err()
        .unwrap();
    assert!(matches!(err, RelayError::Config(_)));
}

#[tokio::test]
async fn test_unknown_alias_lookup() {
    let runtime = RelayRuntime::builder().build().unwrap();
    assert!(!runtime.contains_alias("chat/none").await);
    assert!(matches!(
        runtime.adapter("chat/none").await.err().unwrap(),
        RelayError::ProviderNotFound(_)
    ));
}

#[tokio::test]
async fn test_open_circuit_short_circuits_to_fallback() {
    let transport = Arc::new(ScriptedTransport::always(Step::Fail(RelayError::Unavailable)));
    let runtime = RelayRuntime::builder()
        .key_store(all_keys())
        .transport_factory(ProviderKind::Mistral, factory(transport.clone()))
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 2,
            open_wait_seconds: 60,
        })
        .catalog(vec![AdapterSpec::new("chat/m", ProviderKind::Mistral, "mistral-small")])
        .build()
        .unwrap();
    let adapter = runtime.adapter("chat/m").await.unwrap();

    for _ in 0..4 {
        let reply = adapter
            .send_request(ChatRequest::new(vec![Turn::user("hi")], ""))
            .await
            .unwrap();
        assert_eq!(reply, DISCONNECT_FALLBACK);
    }
    // Two failures opened the breaker; the rest never reached the transport.
    assert_eq!(transport.call_count(), 2);
}

fn breaker_runtime(transport: Arc<ScriptedTransport>, timeout_secs: Option<u64>) -> Arc<RelayRuntime> {
    let mut spec = AdapterSpec::new("chat/m", ProviderKind::Mistral, "mistral-small");
    spec.timeout = timeout_secs;
    RelayRuntime::builder()
        .key_store(all_keys())
        .transport_factory(ProviderKind::Mistral, factory(transport))
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 1,
            open_wait_seconds: 0,
        })
        .catalog(vec![spec])
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_timed_out_probe_then_backend_recovers() -> anyhow::Result<()> {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Fail(RelayError::ApiError("boom".into())),
        Step::Slow(std::time::Duration::from_secs(5), "late".into()),
        Step::text("ok"),
    ]));
    let runtime = breaker_runtime(transport.clone(), Some(1));
    let adapter = runtime.adapter("chat/m").await?;
    let ask = || adapter.send_request(ChatRequest::new(vec![Turn::user("hi")], ""));

    assert_eq!(ask().await?, DISCONNECT_FALLBACK);
    // Half-open probe hits the attempt timeout.
    assert_eq!(ask().await?, DISCONNECT_FALLBACK);
    assert_eq!(ask().await?, "ok");
    assert_eq!(ask().await?, "ok");
    assert_eq!(transport.call_count(), 4);
    Ok(())
}

#[tokio::test]
async fn test_cancelled_probe_does_not_wedge_breaker() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Step::Fail(RelayError::Unavailable),
        Step::Slow(std::time::Duration::from_secs(5), "late".into()),
        Step::text("ok"),
    ]));
    let runtime = breaker_runtime(transport.clone(), None);
    let adapter = runtime.adapter("chat/m").await.unwrap();

    let first = adapter
        .send_request(ChatRequest::new(vec![Turn::user("hi")], ""))
        .await
        .unwrap();
    assert_eq!(first, DISCONNECT_FALLBACK);

    let token = tokio_util::sync::CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let cancelled = adapter
        .send_request(ChatRequest::new(vec![Turn::user("hi")], "").with_cancellation(token))
        .await
        .unwrap();
    assert_eq!(cancelled, DISCONNECT_FALLBACK);

    let recovered = adapter
        .send_request(ChatRequest::new(vec![Turn::user("hi")], ""))
        .await
        .unwrap();
    assert_eq!(recovered, "ok");
    assert_eq!(transport.call_count(), 3);
}
