//! End-to-end coverage of the concrete scenarios (spec.md §8): routing with
//! parameters, channel ACL denial → allow after `addParticipant`, one-shot
//! timeout, and pooled-send reuse. Build rollback and topological ordering
//! are covered directly against `mycelia-build::BuildGraph`.

use mycelia_core::config::{MatchPolicy, MessageSystemConfig, OverflowPolicy, SubsystemConfig};
use mycelia_rpc::RegisterChannelOpts;
use mycelia_test::{MessageAssertions, TestSystem};

fn queue_config() -> SubsystemConfig {
    SubsystemConfig {
        queue_capacity: 64,
        overflow_policy: OverflowPolicy::Reject,
        time_slice_ms: None,
    }
}

/// Scenario 1: routing with parameters.
#[tokio::test]
async fn routing_with_parameters_returns_captured_param() {
    let system = TestSystem::bootstrap();
    let api = system.register_subsystem("api", queue_config()).await.unwrap();
    let api_for_handler = api.clone();
    api.register_route(
        "api://users/{id}",
        std::sync::Arc::new(move |msg, params, _opts| {
            let api = api_for_handler.clone();
            Box::pin(async move {
                let body = serde_json::json!({ "user": { "id": params.get("id") } });
                api.responses().unwrap().send_success(&msg, body.clone()).await?;
                Ok(body)
            })
        }),
    )
    .unwrap();

    let request = api
        .requests()
        .unwrap()
        .one_shot()
        .timeout_ms(500)
        .send(mycelia_core::message::Message::new("api://users/42", serde_json::json!({})));
    tokio::pin!(request);

    let response = loop {
        tokio::select! {
            response = &mut request => break response.unwrap(),
            _ = system.tick() => {}
        }
    };

    assert!(!response.meta.fixed.is_error, "expected a success response, got: {:?}", response.body);
    assert_eq!(response.body, serde_json::json!({ "user": { "id": "42" } }));
}

/// Scenario 2: channel ACL denial, then allow after `addParticipant`.
#[tokio::test]
async fn channel_acl_denies_then_allows_after_add_participant() {
    let system = TestSystem::bootstrap();
    system.register_subsystem("data", queue_config()).await.unwrap();

    let pkr_a = system
        .kernel()
        .principal_registry()
        .create_principal(mycelia_core::security::PrincipalKind::TopLevel, mycelia_core::security::CreatePrincipalOpts::default())
        .unwrap();
    let pkr_b = system
        .kernel()
        .principal_registry()
        .create_principal(mycelia_core::security::PrincipalKind::TopLevel, mycelia_core::security::CreatePrincipalOpts::default())
        .unwrap();

    system
        .kernel()
        .register_channel("data://channel/replies", pkr_a, RegisterChannelOpts::default())
        .unwrap();

    let msg = mycelia_core::message::Message::new("data://channel/replies", serde_json::Value::Null);
    let caller = system.kernel().kernel_pkr_owned();
    let denied = system
        .kernel()
        .send_protected(pkr_b.clone(), msg, mycelia_core::security::SendOptions::default())
        .await;
    assert!(matches!(denied, Err(mycelia_core::error::MyceliaError::AccessDenied { .. })));
    let _ = caller;

    system.kernel().channel_manager().add_participant("data://channel/replies", pkr_b.public_key.clone());
    let msg = mycelia_core::message::Message::new("data://channel/replies", serde_json::Value::Null);
    system
        .kernel()
        .send_protected(pkr_b, msg, mycelia_core::security::SendOptions::default())
        .await
        .unwrap();
}

/// Scenario 3: one-shot timeout.
#[tokio::test]
async fn one_shot_timeout_resolves_with_error_kind_and_timeout_ms() {
    let system = TestSystem::bootstrap();
    let responder = system.register_subsystem("responder", queue_config()).await.unwrap();

    let response = responder
        .requests()
        .unwrap()
        .one_shot()
        .timeout_ms(50)
        .send(mycelia_core::message::Message::new("responder://slow", serde_json::Value::Null))
        .await
        .unwrap();

    response.clone().assert_error_kind("timeout");
    assert_eq!(response.body["error"]["timeoutMs"], serde_json::json!(50));
}

/// Scenario 4: pooled send reuse rate.
#[tokio::test]
async fn pooled_sends_reuse_the_warmed_pool() {
    let config = MessageSystemConfig {
        pool_size: 100,
        warmup_on_boot: false,
        debug: false,
        time_slice_ms: 5,
        default_queue_capacity: 2_000,
        response_default_timeout_ms: 1_000,
        response_max_pending: 100,
        match_policy: MatchPolicy::Longest,
    };
    let system = TestSystem::bootstrap_with(config);
    let sub = system
        .register_subsystem(
            "sink",
            SubsystemConfig {
                queue_capacity: 2_000,
                overflow_policy: OverflowPolicy::DropOldest,
                time_slice_ms: None,
            },
        )
        .await
        .unwrap();
    sub.register_route(
        "sink://event",
        std::sync::Arc::new(|_msg, _params, _opts| Box::pin(async move { Ok(serde_json::Value::Null) })),
    )
    .unwrap();

    system.kernel().warmup_pool(100).await;
    for _ in 0..10_000 {
        system.send_pooled("sink://event", serde_json::Value::Null).await.unwrap();
        system.tick().await;
    }

    let stats = system.kernel().pool_stats().await;
    assert!(stats.reuse_rate() > 0.99, "reuse rate was {}", stats.reuse_rate());
}
