//! Command Channel Tests
//!
//! Per-call reply channels, concurrent callers, worker-side errors and the
//! push port.
//!
use cia_agent::prelude::*;
use cia_test_utils::{overlapping_rules, TestAgent};
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;

#[tokio::test]
async fn test_rule_count_after_install() {
    let agent = TestAgent::started().await;

    let installed = agent
        .client
        .task_set_intervention_rules(overlapping_rules())
        .await
        .unwrap();
    let state = agent.client.query_get_agent_state().await.unwrap();

    assert_eq!(installed, 2);
    assert_eq!(state.rule_count, 2);
    assert!(!state.chaos_mode);
}

#[tokio::test]
async fn test_concurrent_pings_are_correctly_paired() {
    let agent = TestAgent::started().await;

    let calls = (0..64u64).map(|nonce| {
        let client = agent.client.clone();
        async move { (nonce, client.ping(nonce).await) }
    });
    let results = join_all(calls).await;

    for (nonce, result) in results {
        assert_eq!(result.unwrap().nonce, nonce);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_do_not_cross_talk() {
    let agent = TestAgent::started().await;

    let mut handles = Vec::new();
    for caller in 0..8u64 {
        let client = agent.second_client();
        handles.push(tokio::spawn(async move {
            for i in 0..25u64 {
                let nonce = caller * 1_000 + i;
                let pong = client.ping(nonce).await.unwrap();
                assert_eq!(pong.nonce, nonce);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_back_to_back_state_queries() {
    let agent = TestAgent::started().await;
    agent
        .client
        .task_set_intervention_rules(vec![cia_test_utils::users_500_rule()])
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        agent.client.query_get_agent_state(),
        agent.client.query_get_agent_state()
    );

    assert_eq!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn test_invalid_rules_return_error_and_keep_previous() {
    let agent = TestAgent::started().await;
    agent
        .client
        .task_set_intervention_rules(overlapping_rules())
        .await
        .unwrap();

    let err = agent
        .client
        .task_set_intervention_rules(vec![InterventionRule::set_status("re:[", 500)])
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Command(_)));
    let state = agent.client.query_get_agent_state().await.unwrap();
    assert_eq!(state.rule_count, 2);
    assert!(agent
        .telemetry
        .errors()
        .iter()
        .any(|(ctx, _)| ctx == "SET_INTERVENTION_RULES"));
}

#[tokio::test]
async fn test_error_for_one_caller_does_not_affect_another() {
    let agent = TestAgent::started().await;
    let other = agent.second_client();

    let bad = agent
        .client
        .task_enable_chaos_mode(true, ChaosOptions::new().with_intensity(2.0));
    let good = other.ping(9);
    let (bad, good) = tokio::join!(bad, good);

    assert!(matches!(bad, Err(AgentError::Command(_))));
    assert_eq!(good.unwrap().nonce, 9);
}

#[tokio::test]
async fn test_raw_commands() {
    let agent = TestAgent::started().await;

    let state = agent
        .client
        .send_command(json!({"type": "GET_AGENT_STATE"}))
        .await
        .unwrap();
    assert_eq!(
        state,
        json!({"chaosMode": false, "ruleCount": 0, "precognitionCacheSize": 0})
    );

    let err = agent
        .client
        .send_command(json!({"type": "REBOOT_UNIVERSE"}))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Command(ref m) if m.contains("malformed")));
}

#[tokio::test]
async fn test_chaos_toggle_reports_config() {
    let agent = TestAgent::started().await;

    let config = agent
        .client
        .task_enable_chaos_mode(
            true,
            ChaosOptions::new()
                .with_intensity(0.4)
                .with_target(ChaosTarget::Assets),
        )
        .await
        .unwrap();

    assert!(config.enabled);
    assert_eq!(config.target, ChaosTarget::Assets);
    assert!(agent.client.query_get_agent_state().await.unwrap().chaos_mode);

    let config = agent
        .client
        .task_enable_chaos_mode(false, ChaosOptions::new())
        .await
        .unwrap();
    assert!(!config.enabled);
}

#[tokio::test]
async fn test_events_reach_every_attached_caller() {
    let agent = TestAgent::started().await;
    let other = agent.second_client();
    other.ping(1).await.unwrap();
    agent
        .client
        .task_set_intervention_rules(vec![cia_test_utils::users_500_rule()])
        .await
        .unwrap();

    agent
        .client
        .fetch(NetworkRequest::get("/api/users"))
        .await
        .unwrap();

    assert_eq!(
        agent.client.try_next_event().map(|e| e.name()),
        Some("RULE_INTERVENTION")
    );
    assert_eq!(
        other.try_next_event().map(|e| e.name()),
        Some("RULE_INTERVENTION")
    );
}

#[tokio::test]
async fn test_caller_without_port_gets_no_events() {
    let agent = TestAgent::started().await;
    let silent = agent.second_client();
    agent
        .client
        .task_set_intervention_rules(vec![cia_test_utils::users_500_rule()])
        .await
        .unwrap();

    silent.fetch(NetworkRequest::get("/api/users")).await.unwrap();

    assert!(silent.try_next_event().is_none());
    assert!(agent.client.try_next_event().is_some());
}

#[tokio::test]
async fn test_intervention_logged_once_regardless_of_ports() {
    let agent = TestAgent::started().await;
    let other = agent.second_client();
    other.ping(1).await.unwrap();
    agent
        .client
        .task_set_intervention_rules(vec![cia_test_utils::users_500_rule()])
        .await
        .unwrap();

    agent
        .client
        .fetch(NetworkRequest::get("/api/users"))
        .await
        .unwrap();

    assert_eq!(agent.telemetry.event_names(), vec!["RULE_INTERVENTION".to_string()]);

    assert!(agent.client.try_next_event().is_some());
    assert!(other.try_next_event().is_some());
    assert_eq!(agent.telemetry.event_names().len(), 1);
}

#[tokio::test]
async fn test_undrained_port_holds_at_most_capacity() {
    let agent = TestAgent::new(
        AgentConfig::default()
            .with_chaos_seed(7)
            .with_event_port_capacity(8),
    );
    agent.client.start().await.unwrap();
    agent
        .client
        .task_set_intervention_rules(vec![cia_test_utils::users_500_rule()])
        .await
        .unwrap();

    for _ in 0..20 {
        agent
            .client
            .fetch(NetworkRequest::get("/api/users"))
            .await
            .unwrap();
    }

    let mut queued = 0;
    while agent.client.try_next_event().is_some() {
        queued += 1;
    }
    assert_eq!(queued, 8);
    assert_eq!(agent.telemetry.event_names().len(), 20);

    // A full port stays attached once drained.
    agent
        .client
        .fetch(NetworkRequest::get("/api/users"))
        .await
        .unwrap();
    assert!(agent.client.try_next_event().is_some());
}
