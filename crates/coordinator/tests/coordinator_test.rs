use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use orchestrator_core::{
    config::CoordinatorConfig, AgentState, AgentType, MessageType, OrchestratorResult, Recipient,
    RoutingRule,
};
use orchestrator_coordinator::{
    AgentCoordinator, CoordinatorEvent, CoordinatorEventType, MessageOptions, StepResult,
    WorkflowStatus, WorkflowStep,
};
use serde_json::{json, Map};
use tokio::sync::broadcast;

async fn ready_agent(coordinator: &AgentCoordinator, agent_type: AgentType) -> String {
    let id = coordinator.register_agent(agent_type, vec![]).await;
    coordinator.heartbeat(&id).await.unwrap();
    id
}

async fn record_events(coordinator: &AgentCoordinator) -> Arc<Mutex<Vec<CoordinatorEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for event_type in [
        CoordinatorEventType::AgentUnhealthy,
        CoordinatorEventType::TaskAssigned,
        CoordinatorEventType::WorkflowCompleted,
        CoordinatorEventType::WorkflowFailed,
    ] {
        let sink = Arc::clone(&seen);
        coordinator
            .on_event(
                event_type,
                Arc::new(move |event: &CoordinatorEvent| -> OrchestratorResult<()> {
                    sink.lock().unwrap().push(event.clone());
                    Ok(())
                }),
            )
            .await;
    }
    seen
}

#[tokio::test]
async fn test_registration_and_heartbeat_lifecycle() {
    let coordinator = AgentCoordinator::new(None);
    let id = coordinator
        .register_agent(AgentType::Frontend, vec!["flutter".to_string()])
        .await;
    assert!(id.starts_with("frontend-"));
    assert_eq!(
        coordinator.get_agent_info(&id).await.unwrap().state,
        AgentState::Starting
    );

    coordinator.heartbeat(&id).await.unwrap();
    let info = coordinator.get_agent_info(&id).await.unwrap();
    assert_eq!(info.state, AgentState::Ready);
    assert!(info.last_heartbeat.is_some());

    assert!(coordinator.heartbeat("ghost").await.is_err());
    assert!(coordinator.unregister_agent(&id).await);
    assert!(!coordinator.unregister_agent(&id).await);
    assert!(coordinator.get_agent_info(&id).await.is_none());
}

#[tokio::test]
async fn test_direct_message_sorted_by_priority() {
    let coordinator = AgentCoordinator::new(None);
    let agent = ready_agent(&coordinator, AgentType::Qa).await;
    let to = Recipient::Agent(agent.clone());

    for (text, priority) in [("low", 1), ("high", 9), ("mid", 5)] {
        coordinator
            .send_message(
                "pm",
                &to,
                MessageType::Notification,
                json!({"text": text}),
                MessageOptions::with_priority(priority),
            )
            .await;
    }

    let messages = coordinator.get_messages(&agent, 2, None).await;
    let texts: Vec<_> = messages.iter().map(|m| m.content["text"].clone()).collect();
    assert_eq!(texts, vec![json!("high"), json!("mid")]);
    assert_eq!(coordinator.mailbox_len(&agent).await, 1);
}

#[tokio::test]
async fn test_type_fan_out_and_broadcast_exclude_sender() {
    let coordinator = AgentCoordinator::new(None);
    let qa1 = ready_agent(&coordinator, AgentType::Qa).await;
    let qa2 = ready_agent(&coordinator, AgentType::Qa).await;
    let backend = ready_agent(&coordinator, AgentType::Backend).await;

    let message_id = coordinator
        .send_message(
            &qa1,
            &Recipient::AgentType(AgentType::Qa),
            MessageType::Event,
            json!({}),
            MessageOptions::default(),
        )
        .await;
    assert_eq!(coordinator.mailbox_len(&qa1).await, 0);
    let received = coordinator.get_messages(&qa2, 10, None).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].message_id, format!("{message_id}-{qa2}"));
    assert_eq!(coordinator.mailbox_len(&backend).await, 0);

    coordinator
        .send_message(
            &backend,
            &Recipient::Broadcast,
            MessageType::Notification,
            json!({}),
            MessageOptions::default(),
        )
        .await;
    assert_eq!(coordinator.mailbox_len(&qa1).await, 1);
    assert_eq!(coordinator.mailbox_len(&qa2).await, 1);
    assert_eq!(coordinator.mailbox_len(&backend).await, 0);
}

#[tokio::test]
async fn test_request_response_round_trip() {
    let coordinator = Arc::new(AgentCoordinator::new(None));
    let responder = ready_agent(&coordinator, AgentType::Database).await;

    let answering = Arc::clone(&coordinator);
    let responder_id = responder.clone();
    tokio::spawn(async move {
        loop {
            let requests = answering
                .get_messages(&responder_id, 1, Some(MessageType::Request))
                .await;
            if let Some(request) = requests.first() {
                let correlation = request.correlation_id.clone().unwrap();
                assert!(answering.send_response(&correlation, json!({"rows": 42})).await);
                // 同一个关联ID只接受一次响应
                assert!(!answering.send_response(&correlation, json!({"rows": 0})).await);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let response = coordinator
        .request_response(
            "backend-1",
            &Recipient::Agent(responder),
            json!({"query": "count"}),
            Some(Duration::from_secs(2)),
        )
        .await;
    assert_eq!(response, Some(json!({"rows": 42})));
    assert_eq!(coordinator.get_coordination_stats().await.pending_responses, 0);
}

#[tokio::test]
async fn test_request_response_times_out() {
    let coordinator = AgentCoordinator::new(None);
    let silent = ready_agent(&coordinator, AgentType::Security).await;

    let response = coordinator
        .request_response(
            "pm",
            &Recipient::Agent(silent),
            json!({}),
            Some(Duration::from_millis(20)),
        )
        .await;
    assert!(response.is_none());
    assert_eq!(coordinator.get_coordination_stats().await.pending_responses, 0);
}

#[tokio::test]
async fn test_dropped_request_is_forgotten() {
    let coordinator = AgentCoordinator::new(None);
    let responder = ready_agent(&coordinator, AgentType::Database).await;

    let pending = coordinator
        .send_request("backend-1", &Recipient::Agent(responder), json!({"query": "count"}))
        .await;
    let correlation = pending.correlation_id.clone();
    assert_eq!(coordinator.get_coordination_stats().await.pending_responses, 1);

    drop(pending);
    assert_eq!(coordinator.get_coordination_stats().await.pending_responses, 0);
    assert!(!coordinator.send_response(&correlation, json!({"rows": 1})).await);
}

#[tokio::test]
async fn test_assign_prefers_ready_agent_with_fewest_tasks() {
    let coordinator = AgentCoordinator::new(None);
    let busy_veteran = ready_agent(&coordinator, AgentType::Database).await;
    let fresh = ready_agent(&coordinator, AgentType::Database).await;

    // 第一个Agent已完成过一个任务
    coordinator
        .assign_task("warmup", "create_schema", json!({}), Some(&busy_veteran))
        .await;
    coordinator
        .complete_task(&busy_veteran, "warmup", None, true)
        .await
        .unwrap();

    let chosen = coordinator
        .assign_task("t1", "create_schema", json!({"priority": 8}), None)
        .await;
    assert_eq!(chosen.as_deref(), Some(fresh.as_str()));

    let info = coordinator.get_agent_info(&fresh).await.unwrap();
    assert_eq!(info.state, AgentState::Busy);
    assert_eq!(info.current_task.as_deref(), Some("t1"));

    let assignment = coordinator
        .get_messages(&fresh, 10, Some(MessageType::TaskAssignment))
        .await;
    assert_eq!(assignment.len(), 1);
    assert_eq!(assignment[0].priority, 8);
    assert_eq!(assignment[0].content["task_id"], json!("t1"));
}

#[tokio::test]
async fn test_assignment_priority_accepts_names_and_numbers() {
    let coordinator = AgentCoordinator::new(None);
    let agent = ready_agent(&coordinator, AgentType::Qa).await;

    for (task_id, priority) in [
        ("named", json!("high")),
        ("numeric", json!(9)),
        ("bogus", json!("urgent")),
        ("missing", json!(null)),
    ] {
        coordinator
            .assign_task(task_id, "run_tests", json!({"priority": priority}), None)
            .await
            .unwrap();
    }

    let priorities: Vec<(String, u8)> = coordinator
        .get_messages(&agent, 10, Some(MessageType::TaskAssignment))
        .await
        .into_iter()
        .map(|m| (m.content["task_id"].as_str().unwrap().to_string(), m.priority))
        .collect();
    assert_eq!(
        priorities,
        vec![
            ("numeric".to_string(), 9),
            ("named".to_string(), 7),
            ("bogus".to_string(), 5),
            ("missing".to_string(), 5),
        ]
    );
}

#[tokio::test]
async fn test_assign_falls_back_to_busy_agents() {
    let coordinator = AgentCoordinator::new(None);
    let only = ready_agent(&coordinator, AgentType::Frontend).await;

    assert!(coordinator.assign_task("a", "flutter_screen", json!({}), None).await.is_some());
    assert_eq!(
        coordinator.assign_task("b", "flutter_screen", json!({}), None).await,
        Some(only)
    );
    // 没有该类型的Agent
    assert!(coordinator.assign_task("c", "docker_deploy", json!({}), None).await.is_none());
}

#[tokio::test]
async fn test_complete_task_updates_counters() {
    let coordinator = AgentCoordinator::new(None);
    let agent = ready_agent(&coordinator, AgentType::Backend).await;
    coordinator.assign_task("t", "auth_endpoint", json!({}), None).await;
    assert_eq!(coordinator.task_assignment("t").await.as_deref(), Some(agent.as_str()));

    coordinator
        .complete_task(&agent, "t", Some(json!({"ok": false})), false)
        .await
        .unwrap();
    let info = coordinator.get_agent_info(&agent).await.unwrap();
    assert_eq!(info.state, AgentState::Ready);
    assert_eq!(info.task_count, 1);
    assert_eq!(info.error_count, 1);
    assert!(info.current_task.is_none());
    assert!(coordinator.task_assignment("t").await.is_none());
}

#[tokio::test]
async fn test_stale_agent_flips_to_error_and_is_not_assigned() {
    let coordinator = AgentCoordinator::new(Some(CoordinatorConfig {
        heartbeat_timeout_seconds: 60,
        ..Default::default()
    }));
    let events = record_events(&coordinator).await;

    let stale = ready_agent(&coordinator, AgentType::Qa).await;

    let flagged = coordinator
        .check_agent_health_at(Utc::now() + chrono::Duration::seconds(61))
        .await;
    assert_eq!(flagged, vec![stale.clone()]);
    assert_eq!(
        coordinator.get_agent_info(&stale).await.unwrap().state,
        AgentState::Error
    );
    assert!(coordinator.assign_task("t", "run_tests", json!({}), None).await.is_none());

    // 心跳不会让ERROR的Agent自动恢复
    coordinator.heartbeat(&stale).await.unwrap();
    assert_eq!(
        coordinator.get_agent_info(&stale).await.unwrap().state,
        AgentState::Error
    );

    let events = events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_type == CoordinatorEventType::AgentUnhealthy
            && e.data["agent_id"] == json!(stale)));
}

#[tokio::test]
async fn test_agent_without_heartbeat_is_not_timed_out() {
    let coordinator = AgentCoordinator::new(None);
    let silent = coordinator.register_agent(AgentType::Devops, vec![]).await;

    let flagged = coordinator
        .check_agent_health_at(Utc::now() + chrono::Duration::hours(1))
        .await;
    assert!(flagged.is_empty());
    assert_eq!(
        coordinator.get_agent_info(&silent).await.unwrap().state,
        AgentState::Starting
    );

    // 首次心跳后进入 READY，并从此开始受超时约束
    coordinator.heartbeat(&silent).await.unwrap();
    assert_eq!(
        coordinator.get_agent_info(&silent).await.unwrap().state,
        AgentState::Ready
    );
    let flagged = coordinator
        .check_agent_health_at(Utc::now() + chrono::Duration::hours(1))
        .await;
    assert_eq!(flagged, vec![silent]);
}

#[tokio::test]
async fn test_recent_heartbeat_stays_healthy() {
    let coordinator = AgentCoordinator::new(None);
    let agent = ready_agent(&coordinator, AgentType::Qa).await;
    assert!(coordinator.check_agent_health().await.is_empty());
    assert_eq!(
        coordinator.get_agent_info(&agent).await.unwrap().state,
        AgentState::Ready
    );
}

#[tokio::test]
async fn test_sequential_workflow_completes() {
    let coordinator = AgentCoordinator::new(None);
    let events = record_events(&coordinator).await;
    let db = ready_agent(&coordinator, AgentType::Database).await;
    let api = ready_agent(&coordinator, AgentType::Backend).await;

    let mut context = Map::new();
    context.insert("project".to_string(), json!("shop"));
    let workflow_id = coordinator
        .start_workflow(
            "backend_setup",
            vec![
                WorkflowStep::new("schema", "create_schema"),
                WorkflowStep::new("api", "auth_endpoint"),
            ],
            context,
        )
        .await;

    let status = coordinator.get_workflow_status(&workflow_id).await.unwrap();
    assert_eq!(status.status, WorkflowStatus::Running);
    assert_eq!(status.current_agent.as_deref(), Some(db.as_str()));

    let status = coordinator
        .advance_workflow(&workflow_id, StepResult::success(json!({"tables": ["users"]})))
        .await
        .unwrap();
    assert_eq!(status, WorkflowStatus::Running);

    // 第二步的任务数据带上合并后的上下文
    let assignment = coordinator
        .get_messages(&api, 10, Some(MessageType::TaskAssignment))
        .await;
    let context = &assignment[0].content["task_data"]["context"];
    assert_eq!(context["project"], json!("shop"));
    assert_eq!(context["tables"], json!(["users"]));

    let status = coordinator
        .advance_workflow(&workflow_id, StepResult::success(json!({})))
        .await
        .unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    // 终止后的推进不再生效
    let status = coordinator
        .advance_workflow(&workflow_id, StepResult::failure("late"))
        .await
        .unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.event_type == CoordinatorEventType::WorkflowCompleted));
}

#[tokio::test]
async fn test_workflow_fails_on_step_failure_or_missing_agent() {
    let coordinator = AgentCoordinator::new(None);
    ready_agent(&coordinator, AgentType::Qa).await;

    let failing = coordinator
        .start_workflow("qa", vec![WorkflowStep::new("tests", "run_tests")], Map::new())
        .await;
    let status = coordinator
        .advance_workflow(&failing, StepResult::failure("3 tests failed"))
        .await
        .unwrap();
    assert_eq!(status, WorkflowStatus::Failed);
    let summary = coordinator.get_workflow_status(&failing).await.unwrap();
    assert_eq!(summary.error.as_deref(), Some("3 tests failed"));

    let orphan = coordinator
        .start_workflow("ops", vec![WorkflowStep::new("ship", "docker_deploy")], Map::new())
        .await;
    assert_eq!(
        coordinator.get_workflow_status(&orphan).await.unwrap().status,
        WorkflowStatus::Failed
    );

    assert!(coordinator
        .advance_workflow("missing", StepResult::success(json!({})))
        .await
        .is_err());
}

#[tokio::test]
async fn test_routing_rules_are_replaceable() {
    let coordinator = AgentCoordinator::new(None);
    assert_eq!(coordinator.resolve_agent_type("widget_list").await, AgentType::Frontend);

    coordinator
        .add_routing_rule(
            RoutingRule::keywords("design-first", ["widget"], AgentType::Uiux),
            Some(0),
        )
        .await;
    assert_eq!(coordinator.resolve_agent_type("widget_list").await, AgentType::Uiux);
    assert_eq!(coordinator.routing_rules().await[0].name, "design-first");

    coordinator.set_routing_rules(vec![]).await;
    assert_eq!(coordinator.resolve_agent_type("widget_list").await, AgentType::Backend);
}

#[tokio::test]
async fn test_coordination_stats_and_filters() {
    let coordinator = AgentCoordinator::new(None);
    ready_agent(&coordinator, AgentType::Qa).await;
    coordinator.register_agent(AgentType::Qa, vec![]).await;
    ready_agent(&coordinator, AgentType::Aiml).await;

    let stats = coordinator.get_coordination_stats().await;
    assert_eq!(stats.total_agents, 3);
    assert_eq!(stats.agents_by_type["qa"], 2);
    assert_eq!(stats.agents_by_state["ready"], 2);
    assert_eq!(stats.agents_by_state["starting"], 1);

    let ready_qa = coordinator
        .get_all_agents(Some(AgentType::Qa), Some(AgentState::Ready))
        .await;
    assert_eq!(ready_qa.len(), 1);
}

#[tokio::test]
async fn test_health_monitoring_loop_stops_on_shutdown() {
    let coordinator = Arc::new(AgentCoordinator::new(None));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = coordinator.start_health_monitoring(Duration::from_millis(10), shutdown_rx);
    tokio::time::sleep(Duration::from_millis(30)).await;
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
