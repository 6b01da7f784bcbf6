mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use common::{brain, ready_agent};
use orchestrator_brain::{
    CommandRecord, CommandRequest, CommandStatus, CommandType, ControlPlane, TrackedTaskStatus,
};
use orchestrator_core::{config::ApiConfig, AgentType, TaskPriority, TaskState};
use serde_json::{json, Value};
use tokio::sync::mpsc;

fn control_plane() -> ControlPlane {
    ControlPlane::new(brain(), None)
}

#[tokio::test]
async fn test_submit_task_uses_command_priority() {
    let plane = control_plane();
    let record = plane
        .execute_command(
            CommandRequest::new(
                CommandType::SubmitTask,
                json!({"task_type": "misc_work", "description": "整理文档"}),
            )
            .with_priority(TaskPriority::High),
        )
        .await;

    assert_eq!(record.status, CommandStatus::Completed);
    assert!(record.completed_at.is_some());
    let result = record.result.unwrap();
    assert_eq!(result["status"], "queued");

    let task_id = result["task_id"].as_str().unwrap();
    let task = plane.brain().scheduler().get_task(task_id).await.unwrap();
    assert_eq!(task.priority, TaskPriority::High);
    assert_eq!(task.name, "agents.auto.misc_work");
}

#[tokio::test]
async fn test_failed_command_records_error() {
    let plane = control_plane();
    let record = plane
        .execute_command(CommandRequest::new(CommandType::CancelTask, json!({})))
        .await;
    assert_eq!(record.status, CommandStatus::Failed);
    assert!(record.error.unwrap().contains("task_id"));

    let stored = plane.get_command_status(&record.command_id).await.unwrap();
    assert_eq!(stored.status, CommandStatus::Failed);
    assert!(stored.is_finished());
    assert!(plane.get_command_status("unknown").await.is_none());
}

#[tokio::test]
async fn test_agent_commands() {
    let plane = control_plane();
    let registered = plane
        .execute_command(CommandRequest::new(
            CommandType::RegisterAgent,
            json!({"agent_type": "qa", "capabilities": ["pytest"]}),
        ))
        .await;
    assert_eq!(registered.status, CommandStatus::Completed);
    let agent_id = registered.result.unwrap()["agent_id"]
        .as_str()
        .unwrap()
        .to_string();

    let status = plane
        .execute_command(CommandRequest::new(
            CommandType::GetAgentStatus,
            json!({"agent_id": agent_id}),
        ))
        .await;
    let agent = &status.result.unwrap()["agent"];
    assert_eq!(agent["agent_type"], "qa");
    assert_eq!(agent["capabilities"], json!(["pytest"]));

    let listed = plane
        .execute_command(CommandRequest::new(
            CommandType::GetAgentStatus,
            json!({"agent_type": "qa", "state": "starting"}),
        ))
        .await;
    assert_eq!(listed.result.unwrap()["count"], 1);

    let stopped = plane
        .execute_command(CommandRequest::new(
            CommandType::StopAgent,
            json!({"agent_id": agent_id}),
        ))
        .await;
    assert_eq!(stopped.status, CommandStatus::Completed);

    let again = plane
        .execute_command(CommandRequest::new(
            CommandType::StopAgent,
            json!({"agent_id": agent_id}),
        ))
        .await;
    assert_eq!(again.status, CommandStatus::Failed);

    let bad_type = plane
        .execute_command(CommandRequest::new(
            CommandType::RegisterAgent,
            json!({"agent_type": "astronaut"}),
        ))
        .await;
    assert_eq!(bad_type.status, CommandStatus::Failed);
}

#[tokio::test]
async fn test_task_status_and_cancel() {
    let plane = control_plane();
    ready_agent(plane.brain(), AgentType::Backend).await;
    let submitted = plane
        .execute_command(CommandRequest::new(
            CommandType::SubmitTask,
            json!({"task_type": "auth_endpoint"}),
        ))
        .await;
    let task_id = submitted.result.unwrap()["task_id"]
        .as_str()
        .unwrap()
        .to_string();

    let status = plane
        .execute_command(CommandRequest::new(
            CommandType::GetTaskStatus,
            json!({"task_id": task_id}),
        ))
        .await;
    assert_eq!(status.result.unwrap()["status"], "assigned");

    // 已分配的任务不能取消
    let cancel = plane
        .execute_command(CommandRequest::new(
            CommandType::CancelTask,
            json!({"task_id": task_id}),
        ))
        .await;
    assert_eq!(cancel.result.unwrap()["cancelled"], false);
    assert_eq!(
        plane.brain().get_task_status(&task_id).await.unwrap().status,
        TrackedTaskStatus::Assigned
    );

    let missing = plane
        .execute_command(CommandRequest::new(
            CommandType::GetTaskStatus,
            json!({"task_id": "missing"}),
        ))
        .await;
    assert_eq!(missing.status, CommandStatus::Failed);
}

async fn run(plane: &ControlPlane, command: CommandType, params: Value) -> Value {
    let record = plane
        .execute_command(CommandRequest::new(command, params))
        .await;
    assert_eq!(
        record.status,
        CommandStatus::Completed,
        "{command} 失败: {:?}",
        record.error
    );
    record.result.unwrap()
}

#[tokio::test]
async fn test_registered_agent_works_through_commands() {
    let plane = control_plane();
    let registered = run(&plane, CommandType::RegisterAgent, json!({"agent_type": "backend"})).await;
    let agent_id = registered["agent_id"].as_str().unwrap().to_string();

    let beat = run(&plane, CommandType::Heartbeat, json!({"agent_id": agent_id})).await;
    assert_eq!(beat["state"], "ready");

    let submitted = run(
        &plane,
        CommandType::SubmitTask,
        json!({"task_type": "auth_endpoint", "priority": "critical"}),
    )
    .await;
    let task_id = submitted["task_id"].as_str().unwrap().to_string();
    assert_eq!(submitted["status"], "assigned");

    let inbox = run(
        &plane,
        CommandType::GetMessages,
        json!({"agent_id": agent_id, "message_type": "task_assignment"}),
    )
    .await;
    assert_eq!(inbox["count"], 1);
    assert_eq!(inbox["messages"][0]["content"]["task_id"], json!(task_id));
    assert_eq!(inbox["messages"][0]["priority"], TaskPriority::Critical.value());

    let reported = run(
        &plane,
        CommandType::ReportResult,
        json!({"agent_id": agent_id, "task_id": task_id, "success": true, "duration": 1.5}),
    )
    .await;
    assert_eq!(reported["status"], "completed");

    let metrics = run(
        &plane,
        CommandType::TaskMetrics,
        json!({"task_name": "agents.backend.auth_endpoint"}),
    )
    .await;
    let stats = &metrics["stats"]["agents.backend.auth_endpoint"];
    assert_eq!(stats["successes"], 1);
    assert_eq!(stats["success_rate"], 1.0);
    assert_eq!(metrics["recent_executions"][0]["executor_id"], json!(agent_id));

    let feedback = run(
        &plane,
        CommandType::ReportFeedback,
        json!({"agent_id": agent_id, "feedback_type": "performance", "impact_score": -0.8}),
    )
    .await;
    // 结果上报本身也会产生一条反馈
    assert_eq!(feedback["pending_feedback"], 2);

    for (command, params) in [
        (CommandType::Heartbeat, json!({"agent_id": "ghost"})),
        (CommandType::GetMessages, json!({"agent_id": "ghost"})),
        (CommandType::GetMessages, json!({"agent_id": agent_id, "message_type": "gossip"})),
        (CommandType::ReportResult, json!({"agent_id": agent_id})),
        (CommandType::ReportFeedback, json!({"agent_id": agent_id, "feedback_type": "x"})),
    ] {
        let record = plane
            .execute_command(CommandRequest::new(command, params))
            .await;
        assert_eq!(record.status, CommandStatus::Failed, "{command}");
    }
}

#[tokio::test]
async fn test_failed_report_requeues_and_counts_retry() {
    let plane = control_plane();
    let agent_id = ready_agent(plane.brain(), AgentType::Qa).await;
    let submitted = run(&plane, CommandType::SubmitTask, json!({"task_type": "run_tests"})).await;
    let task_id = submitted["task_id"].as_str().unwrap().to_string();

    let reported = run(
        &plane,
        CommandType::ReportResult,
        json!({"agent_id": agent_id, "task_id": task_id, "success": false, "error": "断言失败"}),
    )
    .await;
    assert_eq!(reported["status"], "queued");

    let execution = plane
        .brain()
        .task_registry()
        .get_execution(&task_id)
        .await
        .unwrap();
    assert_eq!(execution.retry_count, 1);
    assert_eq!(execution.error.as_deref(), Some("断言失败"));
}

#[tokio::test]
async fn test_recurring_job_reschedules_after_completion() {
    let plane = control_plane();
    let agent_id = ready_agent(plane.brain(), AgentType::Backend).await;

    let scheduled = run(
        &plane,
        CommandType::ScheduleRecurring,
        json!({"task_type": "auth_endpoint", "interval_seconds": 3600}),
    )
    .await;
    let job_id = scheduled["job_id"].as_str().unwrap().to_string();
    let first_run = scheduled["job"]["last_task_id"].as_str().unwrap().to_string();
    assert_eq!(
        plane.brain().get_task_status(&first_run).await.unwrap().status,
        TrackedTaskStatus::Assigned
    );

    run(
        &plane,
        CommandType::ReportResult,
        json!({"agent_id": agent_id, "task_id": first_run, "success": true}),
    )
    .await;

    let job = plane.brain().recurring().get_job(&job_id).await.unwrap();
    assert_eq!(job.runs, 1);
    let next_run = job.last_task_id.unwrap();
    assert_ne!(next_run, first_run);
    let next = plane.brain().get_task_status(&next_run).await.unwrap();
    assert_eq!(next.status, TrackedTaskStatus::Queued);
    assert_eq!(next.scheduler_state, Some(TaskState::Scheduled));

    let cancelled = run(&plane, CommandType::CancelRecurring, json!({"job_id": job_id})).await;
    assert_eq!(cancelled["cancelled"], true);
    assert_eq!(
        plane.brain().get_task_status(&next_run).await.unwrap().status,
        TrackedTaskStatus::Cancelled
    );
    assert_eq!(plane.brain().scheduler().get_task_state(&next_run).await, None);

    let missing_interval = plane
        .execute_command(CommandRequest::new(
            CommandType::ScheduleRecurring,
            json!({"task_type": "auth_endpoint"}),
        ))
        .await;
    assert_eq!(missing_interval.status, CommandStatus::Failed);
}

#[tokio::test]
async fn test_scale_pool_and_system_commands() {
    let plane = control_plane();
    let scaled = plane
        .execute_command(CommandRequest::new(
            CommandType::ScalePool,
            json!({"queue": "qa", "target_workers": 5}),
        ))
        .await;
    let result = scaled.result.unwrap();
    // 目标值被限制到池的最大Worker数
    assert_eq!(result["active_workers"], 2);

    let unknown = plane
        .execute_command(CommandRequest::new(
            CommandType::ScalePool,
            json!({"queue": "nowhere", "target_workers": 1}),
        ))
        .await;
    assert_eq!(unknown.status, CommandStatus::Failed);

    let status = plane
        .execute_command(CommandRequest::new(CommandType::SystemStatus, json!({})))
        .await;
    assert_eq!(status.result.unwrap()["active_workers"], 2);

    let health = plane
        .execute_command(CommandRequest::new(CommandType::HealthCheck, json!({})))
        .await;
    assert_eq!(health.result.unwrap()["status"], "healthy");
}

#[tokio::test]
async fn test_optimize_command_switches_strategy() {
    let plane = control_plane();
    let record = plane
        .execute_command(CommandRequest::new(
            CommandType::Optimize,
            json!({"strategy": "latency_minimized"}),
        ))
        .await;
    let result = record.result.unwrap();
    assert_eq!(result["optimization"], "completed");
    assert_eq!(result["report"]["strategy"], "latency_minimized");

    plane.brain().pause().await;
    let skipped = plane
        .execute_command(CommandRequest::new(CommandType::Optimize, json!({})))
        .await;
    assert_eq!(skipped.result.unwrap()["optimization"], "skipped");

    let bad = plane
        .execute_command(CommandRequest::new(
            CommandType::Optimize,
            json!({"strategy": "fastest"}),
        ))
        .await;
    assert_eq!(bad.status, CommandStatus::Failed);
}

#[tokio::test]
async fn test_notify_reaches_brain() {
    let plane = control_plane();
    let record = plane
        .execute_command(CommandRequest::new(
            CommandType::Notify,
            json!({"event_type": "webhook_received", "data": {"source": "github"}}),
        ))
        .await;
    assert_eq!(record.status, CommandStatus::Completed);
    assert_eq!(
        plane.brain().get_agent_status(Some("control_plane")).await.len(),
        1
    );
}

async fn receive_callback(
    State(tx): State<mpsc::UnboundedSender<Value>>,
    Json(body): Json<Value>,
) -> &'static str {
    let _ = tx.send(body);
    "ok"
}

#[tokio::test]
async fn test_callback_receives_final_record() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let app = Router::new()
        .route("/hook", post(receive_callback))
        .with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let plane = ControlPlane::new(
        brain(),
        Some(ApiConfig {
            callback_timeout_seconds: 2,
            ..Default::default()
        }),
    );
    let record = plane
        .execute_command(
            CommandRequest::new(CommandType::HealthCheck, json!({}))
                .with_callback(format!("http://{addr}/hook")),
        )
        .await;

    let body = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let delivered: CommandRecord = serde_json::from_value(body).unwrap();
    assert_eq!(delivered.command_id, record.command_id);
    assert_eq!(delivered.status, CommandStatus::Completed);
}

#[tokio::test]
async fn test_unreachable_callback_does_not_fail_command() {
    let plane = Arc::new(ControlPlane::new(
        brain(),
        Some(ApiConfig {
            callback_timeout_seconds: 1,
            ..Default::default()
        }),
    ));
    let record = plane
        .execute_command(
            CommandRequest::new(CommandType::HealthCheck, json!({}))
                .with_callback("http://127.0.0.1:9/unreachable"),
        )
        .await;
    assert_eq!(record.status, CommandStatus::Completed);
    assert_eq!(plane.command_count().await, 1);
}
