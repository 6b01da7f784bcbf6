//! JSON参数读取
//!
//! 决策参数与控制面命令参数都是松散的JSON对象，这里集中做类型检查，
//! 缺失或类型不符时返回 `InvalidCommand`。

use chrono::{DateTime, Utc};
use orchestrator_core::{OrchestratorError, OrchestratorResult, TaskPriority};
use serde_json::Value;

pub fn required_str<'a>(params: &'a Value, key: &str) -> OrchestratorResult<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OrchestratorError::InvalidCommand(format!("缺少参数: {key}")))
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub fn optional_u64(params: &Value, key: &str) -> OrchestratorResult<Option<u64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| OrchestratorError::InvalidCommand(format!("参数 {key} 必须是非负整数"))),
    }
}

pub fn optional_i64(params: &Value, key: &str) -> OrchestratorResult<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| OrchestratorError::InvalidCommand(format!("参数 {key} 必须是整数"))),
    }
}

pub fn optional_f64(params: &Value, key: &str) -> OrchestratorResult<Option<f64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| OrchestratorError::InvalidCommand(format!("参数 {key} 必须是数值"))),
    }
}

pub fn optional_bool(params: &Value, key: &str) -> OrchestratorResult<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| OrchestratorError::InvalidCommand(format!("参数 {key} 必须是布尔值"))),
    }
}

pub fn parse_time(params: &Value, key: &str) -> OrchestratorResult<Option<DateTime<Utc>>> {
    match optional_str(params, key) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| OrchestratorError::InvalidCommand(format!("参数 {key} 不是RFC3339时间: {e}"))),
    }
}

/// 数值按档位向下取整，字符串接受档位名或精确数值
pub fn priority_param(params: &Value, key: &str) -> OrchestratorResult<Option<TaskPriority>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(|v| Some(TaskPriority::nearest(v)))
            .ok_or_else(|| OrchestratorError::InvalidCommand(format!("无效的优先级: {n}"))),
        Some(Value::String(s)) => s.parse().map(Some),
        Some(other) => Err(OrchestratorError::InvalidCommand(format!(
            "无效的优先级: {other}"
        ))),
    }
}

/// 向更高档位移动 `steps` 档，最高为 critical
pub fn bump_priority(priority: TaskPriority, steps: usize) -> TaskPriority {
    let index = TaskPriority::ALL
        .iter()
        .position(|p| *p == priority)
        .unwrap_or(TaskPriority::ALL.len() - 1);
    TaskPriority::ALL[index.saturating_sub(steps)]
}
