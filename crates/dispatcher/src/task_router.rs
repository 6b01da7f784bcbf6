//! 任务到Worker队列的路由
//!
//! 路由顺序：
//! 1. 运行时覆盖（关键字命中即生效）
//! 2. 有序路由表，第一条命中的规则决定目标队列
//! 3. 未命中时使用默认队列 `medium`
//!
//! 目标队列被禁用时依次尝试规则的 `fallback_queue` 与默认队列。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use orchestrator_core::{
    models::{Task, TaskPriority},
    RoutePredicate, RoutingRule, RoutingTable,
};

pub const DEFAULT_QUEUE: &str = "medium";

/// 路由目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRoute {
    pub queue: String,
    pub priority_override: Option<TaskPriority>,
    pub fallback_queue: Option<String>,
}

impl TaskRoute {
    pub fn to_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            priority_override: None,
            fallback_queue: None,
        }
    }

    pub fn with_priority_override(mut self, priority: TaskPriority) -> Self {
        self.priority_override = Some(priority);
        self
    }

    pub fn with_fallback(mut self, queue: impl Into<String>) -> Self {
        self.fallback_queue = Some(queue.into());
        self
    }
}

/// 路由结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub queue: String,
    /// 命中的规则名，`override` 表示运行时覆盖，`default` 表示默认队列
    pub matched_rule: String,
    pub priority: TaskPriority,
    pub fallback_used: bool,
}

/// 路由表条目（自省用）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub name: String,
    pub predicate: String,
    pub target_queue: String,
    pub priority_override: Option<TaskPriority>,
    pub fallback_queue: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TaskRouter {
    table: RoutingTable<TaskRoute>,
    /// (小写关键字, 目标队列)
    overrides: Vec<(String, String)>,
    disabled_queues: HashSet<String>,
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRouter {
    /// 带默认关键字规则的路由器
    pub fn new() -> Self {
        let mut table = RoutingTable::new(TaskRoute::to_queue(DEFAULT_QUEUE));
        for &(queue, keywords) in DEFAULT_ROUTES {
            table.push(RoutingRule::keywords(
                queue,
                keywords.iter().copied(),
                TaskRoute::to_queue(queue),
            ));
        }
        Self {
            table,
            overrides: Vec::new(),
            disabled_queues: HashSet::new(),
        }
    }

    /// 不带任何规则的路由器
    pub fn empty() -> Self {
        Self {
            table: RoutingTable::new(TaskRoute::to_queue(DEFAULT_QUEUE)),
            overrides: Vec::new(),
            disabled_queues: HashSet::new(),
        }
    }

    /// 添加规则，`index` 为 None 时追加到末尾
    pub fn add_route(
        &mut self,
        name: impl Into<String>,
        predicate: Arc<dyn RoutePredicate>,
        route: TaskRoute,
        index: Option<usize>,
    ) {
        let rule = RoutingRule::new(name, predicate, route);
        match index {
            Some(index) => self.table.insert(index, rule),
            None => self.table.push(rule),
        }
    }

    pub fn remove_route(&mut self, name: &str) -> bool {
        self.table.remove(name)
    }

    /// 名称中包含 `keyword` 的任务直接路由到 `queue`
    pub fn set_override(&mut self, keyword: &str, queue: impl Into<String>) {
        let queue = queue.into();
        self.clear_override(keyword);
        self.overrides.push((keyword.to_lowercase(), queue));
    }

    pub fn clear_override(&mut self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        let before = self.overrides.len();
        self.overrides.retain(|(existing, _)| *existing != keyword);
        self.overrides.len() != before
    }

    pub fn disable_queue(&mut self, queue: &str) {
        self.disabled_queues.insert(queue.to_string());
    }

    pub fn enable_queue(&mut self, queue: &str) -> bool {
        self.disabled_queues.remove(queue)
    }

    pub fn is_disabled(&self, queue: &str) -> bool {
        self.disabled_queues.contains(queue)
    }

    pub fn route(&self, task_name: &str, priority: TaskPriority) -> RouteDecision {
        let lowered = task_name.to_lowercase();
        if let Some((_, queue)) = self
            .overrides
            .iter()
            .find(|(keyword, queue)| lowered.contains(keyword.as_str()) && !self.is_disabled(queue))
        {
            return RouteDecision {
                queue: queue.clone(),
                matched_rule: "override".to_string(),
                priority,
                fallback_used: false,
            };
        }

        let (matched_rule, route) = match self.table.find(task_name) {
            Some(rule) => (rule.name.clone(), rule.target.clone()),
            None => ("default".to_string(), self.table.default_target().clone()),
        };
        let priority = route.priority_override.unwrap_or(priority);

        if !self.is_disabled(&route.queue) {
            return RouteDecision {
                queue: route.queue,
                matched_rule,
                priority,
                fallback_used: false,
            };
        }

        let queue = route
            .fallback_queue
            .filter(|fallback| !self.is_disabled(fallback))
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
        debug!(
            "队列 {} 已禁用，任务 {} 改投 {}",
            route.queue, task_name, queue
        );
        RouteDecision {
            queue,
            matched_rule,
            priority,
            fallback_used: true,
        }
    }

    pub fn route_task(&self, task: &Task) -> RouteDecision {
        self.route(&task.name, task.priority)
    }

    /// 按目标队列分组，组内保持输入顺序
    pub fn batch_route<'a>(&self, tasks: &'a [Task]) -> BTreeMap<String, Vec<&'a Task>> {
        let mut grouped: BTreeMap<String, Vec<&Task>> = BTreeMap::new();
        for task in tasks {
            grouped
                .entry(self.route_task(task).queue)
                .or_default()
                .push(task);
        }
        grouped
    }

    pub fn routing_table(&self) -> Vec<RouteEntry> {
        self.table
            .rules()
            .iter()
            .map(|rule| RouteEntry {
                name: rule.name.clone(),
                predicate: rule.predicate.describe(),
                target_queue: rule.target.queue.clone(),
                priority_override: rule.target.priority_override,
                fallback_queue: rule.target.fallback_queue.clone(),
            })
            .collect()
    }
}

const DEFAULT_ROUTES: &[(&str, &[&str])] = &[
    ("frontend", &["flutter", "widget", "ui_component", "screen", "layout"]),
    ("backend", &["api", "endpoint", "crud", "authentication", "middleware"]),
    (
        "database",
        &["database", "schema", "migration", "query", "sql", "redis", "cache"],
    ),
    (
        "devops",
        &["docker", "kubernetes", "k8s", "deploy", "ci", "cd", "pipeline", "infrastructure"],
    ),
    ("qa", &["test", "qa", "quality", "coverage", "validation", "automation"]),
    (
        "uiux",
        &["design", "wireframe", "mockup", "prototype", "ux", "user_experience"],
    ),
    (
        "security",
        &["security", "auth", "encrypt", "vulnerability", "compliance", "audit"],
    ),
    (
        "aiml",
        &["ml", "ai", "model", "predict", "train", "optimize", "content_generate"],
    ),
    (
        "project_manager",
        &["project", "task_assign", "milestone", "sprint", "workflow", "coordinate"],
    ),
    (
        "master_brain",
        &["master_brain", "orchestrate", "global_optimize", "system_monitor"],
    ),
    ("openclaw", &["openclaw", "scrape", "post", "external_api"]),
];
