use orchestrator_core::{AgentType, RoutingRule, RoutingTable};

/// 任务类型到Agent类型的默认关键字规则，按顺序匹配
const DEFAULT_AGENT_ROUTES: &[(AgentType, &[&str])] = &[
    (AgentType::Frontend, &["flutter", "widget", "ui", "screen", "layout"]),
    (AgentType::Backend, &["api", "endpoint", "crud", "auth", "middleware"]),
    (
        AgentType::Database,
        &["database", "schema", "migration", "query", "cache"],
    ),
    (AgentType::Devops, &["docker", "kubernetes", "deploy", "ci", "cd"]),
    (AgentType::Qa, &["test", "qa", "quality", "coverage"]),
    (AgentType::Uiux, &["design", "wireframe", "mockup", "ux"]),
    (
        AgentType::Security,
        &["security", "encrypt", "vulnerability", "audit"],
    ),
    (AgentType::Aiml, &["ml", "ai", "model", "predict", "optimize"]),
    (
        AgentType::ProjectManager,
        &["project", "task", "milestone", "sprint"],
    ),
];

/// 默认路由表，全部未命中时交给 backend
pub fn default_agent_routing() -> RoutingTable<AgentType> {
    let mut table = RoutingTable::new(AgentType::Backend);
    for &(agent_type, keywords) in DEFAULT_AGENT_ROUTES {
        table.push(RoutingRule::keywords(
            agent_type.as_str(),
            keywords.iter().copied(),
            agent_type,
        ));
    }
    table
}
