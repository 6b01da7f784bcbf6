//! 控制面HTTP接口
//!
//! 基于axum的薄适配层，所有操作都转发给 [`ControlPlane`] 或它持有的主控大脑。
//!
//! ## 路由
//!
//! ```text
//! GET  /health                        存活检查
//! GET  /api/status                    系统状态
//! POST /api/commands                  执行控制面命令
//! GET  /api/commands/{id}             查询命令记录
//! GET  /api/queue/stats               调度队列统计
//! GET  /api/workers/stats?queue=      Worker池统计
//! GET  /api/coordination/stats        Agent协调统计
//! GET  /api/decisions?pending=&decision_type=&limit=
//! POST /api/decisions/{id}/approve
//! POST /api/decisions/{id}/reject
//! ```
//!
//! 除 `/health` 外响应统一为 `{success, data, message, timestamp}`。
//! 每个响应都带 `x-request-id`，请求已带该头时原样返回。
//!
//! [`ControlPlane`]: orchestrator_brain::ControlPlane

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use orchestrator_brain::ControlPlane;
use std::sync::Arc;

use middleware::{cors_layer, request_context, trace_layer};
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(control_plane: Arc<ControlPlane>) -> Router {
    let cors_enabled = control_plane.config().cors_enabled;
    let mut app = create_routes(AppState { control_plane })
        .layer(axum::middleware::from_fn(request_context))
        .layer(trace_layer());
    if cors_enabled {
        app = app.layer(cors_layer());
    }
    app
}
