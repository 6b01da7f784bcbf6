//! 配置管理
//!
//! 配置由 `config` crate 按 "默认值 → TOML文件 → 环境变量" 的顺序合并，
//! 每个分区都提供 `validate()`，加载时统一校验。

pub mod models;

pub use models::*;
