//! Diffeq Explorer - DAE 模型交互探索
//!
//! 模块划分：
//! - **backend**: 外部编译 / 求解后端抽象与实现（Mock）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 数值缓冲区、代、状态投影、错误分类、编排器
//! - **observability**: 日志初始化

pub mod backend;
pub mod config;
pub mod core;
pub mod observability;

pub use crate::core::{spawn_orchestrator, Intent, ModelView, Orchestrator};
