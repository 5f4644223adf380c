//! 后端层：编译 / 求解抽象与实现（Mock）

pub mod mock;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use mock::{MockBackend, MockStats};
pub use traits::{
    CompileBackend, CompileFailure, CompileFailureKind, CompiledModel, SolveFailure, SolverHandle,
};

/// 根据配置选择编译后端
pub fn create_backend_from_config(cfg: &AppConfig) -> Arc<dyn CompileBackend> {
    let provider = cfg.backend.provider.to_lowercase();
    if provider != "mock" {
        tracing::warn!("Unknown backend provider '{}', using Mock backend", provider);
    } else {
        tracing::info!(
            "Using Mock backend ({} inputs, {} outputs by default)",
            cfg.backend.mock_inputs,
            cfg.backend.mock_outputs
        );
    }
    Arc::new(MockBackend::new(
        cfg.backend.mock_inputs,
        cfg.backend.mock_outputs,
    ))
}
