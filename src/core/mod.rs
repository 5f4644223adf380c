//! 核心编排层：数值缓冲区、代（Generation）、状态投影、错误分类、主控状态机

pub mod buffer;
pub mod error;
pub mod generation;
pub mod intent;
pub mod orchestrator;
pub mod state;

pub use buffer::NumericBuffer;
pub use error::{ErrorKind, ModelError};
pub use generation::{Generation, GenerationId, TIME_GRID_LEN};
pub use intent::Intent;
pub use orchestrator::{
    run_compile, spawn_orchestrator, CompileRequest, Effect, Orchestrator, DEFAULT_SOURCE,
};
pub use state::{
    series_by_output, ErrorChannel, InfrastructureReport, InputView, ModelState, ModelView,
    OutputSeries, SeriesPoint,
};
