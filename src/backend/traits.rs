//! 外部编译 / 求解后端抽象
//!
//! CompileBackend 负责把 DSL 源码编译为 SolverHandle（异步，单次调用，不重试）；
//! SolverHandle 描述模型形状并同步求解，Drop 即释放后端资源。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::NumericBuffer;

/// 编译失败的种类：模型本身被拒绝，还是后端故障
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileFailureKind {
    ModelRejected,
    BackendFault,
}

/// 编译失败，带种类标签
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct CompileFailure {
    pub kind: CompileFailureKind,
    pub message: String,
}

impl CompileFailure {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: CompileFailureKind::ModelRejected,
            message: message.into(),
        }
    }

    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            kind: CompileFailureKind::BackendFault,
            message: message.into(),
        }
    }
}

/// 数值求解失败（如不收敛）
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct SolveFailure {
    pub message: String,
}

impl SolveFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 已编译模型的句柄
pub trait SolverHandle: Send {
    fn number_of_inputs(&self) -> usize;

    fn number_of_outputs(&self) -> usize;

    /// 句柄描述（日志 / 展示用）
    fn describe(&self) -> String;

    /// 按 timepoints 求解，outputs 按行（时间点）优先、列为输出序号
    fn solve(
        &mut self,
        timepoints: &mut NumericBuffer,
        inputs: &NumericBuffer,
        outputs: &mut NumericBuffer,
    ) -> Result<(), SolveFailure>;

    /// 同时求解 outputs 与沿 input_tangents 方向的一阶导数
    fn solve_with_sensitivities(
        &mut self,
        timepoints: &mut NumericBuffer,
        inputs: &NumericBuffer,
        input_tangents: &NumericBuffer,
        outputs: &mut NumericBuffer,
        output_tangents: &mut NumericBuffer,
    ) -> Result<(), SolveFailure>;
}

/// 编译成功的结果
pub struct CompiledModel {
    pub handle: Box<dyn SolverHandle>,
}

impl CompiledModel {
    pub fn new(handle: Box<dyn SolverHandle>) -> Self {
        Self { handle }
    }

    pub fn number_of_inputs(&self) -> usize {
        self.handle.number_of_inputs()
    }

    pub fn number_of_outputs(&self) -> usize {
        self.handle.number_of_outputs()
    }
}

impl std::fmt::Debug for CompiledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModel")
            .field("handle", &self.handle.describe())
            .finish()
    }
}

/// 编译后端 trait
#[async_trait]
pub trait CompileBackend: Send + Sync {
    async fn compile(&self, source: &str) -> Result<CompiledModel, CompileFailure>;

    /// 后端名称（用于日志）
    fn name(&self) -> &str {
        "unknown"
    }
}
