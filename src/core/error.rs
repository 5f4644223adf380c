//! 模型错误类型与分类
//!
//! 面向用户的三类错误（compile / solve / infrastructure）直接写进 ModelState 的字段；
//! ModelError 只表示调用方违反契约，必须作为缺陷上抛，不能静默忽略。

use thiserror::Error;

use crate::backend::{CompileFailure, CompileFailureKind};

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    /// 尚无成功编译的模型时调用了需要 handle 的操作
    #[error("No compiled model: {operation} requires a successful compile first")]
    NoModel { operation: &'static str },

    #[error("Index {index} out of range for buffer of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// 没有进行中的编译却收到了编译结果
    #[error("Compile result delivered while no compile was in flight")]
    NotCompiling,
}

/// 编译失败应写入的状态字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 写入 compile_error，编辑器旁展示
    Compile,
    /// 写入 infrastructure_error，弹窗展示
    Infrastructure,
}

impl ErrorKind {
    /// 只看后端给的标签，不看 message 内容
    pub fn classify(failure: &CompileFailure) -> Self {
        match failure.kind {
            CompileFailureKind::ModelRejected => ErrorKind::Compile,
            CompileFailureKind::BackendFault => ErrorKind::Infrastructure,
        }
    }
}
