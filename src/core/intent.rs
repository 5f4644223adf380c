//! 展示层发往编排器的意图（Intent）

/// 用户意图，按提交顺序逐条处理
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// 替换源码，不触发编译或求解
    EditSource(String),
    /// 编译当前源码；已有编译在进行时忽略
    Compile,
    /// 设置某个输入（及其 tangent）并立即求解
    SetInput {
        index: usize,
        value: f64,
        tangent: Option<f64>,
    },
    /// 只改滑块范围，不求解
    SetLowerBound { index: usize, value: f64 },
    SetUpperBound { index: usize, value: f64 },
    /// 设置积分上限并立即求解
    SetHorizon(f64),
    DismissInfrastructureError,
    /// 退出运行循环
    Quit,
}

impl Intent {
    /// 日志用的短名
    pub fn name(&self) -> &'static str {
        match self {
            Intent::EditSource(_) => "edit_source",
            Intent::Compile => "compile",
            Intent::SetInput { .. } => "set_input",
            Intent::SetLowerBound { .. } => "set_lower_bound",
            Intent::SetUpperBound { .. } => "set_upper_bound",
            Intent::SetHorizon(_) => "set_horizon",
            Intent::DismissInfrastructureError => "dismiss_infrastructure_error",
            Intent::Quit => "quit",
        }
    }
}
