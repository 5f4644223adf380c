//! 状态定义：ModelState 与投影给展示层的 ModelView
//!
//! 展示层只拿 ModelView（拷贝出来的数组），不持有任何缓冲区引用；每次状态变化重新投影。

use serde::Serialize;

use crate::core::{Generation, GenerationId};

/// 编排器持有的唯一可变根状态
#[derive(Debug)]
pub struct ModelState {
    pub source_text: String,
    /// 仅在编译开始到结束之间为 true
    pub compiling: bool,
    pub generation: Option<Generation>,
    pub horizon: f64,
    pub compile_error: Option<String>,
    pub solve_error: Option<String>,
    /// 后端故障（与模型无关），用户手动关闭
    pub infrastructure_error: Option<String>,
}

impl ModelState {
    pub fn new(source_text: impl Into<String>, horizon: f64) -> Self {
        Self {
            source_text: source_text.into(),
            compiling: false,
            generation: None,
            horizon,
            compile_error: None,
            solve_error: None,
            infrastructure_error: None,
        }
    }

    /// 投影为展示层视图
    pub fn project(&self) -> ModelView {
        ModelView {
            source_text: self.source_text.clone(),
            compiling: self.compiling,
            compile_error: self.compile_error.clone(),
            solve_error: self.solve_error.clone(),
            infrastructure_error: self.infrastructure_error.clone(),
            horizon: self.horizon,
            generation: self.generation.as_ref().map(Generation::id),
            inputs: self.generation.as_ref().map(input_views).unwrap_or_default(),
            series: self
                .generation
                .as_ref()
                .map(series_by_output)
                .unwrap_or_default(),
            defect: None,
        }
    }
}

/// 展示层看到的只读视图
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ModelView {
    pub source_text: String,
    pub compiling: bool,
    pub compile_error: Option<String>,
    pub solve_error: Option<String>,
    pub infrastructure_error: Option<String>,
    pub horizon: f64,
    /// None 表示尚未成功编译（图表显示加载中）
    pub generation: Option<GenerationId>,
    pub inputs: Vec<InputView>,
    pub series: Vec<OutputSeries>,
    /// 最近一次调用方违反契约的描述（缺陷，不是用户错误）
    pub defect: Option<String>,
}

impl ModelView {
    /// 基础设施错误的上报内容（含当前源码）
    pub fn infrastructure_report(&self) -> Option<InfrastructureReport> {
        self.infrastructure_error
            .as_ref()
            .map(|message| InfrastructureReport {
                message: message.clone(),
                source_text: self.source_text.clone(),
            })
    }

    pub fn error_for(&self, channel: ErrorChannel) -> Option<&str> {
        match channel {
            ErrorChannel::Compile => self.compile_error.as_deref(),
            ErrorChannel::Solve => self.solve_error.as_deref(),
        }
    }
}

/// 单个输入的滑块视图
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InputView {
    pub index: usize,
    pub value: f64,
    pub tangent: Option<f64>,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl InputView {
    /// 滑块步长：区间的 1/100
    pub fn step(&self) -> f64 {
        (self.upper_bound - self.lower_bound) / 100.0
    }

    /// 范围模式下显示的 [value - tangent, value + tangent]
    pub fn range(&self) -> (f64, f64) {
        let d = self.tangent.unwrap_or(0.0);
        (self.value - d, self.value + d)
    }
}

/// 某个输出的时间序列
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutputSeries {
    pub output_index: usize,
    pub points: Vec<SeriesPoint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub time: f64,
    pub value: f64,
    pub tangent: Option<f64>,
}

impl SeriesPoint {
    /// 灵敏度带上沿 value + tangent
    pub fn upper(&self) -> f64 {
        self.value + self.tangent.unwrap_or(0.0)
    }
}

/// 用于上报后端故障的信息
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InfrastructureReport {
    pub message: String,
    pub source_text: String,
}

impl InfrastructureReport {
    pub fn report_body(&self) -> String {
        format!(":__error__:{}:__code__:{}", self.message, self.source_text)
    }
}

/// 行内错误面板（编辑器旁 / 滑块旁）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorChannel {
    Compile,
    Solve,
}

impl ErrorChannel {
    pub fn title(&self) -> &'static str {
        match self {
            ErrorChannel::Compile => "Compile Error",
            ErrorChannel::Solve => "Solve Error",
        }
    }

    pub fn panel_title(&self, error: Option<&str>) -> String {
        match error {
            Some(_) => self.title().to_string(),
            None => format!("No {}: all good!", self.title()),
        }
    }
}

fn input_views(generation: &Generation) -> Vec<InputView> {
    let tangents = generation.input_tangents();
    generation
        .inputs()
        .as_slice()
        .iter()
        .enumerate()
        .map(|(i, &value)| InputView {
            index: i,
            value,
            tangent: tangents.and_then(|d| d.get(i)),
            lower_bound: generation.lower_bounds()[i],
            upper_bound: generation.upper_bounds()[i],
        })
        .collect()
}

/// 把按时间点行优先、按输出序号分列的扁平 outputs 重排为每个输出一条序列
pub fn series_by_output(generation: &Generation) -> Vec<OutputSeries> {
    let n_out = generation.number_of_outputs();
    let times = generation.timepoints().as_slice();
    let values = generation.outputs().as_slice();
    let tangents = generation.output_tangents().map(|d| d.as_slice());

    (0..n_out)
        .map(|j| OutputSeries {
            output_index: j,
            points: times
                .iter()
                .enumerate()
                .map(|(k, &time)| SeriesPoint {
                    time,
                    value: values[k * n_out + j],
                    tangent: tangents.map(|d| d[k * n_out + j]),
                })
                .collect(),
        })
        .collect()
}
