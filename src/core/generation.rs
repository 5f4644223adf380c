//! 一代（Generation）：一次成功编译产生的 handle 与全部缓冲区
//!
//! handle、inputs、outputs、timepoints、bounds 一起分配、一起释放；替换时旧代整体 Drop，
//! 不存在新旧混用的中间状态。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::backend::{CompiledModel, SolveFailure, SolverHandle};
use crate::config::ModelSection;
use crate::core::{ModelError, NumericBuffer};

/// 代编号，进程内单调递增
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize)]
pub struct GenerationId(u64);

static NEXT_GENERATION_ID: AtomicU64 = AtomicU64::new(1);

impl GenerationId {
    fn next() -> Self {
        Self(NEXT_GENERATION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// time grid 固定为两点 [0, horizon]
pub const TIME_GRID_LEN: usize = 2;

pub struct Generation {
    id: GenerationId,
    handle: Box<dyn SolverHandle>,
    inputs: NumericBuffer,
    input_tangents: Option<NumericBuffer>,
    outputs: NumericBuffer,
    output_tangents: Option<NumericBuffer>,
    timepoints: NumericBuffer,
    lower_bounds: Vec<f64>,
    upper_bounds: Vec<f64>,
}

impl Generation {
    /// 按 handle 的形状分配新一代缓冲区；灵敏度关闭时不分配 tangent 缓冲区
    pub fn allocate(model: CompiledModel, settings: &ModelSection) -> Self {
        let n_in = model.number_of_inputs();
        let n_out = model.number_of_outputs();
        let sensitivities = settings.sensitivities;
        let output_len = TIME_GRID_LEN * n_out;

        Self {
            id: GenerationId::next(),
            handle: model.handle,
            inputs: NumericBuffer::filled(n_in, settings.input_value),
            input_tangents: sensitivities.then(|| NumericBuffer::zeros(n_in)),
            outputs: NumericBuffer::zeros(output_len),
            output_tangents: sensitivities.then(|| NumericBuffer::zeros(output_len)),
            timepoints: NumericBuffer::from_vec(vec![0.0, settings.horizon]),
            lower_bounds: vec![settings.lower_bound; n_in],
            upper_bounds: vec![settings.upper_bound; n_in],
        }
    }

    pub fn id(&self) -> GenerationId {
        self.id
    }

    pub fn describe(&self) -> String {
        self.handle.describe()
    }

    pub fn number_of_inputs(&self) -> usize {
        self.handle.number_of_inputs()
    }

    pub fn number_of_outputs(&self) -> usize {
        self.handle.number_of_outputs()
    }

    pub fn inputs(&self) -> &NumericBuffer {
        &self.inputs
    }

    pub fn input_tangents(&self) -> Option<&NumericBuffer> {
        self.input_tangents.as_ref()
    }

    pub fn outputs(&self) -> &NumericBuffer {
        &self.outputs
    }

    pub fn output_tangents(&self) -> Option<&NumericBuffer> {
        self.output_tangents.as_ref()
    }

    pub fn timepoints(&self) -> &NumericBuffer {
        &self.timepoints
    }

    pub fn lower_bounds(&self) -> &[f64] {
        &self.lower_bounds
    }

    pub fn upper_bounds(&self) -> &[f64] {
        &self.upper_bounds
    }

    /// 写入一个输入（及其 tangent）；索引越界时不写任何缓冲区。
    /// 灵敏度关闭时 tangent 被忽略，value 照常写入。
    pub fn set_input(&mut self, index: usize, value: f64, tangent: Option<f64>) -> Result<(), ModelError> {
        self.inputs.set(index, value)?;
        match (tangent, self.input_tangents.as_mut()) {
            (Some(dvalue), Some(tangents)) => tangents.set(index, dvalue)?,
            (Some(dvalue), None) => tracing::debug!(
                "Sensitivities disabled, ignoring tangent {} for input[{}]",
                dvalue,
                index
            ),
            (None, _) => {}
        }
        Ok(())
    }

    pub fn set_lower_bound(&mut self, index: usize, value: f64) -> Result<(), ModelError> {
        set_bound(&mut self.lower_bounds, index, value)
    }

    pub fn set_upper_bound(&mut self, index: usize, value: f64) -> Result<(), ModelError> {
        set_bound(&mut self.upper_bounds, index, value)
    }

    /// 把 time grid 恢复为 [0, horizon]
    pub fn reset_time_grid(&mut self, horizon: f64) {
        if self.timepoints.len() != TIME_GRID_LEN {
            self.timepoints.resize_to(TIME_GRID_LEN);
        }
        let grid = self.timepoints.as_mut_slice();
        grid[0] = 0.0;
        grid[1] = horizon;
    }

    /// 求解一次。后端写入的是 outputs 的副本，只有成功且形状正确时才提交，
    /// 失败时 outputs / output_tangents 保持调用前的值。
    pub fn solve(&mut self, horizon: f64) -> Result<(), SolveFailure> {
        self.reset_time_grid(horizon);

        let mut timepoints = self.timepoints.clone();
        let mut outputs = self.outputs.clone();
        let output_tangents = match (&self.input_tangents, &self.output_tangents) {
            (Some(dinputs), Some(doutputs)) => {
                let mut doutputs = doutputs.clone();
                self.handle.solve_with_sensitivities(
                    &mut timepoints,
                    &self.inputs,
                    dinputs,
                    &mut outputs,
                    &mut doutputs,
                )?;
                Some(doutputs)
            }
            _ => {
                self.handle
                    .solve(&mut timepoints, &self.inputs, &mut outputs)?;
                None
            }
        };

        let n_out = self.number_of_outputs();
        let outputs = collapse_to_endpoints(&timepoints, outputs, n_out)?;
        let output_tangents = output_tangents
            .map(|d| collapse_to_endpoints(&timepoints, d, n_out))
            .transpose()?;

        self.outputs = outputs;
        if output_tangents.is_some() {
            self.output_tangents = output_tangents;
        }
        Ok(())
    }

    /// 显式释放本代的 handle 与缓冲区
    pub fn release(self) {
        tracing::debug!("Releasing generation {} ({})", self.id, self.describe());
        drop(self);
    }
}

impl std::fmt::Debug for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("handle", &self.handle.describe())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("timepoints", &self.timepoints)
            .finish_non_exhaustive()
    }
}

fn set_bound(bounds: &mut [f64], index: usize, value: f64) -> Result<(), ModelError> {
    let len = bounds.len();
    let slot = bounds
        .get_mut(index)
        .ok_or(ModelError::IndexOutOfRange { index, len })?;
    *slot = value;
    Ok(())
}

/// 后端可能返回比请求更多的时间点（稠密输出）；只保留首尾两行，使 outputs 回到 2 * n_out
fn collapse_to_endpoints(
    timepoints: &NumericBuffer,
    buffer: NumericBuffer,
    n_out: usize,
) -> Result<NumericBuffer, SolveFailure> {
    let n_t = timepoints.len();
    if n_t < TIME_GRID_LEN || buffer.len() != n_t * n_out {
        return Err(SolveFailure::new(format!(
            "solver returned {} values for {} timepoints and {} outputs",
            buffer.len(),
            n_t,
            n_out
        )));
    }
    if n_t == TIME_GRID_LEN {
        return Ok(buffer);
    }

    tracing::debug!("Collapsing {} solver timepoints to the two-point grid", n_t);
    let values = buffer.as_slice();
    let mut rows = Vec::with_capacity(TIME_GRID_LEN * n_out);
    rows.extend_from_slice(&values[..n_out]);
    rows.extend_from_slice(&values[(n_t - 1) * n_out..]);
    Ok(NumericBuffer::from_vec(rows))
}
