//! Mock 编译后端（用于测试与本地演示，无需外部服务）
//!
//! 只做括号配对检查；形状取自源码的 `in = [..]` 与 `out_i { .. }`，缺省用构造时给的数量。
//! 求解为确定性的线性模型：out[k][j] = (j + 1) * t_k * sum(inputs)；任一输入为负时报告不收敛。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::backend::{CompileBackend, CompileFailure, CompiledModel, SolveFailure, SolverHandle};
use crate::core::NumericBuffer;

/// 调用计数，供测试断言
#[derive(Debug, Default)]
pub struct MockStats {
    pub compile_calls: AtomicUsize,
    pub solve_calls: AtomicUsize,
    pub handles_released: AtomicUsize,
}

impl MockStats {
    pub fn compile_calls(&self) -> usize {
        self.compile_calls.load(Ordering::SeqCst)
    }

    pub fn solve_calls(&self) -> usize {
        self.solve_calls.load(Ordering::SeqCst)
    }

    pub fn handles_released(&self) -> usize {
        self.handles_released.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockBackend {
    default_inputs: usize,
    default_outputs: usize,
    unreachable: AtomicBool,
    gate: Option<Arc<Notify>>,
    dense_points: usize,
    stats: Arc<MockStats>,
}

impl MockBackend {
    pub fn new(default_inputs: usize, default_outputs: usize) -> Self {
        Self {
            default_inputs,
            default_outputs,
            unreachable: AtomicBool::new(false),
            gate: None,
            dense_points: 0,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// 编译在 gate 被 notify 之前不会返回
    pub fn with_gate(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// 求解时把 time grid 换成 n 个等距点并按此重设 outputs 长度（模拟输出稠密时间点的后端）
    pub fn with_dense_output(mut self, n: usize) -> Self {
        self.dense_points = n;
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(2, 1)
    }
}

#[async_trait]
impl CompileBackend for MockBackend {
    async fn compile(&self, source: &str) -> Result<CompiledModel, CompileFailure> {
        self.stats.compile_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CompileFailure::fault("backend unreachable"));
        }

        check_syntax(source).map_err(CompileFailure::rejected)?;

        let handle = MockHandle {
            number_of_inputs: count_inputs(source).unwrap_or(self.default_inputs),
            number_of_outputs: count_outputs(source).unwrap_or(self.default_outputs),
            dense_points: self.dense_points,
            stats: self.stats.clone(),
        };
        Ok(CompiledModel::new(Box::new(handle)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

fn check_syntax(source: &str) -> Result<(), String> {
    if source.trim().is_empty() {
        return Err("empty model".to_string());
    }
    let mut depth: i64 = 0;
    for (line_no, line) in source.lines().enumerate() {
        for c in line.chars() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(format!("line {}: unexpected '}}'", line_no + 1));
                    }
                }
                _ => {}
            }
        }
    }
    if depth != 0 {
        return Err(format!("unexpected end of input: {} unclosed '{{'", depth));
    }
    Ok(())
}

/// `in = [r, k]` -> 2
fn count_inputs(source: &str) -> Option<usize> {
    let line = source
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("in ") || l.starts_with("in="))?;
    let start = line.find('[')?;
    let end = line.find(']')?;
    let names = line.get(start + 1..end)?;
    Some(count_items(names))
}

/// `out_i { y, z, }` -> 2
fn count_outputs(source: &str) -> Option<usize> {
    let at = source.find("out_i")?;
    let rest = &source[at..];
    let start = rest.find('{')?;
    let end = rest.find('}')?;
    let body = rest.get(start + 1..end)?;
    Some(count_items(body))
}

fn count_items(list: &str) -> usize {
    list.split(',').filter(|s| !s.trim().is_empty()).count()
}

struct MockHandle {
    number_of_inputs: usize,
    number_of_outputs: usize,
    dense_points: usize,
    stats: Arc<MockStats>,
}

impl MockHandle {
    fn check_shape(&self, timepoints: &NumericBuffer, inputs: &NumericBuffer, outputs: &NumericBuffer) -> Result<(), SolveFailure> {
        if inputs.len() != self.number_of_inputs {
            return Err(SolveFailure::new(format!(
                "expected {} inputs, got {}",
                self.number_of_inputs,
                inputs.len()
            )));
        }
        if outputs.len() != timepoints.len() * self.number_of_outputs {
            return Err(SolveFailure::new(format!(
                "output buffer has length {}, expected {}",
                outputs.len(),
                timepoints.len() * self.number_of_outputs
            )));
        }
        Ok(())
    }

    fn diverged(inputs: &NumericBuffer) -> Option<usize> {
        inputs
            .as_slice()
            .iter()
            .position(|v| !v.is_finite() || *v < 0.0)
    }

    /// 按行写 out[k][j] = (j + 1) * t_k * scale
    fn fill(&self, timepoints: &NumericBuffer, scale: f64, buffer: &mut NumericBuffer) {
        let n = self.number_of_outputs;
        let out = buffer.as_mut_slice();
        for (k, t) in timepoints.as_slice().iter().enumerate() {
            for j in 0..n {
                out[k * n + j] = (j as f64 + 1.0) * t * scale;
            }
        }
    }

    /// 稠密输出时返回新的 time grid
    fn output_grid(&self, timepoints: &NumericBuffer) -> Option<NumericBuffer> {
        let n = self.dense_points;
        let t = timepoints.as_slice();
        if n < 2 || t.is_empty() {
            return None;
        }
        let (t0, t1) = (t[0], t[t.len() - 1]);
        let grid = (0..n)
            .map(|i| t0 + (t1 - t0) * i as f64 / (n - 1) as f64)
            .collect();
        Some(NumericBuffer::from_vec(grid))
    }
}

impl SolverHandle for MockHandle {
    fn number_of_inputs(&self) -> usize {
        self.number_of_inputs
    }

    fn number_of_outputs(&self) -> usize {
        self.number_of_outputs
    }

    fn describe(&self) -> String {
        format!(
            "mock({} inputs, {} outputs)",
            self.number_of_inputs, self.number_of_outputs
        )
    }

    fn solve(
        &mut self,
        timepoints: &mut NumericBuffer,
        inputs: &NumericBuffer,
        outputs: &mut NumericBuffer,
    ) -> Result<(), SolveFailure> {
        self.stats.solve_calls.fetch_add(1, Ordering::SeqCst);
        self.check_shape(timepoints, inputs, outputs)?;

        if let Some(i) = Self::diverged(inputs) {
            // 失败时留下垃圾值，调用方不能当作结果提交
            outputs.as_mut_slice().fill(f64::NAN);
            return Err(SolveFailure::new(format!(
                "solver failed to converge: input[{}] = {}",
                i,
                inputs.as_slice()[i]
            )));
        }

        if let Some(grid) = self.output_grid(timepoints) {
            *outputs = NumericBuffer::zeros(grid.len() * self.number_of_outputs);
            *timepoints = grid;
        }
        let sum: f64 = inputs.as_slice().iter().sum();
        self.fill(timepoints, sum, outputs);
        Ok(())
    }

    fn solve_with_sensitivities(
        &mut self,
        timepoints: &mut NumericBuffer,
        inputs: &NumericBuffer,
        input_tangents: &NumericBuffer,
        outputs: &mut NumericBuffer,
        output_tangents: &mut NumericBuffer,
    ) -> Result<(), SolveFailure> {
        if input_tangents.len() != inputs.len() || output_tangents.len() != outputs.len() {
            return Err(SolveFailure::new("tangent buffers do not match primal buffers"));
        }
        self.solve(timepoints, inputs, outputs)?;

        if output_tangents.len() != outputs.len() {
            *output_tangents = NumericBuffer::zeros(outputs.len());
        }
        let dsum: f64 = input_tangents.as_slice().iter().sum();
        self.fill(timepoints, dsum, output_tangents);
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.stats.handles_released.fetch_add(1, Ordering::SeqCst);
    }
}
