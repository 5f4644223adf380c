//! 数值缓冲区：与外部求解器交换数据的 f64 块
//!
//! 缓冲区独占所有权；释放即 Drop，因此每块缓冲区恰好释放一次。
//! 单元素写入（滑块拖动）可原地修改；长度改变只允许 `resize_to`，用于恢复两点 time grid。

use crate::core::ModelError;

#[derive(Debug, Clone, PartialEq)]
pub struct NumericBuffer {
    data: Vec<f64>,
}

impl NumericBuffer {
    pub fn zeros(len: usize) -> Self {
        Self::filled(len, 0.0)
    }

    pub fn filled(len: usize, value: f64) -> Self {
        Self {
            data: vec![value; len],
        }
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.data.get(index).copied()
    }

    /// 单元素写入；越界返回 IndexOutOfRange
    pub fn set(&mut self, index: usize, value: f64) -> Result<(), ModelError> {
        let len = self.data.len();
        let slot = self
            .data
            .get_mut(index)
            .ok_or(ModelError::IndexOutOfRange { index, len })?;
        *slot = value;
        Ok(())
    }

    /// 调整长度，新增位置补 0
    pub fn resize_to(&mut self, len: usize) {
        self.data.resize(len, 0.0);
    }
}
