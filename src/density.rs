// 该文件是 Renhai （人海） 项目的一部分。
// src/density.rs - 密度矩阵定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DensityError {
  #[error("密度矩阵为空")]
  Empty,
  #[error("密度矩阵行长度不一致: 第 {row} 行长度 {found}, 期望 {expected}")]
  Ragged {
    row: usize,
    expected: usize,
    found: usize,
  },
  #[error("密度矩阵包含非有限值: ({x}, {y})")]
  NonFinite { x: usize, y: usize },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {found}")]
  LengthMismatch { expected: usize, found: usize },
}

/// 行优先存储的二维密度矩阵，宽高均不为零，所有值均为有限数
#[derive(Debug, Clone, PartialEq)]
pub struct DensityMatrix {
  width: usize,
  height: usize,
  data: Box<[f32]>,
}

impl DensityMatrix {
  pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self, DensityError> {
    if width == 0 || height == 0 {
      return Err(DensityError::Empty);
    }
    if data.len() != width * height {
      return Err(DensityError::LengthMismatch {
        expected: width * height,
        found: data.len(),
      });
    }
    if let Some(idx) = data.iter().position(|v| !v.is_finite()) {
      return Err(DensityError::NonFinite {
        x: idx % width,
        y: idx / width,
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 由推理后端返回的嵌套数组构造
  pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, DensityError> {
    let height = rows.len();
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if let Some((row, found)) = rows
      .iter()
      .map(Vec::len)
      .enumerate()
      .find(|&(_, len)| len != width)
    {
      return Err(DensityError::Ragged {
        row,
        expected: width,
        found,
      });
    }

    Self::from_vec(width, height, rows.into_iter().flatten().collect())
  }

  /// 所有元素相同的矩阵
  pub fn filled(width: usize, height: usize, value: f32) -> Result<Self, DensityError> {
    Self::from_vec(width, height, vec![value; width * height])
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn get(&self, x: usize, y: usize) -> Option<f32> {
    if x < self.width && y < self.height {
      Some(self.data[y * self.width + x])
    } else {
      None
    }
  }

  pub fn values(&self) -> &[f32] {
    &self.data
  }

  /// 返回 (min, max)；矩阵非空，因此总是有值
  pub fn range(&self) -> (f32, f32) {
    self
      .data
      .iter()
      .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
        (lo.min(v), hi.max(v))
      })
  }

  /// 所有密度之和，即矩阵本身对应的人数
  pub fn sum(&self) -> f64 {
    self.data.iter().map(|&v| v as f64).sum()
  }
}
