// 该文件是 Renhai （人海） 项目的一部分。
// src/model.rs - 人群计数推理
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

use std::path::Path;

use thiserror::Error;

use crate::{
  catalog::ModelWeightEntry,
  density::{DensityError, DensityMatrix},
};

/// 外部人群计数能力。每次调用独立读取一次图像，不得修改或移动图像文件。
pub trait CountingOracle {
  fn get_count(
    &self,
    image_path: &Path,
    entry: ModelWeightEntry,
  ) -> Result<OracleOutput, OracleError>;
}

impl<T: CountingOracle + ?Sized> CountingOracle for &T {
  fn get_count(
    &self,
    image_path: &Path,
    entry: ModelWeightEntry,
  ) -> Result<OracleOutput, OracleError> {
    (**self).get_count(image_path, entry)
  }
}

impl<T: CountingOracle + ?Sized> CountingOracle for Box<T> {
  fn get_count(
    &self,
    image_path: &Path,
    entry: ModelWeightEntry,
  ) -> Result<OracleOutput, OracleError> {
    (**self).get_count(image_path, entry)
  }
}

/// 推理后端的原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct OracleOutput {
  pub count: f64,
  pub density: DensityMatrix,
}

#[derive(Error, Debug)]
pub enum OracleError {
  #[error("不支持的模型/权重组合 {entry}: {reason}")]
  UnsupportedCombination {
    entry: ModelWeightEntry,
    reason: String,
  },
  #[error("推理运行错误: {0}")]
  Runtime(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("推理输出无效: {0}")]
  InvalidOutput(String),
  #[error("密度矩阵无效: {0}")]
  InvalidDensity(#[from] DensityError),
}

/// 单个组合的估计结果。失败不会中断目录中其余组合的处理。
#[derive(Debug)]
pub enum EstimationResult {
  Success { count: f64, density: DensityMatrix },
  Failure { reason: OracleError },
}

impl EstimationResult {
  pub fn is_success(&self) -> bool {
    matches!(self, EstimationResult::Success { .. })
  }
}

mod adapter;
pub use self::adapter::OracleAdapter;

mod command;
pub use self::command::{CommandOracle, CommandOracleError};
