// 该文件是 Renhai （人海） 项目的一部分。
// src/model/adapter.rs - 推理结果归一化
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

use image::ImageReader;
use tracing::debug;

use crate::{
  catalog::ModelWeightEntry,
  input::ScratchError,
  model::{CountingOracle, EstimationResult, OracleError, OracleOutput},
};

/// 把推理后端的两种结果统一为 [`EstimationResult`]
pub struct OracleAdapter<O> {
  oracle: O,
}

impl<O: CountingOracle> OracleAdapter<O> {
  pub fn new(oracle: O) -> Self {
    Self { oracle }
  }

  pub fn oracle(&self) -> &O {
    &self.oracle
  }

  pub fn estimate(&self, image_path: &Path, entry: ModelWeightEntry) -> EstimationResult {
    debug!("执行推理: {} ({})", entry, image_path.display());
    let now = std::time::Instant::now();
    let result = self
      .oracle
      .get_count(image_path, entry)
      .and_then(check_output);
    debug!("推理结束: {}, 耗时: {:.2?}", entry, now.elapsed());

    match result {
      Ok(OracleOutput { count, density }) => EstimationResult::Success { count, density },
      Err(reason) => EstimationResult::Failure { reason },
    }
  }

  /// 读取源图像的像素尺寸 (宽, 高)，只读取图像头。
  /// 格式按文件内容判断，上传文件名的后缀不可信。
  pub fn source_dimensions(&self, image_path: &Path) -> Result<(u32, u32), ScratchError> {
    let unreadable = |reason: String| ScratchError::Unreadable {
      path: image_path.to_path_buf(),
      reason,
    };

    ImageReader::open(image_path)
      .map_err(|e| unreadable(e.to_string()))?
      .with_guessed_format()
      .map_err(|e| unreadable(e.to_string()))?
      .into_dimensions()
      .map_err(|e| unreadable(e.to_string()))
  }
}

fn check_output(output: OracleOutput) -> Result<OracleOutput, OracleError> {
  if !output.count.is_finite() || output.count < 0.0 {
    return Err(OracleError::InvalidOutput(format!(
      "人数估计值无效: {}",
      output.count
    )));
  }
  Ok(output)
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;

  use super::*;
  use crate::{
    catalog::{CountingModel, WeightSet},
    density::DensityMatrix,
  };

  struct Fixed {
    count: f64,
    calls: Cell<usize>,
  }

  impl CountingOracle for Fixed {
    fn get_count(&self, _: &Path, entry: ModelWeightEntry) -> Result<OracleOutput, OracleError> {
      self.calls.set(self.calls.get() + 1);
      if entry.weight == WeightSet::Qnrf {
        return Err(OracleError::UnsupportedCombination {
          entry,
          reason: "no such weights".to_string(),
        });
      }
      Ok(OracleOutput {
        count: self.count,
        density: DensityMatrix::filled(2, 2, 0.25).unwrap(),
      })
    }
  }

  #[test]
  fn normalizes_both_outcomes() {
    let adapter = OracleAdapter::new(Fixed {
      count: 1.0,
      calls: Cell::new(0),
    });
    let path = Path::new("unused.png");

    let ok = adapter.estimate(path, ModelWeightEntry::new(CountingModel::Bay, WeightSet::Sha));
    assert!(ok.is_success());

    let failed = adapter.estimate(path, ModelWeightEntry::new(CountingModel::Bay, WeightSet::Qnrf));
    assert!(matches!(
      failed,
      EstimationResult::Failure {
        reason: OracleError::UnsupportedCombination { .. }
      }
    ));
    assert_eq!(adapter.oracle().calls.get(), 2);
  }

  #[test]
  fn negative_or_nan_counts_are_failures() {
    for count in [-1.0, f64::NAN] {
      let adapter = OracleAdapter::new(Fixed {
        count,
        calls: Cell::new(0),
      });
      let result = adapter.estimate(
        Path::new("unused.png"),
        ModelWeightEntry::new(CountingModel::CsrNet, WeightSet::Sha),
      );
      assert!(matches!(
        result,
        EstimationResult::Failure {
          reason: OracleError::InvalidOutput(_)
        }
      ));
    }
  }

  #[test]
  fn reads_source_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("source.png");
    image::GrayImage::new(7, 5).save(&path).unwrap();

    let adapter = OracleAdapter::new(Fixed {
      count: 0.0,
      calls: Cell::new(0),
    });
    assert_eq!(adapter.source_dimensions(&path).unwrap(), (7, 5));

    std::fs::write(&path, b"not an image").unwrap();
    assert!(matches!(
      adapter.source_dimensions(&path),
      Err(ScratchError::Unreadable { .. })
    ));
  }
}
