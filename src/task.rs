// 该文件是 Renhai （人海） 项目的一部分。
// src/task.rs - 批量估计任务
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  catalog::{Catalog, ModelWeightEntry},
  config::{BatchConfig, ConfigError},
  input::{ScratchError, ScratchFile, ScratchStore},
  model::{CountingOracle, EstimationResult, OracleAdapter},
  output::{
    DensityMapEncoder, GroupId, NewPrediction, PredictionId, PredictionStore, StoreError,
  },
  request::{RequestError, UploadRequest},
};

/// 取消标志。可在线程间共享，例如交给 Ctrl-C 处理函数。
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 在收到 Ctrl-C 时设置取消标志
  pub fn cancel_on_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let token = self.clone();
    ctrlc::set_handler(move || {
      warn!("收到中断信号，当前组合结束后停止");
      token.cancel();
    })
  }
}

/// 一个没有产生预测记录的组合
#[derive(Debug, Clone, PartialEq)]
pub struct CombinationFailure {
  pub entry: ModelWeightEntry,
  pub reason: String,
}

/// 一次请求的处理结果
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
  pub group: GroupId,
  /// 按目录顺序保存的预测记录
  pub predictions: Vec<PredictionId>,
  pub failures: Vec<CombinationFailure>,
  pub cancelled: bool,
}

impl BatchReport {
  fn new(group: GroupId) -> Self {
    Self {
      group,
      predictions: Vec::new(),
      failures: Vec::new(),
      cancelled: false,
    }
  }

  fn fail(&mut self, entry: ModelWeightEntry, reason: impl ToString) {
    self.failures.push(CombinationFailure {
      entry,
      reason: reason.to_string(),
    });
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("请求无效: {0}")]
  InvalidRequest(#[from] RequestError),
  #[error("无法创建预测组: {0}")]
  GroupRejected(StoreError),
  #[error("预测组 {group} 的临时文件错误: {source}")]
  Scratch { group: GroupId, source: ScratchError },
  #[error("预测组 {group} 的结果无法保存: {source}")]
  Persistence { group: GroupId, source: StoreError },
}

impl PipelineError {
  /// 出错前已经创建的预测组
  pub fn group(&self) -> Option<GroupId> {
    match self {
      PipelineError::InvalidRequest(_) | PipelineError::GroupRejected(_) => None,
      PipelineError::Scratch { group, .. } | PipelineError::Persistence { group, .. } => {
        Some(*group)
      }
    }
  }
}

/// 对一张上传图像依次运行目录中的全部模型/权重组合，
/// 把每个成功组合的计数与密度图写入同一个预测组。
pub struct BatchEstimator<O, S> {
  catalog: Catalog,
  adapter: OracleAdapter<O>,
  store: S,
  scratch: ScratchStore,
  encoder: DensityMapEncoder,
}

impl<O: CountingOracle, S: PredictionStore> BatchEstimator<O, S> {
  pub fn new(config: BatchConfig, oracle: O, store: S) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self {
      catalog: config.catalog,
      adapter: OracleAdapter::new(oracle),
      store,
      scratch: ScratchStore::new(config.scratch_dir),
      encoder: config.encoder,
    })
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  pub fn catalog(&self) -> &Catalog {
    &self.catalog
  }

  pub fn run(
    &self,
    request: &UploadRequest,
    cancel: &CancelToken,
  ) -> Result<BatchReport, PipelineError> {
    request.validate()?;

    let group = self
      .store
      .create_group(request.as_new_group())
      .map_err(PipelineError::GroupRejected)?;
    info!(
      "预测组已创建: {} ({}, {})",
      group, request.event.city, request.event.date
    );

    let scratch = self
      .scratch
      .acquire(&request.image, &request.filename)
      .map_err(|source| PipelineError::Scratch { group, source })?;

    let result = self.estimate_all(group, &scratch, cancel);
    scratch.release();

    match &result {
      Ok(report) => info!(
        "预测组 {} 处理完成: 成功 {} 个, 失败 {} 个{}",
        group,
        report.predictions.len(),
        report.failures.len(),
        if report.cancelled { ", 已取消" } else { "" }
      ),
      Err(e) => error!("预测组 {} 处理中止: {}", group, e),
    }
    result
  }

  fn estimate_all(
    &self,
    group: GroupId,
    scratch: &ScratchFile,
    cancel: &CancelToken,
  ) -> Result<BatchReport, PipelineError> {
    let dimensions = self
      .adapter
      .source_dimensions(scratch.path())
      .map_err(|source| PipelineError::Scratch { group, source })?;
    debug!("源图像尺寸: {}x{}", dimensions.0, dimensions.1);

    let mut report = BatchReport::new(group);
    let total = self.catalog.len();
    for (index, &entry) in self.catalog.iter().enumerate() {
      if cancel.is_cancelled() {
        warn!("任务已取消，跳过剩余 {} 个组合", total - index);
        report.cancelled = true;
        break;
      }
      if !scratch.path().is_file() {
        return Err(PipelineError::Scratch {
          group,
          source: ScratchError::Unreadable {
            path: scratch.path().to_path_buf(),
            reason: "临时文件在处理过程中消失".to_string(),
          },
        });
      }

      info!("({}/{}) 推理组合 {}", index + 1, total, entry);
      let (count, density) = match self.adapter.estimate(scratch.path(), entry) {
        EstimationResult::Success { count, density } => (count, density),
        EstimationResult::Failure { reason } => {
          warn!("组合 {} 推理失败: {}", entry, reason);
          report.fail(entry, reason);
          continue;
        }
      };

      let png = match self.encoder.encode(&density, Some(dimensions)) {
        Ok(png) => png,
        Err(e) => {
          warn!("组合 {} 密度图编码失败: {}", entry, e);
          report.fail(entry, e);
          continue;
        }
      };

      match self
        .store
        .create_prediction(NewPrediction::new(group, entry, count, &png))
      {
        Ok(id) => {
          info!("组合 {} 计数 {:.2}, 记录 {}", entry, count, id);
          report.predictions.push(id);
        }
        Err(source) if source.is_unavailable() => {
          return Err(PipelineError::Persistence { group, source });
        }
        Err(e) => {
          warn!("组合 {} 结果保存失败: {}", entry, e);
          report.fail(entry, e);
        }
      }
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, io::Cursor, path::Path};

  use chrono::NaiveDate;
  use image::{GrayImage, ImageFormat};

  use super::*;
  use crate::{
    catalog::{CountingModel, WeightSet},
    density::DensityMatrix,
    model::{OracleError, OracleOutput},
    output::MemoryStore,
  };

  fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    GrayImage::new(width, height)
      .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
      .unwrap();
    bytes
  }

  fn request() -> UploadRequest {
    UploadRequest::new(
      png(8, 6),
      "square.png",
      "Boston",
      NaiveDate::from_ymd_opt(2025, 6, 14).unwrap(),
    )
  }

  /// 记录每次调用的组合，并在第 `cancel_after` 次调用后触发取消
  struct Recording {
    seen: RefCell<Vec<ModelWeightEntry>>,
    cancel: Option<(usize, CancelToken)>,
  }

  impl CountingOracle for Recording {
    fn get_count(
      &self,
      image_path: &Path,
      entry: ModelWeightEntry,
    ) -> Result<OracleOutput, OracleError> {
      assert!(image_path.is_file());
      self.seen.borrow_mut().push(entry);
      if let Some((after, token)) = &self.cancel
        && self.seen.borrow().len() == *after
      {
        token.cancel();
      }
      Ok(OracleOutput {
        count: 3.0,
        density: DensityMatrix::filled(4, 3, 0.0).unwrap(),
      })
    }
  }

  #[test]
  fn visits_catalog_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Recording {
      seen: RefCell::new(Vec::new()),
      cancel: None,
    };
    let catalog = Catalog::full();
    let estimator = BatchEstimator::new(
      BatchConfig::new(dir.path(), catalog.clone()),
      &oracle,
      MemoryStore::new(),
    )
    .unwrap();

    let report = estimator.run(&request(), &CancelToken::new()).unwrap();
    assert_eq!(report.predictions.len(), 12);
    assert!(report.failures.is_empty());
    assert_eq!(oracle.seen.borrow().as_slice(), catalog.entries());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[test]
  fn stops_before_next_entry_when_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancelToken::new();
    let oracle = Recording {
      seen: RefCell::new(Vec::new()),
      cancel: Some((2, token.clone())),
    };
    let estimator = BatchEstimator::new(
      BatchConfig::new(dir.path(), Catalog::full()),
      &oracle,
      MemoryStore::new(),
    )
    .unwrap();

    let report = estimator.run(&request(), &token).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.predictions.len(), 2);
    assert_eq!(oracle.seen.borrow().len(), 2);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[test]
  fn invalid_request_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = Recording {
      seen: RefCell::new(Vec::new()),
      cancel: None,
    };
    let estimator = BatchEstimator::new(
      BatchConfig::new(dir.path(), Catalog::full()),
      &oracle,
      MemoryStore::new(),
    )
    .unwrap();

    let mut bad = request();
    bad.event.city = String::new();
    let err = estimator.run(&bad, &CancelToken::new()).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRequest(RequestError::EmptyCity)));
    assert_eq!(err.group(), None);
    assert!(estimator.store().groups().unwrap().is_empty());
    assert!(oracle.seen.borrow().is_empty());
  }

  #[test]
  fn duplicate_entries_run_as_listed() {
    let dir = tempfile::tempdir().unwrap();
    let entry = ModelWeightEntry::new(CountingModel::SfaNet, WeightSet::Shb);
    let oracle = Recording {
      seen: RefCell::new(Vec::new()),
      cancel: None,
    };
    let estimator = BatchEstimator::new(
      BatchConfig::new(dir.path(), Catalog::new(vec![entry, entry])),
      &oracle,
      MemoryStore::new(),
    )
    .unwrap();

    let report = estimator.run(&request(), &CancelToken::new()).unwrap();
    assert_eq!(report.predictions.len(), 2);
    assert_eq!(oracle.seen.borrow().as_slice(), &[entry, entry]);
  }

  #[test]
  fn pipeline_error_reports_group() {
    let group = GroupId::generate();
    let err = PipelineError::Persistence {
      group,
      source: StoreError::Unavailable("down".to_string()),
    };
    assert_eq!(err.group(), Some(group));
  }
}
