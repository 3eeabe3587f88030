// 该文件是 Renhai （人海） 项目的一部分。
// src/output.rs - 结果记录与持久化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::{
  FromUrl, FromUrlWithScheme,
  catalog::{CountingModel, ModelWeightEntry, WeightSet},
};

pub mod density_map;
pub use self::density_map::{DensityMapEncoder, EncodeError};

mod directory_record;
pub use self::directory_record::DirectoryStore;

mod memory_record;
pub use self::memory_record::MemoryStore;

macro_rules! record_id {
  ($name:ident) => {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct $name(Uuid);

    impl $name {
      pub fn generate() -> Self {
        Self(Uuid::new_v4())
      }

      pub fn as_uuid(&self) -> Uuid {
        self.0
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
      }
    }

    impl FromStr for $name {
      type Err = uuid::Error;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
      }
    }
  };
}

record_id!(GroupId);
record_id!(PredictionId);

/// 计数以两位小数保存
pub fn round_count(count: f64) -> f64 {
  (count * 100.0).round() / 100.0
}

/// 一次上传：输入图像与事件信息
#[derive(Debug, Clone, Copy)]
pub struct NewGroup<'a> {
  pub image: &'a [u8],
  pub filename: &'a str,
  pub event_name: Option<&'a str>,
  pub city: &'a str,
  pub state: Option<&'a str>,
  pub country: Option<&'a str>,
  pub date: NaiveDate,
}

impl NewGroup<'_> {
  pub(crate) fn into_record(self, id: GroupId, input_image: String) -> PredictionGroup {
    PredictionGroup {
      id,
      input_image,
      event_name: self.event_name.map(str::to_string),
      city: self.city.to_string(),
      state: self.state.map(str::to_string),
      country: self.country.map(str::to_string),
      date: self.date,
      created_at: Utc::now(),
    }
  }
}

/// 观测方式。本程序只产生 `Ai` 记录，其余取值用于读取人工录入的观测。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObservationMethod {
  Clicker,
  Eyeball,
  #[default]
  Ai,
}

/// 一个成功组合的完整结果，一次调用原子地写入
#[derive(Debug, Clone, Copy)]
pub struct NewPrediction<'a> {
  pub group: GroupId,
  pub entry: ModelWeightEntry,
  pub count: f64,
  pub density_png: &'a [u8],
}

impl<'a> NewPrediction<'a> {
  pub fn new(group: GroupId, entry: ModelWeightEntry, count: f64, density_png: &'a [u8]) -> Self {
    Self {
      group,
      entry,
      count: round_count(count),
      density_png,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionGroup {
  pub id: GroupId,
  /// 存储内的输入图像引用
  pub input_image: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub event_name: Option<String>,
  pub city: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub state: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub country: Option<String>,
  pub date: NaiveDate,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
  pub id: PredictionId,
  pub group: GroupId,
  /// 组内的写入序号，从 0 开始，列举时按它排序
  #[serde(default)]
  pub sequence: u32,
  #[serde(default)]
  pub method: ObservationMethod,
  pub model: CountingModel,
  pub weight: WeightSet,
  pub count: f64,
  /// 存储内的密度图引用
  pub density_map: String,
  pub created_at: DateTime<Utc>,
}

impl Prediction {
  pub fn entry(&self) -> ModelWeightEntry {
    ModelWeightEntry::new(self.model, self.weight)
  }
}

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("存储不可用: {0}")]
  Unavailable(String),
  #[error("预测组不存在: {0}")]
  UnknownGroup(GroupId),
  #[error("记录不存在: {0}")]
  MissingRecord(String),
  #[error("记录损坏 {path}: {reason}")]
  Corrupt { path: String, reason: String },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl StoreError {
  /// 存储整体不可达，后续写入也不会成功
  pub fn is_unavailable(&self) -> bool {
    matches!(self, StoreError::Unavailable(_))
  }
}

/// 持久化网关。每次写入都是原子的，不会出现写了一半的记录。
pub trait PredictionStore: Send + Sync {
  fn create_group(&self, group: NewGroup<'_>) -> Result<GroupId, StoreError>;
  fn create_prediction(&self, prediction: NewPrediction<'_>) -> Result<PredictionId, StoreError>;

  fn group(&self, id: GroupId) -> Result<PredictionGroup, StoreError>;
  /// 按创建时间排序
  fn groups(&self) -> Result<Vec<PredictionGroup>, StoreError>;
  /// 按创建顺序排列的组内预测
  fn predictions(&self, group: GroupId) -> Result<Vec<Prediction>, StoreError>;

  fn input_image(&self, group: &PredictionGroup) -> Result<Vec<u8>, StoreError>;
  fn density_map(&self, prediction: &Prediction) -> Result<Vec<u8>, StoreError>;
}

pub enum StoreWrapper {
  Directory(DirectoryStore),
  Memory(MemoryStore),
}

impl FromUrl for StoreWrapper {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      DirectoryStore::SCHEME => Ok(StoreWrapper::Directory(DirectoryStore::from_url(url)?)),
      MemoryStore::SCHEME => Ok(StoreWrapper::Memory(MemoryStore::from_url(url)?)),
      other => Err(StoreError::SchemeMismatch(format!(
        "不支持的存储方案 '{}'",
        other
      ))),
    }
  }
}

impl PredictionStore for StoreWrapper {
  fn create_group(&self, group: NewGroup<'_>) -> Result<GroupId, StoreError> {
    match self {
      StoreWrapper::Directory(store) => store.create_group(group),
      StoreWrapper::Memory(store) => store.create_group(group),
    }
  }

  fn create_prediction(&self, prediction: NewPrediction<'_>) -> Result<PredictionId, StoreError> {
    match self {
      StoreWrapper::Directory(store) => store.create_prediction(prediction),
      StoreWrapper::Memory(store) => store.create_prediction(prediction),
    }
  }

  fn group(&self, id: GroupId) -> Result<PredictionGroup, StoreError> {
    match self {
      StoreWrapper::Directory(store) => store.group(id),
      StoreWrapper::Memory(store) => store.group(id),
    }
  }

  fn groups(&self) -> Result<Vec<PredictionGroup>, StoreError> {
    match self {
      StoreWrapper::Directory(store) => store.groups(),
      StoreWrapper::Memory(store) => store.groups(),
    }
  }

  fn predictions(&self, group: GroupId) -> Result<Vec<Prediction>, StoreError> {
    match self {
      StoreWrapper::Directory(store) => store.predictions(group),
      StoreWrapper::Memory(store) => store.predictions(group),
    }
  }

  fn input_image(&self, group: &PredictionGroup) -> Result<Vec<u8>, StoreError> {
    match self {
      StoreWrapper::Directory(store) => store.input_image(group),
      StoreWrapper::Memory(store) => store.input_image(group),
    }
  }

  fn density_map(&self, prediction: &Prediction) -> Result<Vec<u8>, StoreError> {
    match self {
      StoreWrapper::Directory(store) => store.density_map(prediction),
      StoreWrapper::Memory(store) => store.density_map(prediction),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counts_keep_two_decimals() {
    assert_eq!(round_count(10.0), 10.0);
    assert_eq!(round_count(123.456), 123.46);
    assert_eq!(round_count(0.004), 0.0);
  }

  #[test]
  fn ids_round_trip_through_display() {
    let id = GroupId::generate();
    let parsed: GroupId = id.to_string().parse().unwrap();
    assert_eq!(parsed, id);
    assert_eq!(id.to_string().len(), 32);
  }

  #[test]
  fn records_without_method_read_as_ai() {
    let json = r#"{
      "id": "6f1c1f3e9a6d4b7c8e2f0a1b2c3d4e5f",
      "group": "0a1b2c3d4e5f40718293a4b5c6d7e8f9",
      "model": "DM-Count",
      "weight": "SHA",
      "count": 12.5,
      "density_map": "groups/x/density_maps/y.png",
      "created_at": "2025-10-18T12:00:00Z"
    }"#;
    let prediction: Prediction = serde_json::from_str(json).unwrap();
    assert_eq!(prediction.method, ObservationMethod::Ai);
    assert_eq!(prediction.sequence, 0);

    let manual: ObservationMethod = serde_json::from_str(r#""CLICKER""#).unwrap();
    assert_eq!(manual, ObservationMethod::Clicker);
  }

  #[test]
  fn wrapper_dispatches_on_scheme() {
    let memory = StoreWrapper::from_url(&Url::parse("memory:").unwrap()).unwrap();
    assert!(matches!(memory, StoreWrapper::Memory(_)));

    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let folder = StoreWrapper::from_url(&url).unwrap();
    assert!(matches!(folder, StoreWrapper::Directory(_)));

    assert!(matches!(
      StoreWrapper::from_url(&Url::parse("postgres://db/crowd").unwrap()),
      Err(StoreError::SchemeMismatch(_))
    ));
  }
}
