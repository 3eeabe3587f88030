// 该文件是 Renhai （人海） 项目的一部分。
// src/output/memory_record.rs - 内存记录存储
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::sanitize_filename,
  output::{
    GroupId, NewGroup, NewPrediction, ObservationMethod, Prediction, PredictionGroup,
    PredictionId, PredictionStore, StoreError,
  },
};

#[derive(Default)]
struct Records {
  groups: Vec<(PredictionGroup, Vec<u8>)>,
  predictions: Vec<(Prediction, Vec<u8>)>,
}

/// 进程内存储，进程退出后记录即丢失
#[derive(Default)]
pub struct MemoryStore {
  records: Mutex<Records>,
}

impl FromUrlWithScheme for MemoryStore {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryStore {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch(format!(
        "期望存储方式 '{}', 实际存储方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(Self::new())
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Records>, StoreError> {
    self
      .records
      .lock()
      .map_err(|_| StoreError::Unavailable("内存存储锁已失效".to_string()))
  }
}

impl PredictionStore for MemoryStore {
  fn create_group(&self, group: NewGroup<'_>) -> Result<GroupId, StoreError> {
    let id = GroupId::generate();
    let input_image = format!("memory:groups/{}/{}", id, sanitize_filename(group.filename));
    let record = group.into_record(id, input_image);
    self.lock()?.groups.push((record, group.image.to_vec()));
    Ok(id)
  }

  fn create_prediction(&self, prediction: NewPrediction<'_>) -> Result<PredictionId, StoreError> {
    let mut records = self.lock()?;
    if !records.groups.iter().any(|(g, _)| g.id == prediction.group) {
      return Err(StoreError::UnknownGroup(prediction.group));
    }

    let sequence = records
      .predictions
      .iter()
      .filter(|(p, _)| p.group == prediction.group)
      .count() as u32;
    let id = PredictionId::generate();
    let record = Prediction {
      id,
      group: prediction.group,
      sequence,
      method: ObservationMethod::Ai,
      model: prediction.entry.model,
      weight: prediction.entry.weight,
      count: prediction.count,
      density_map: format!("memory:density_maps/{}.png", id),
      created_at: Utc::now(),
    };
    records
      .predictions
      .push((record, prediction.density_png.to_vec()));
    Ok(id)
  }

  fn group(&self, id: GroupId) -> Result<PredictionGroup, StoreError> {
    self
      .lock()?
      .groups
      .iter()
      .find(|(g, _)| g.id == id)
      .map(|(g, _)| g.clone())
      .ok_or(StoreError::UnknownGroup(id))
  }

  fn groups(&self) -> Result<Vec<PredictionGroup>, StoreError> {
    Ok(self.lock()?.groups.iter().map(|(g, _)| g.clone()).collect())
  }

  fn predictions(&self, group: GroupId) -> Result<Vec<Prediction>, StoreError> {
    let records = self.lock()?;
    if !records.groups.iter().any(|(g, _)| g.id == group) {
      return Err(StoreError::UnknownGroup(group));
    }
    Ok(
      records
        .predictions
        .iter()
        .filter(|(p, _)| p.group == group)
        .map(|(p, _)| p.clone())
        .collect(),
    )
  }

  fn input_image(&self, group: &PredictionGroup) -> Result<Vec<u8>, StoreError> {
    self
      .lock()?
      .groups
      .iter()
      .find(|(g, _)| g.id == group.id)
      .map(|(_, image)| image.clone())
      .ok_or_else(|| StoreError::MissingRecord(group.input_image.clone()))
  }

  fn density_map(&self, prediction: &Prediction) -> Result<Vec<u8>, StoreError> {
    self
      .lock()?
      .predictions
      .iter()
      .find(|(p, _)| p.id == prediction.id)
      .map(|(_, png)| png.clone())
      .ok_or_else(|| StoreError::MissingRecord(prediction.density_map.clone()))
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::catalog::{CountingModel, ModelWeightEntry, WeightSet};

  #[test]
  fn keeps_predictions_per_group() {
    let store = MemoryStore::new();
    let new_group = NewGroup {
      image: b"jpeg",
      filename: "rally.jpg",
      event_name: Some("Rally"),
      city: "Austin",
      state: Some("TX"),
      country: None,
      date: NaiveDate::from_ymd_opt(2025, 4, 5).unwrap(),
    };
    let a = store.create_group(new_group).unwrap();
    let b = store.create_group(new_group).unwrap();

    let entry = ModelWeightEntry::new(CountingModel::DmCount, WeightSet::Qnrf);
    let id = store
      .create_prediction(NewPrediction::new(a, entry, 99.999, b"png"))
      .unwrap();

    let predictions = store.predictions(a).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].id, id);
    assert_eq!(predictions[0].count, 100.0);
    assert_eq!(predictions[0].method, ObservationMethod::Ai);
    assert_eq!(store.group(a).unwrap().event_name.as_deref(), Some("Rally"));
    assert_eq!(store.density_map(&predictions[0]).unwrap(), b"png");
    assert!(store.predictions(b).unwrap().is_empty());
    assert_eq!(store.groups().unwrap().len(), 2);
    assert_eq!(store.input_image(&store.group(b).unwrap()).unwrap(), b"jpeg");
  }

  #[test]
  fn rejects_unknown_group() {
    let store = MemoryStore::new();
    let missing = GroupId::generate();
    assert!(matches!(store.group(missing), Err(StoreError::UnknownGroup(_))));
    assert!(matches!(
      store.create_prediction(NewPrediction::new(
        missing,
        ModelWeightEntry::new(CountingModel::Bay, WeightSet::Sha),
        1.0,
        b"png"
      )),
      Err(StoreError::UnknownGroup(_))
    ));
  }
}
