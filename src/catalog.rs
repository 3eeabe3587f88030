// 该文件是 Renhai （人海） 项目的一部分。
// src/catalog.rs - 模型/权重组合目录
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

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
  #[error("未知模型: {0}")]
  UnknownModel(String),
  #[error("未知权重: {0}")]
  UnknownWeight(String),
  #[error("目录项格式错误，应为 MODEL:WEIGHT: {0}")]
  MalformedEntry(String),
}

/// 人群计数模型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CountingModel {
  #[serde(rename = "CSRNet")]
  CsrNet,
  #[serde(rename = "Bay")]
  Bay,
  #[serde(rename = "DM-Count")]
  DmCount,
  #[serde(rename = "SFANet")]
  SfaNet,
}

impl CountingModel {
  pub const ALL: [CountingModel; 4] = [
    CountingModel::CsrNet,
    CountingModel::Bay,
    CountingModel::DmCount,
    CountingModel::SfaNet,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      CountingModel::CsrNet => "CSRNet",
      CountingModel::Bay => "Bay",
      CountingModel::DmCount => "DM-Count",
      CountingModel::SfaNet => "SFANet",
    }
  }
}

impl fmt::Display for CountingModel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CountingModel {
  type Err = CatalogError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| CatalogError::UnknownModel(s.to_string()))
  }
}

/// 模型训练数据集对应的权重
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeightSet {
  #[serde(rename = "SHA")]
  Sha,
  #[serde(rename = "SHB")]
  Shb,
  #[serde(rename = "QNRF")]
  Qnrf,
}

impl WeightSet {
  pub const ALL: [WeightSet; 3] = [WeightSet::Sha, WeightSet::Shb, WeightSet::Qnrf];

  pub fn as_str(&self) -> &'static str {
    match self {
      WeightSet::Sha => "SHA",
      WeightSet::Shb => "SHB",
      WeightSet::Qnrf => "QNRF",
    }
  }
}

impl fmt::Display for WeightSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for WeightSet {
  type Err = CatalogError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|w| w.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| CatalogError::UnknownWeight(s.to_string()))
  }
}

/// 一个（模型，权重）组合。组合本身可能不被推理后端支持，
/// 这属于正常的失败情形，由推理适配器报告。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelWeightEntry {
  pub model: CountingModel,
  pub weight: WeightSet,
}

impl ModelWeightEntry {
  pub const fn new(model: CountingModel, weight: WeightSet) -> Self {
    Self { model, weight }
  }
}

impl fmt::Display for ModelWeightEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.model, self.weight)
  }
}

impl FromStr for ModelWeightEntry {
  type Err = CatalogError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    // DM-Count 自带连字符，因此只按冒号切分
    let (model, weight) = s
      .split_once(':')
      .ok_or_else(|| CatalogError::MalformedEntry(s.to_string()))?;
    Ok(Self {
      model: model.parse()?,
      weight: weight.parse()?,
    })
  }
}

/// 有序的组合目录，遍历顺序即声明顺序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
  entries: Vec<ModelWeightEntry>,
}

impl Catalog {
  pub fn new(entries: Vec<ModelWeightEntry>) -> Self {
    Self { entries }
  }

  /// 全部 4 × 3 组合，按模型优先的顺序排列
  pub fn full() -> Self {
    let entries = CountingModel::ALL
      .into_iter()
      .flat_map(|model| {
        WeightSet::ALL
          .into_iter()
          .map(move |weight| ModelWeightEntry::new(model, weight))
      })
      .collect();
    Self { entries }
  }

  /// 解析逗号分隔的 `MODEL:WEIGHT` 列表
  pub fn parse_list(s: &str) -> Result<Self, CatalogError> {
    let entries = s
      .split(',')
      .map(str::trim)
      .filter(|item| !item.is_empty())
      .map(str::parse)
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self { entries })
  }

  pub fn entries(&self) -> &[ModelWeightEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// 返回第一个重复出现的组合
  pub fn first_duplicate(&self) -> Option<ModelWeightEntry> {
    self
      .entries
      .iter()
      .enumerate()
      .find(|(i, entry)| self.entries[..*i].contains(entry))
      .map(|(_, entry)| *entry)
  }

  pub fn iter(&self) -> std::slice::Iter<'_, ModelWeightEntry> {
    self.entries.iter()
  }
}

impl<'a> IntoIterator for &'a Catalog {
  type Item = &'a ModelWeightEntry;
  type IntoIter = std::slice::Iter<'a, ModelWeightEntry>;

  fn into_iter(self) -> Self::IntoIter {
    self.entries.iter()
  }
}

impl FromIterator<ModelWeightEntry> for Catalog {
  fn from_iter<T: IntoIterator<Item = ModelWeightEntry>>(iter: T) -> Self {
    Self {
      entries: iter.into_iter().collect(),
    }
  }
}
