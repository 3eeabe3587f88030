// 该文件是 Renhai （人海） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  catalog::{Catalog, ModelWeightEntry},
  output::DensityMapEncoder,
};

const DEFAULT_SCRATCH_DIR: &str = "renhai-scratch";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("临时目录路径是一个文件: {0}")]
  ScratchDirIsFile(PathBuf),
  #[error("缺少配置项: {0}")]
  Missing(&'static str),
}

/// 密度图缩放方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFilter {
  Nearest,
  #[default]
  Bilinear,
}

impl From<ResizeFilter> for FilterType {
  fn from(filter: ResizeFilter) -> Self {
    match filter {
      ResizeFilter::Nearest => FilterType::Nearest,
      ResizeFilter::Bilinear => FilterType::Triangle,
    }
  }
}

/// 配置文件内容。命令行参数可以覆盖其中的各项。
///
/// ```toml
/// scratch_dir = "/var/tmp/renhai"
/// store = "folder:///var/lib/renhai"
/// oracle = "command:///usr/bin/python3?arg=/opt/renhai/lwcc_oracle.py"
/// catalog = ["CSRNet:SHA", "DM-Count:QNRF"]
/// resize_filter = "bilinear"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  pub scratch_dir: PathBuf,
  pub store: Option<Url>,
  pub oracle: Option<Url>,
  #[serde(with = "catalog_labels")]
  pub catalog: Catalog,
  pub resize_filter: ResizeFilter,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      scratch_dir: std::env::temp_dir().join(DEFAULT_SCRATCH_DIR),
      store: None,
      oracle: None,
      catalog: Catalog::full(),
      resize_filter: ResizeFilter::default(),
    }
  }
}

impl PipelineConfig {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config: Self = toml::from_str(&content)?;
    info!("已加载配置文件: {}", path.display());
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.batch_config().validate()
  }

  pub fn store(&self) -> Result<&Url, ConfigError> {
    self.store.as_ref().ok_or(ConfigError::Missing("store"))
  }

  pub fn oracle(&self) -> Result<&Url, ConfigError> {
    self.oracle.as_ref().ok_or(ConfigError::Missing("oracle"))
  }

  /// 用命令行给出的值覆盖配置文件
  pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
    if let Some(scratch_dir) = overrides.scratch_dir {
      self.scratch_dir = scratch_dir;
    }
    if let Some(store) = overrides.store {
      self.store = Some(store);
    }
    if let Some(oracle) = overrides.oracle {
      self.oracle = Some(oracle);
    }
    if let Some(catalog) = overrides.catalog {
      self.catalog = catalog;
    }
    self
  }

  pub fn batch_config(&self) -> BatchConfig {
    BatchConfig {
      scratch_dir: self.scratch_dir.clone(),
      catalog: self.catalog.clone(),
      encoder: DensityMapEncoder::default().with_filter(self.resize_filter.into()),
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
  pub scratch_dir: Option<PathBuf>,
  pub store: Option<Url>,
  pub oracle: Option<Url>,
  pub catalog: Option<Catalog>,
}

/// 批量估计器在构造时接收的全部设置
#[derive(Debug, Clone)]
pub struct BatchConfig {
  pub scratch_dir: PathBuf,
  pub catalog: Catalog,
  pub encoder: DensityMapEncoder,
}

impl BatchConfig {
  pub fn new(scratch_dir: impl Into<PathBuf>, catalog: Catalog) -> Self {
    Self {
      scratch_dir: scratch_dir.into(),
      catalog,
      encoder: DensityMapEncoder::default(),
    }
  }

  pub fn with_encoder(mut self, encoder: DensityMapEncoder) -> Self {
    self.encoder = encoder;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if let Some(entry) = self.catalog.first_duplicate() {
      warn!("目录中存在重复组合 {}，将按出现次数重复推理", entry);
    }
    if self.scratch_dir.is_file() {
      return Err(ConfigError::ScratchDirIsFile(self.scratch_dir.clone()));
    }
    Ok(())
  }
}

/// 目录在配置文件中写作 `"MODEL:WEIGHT"` 字符串列表
mod catalog_labels {
  use serde::{Deserialize, Deserializer, Serializer, de::Error};

  use crate::catalog::{Catalog, ModelWeightEntry};

  pub fn serialize<S: Serializer>(catalog: &Catalog, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(catalog.iter().map(ModelWeightEntry::to_string))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Catalog, D::Error> {
    Vec::<String>::deserialize(deserializer)?
      .iter()
      .map(|label| label.parse::<ModelWeightEntry>().map_err(D::Error::custom))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::{CountingModel, WeightSet};

  #[test]
  fn parses_full_config() {
    let config: PipelineConfig = toml::from_str(
      r#"
scratch_dir = "/var/tmp/renhai"
store = "folder:///var/lib/renhai"
oracle = "command:///usr/bin/python3?arg=/opt/renhai/lwcc_oracle.py"
catalog = ["CSRNet:SHA", "DM-Count:QNRF"]
resize_filter = "nearest"
"#,
    )
    .unwrap();

    assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/renhai"));
    assert_eq!(config.store().unwrap().scheme(), "folder");
    assert_eq!(config.oracle().unwrap().scheme(), "command");
    assert_eq!(
      config.catalog.entries(),
      &[
        ModelWeightEntry::new(CountingModel::CsrNet, WeightSet::Sha),
        ModelWeightEntry::new(CountingModel::DmCount, WeightSet::Qnrf),
      ]
    );
    assert_eq!(config.batch_config().encoder.filter(), FilterType::Nearest);
    config.validate().unwrap();
  }

  #[test]
  fn defaults_to_full_catalog() {
    let config: PipelineConfig = toml::from_str("").unwrap();
    assert_eq!(config.catalog, Catalog::full());
    assert_eq!(config.resize_filter, ResizeFilter::Bilinear);
    assert!(matches!(config.store(), Err(ConfigError::Missing("store"))));
  }

  #[test]
  fn rejects_unknown_labels_and_keys() {
    assert!(toml::from_str::<PipelineConfig>(r#"catalog = ["YOLO:SHA"]"#).is_err());
    assert!(toml::from_str::<PipelineConfig>(r#"workers = 4"#).is_err());
  }

  #[test]
  fn keeps_duplicate_entries_in_order() {
    let config: PipelineConfig =
      toml::from_str(r#"catalog = ["Bay:SHA", "Bay:SHB", "Bay:SHA"]"#).unwrap();
    config.validate().unwrap();
    let bay_sha = ModelWeightEntry::new(CountingModel::Bay, WeightSet::Sha);
    assert_eq!(config.catalog.len(), 3);
    assert_eq!(config.catalog.first_duplicate(), Some(bay_sha));
    assert_eq!(config.batch_config().catalog.entries()[2], bay_sha);
  }

  #[test]
  fn rejects_scratch_dir_that_is_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("scratch");
    std::fs::write(&file, b"").unwrap();

    let config = BatchConfig::new(&file, Catalog::full());
    assert!(matches!(
      config.validate(),
      Err(ConfigError::ScratchDirIsFile(_))
    ));
  }

  #[test]
  fn command_line_overrides_file() {
    let config: PipelineConfig =
      toml::from_str(r#"store = "memory:"
catalog = ["Bay:SHA"]"#).unwrap();
    let merged = config.merge(ConfigOverrides {
      store: Some(Url::parse("folder:///srv/renhai").unwrap()),
      catalog: Some(Catalog::parse_list("CSRNet:SHB,SFANet:QNRF").unwrap()),
      ..Default::default()
    });
    assert_eq!(merged.store().unwrap().as_str(), "folder:///srv/renhai");
    assert_eq!(merged.catalog.len(), 2);
    assert!(merged.oracle.is_none());
  }

  #[test]
  fn load_reads_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("renhai.toml");
    std::fs::write(&path, "resize_filter = \"nearest\"\n").unwrap();
    let config = PipelineConfig::load(&path).unwrap();
    assert_eq!(config.resize_filter, ResizeFilter::Nearest);
  }

  #[test]
  fn load_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      PipelineConfig::load(&dir.path().join("absent.toml")),
      Err(ConfigError::Io { .. })
    ));
  }
}
