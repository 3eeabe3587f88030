// 该文件是 Renhai （人海） 项目的一部分。
// src/request.rs - 估计请求参数
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

use chrono::NaiveDate;
use thiserror::Error;

use crate::output::NewGroup;

/// 城市、省/州、国家名的最大字符数
pub const MAX_PLACE_CHARS: usize = 100;
/// 事件名的最大字符数
pub const MAX_EVENT_NAME_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum RequestError {
  #[error("上传的图像为空")]
  EmptyImage,
  #[error("城市不能为空")]
  EmptyCity,
  #[error("{field} 过长: {len} 个字符，最多 {max} 个")]
  TooLong {
    field: &'static str,
    len: usize,
    max: usize,
  },
  #[error("无法读取图像文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 事件信息。只有城市与日期是必填的。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventInfo {
  pub name: Option<String>,
  pub city: String,
  pub state: Option<String>,
  pub country: Option<String>,
  pub date: NaiveDate,
}

fn non_blank(value: Option<&str>) -> Option<String> {
  value
    .map(str::trim)
    .filter(|v| !v.is_empty())
    .map(str::to_string)
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<(), RequestError> {
  let len = value.chars().count();
  if len > max {
    return Err(RequestError::TooLong { field, len, max });
  }
  Ok(())
}

/// 一次估计请求：图像字节、原始文件名与事件信息
#[derive(Debug, Clone)]
pub struct UploadRequest {
  pub image: Vec<u8>,
  pub filename: String,
  pub event: EventInfo,
}

impl UploadRequest {
  pub fn new(
    image: Vec<u8>,
    filename: impl Into<String>,
    city: impl AsRef<str>,
    date: NaiveDate,
  ) -> Self {
    Self {
      image,
      filename: filename.into(),
      event: EventInfo {
        name: None,
        city: city.as_ref().trim().to_string(),
        state: None,
        country: None,
        date,
      },
    }
  }

  pub fn with_event_name(mut self, name: Option<&str>) -> Self {
    self.event.name = non_blank(name);
    self
  }

  pub fn with_region(mut self, state: Option<&str>, country: Option<&str>) -> Self {
    self.event.state = non_blank(state);
    self.event.country = non_blank(country);
    self
  }

  /// 从本地文件构造请求
  pub fn from_file(path: &Path, city: impl AsRef<str>, date: NaiveDate) -> Result<Self, RequestError> {
    let image = std::fs::read(path).map_err(|source| RequestError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let filename = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();
    Ok(Self::new(image, filename, city, date))
  }

  /// 在开始处理之前检查请求
  pub fn validate(&self) -> Result<(), RequestError> {
    if self.image.is_empty() {
      return Err(RequestError::EmptyImage);
    }
    let city = self.event.city.trim();
    if city.is_empty() {
      return Err(RequestError::EmptyCity);
    }
    check_length("城市", city, MAX_PLACE_CHARS)?;
    if let Some(name) = &self.event.name {
      check_length("事件名", name, MAX_EVENT_NAME_CHARS)?;
    }
    if let Some(state) = &self.event.state {
      check_length("省/州", state, MAX_PLACE_CHARS)?;
    }
    if let Some(country) = &self.event.country {
      check_length("国家", country, MAX_PLACE_CHARS)?;
    }
    Ok(())
  }

  pub fn as_new_group(&self) -> NewGroup<'_> {
    NewGroup {
      image: &self.image,
      filename: &self.filename,
      event_name: self.event.name.as_deref(),
      city: &self.event.city,
      state: self.event.state.as_deref(),
      country: self.event.country.as_deref(),
      date: self.event.date,
    }
  }
}
