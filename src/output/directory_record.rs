// 该文件是 Renhai （人海） 项目的一部分。
// src/output/directory_record.rs - 目录记录存储
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  fs, io,
  path::{Path, PathBuf},
};

use chrono::Utc;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::sanitize_filename,
  output::{
    GroupId, NewGroup, NewPrediction, ObservationMethod, Prediction, PredictionGroup,
    PredictionId, PredictionStore, StoreError,
  },
};

const GROUPS_DIR: &str = "groups";
const GROUP_FILE: &str = "group.json";
const INPUT_DIR: &str = "input";
const PREDICTIONS_DIR: &str = "predictions";
const DENSITY_MAPS_DIR: &str = "density_maps";

/// 以目录保存的记录:
///
/// ```text
/// <root>/groups/<group>/group.json
/// <root>/groups/<group>/input/<filename>
/// <root>/groups/<group>/predictions/<prediction>.json
/// <root>/groups/<group>/density_maps/<prediction>.png
/// ```
///
/// 组目录先在暂存名下写好再整体改名；预测先写密度图，最后改名写入 json。
/// 以 `.` 开头的条目是未完成的写入，列举时忽略。
#[derive(Debug, Clone)]
pub struct DirectoryStore {
  root: PathBuf,
}

impl FromUrlWithScheme for DirectoryStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryStore {
  type Error = StoreError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StoreError::SchemeMismatch(format!(
        "期望存储方式 '{}', 实际存储方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = urlencoding::decode(url.path())
      .map_err(|e| StoreError::SchemeMismatch(format!("路径编码错误: {}", e)))?;
    Self::open(path.as_ref())
  }
}

impl DirectoryStore {
  /// 打开（必要时创建）存储目录
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    fs::create_dir_all(root.join(GROUPS_DIR)).map_err(|e| {
      StoreError::Unavailable(format!("无法创建存储目录 {}: {}", root.display(), e))
    })?;
    info!("记录存储目录: {}", root.display());
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn groups_dir(&self) -> Result<PathBuf, StoreError> {
    let dir = self.root.join(GROUPS_DIR);
    if !dir.is_dir() {
      return Err(StoreError::Unavailable(format!(
        "存储目录不存在: {}",
        dir.display()
      )));
    }
    Ok(dir)
  }

  fn group_dir(&self, id: GroupId) -> Result<PathBuf, StoreError> {
    let dir = self.groups_dir()?.join(id.to_string());
    if !dir.is_dir() {
      return Err(StoreError::UnknownGroup(id));
    }
    Ok(dir)
  }

  fn reference(&self, path: &Path) -> String {
    path
      .strip_prefix(&self.root)
      .unwrap_or(path)
      .to_string_lossy()
      .replace('\\', "/")
  }

  fn resolve(&self, reference: &str) -> Result<PathBuf, StoreError> {
    let relative = Path::new(reference);
    if relative.is_absolute()
      || relative
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
      return Err(StoreError::MissingRecord(reference.to_string()));
    }
    Ok(self.root.join(relative))
  }
}

impl PredictionStore for DirectoryStore {
  fn create_group(&self, group: NewGroup<'_>) -> Result<GroupId, StoreError> {
    let groups_dir = self.groups_dir()?;
    let id = GroupId::generate();
    let staging = groups_dir.join(format!(".staging-{}", id));
    let target = groups_dir.join(id.to_string());

    let written = (|| -> Result<(), StoreError> {
      fs::create_dir_all(staging.join(INPUT_DIR))?;
      fs::create_dir_all(staging.join(PREDICTIONS_DIR))?;
      fs::create_dir_all(staging.join(DENSITY_MAPS_DIR))?;

      let filename = sanitize_filename(group.filename);
      fs::write(staging.join(INPUT_DIR).join(&filename), group.image)?;
      let input = target.join(INPUT_DIR).join(&filename);

      let record = group.into_record(id, self.reference(&input));
      write_json(&staging.join(GROUP_FILE), &record)?;
      fs::rename(&staging, &target)?;
      Ok(())
    })();

    if let Err(e) = written {
      if let Err(cleanup) = fs::remove_dir_all(&staging)
        && cleanup.kind() != io::ErrorKind::NotFound
      {
        warn!("清理暂存目录失败 {}: {}", staging.display(), cleanup);
      }
      return Err(e);
    }

    debug!("预测组已创建: {}", id);
    Ok(id)
  }

  fn create_prediction(&self, prediction: NewPrediction<'_>) -> Result<PredictionId, StoreError> {
    let group_dir = self.group_dir(prediction.group)?;
    let sequence = next_sequence(&group_dir.join(PREDICTIONS_DIR))?;
    let id = PredictionId::generate();

    let density_path = group_dir.join(DENSITY_MAPS_DIR).join(format!("{}.png", id));
    write_atomic(&density_path, prediction.density_png)?;

    let record = Prediction {
      id,
      group: prediction.group,
      sequence,
      method: ObservationMethod::Ai,
      model: prediction.entry.model,
      weight: prediction.entry.weight,
      count: prediction.count,
      density_map: self.reference(&density_path),
      created_at: Utc::now(),
    };
    let record_path = group_dir.join(PREDICTIONS_DIR).join(format!("{}.json", id));
    if let Err(e) = write_json(&record_path, &record) {
      remove_leftover(&density_path);
      return Err(e);
    }

    debug!("预测已保存: {} ({})", id, prediction.entry);
    Ok(id)
  }

  fn group(&self, id: GroupId) -> Result<PredictionGroup, StoreError> {
    read_json(&self.group_dir(id)?.join(GROUP_FILE))
  }

  fn groups(&self) -> Result<Vec<PredictionGroup>, StoreError> {
    let mut groups = Vec::new();
    for entry in fs::read_dir(self.groups_dir()?)? {
      let entry = entry?;
      if is_hidden(&entry.path()) || !entry.file_type()?.is_dir() {
        continue;
      }
      groups.push(read_json::<PredictionGroup>(&entry.path().join(GROUP_FILE))?);
    }
    groups.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    Ok(groups)
  }

  fn predictions(&self, group: GroupId) -> Result<Vec<Prediction>, StoreError> {
    let mut predictions = Vec::new();
    for entry in fs::read_dir(self.group_dir(group)?.join(PREDICTIONS_DIR))? {
      let path = entry?.path();
      if is_hidden(&path) || path.extension().is_none_or(|ext| ext != "json") {
        continue;
      }
      predictions.push(read_json::<Prediction>(&path)?);
    }
    predictions.sort_by_key(|p| (p.sequence, p.created_at, p.id));
    Ok(predictions)
  }

  fn input_image(&self, group: &PredictionGroup) -> Result<Vec<u8>, StoreError> {
    read_bytes(&self.resolve(&group.input_image)?)
  }

  fn density_map(&self, prediction: &Prediction) -> Result<Vec<u8>, StoreError> {
    read_bytes(&self.resolve(&prediction.density_map)?)
  }
}

/// 已写入的预测记录数即下一个序号；一个预测组同一时刻只有一个写入者
fn next_sequence(predictions_dir: &Path) -> Result<u32, StoreError> {
  let mut count = 0u32;
  for entry in fs::read_dir(predictions_dir)? {
    let path = entry?.path();
    if !is_hidden(&path) && path.extension().is_some_and(|ext| ext == "json") {
      count += 1;
    }
  }
  Ok(count)
}

fn remove_leftover(path: &Path) {
  if let Err(e) = fs::remove_file(path)
    && e.kind() != io::ErrorKind::NotFound
  {
    warn!("清理未完成的文件失败 {}: {}", path.display(), e);
  }
}

fn is_hidden(path: &Path) -> bool {
  path
    .file_name()
    .map(|name| name.to_string_lossy().starts_with('.'))
    .unwrap_or(true)
}

/// 写入同目录下的临时文件后改名，读者只会看到完整的文件
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
  let name = path.file_name().unwrap_or_default().to_string_lossy();
  let tmp = path.with_file_name(format!(".{}.tmp", name));
  fs::write(&tmp, bytes)?;
  if let Err(e) = fs::rename(&tmp, path) {
    remove_leftover(&tmp);
    return Err(e.into());
  }
  Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
  let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupt {
    path: path.display().to_string(),
    reason: e.to_string(),
  })?;
  write_atomic(path, &bytes)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
  let bytes = read_bytes(path)?;
  serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
    path: path.display().to_string(),
    reason: e.to_string(),
  })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, StoreError> {
  fs::read(path).map_err(|e| match e.kind() {
    io::ErrorKind::NotFound => StoreError::MissingRecord(path.display().to_string()),
    _ => StoreError::IoError(e),
  })
}
