// 该文件是 Renhai （人海） 项目的一部分。
// src/input/scratch.rs - 上传图像的临时文件
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

use std::{
  fs::{self, OpenOptions},
  io::{self, Write},
  path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::sanitize_filename;

#[derive(Error, Debug)]
pub enum ScratchError {
  #[error("无法创建临时目录 {path}: {source}")]
  CreateDir { path: PathBuf, source: io::Error },
  #[error("无法写入临时文件 {path}: {source}")]
  Write { path: PathBuf, source: io::Error },
  #[error("无法读取临时文件 {path}: {reason}")]
  Unreadable { path: PathBuf, reason: String },
}

/// 专用的临时目录，每次请求在其中放置一个上传图像副本
#[derive(Debug, Clone)]
pub struct ScratchStore {
  directory: PathBuf,
}

impl ScratchStore {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 写入上传的字节。文件名以新生成的会话令牌为前缀，并发请求之间不会冲突。
  pub fn acquire(&self, bytes: &[u8], original_filename: &str) -> Result<ScratchFile, ScratchError> {
    fs::create_dir_all(&self.directory).map_err(|source| ScratchError::CreateDir {
      path: self.directory.clone(),
      source,
    })?;

    let token = Uuid::new_v4();
    let path = self.directory.join(format!(
      "{}_{}",
      token.simple(),
      sanitize_filename(original_filename)
    ));

    let written = OpenOptions::new()
      .write(true)
      .create_new(true)
      .open(&path)
      .and_then(|mut file| {
        file.write_all(bytes)?;
        file.flush()
      });

    if let Err(source) = written {
      // 写了一半的文件也要清掉
      Self::release(&path);
      return Err(ScratchError::Write { path, source });
    }

    debug!("临时文件已创建: {} ({} 字节)", path.display(), bytes.len());
    Ok(ScratchFile {
      token,
      path,
      released: false,
    })
  }

  /// 删除临时文件。文件不存在或删除失败只记录日志，不向上传播。
  pub fn release(path: &Path) {
    match fs::remove_file(path) {
      Ok(()) => debug!("临时文件已删除: {}", path.display()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        warn!("临时文件已不存在: {}", path.display())
      }
      Err(e) => warn!("删除临时文件失败 {}: {}", path.display(), e),
    }
  }
}

/// 一次请求持有的临时文件。显式 `release` 或被丢弃时删除，且只删除一次。
#[derive(Debug)]
pub struct ScratchFile {
  token: Uuid,
  path: PathBuf,
  released: bool,
}

impl ScratchFile {
  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn token(&self) -> Uuid {
    self.token
  }

  pub fn release(mut self) {
    self.release_once();
  }

  fn release_once(&mut self) {
    if !self.released {
      self.released = true;
      ScratchStore::release(&self.path);
    }
  }
}

impl Drop for ScratchFile {
  fn drop(&mut self) {
    self.release_once();
  }
}
