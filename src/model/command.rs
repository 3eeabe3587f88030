// 该文件是 Renhai （人海） 项目的一部分。
// src/model/command.rs - 通过外部程序执行人群计数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  process::Command,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  catalog::ModelWeightEntry,
  density::DensityMatrix,
  model::{CountingOracle, OracleError, OracleOutput},
};

/// 外部程序用此退出码表示模型/权重组合不受支持
pub const EXIT_UNSUPPORTED_COMBINATION: i32 = 2;

#[derive(Error, Debug)]
pub enum CommandOracleError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{found}'")]
  SchemeMismatch { expected: &'static str, found: String },
  #[error("程序路径错误: {0}")]
  ProgramPath(String),
}

/// 外部程序在标准输出上打印的结果
#[derive(Debug, Deserialize)]
struct CommandReply {
  count: f64,
  density: Vec<Vec<f32>>,
}

/// 以子进程方式调用计数程序:
/// `<program> [args..] <image> --model <MODEL> --weights <WEIGHTS>`，
/// 标准输出为 `{"count": .., "density": [[..]]}`。
#[derive(Debug, Clone)]
pub struct CommandOracle {
  program: PathBuf,
  args: Vec<String>,
}

impl FromUrlWithScheme for CommandOracle {
  const SCHEME: &'static str = "command";
}

impl FromUrl for CommandOracle {
  type Error = CommandOracleError;

  /// `command:///usr/bin/python3?arg=/opt/renhai/lwcc_oracle.py`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CommandOracleError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    let program = urlencoding::decode(url.path())
      .map_err(|e| CommandOracleError::ProgramPath(e.to_string()))?;
    if program.is_empty() || program == "/" {
      return Err(CommandOracleError::ProgramPath(format!(
        "URI 中缺少程序路径: {}",
        url
      )));
    }

    let args = url
      .query_pairs()
      .filter(|(k, _)| k == "arg")
      .map(|(_, v)| v.into_owned())
      .collect();

    Ok(Self::new(program.as_ref(), args))
  }
}

impl CommandOracle {
  pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
    let program = program.into();
    info!("计数程序: {} {:?}", program.display(), args);
    Self { program, args }
  }

  pub fn program(&self) -> &Path {
    &self.program
  }
}

impl CountingOracle for CommandOracle {
  fn get_count(
    &self,
    image_path: &Path,
    entry: ModelWeightEntry,
  ) -> Result<OracleOutput, OracleError> {
    let output = Command::new(&self.program)
      .args(&self.args)
      .arg(image_path)
      .arg("--model")
      .arg(entry.model.as_str())
      .arg("--weights")
      .arg(entry.weight.as_str())
      .output()?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
      debug!("计数程序 stderr ({}): {}", entry, stderr);
    }

    if !output.status.success() {
      return Err(match output.status.code() {
        Some(EXIT_UNSUPPORTED_COMBINATION) => OracleError::UnsupportedCombination {
          entry,
          reason: stderr,
        },
        Some(code) => OracleError::Runtime(format!("退出码 {}: {}", code, stderr)),
        None => OracleError::Runtime(format!("进程被信号终止: {}", stderr)),
      });
    }

    let reply: CommandReply = serde_json::from_slice(&output.stdout)
      .map_err(|e| OracleError::InvalidOutput(e.to_string()))?;

    Ok(OracleOutput {
      count: reply.count,
      density: DensityMatrix::from_rows(reply.density)?,
    })
  }
}
