// 该文件是 Renhai （人海） 项目的一部分。
// src/bin/batch_folder.rs - 批量处理目录中的图像
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::NaiveDate;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use renhai::{
  FromUrl,
  config::{ConfigOverrides, PipelineConfig},
  input::is_image_file,
  model::CommandOracle,
  output::StoreWrapper,
  request::UploadRequest,
  task::{BatchEstimator, CancelToken},
};

/// 目录中的每张图像各自成为一个预测组
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 图像目录
  #[arg(long, value_name = "DIR")]
  pub folder: PathBuf,
  /// 事件所在城市
  #[arg(long)]
  pub city: String,
  /// 事件名称
  #[arg(long, value_name = "NAME")]
  pub event_name: Option<String>,
  /// 省/州
  #[arg(long)]
  pub state: Option<String>,
  /// 国家
  #[arg(long)]
  pub country: Option<String>,
  /// 事件日期 (YYYY-MM-DD)
  #[arg(long, value_name = "DATE")]
  pub date: NaiveDate,
  /// 结果存储
  #[arg(long, value_name = "STORE")]
  pub store: Option<Url>,
  /// 推理后端
  #[arg(long, value_name = "ORACLE")]
  pub oracle: Option<Url>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let config = match &args.config {
    Some(path) => PipelineConfig::load(path)?,
    None => PipelineConfig::default(),
  }
  .merge(ConfigOverrides {
    store: args.store.clone(),
    oracle: args.oracle.clone(),
    ..Default::default()
  });

  let store = StoreWrapper::from_url(config.store()?)?;
  let oracle = CommandOracle::from_url(config.oracle()?)?;
  let estimator = BatchEstimator::new(config.batch_config(), oracle, store)?;

  let mut images: Vec<PathBuf> = std::fs::read_dir(&args.folder)?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|path| {
      path.is_file()
        && path
          .file_name()
          .map(|name| is_image_file(&name.to_string_lossy()))
          .unwrap_or(false)
    })
    .collect();
  images.sort();

  if images.is_empty() {
    bail!("目录中没有图像文件: {}", args.folder.display());
  }
  info!("共 {} 张图像", images.len());

  let cancel = CancelToken::new();
  cancel.cancel_on_ctrlc()?;

  let mut failed = 0usize;
  for (index, path) in images.iter().enumerate() {
    if cancel.is_cancelled() {
      warn!("任务已取消，剩余 {} 张图像未处理", images.len() - index);
      break;
    }
    info!("({}/{}) 处理图像 {}", index + 1, images.len(), path.display());

    let result = UploadRequest::from_file(path, &args.city, args.date)
      .map(|request| {
        request
          .with_event_name(args.event_name.as_deref())
          .with_region(args.state.as_deref(), args.country.as_deref())
      })
      .map_err(anyhow::Error::from)
      .and_then(|request| Ok(estimator.run(&request, &cancel)?));
    match result {
      Ok(report) => println!(
        "{}\t{}\t成功 {}\t失败 {}",
        path.display(),
        report.group,
        report.predictions.len(),
        report.failures.len()
      ),
      Err(e) => {
        error!("图像 {} 处理失败: {}", path.display(), e);
        failed += 1;
      }
    }
  }

  if failed > 0 {
    bail!("{} 张图像处理失败", failed);
  }
  Ok(())
}
