// 该文件是 Renhai （人海） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use renhai::{
  FromUrl,
  config::PipelineConfig,
  model::CommandOracle,
  output::{PredictionStore, StoreWrapper},
  request::UploadRequest,
  task::{BatchEstimator, CancelToken},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  let config = match &args.config {
    Some(path) => PipelineConfig::load(path)?,
    None => PipelineConfig::default(),
  }
  .merge(args.overrides());

  info!("输入图像: {}", args.image.display());
  info!("结果存储: {}", config.store()?);
  info!("推理后端: {}", config.oracle()?);
  info!("组合数量: {}", config.catalog.len());

  let store = StoreWrapper::from_url(config.store()?)?;
  let oracle = CommandOracle::from_url(config.oracle()?)?;
  let estimator = BatchEstimator::new(config.batch_config(), oracle, store)?;

  let date = args
    .date
    .unwrap_or_else(|| chrono::Local::now().date_naive());
  let request = UploadRequest::from_file(&args.image, &args.city, date)?
    .with_event_name(args.event_name.as_deref())
    .with_region(args.state.as_deref(), args.country.as_deref());

  let cancel = CancelToken::new();
  cancel.cancel_on_ctrlc()?;

  let report = estimator.run(&request, &cancel)?;

  println!("预测组: {}", report.group);
  for prediction in estimator.store().predictions(report.group)? {
    println!(
      "  {:<12} {:>10.2}  {}",
      prediction.entry().to_string(),
      prediction.count,
      prediction.density_map
    );
  }
  for failure in &report.failures {
    println!("  {:<12} 失败: {}", failure.entry.to_string(), failure.reason);
  }
  if report.cancelled {
    println!("任务被中断，部分组合未运行");
  }

  Ok(())
}
