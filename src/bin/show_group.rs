// 该文件是 Renhai （人海） 项目的一部分。
// src/bin/show_group.rs - 查看已保存的预测组
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use url::Url;

use renhai::{
  FromUrl,
  output::{GroupId, Prediction, PredictionGroup, PredictionStore, StoreWrapper},
};

/// 以 JSON 输出预测组及其预测记录
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 结果存储，例如 folder:///var/lib/renhai
  #[arg(long, value_name = "STORE")]
  pub store: Url,
  /// 预测组编号；省略时列出全部预测组
  #[arg(long, value_name = "GROUP")]
  pub group: Option<GroupId>,
}

#[derive(Serialize)]
struct GroupView {
  #[serde(flatten)]
  group: PredictionGroup,
  predictions: Vec<Prediction>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let store = StoreWrapper::from_url(&args.store)?;

  let groups = match args.group {
    Some(id) => vec![store.group(id)?],
    None => store.groups()?,
  };

  let views = groups
    .into_iter()
    .map(|group| {
      let predictions = store.predictions(group.id)?;
      Ok(GroupView { group, predictions })
    })
    .collect::<Result<Vec<_>>>()?;

  println!("{}", serde_json::to_string_pretty(&views)?);
  Ok(())
}
