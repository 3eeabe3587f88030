// 该文件是 Renhai （人海） 项目的一部分。
// src/args.rs - 项目参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::Parser;
use url::Url;

use renhai::{catalog::Catalog, config::ConfigOverrides};

/// Renhai 人群计数：对一张图像运行全部模型/权重组合
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 待估计的图像文件
  #[arg(long, value_name = "IMAGE")]
  pub image: PathBuf,

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

  /// 事件日期 (YYYY-MM-DD)，默认为今天
  #[arg(long, value_name = "DATE")]
  pub date: Option<NaiveDate>,

  /// 结果存储
  /// 支持格式:
  /// - 目录: folder:///var/lib/renhai
  /// - 内存: memory:
  #[arg(long, value_name = "STORE")]
  pub store: Option<Url>,

  /// 推理后端，例如 command:///usr/bin/python3?arg=scripts/lwcc_oracle.py
  #[arg(long, value_name = "ORACLE")]
  pub oracle: Option<Url>,

  /// 逗号分隔的组合列表，例如 CSRNet:SHA,Bay:QNRF
  #[arg(long, value_name = "LIST", value_parser = Catalog::parse_list)]
  pub catalog: Option<Catalog>,

  /// 临时文件目录
  #[arg(long, value_name = "DIR")]
  pub scratch_dir: Option<PathBuf>,
}

impl Args {
  pub fn overrides(&self) -> ConfigOverrides {
    ConfigOverrides {
      scratch_dir: self.scratch_dir.clone(),
      store: self.store.clone(),
      oracle: self.oracle.clone(),
      catalog: self.catalog.clone(),
    }
  }
}
