// 该文件是 Segcap （分割采集） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 单张图像重复推理基准
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use segcap::{
  FromUrl,
  input::ImageDirectory,
  model::OnnxSegmenterBuilder,
  task::{RepeatShotTask, Task},
};

/// Segcap 重复推理基准参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分割模型
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 图像目录
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 图像标识
  #[arg(long, value_name = "ID")]
  pub image_id: String,
  /// 推理次数（含预热）
  #[arg(long, default_value_t = 100)]
  pub repeat: usize,
  /// 不计入统计的预热次数
  #[arg(long, default_value_t = 2)]
  pub warmup: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);

  let input = ImageDirectory::from_url(&args.input)?;
  let model = OnnxSegmenterBuilder::from_url(&args.model)?.build()?;

  let report = RepeatShotTask::new(args.image_id)
    .with_repeat(args.repeat)
    .with_warmup(args.warmup)
    .run_task(input, model, ())?;

  info!(
    "'{}': 统计 {} / {} 次，平均 {:.2?}，最短 {:.2?}，最长 {:.2?}，FPS {:.2}",
    report.image_id,
    report.measured,
    report.runs,
    report.average,
    report.min,
    report.max,
    report.fps()
  );

  Ok(())
}
