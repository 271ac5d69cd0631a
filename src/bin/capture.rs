// 该文件是 Segcap （分割采集） 项目的一部分。
// src/bin/capture.rs - 批量采集分割模型原始输出
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

use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use segcap::{
  FromUrl,
  input::ImageDirectory,
  model::OnnxSegmenterBuilder,
  output::{ByteSink, DirectoryRecordOutput},
  task::{CaptureTask, Task, TimingSplit},
};

/// COCO val2017 中的参考图像
const DEFAULT_IMAGE_IDS: [&str; 10] = [
  "000000015497",
  "000000104572",
  "000000130699",
  "000000131273",
  "000000161861",
  "000000261116",
  "000000356424",
  "000000377393",
  "000000389315",
  "000000391648",
];

/// Segcap 批量采集参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分割模型，例如 onnx:///models/seg.onnx?threads=4
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 图像目录，例如 images:///data/val2017?ext=jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 记录输出目录，例如 folder:///data/captures
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 逗号分隔的图像标识
  #[arg(long, value_name = "IDS", value_delimiter = ',')]
  pub ids: Vec<String>,
  /// 每行一个图像标识的文件
  #[arg(long, value_name = "FILE", conflicts_with = "ids")]
  pub ids_file: Option<PathBuf>,
  /// 耗时拆分方式: halved 或 measured
  #[arg(long, value_name = "SPLIT", default_value = "halved")]
  pub timing: TimingSplit,
  /// 将采集摘要写入输出目录
  #[arg(long)]
  pub summary: bool,
}

fn read_ids_file(path: &PathBuf) -> Result<Vec<String>> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("无法读取图像标识文件 {}", path.display()))?;
  Ok(
    content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .map(str::to_string)
      .collect(),
  )
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let image_ids = match (&args.ids_file, args.ids.is_empty()) {
    (Some(path), _) => read_ids_file(path)?,
    (None, false) => args.ids.clone(),
    (None, true) => DEFAULT_IMAGE_IDS.iter().map(|id| id.to_string()).collect(),
  };

  let input = ImageDirectory::from_url(&args.input)?;
  let model = OnnxSegmenterBuilder::from_url(&args.model)?.build()?;
  let output = DirectoryRecordOutput::from_url(&args.output)?;

  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    warn!("收到中断信号，当前图像处理完成后停止");
    let _ = tx.send(());
  })?;

  let summary = CaptureTask::new(image_ids)
    .with_timing_split(args.timing)
    .with_interrupt(rx)
    .run_task(&input, &model, &output)?;

  for skipped in &summary.skipped {
    warn!("跳过 '{}' ({}): {}", skipped.image_id, skipped.kind, skipped.message);
  }

  if args.summary {
    let name = format!(
      "summary_{}.json",
      summary.finished_at.format("%Y%m%d-%H%M%S")
    );
    output.write(&name, &serde_json::to_vec_pretty(&summary)?)?;
    info!("摘要已写入 {}", output.directory().join(&name).display());
  }

  Ok(())
}
