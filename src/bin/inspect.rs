// 该文件是 Segcap （分割采集） 项目的一部分。
// src/bin/inspect.rs - 查看一条采集记录
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

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use segcap::{metadata::CaptureRecord, tensor::TensorLayout};

/// Segcap 记录查看参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 采集输出目录
  #[arg(long, value_name = "DIR")]
  pub dir: PathBuf,
  /// 图像标识
  #[arg(long, value_name = "ID")]
  pub image_id: String,
}

fn describe(name: &str, shape: &[usize]) -> String {
  match TensorLayout::from_shape(shape) {
    Ok(layout) => {
      let axes = layout
        .axis_names()
        .iter()
        .zip(shape)
        .map(|(axis, len)| format!("{}={}", axis, len))
        .collect::<Vec<_>>();
      format!("{}: [{}]", name, axes.join(", "))
    }
    Err(_) => format!("{}: {:?}", name, shape),
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let record = CaptureRecord::load(&args.dir, &args.image_id)?;
  let pad_info = record.metadata.pad_info;

  info!("记录: {}", record.image_id);
  info!("{}", describe("class_queries_logits", record.class_queries_logits.shape()));
  info!("{}", describe("masks_queries_logits", record.masks_queries_logits.shape()));
  info!(
    "原图 {}x{}，粘贴位置 ({}, {})，缩放比例 {:.4}",
    pad_info.original_w,
    pad_info.original_h,
    pad_info.paste_x,
    pad_info.paste_y,
    pad_info.ratio()
  );
  if !pad_info.is_consistent() {
    warn!("填充信息与原图尺寸不一致: {:?}", pad_info);
  }

  let shape = record.masks_queries_logits.shape();
  if let &[.., mask_h, mask_w] = shape {
    let region = pad_info.content_region(mask_w as u32, mask_h as u32);
    info!(
      "掩码 {}x{} 中的有效区域: x={}, y={}, w={}, h={}",
      mask_w, mask_h, region.x, region.y, region.width, region.height
    );
  }

  Ok(())
}
