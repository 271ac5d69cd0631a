// 该文件是 Segcap （分割采集） 项目的一部分。
// src/metadata.rs - 采集记录与元数据
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

use std::path::Path;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  letterbox::Placement,
  model::QueryLogits,
  tensor::{self, TensorError},
};

pub const CLASS_QUERIES_LOGITS: &str = "class_queries_logits";
pub const MASKS_QUERIES_LOGITS: &str = "masks_queries_logits";

/// `{tensor_name}_{image_id}.bin`
pub fn tensor_file_name(tensor_name: &str, image_id: &str) -> String {
  format!("{}_{}.bin", tensor_name, image_id)
}

/// `metadata_{image_id}.json`
pub fn metadata_file_name(image_id: &str) -> String {
  format!("metadata_{}.json", image_id)
}

/// 画布上的整数区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

/// 填充信息
///
/// `new_w`/`new_h` 记录的是画布尺寸，而不是缩放后图像的尺寸；
/// 下游按此约定解析，不能改动。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PadInfo {
  pub paste_x: u32,
  pub paste_y: u32,
  pub new_w: u32,
  pub new_h: u32,
  pub original_w: u32,
  pub original_h: u32,
}

impl PadInfo {
  /// 由 letterbox 位置和画布尺寸得到填充信息，原点向零截断
  pub fn from_placement(placement: &Placement, canvas_w: u32, canvas_h: u32) -> Self {
    Self {
      paste_x: placement.x.trunc() as u32,
      paste_y: placement.y.trunc() as u32,
      new_w: canvas_w,
      new_h: canvas_h,
      original_w: placement.original_width,
      original_h: placement.original_height,
    }
  }

  pub fn ratio(&self) -> f64 {
    (self.new_w as f64 / self.original_w as f64).min(self.new_h as f64 / self.original_h as f64)
  }

  /// 缩放后图像在画布上的亚像素尺寸
  pub fn content_size(&self) -> (f64, f64) {
    let ratio = self.ratio();
    (
      self.original_w as f64 * ratio,
      self.original_h as f64 * ratio,
    )
  }

  /// 检查原点与尺寸没有越出画布
  pub fn is_consistent(&self) -> bool {
    if self.original_w == 0 || self.original_h == 0 || self.new_w == 0 || self.new_h == 0 {
      return false;
    }
    let (content_w, content_h) = self.content_size();
    // 原点截断最多带来 1 像素误差
    self.paste_x as f64 + content_w <= self.new_w as f64 + 1.0
      && self.paste_y as f64 + content_h <= self.new_h as f64 + 1.0
  }

  /// 将内容区域从画布坐标换算到 `mask_w x mask_h` 的掩码网格
  ///
  /// 起点向下取整，终点四舍五入，结果裁剪到网格内；网格非空时宽高至少为 1，
  /// 空网格得到空区域。
  pub fn content_region(&self, mask_w: u32, mask_h: u32) -> Region {
    let (content_w, content_h) = self.content_size();
    let sx = mask_w as f64 / self.new_w as f64;
    let sy = mask_h as f64 / self.new_h as f64;

    let span = |start: u32, extent: f64, scale: f64, limit: u32| {
      if limit == 0 {
        return (0, 0);
      }
      let begin = ((start as f64 * scale).floor() as u32).min(limit.saturating_sub(1));
      let end = (((start as f64 + extent) * scale).round() as u32).clamp(begin + 1, limit);
      (begin, end - begin)
    };

    let (x, width) = span(self.paste_x, content_w, sx, mask_w);
    let (y, height) = span(self.paste_y, content_h, sy, mask_h);
    Region {
      x,
      y,
      width,
      height,
    }
  }
}

/// 元数据文件内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
  pub class_logits_shape: Vec<usize>,
  pub mask_logits_shape: Vec<usize>,
  pub pad_info: PadInfo,
}

impl CaptureMetadata {
  pub fn new(logits: &QueryLogits, pad_info: PadInfo) -> Self {
    Self {
      class_logits_shape: logits.class_queries_logits.shape().to_vec(),
      mask_logits_shape: logits.masks_queries_logits.shape().to_vec(),
      pad_info,
    }
  }
}

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("I/O 错误 ({0}): {1}")]
  IoError(String, std::io::Error),
  #[error("元数据解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("张量文件 {0} 无效: {1}")]
  TensorError(String, TensorError),
}

/// 从目录中读回的一条采集记录
#[derive(Debug, Clone)]
pub struct CaptureRecord {
  pub image_id: String,
  pub metadata: CaptureMetadata,
  pub class_queries_logits: ArrayD<f32>,
  pub masks_queries_logits: ArrayD<f32>,
}

impl CaptureRecord {
  pub fn load(directory: &Path, image_id: &str) -> Result<Self, RecordError> {
    let read = |name: String| {
      let path = directory.join(&name);
      std::fs::read(&path)
        .map(|bytes| (name, bytes))
        .map_err(|e| RecordError::IoError(path.display().to_string(), e))
    };

    let (_, json) = read(metadata_file_name(image_id))?;
    let metadata: CaptureMetadata = serde_json::from_slice(&json)?;
    debug!("读取元数据 {}: {:?}", image_id, metadata);

    let load_tensor = |tensor_name: &str, shape: &[usize]| {
      let (name, bytes) = read(tensor_file_name(tensor_name, image_id))?;
      tensor::deserialize(&bytes, shape).map_err(|e| RecordError::TensorError(name, e))
    };

    let class_queries_logits = load_tensor(CLASS_QUERIES_LOGITS, &metadata.class_logits_shape)?;
    let masks_queries_logits = load_tensor(MASKS_QUERIES_LOGITS, &metadata.mask_logits_shape)?;

    Ok(Self {
      image_id: image_id.to_string(),
      metadata,
      class_queries_logits,
      masks_queries_logits,
    })
  }
}
