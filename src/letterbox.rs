// 该文件是 Segcap （分割采集） 项目的一部分。
// src/letterbox.rs - 保持宽高比的缩放与填充
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

//! Letterbox：按比例缩放源图像并居中绘制到固定大小的画布上。
//!
//! 几何计算保留亚像素精度，只有在最终栅格化时才取整：
//! 栅格尺寸为 `round(new_w) x round(new_h)`（限制在 `[1, target]` 内），
//! 栅格原点为 `((target_w - raster_w) / 2, (target_h - raster_h) / 2)`（整数除法）。

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};
use thiserror::Error;
use tracing::debug;

/// 填充背景（黑色）
const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LetterboxError {
  #[error("源图像尺寸为零: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("目标画布尺寸为零: {0}x{1}")]
  EmptyCanvas(u32, u32),
}

/// 画布上实际绘制像素的整数矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterRect {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

/// 缩放后图像在画布坐标系中的位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
  /// 左上角 x（亚像素）
  pub x: f64,
  /// 左上角 y（亚像素）
  pub y: f64,
  /// 缩放后宽度（亚像素）
  pub width: f64,
  /// 缩放后高度（亚像素）
  pub height: f64,
  /// 缩放比例
  pub ratio: f64,
  pub original_width: u32,
  pub original_height: u32,
  pub raster: RasterRect,
}

impl Placement {
  /// 计算 `src_w x src_h` 的图像放入 `target_w x target_h` 画布时的位置
  pub fn compute(
    src_w: u32,
    src_h: u32,
    target_w: u32,
    target_h: u32,
  ) -> Result<Self, LetterboxError> {
    if src_w == 0 || src_h == 0 {
      return Err(LetterboxError::EmptyImage(src_w, src_h));
    }
    if target_w == 0 || target_h == 0 {
      return Err(LetterboxError::EmptyCanvas(target_w, target_h));
    }

    let (sw, sh) = (src_w as f64, src_h as f64);
    let (tw, th) = (target_w as f64, target_h as f64);

    // 小图同样放大，不做“只缩小”的限制
    let ratio = (tw / sw).min(th / sh);
    let width = (sw * ratio).min(tw);
    let height = (sh * ratio).min(th);
    let x = (tw - width) / 2.0;
    let y = (th - height) / 2.0;

    let raster_w = (width.round() as u32).clamp(1, target_w);
    let raster_h = (height.round() as u32).clamp(1, target_h);
    let raster = RasterRect {
      x: (target_w - raster_w) / 2,
      y: (target_h - raster_h) / 2,
      width: raster_w,
      height: raster_h,
    };

    Ok(Placement {
      x,
      y,
      width,
      height,
      ratio,
      original_width: src_w,
      original_height: src_h,
      raster,
    })
  }
}

/// Letterbox 变换
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
  filter: FilterType,
}

impl Default for Letterbox {
  fn default() -> Self {
    // 双三次插值
    Self {
      filter: FilterType::CatmullRom,
    }
  }
}

impl Letterbox {
  pub fn with_filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }

  /// 生成 `target_w x target_h` 的画布以及源图像在画布上的位置
  pub fn apply(
    &self,
    image: &RgbImage,
    target_w: u32,
    target_h: u32,
  ) -> Result<(RgbImage, Placement), LetterboxError> {
    let (src_w, src_h) = image.dimensions();
    let placement = Placement::compute(src_w, src_h, target_w, target_h)?;
    let raster = placement.raster;

    debug!(
      "Letterbox {}x{} -> {}x{}: 比例 {:.4}, 位置 ({:.1}, {:.1}, {:.1}x{:.1})",
      src_w,
      src_h,
      target_w,
      target_h,
      placement.ratio,
      placement.x,
      placement.y,
      placement.width,
      placement.height
    );

    let mut canvas = RgbImage::from_pixel(target_w, target_h, BACKGROUND);
    if (src_w, src_h) == (raster.width, raster.height) {
      imageops::replace(&mut canvas, image, raster.x as i64, raster.y as i64);
    } else {
      let resized = imageops::resize(image, raster.width, raster.height, self.filter);
      imageops::replace(&mut canvas, &resized, raster.x as i64, raster.y as i64);
    }

    Ok((canvas, placement))
  }
}
