// 该文件是 Segcap （分割采集） 项目的一部分。
// src/frame.rs - 固定尺寸 RGB 画布
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

use image::RgbImage;
use ndarray::Array4;
use thiserror::Error;

use crate::letterbox::{Letterbox, LetterboxError, Placement};

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("画布尺寸不匹配: 期望 {expected_w}x{expected_h}, 实际 {actual_w}x{actual_h}")]
  SizeMismatch {
    expected_w: u32,
    expected_h: u32,
    actual_w: u32,
    actual_h: u32,
  },
  #[error(transparent)]
  Letterbox(#[from] LetterboxError),
}

/// 模型输入画布：`W x H`，3 通道，每通道 8 位，HWC 排列
#[derive(Debug, Clone)]
pub struct RgbCanvas<const W: u32, const H: u32> {
  image: RgbImage,
}

impl<const W: u32, const H: u32> TryFrom<RgbImage> for RgbCanvas<W, H> {
  type Error = FrameError;

  fn try_from(image: RgbImage) -> Result<Self, Self::Error> {
    let (actual_w, actual_h) = image.dimensions();
    if (actual_w, actual_h) != (W, H) {
      return Err(FrameError::SizeMismatch {
        expected_w: W,
        expected_h: H,
        actual_w,
        actual_h,
      });
    }
    Ok(Self { image })
  }
}

impl<const W: u32, const H: u32> Default for RgbCanvas<W, H> {
  fn default() -> Self {
    Self {
      image: RgbImage::new(W, H),
    }
  }
}

impl<const W: u32, const H: u32> RgbCanvas<W, H> {
  /// 将任意尺寸的图像 letterbox 到画布上
  pub fn letterbox(
    image: &RgbImage,
    letterbox: &Letterbox,
  ) -> Result<(Self, Placement), FrameError> {
    let (canvas, placement) = letterbox.apply(image, W, H)?;
    Ok((Self::try_from(canvas)?, placement))
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }

  /// 转换为 `[1, 3, H, W]` 的浮点张量，按 `(v / 255 - mean) / std` 逐通道归一化
  pub fn to_normalized_nchw(&self, mean: &[f32; 3], std: &[f32; 3]) -> Array4<f32> {
    let (height, width) = (self.height(), self.width());
    let nhwc = self.as_nhwc();

    Array4::from_shape_fn((1, RGB_CHANNELS, height, width), |(_, c, h, w)| {
      let value = nhwc[(h * width + w) * RGB_CHANNELS + c] as f32 / 255.0;
      (value - mean[c]) / std[c]
    })
  }
}
