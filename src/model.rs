// 该文件是 Segcap （分割采集） 项目的一部分。
// src/model.rs - 模型
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

use ndarray::ArrayD;

use crate::{CANVAS_H, CANVAS_W, frame::RgbCanvas};

/// 推理调用方
///
/// 模型本身（权重、算子图、硬件调度）不在本库范围内，只通过这个接口调用。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 采集流水线使用的模型输入
pub type ModelCanvas = RgbCanvas<CANVAS_W, CANVAS_H>;

/// 基于查询的分割模型输出
#[derive(Debug, Clone)]
pub struct QueryLogits {
  /// `[batch, queries, classes]`
  pub class_queries_logits: ArrayD<f32>,
  /// `[batch, queries, height, width]`
  pub masks_queries_logits: ArrayD<f32>,
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxSegmenter, OnnxSegmenterBuilder, OnnxSegmenterError};
