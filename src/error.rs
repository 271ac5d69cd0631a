// 该文件是 Segcap （分割采集） 项目的一部分。
// src/error.rs - 采集错误分类
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

use serde::Serialize;
use thiserror::Error;

use crate::{letterbox::LetterboxError, tensor::TensorError};

/// 单个条目失败的类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
  InvalidInput,
  Inference,
  UnsupportedShape,
  Io,
}

impl std::fmt::Display for FailureKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      FailureKind::InvalidInput => "invalid input",
      FailureKind::Inference => "inference",
      FailureKind::UnsupportedShape => "unsupported shape",
      FailureKind::Io => "I/O",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("输入无效: {0}")]
  InvalidInput(String),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("不支持的张量形状: {0:?}（仅支持 3 维或 4 维）")]
  UnsupportedShape(Vec<usize>),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("输入列表为空")]
  EmptyBatch,
}

impl CaptureError {
  /// 条目级错误的类别；整批致命错误返回 `None`
  pub fn kind(&self) -> Option<FailureKind> {
    match self {
      CaptureError::InvalidInput(_) => Some(FailureKind::InvalidInput),
      CaptureError::Inference(_) => Some(FailureKind::Inference),
      CaptureError::UnsupportedShape(_) => Some(FailureKind::UnsupportedShape),
      CaptureError::Io(_) => Some(FailureKind::Io),
      CaptureError::EmptyBatch => None,
    }
  }

  pub fn inference<E: std::fmt::Display>(err: E) -> Self {
    CaptureError::Inference(err.to_string())
  }
}

impl From<LetterboxError> for CaptureError {
  fn from(err: LetterboxError) -> Self {
    CaptureError::InvalidInput(err.to_string())
  }
}

impl From<TensorError> for CaptureError {
  fn from(err: TensorError) -> Self {
    match err {
      TensorError::UnsupportedShape(shape) => CaptureError::UnsupportedShape(shape),
      other => CaptureError::InvalidInput(other.to_string()),
    }
  }
}
