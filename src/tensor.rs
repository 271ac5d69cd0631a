// 该文件是 Segcap （分割采集） 项目的一部分。
// src/tensor.rs - 张量序列化
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

//! 张量与无头二进制文件之间的转换。
//!
//! 输出按声明形状的行优先顺序排列（最后一维变化最快），每个元素为
//! 4 字节小端 IEEE-754 单精度浮点数。文件不包含形状，形状随元数据保存。

use ndarray::{ArrayD, ArrayViewD, Ix3, Ix4, IxDyn};
use thiserror::Error;
use tracing::debug;

pub const BYTES_PER_ELEMENT: usize = std::mem::size_of::<f32>();

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("不支持的张量形状: {0:?}")]
  UnsupportedShape(Vec<usize>),
  #[error("字节长度不匹配: 形状 {shape:?} 需要 {expected} 字节, 实际 {actual} 字节")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 支持的轴布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  /// `[batch, queries, classes]`
  QueryClass,
  /// `[batch, queries, height, width]`
  QueryMask,
}

impl TensorLayout {
  pub fn from_shape(shape: &[usize]) -> Result<Self, TensorError> {
    match shape.len() {
      3 => Ok(TensorLayout::QueryClass),
      4 => Ok(TensorLayout::QueryMask),
      _ => Err(TensorError::UnsupportedShape(shape.to_vec())),
    }
  }

  pub fn axis_names(&self) -> &'static [&'static str] {
    match self {
      TensorLayout::QueryClass => &["batch", "queries", "classes"],
      TensorLayout::QueryMask => &["batch", "queries", "height", "width"],
    }
  }
}

/// 序列化后的字节数
pub fn byte_len(shape: &[usize]) -> usize {
  BYTES_PER_ELEMENT * shape.iter().product::<usize>()
}

/// 按行优先顺序序列化张量
///
/// 下标逐一枚举，不依赖数组在内存中的排列，因此 Fortran 序或转置后的视图
/// 也会得到相同的字节。
pub fn serialize(tensor: ArrayViewD<'_, f32>) -> Result<Vec<u8>, TensorError> {
  let shape = tensor.shape().to_vec();
  let layout = TensorLayout::from_shape(&shape)?;
  let unsupported = |_| TensorError::UnsupportedShape(shape.clone());
  let mut bytes = Vec::with_capacity(byte_len(&shape));

  match layout {
    TensorLayout::QueryClass => {
      let tensor = tensor.into_dimensionality::<Ix3>().map_err(unsupported)?;
      let (batch, queries, classes) = tensor.dim();
      for b in 0..batch {
        for q in 0..queries {
          for c in 0..classes {
            bytes.extend_from_slice(&tensor[[b, q, c]].to_le_bytes());
          }
        }
      }
    }
    TensorLayout::QueryMask => {
      let tensor = tensor.into_dimensionality::<Ix4>().map_err(unsupported)?;
      let (batch, queries, height, width) = tensor.dim();
      for b in 0..batch {
        for q in 0..queries {
          for h in 0..height {
            for w in 0..width {
              bytes.extend_from_slice(&tensor[[b, q, h, w]].to_le_bytes());
            }
          }
        }
      }
    }
  }

  debug!(
    "序列化张量 {:?} ({}) -> {} 字节",
    shape,
    layout.axis_names().join(", "),
    bytes.len()
  );
  debug_assert_eq!(bytes.len(), byte_len(&shape));

  Ok(bytes)
}

/// 从无头二进制数据重建张量
pub fn deserialize(bytes: &[u8], shape: &[usize]) -> Result<ArrayD<f32>, TensorError> {
  TensorLayout::from_shape(shape)?;
  let expected = byte_len(shape);
  let mismatch = || TensorError::LengthMismatch {
    shape: shape.to_vec(),
    expected,
    actual: bytes.len(),
  };
  if bytes.len() != expected {
    return Err(mismatch());
  }

  let values = bytes
    .chunks_exact(BYTES_PER_ELEMENT)
    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    .collect::<Vec<_>>();

  ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|_| mismatch())
}
