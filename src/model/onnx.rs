// 该文件是 Segcap （分割采集） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 分割模型
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

use std::sync::Mutex;

use ndarray::{ArrayD, Axis, IxDyn};
use ort::{
  session::{Session, SessionOutputs},
  value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  model::{Model, ModelCanvas, QueryLogits},
};

const DEFAULT_INPUT_NAME: &str = "pixel_values";
const DEFAULT_CLASS_OUTPUT: &str = "class_logits";
const DEFAULT_MASK_OUTPUT: &str = "mask_logits";

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum OnnxSegmenterError {
  #[error("模型路径必须使用 {0} 方案")]
  SchemeMismatch(&'static str),
  #[error("模型参数无效: {0}")]
  InvalidQuery(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型缺少 {kind} `{name}`")]
  MissingTensor { kind: &'static str, name: String },
  #[error("输出 `{name}` 形状无效: {shape:?}")]
  InvalidShape { name: String, shape: Vec<i64> },
  #[error("会话锁已损坏")]
  SessionPoisoned,
}

pub struct OnnxSegmenterBuilder {
  model_path: String,
  input_name: String,
  class_output: String,
  mask_output: String,
  intra_threads: Option<usize>,
}

impl FromUrlWithScheme for OnnxSegmenterBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxSegmenterBuilder {
  type Error = OnnxSegmenterError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxSegmenterError::SchemeMismatch(Self::SCHEME));
    }

    let mut builder = OnnxSegmenterBuilder {
      model_path: decode_url_path(url),
      input_name: DEFAULT_INPUT_NAME.to_string(),
      class_output: DEFAULT_CLASS_OUTPUT.to_string(),
      mask_output: DEFAULT_MASK_OUTPUT.to_string(),
      intra_threads: None,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "input" => builder.input_name = value.into_owned(),
        "class" => builder.class_output = value.into_owned(),
        "mask" => builder.mask_output = value.into_owned(),
        "threads" => {
          let threads = value
            .parse::<usize>()
            .map_err(|e| OnnxSegmenterError::InvalidQuery(format!("threads={}: {}", value, e)))?;
          builder.intra_threads = Some(threads);
        }
        other => {
          return Err(OnnxSegmenterError::InvalidQuery(format!(
            "未知参数 `{}`",
            other
          )));
        }
      }
    }

    Ok(builder)
  }
}

impl OnnxSegmenterBuilder {
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }

  pub fn build(self) -> Result<OnnxSegmenter, OnnxSegmenterError> {
    info!("加载模型文件: {}", self.model_path);
    let mut builder = Session::builder()?;
    if let Some(threads) = self.intra_threads {
      builder = builder.with_intra_threads(threads)?;
    }
    let session = builder.commit_from_file(&self.model_path)?;
    info!("模型加载完成");

    if !session.inputs.iter().any(|i| i.name == self.input_name) {
      error!("模型输入中没有 `{}`", self.input_name);
      return Err(OnnxSegmenterError::MissingTensor {
        kind: "输入",
        name: self.input_name,
      });
    }
    for name in [&self.class_output, &self.mask_output] {
      if !session.outputs.iter().any(|o| &o.name == name) {
        error!("模型输出中没有 `{}`", name);
        return Err(OnnxSegmenterError::MissingTensor {
          kind: "输出",
          name: name.clone(),
        });
      }
    }

    debug!(
      "模型输入: {:?}",
      session.inputs.iter().map(|i| &i.name).collect::<Vec<_>>()
    );
    debug!(
      "模型输出: {:?}",
      session.outputs.iter().map(|o| &o.name).collect::<Vec<_>>()
    );

    Ok(OnnxSegmenter {
      session: Mutex::new(session),
      input_name: self.input_name,
      class_output: self.class_output,
      mask_output: self.mask_output,
    })
  }
}

/// 由 ONNX Runtime 执行的查询式分割模型
pub struct OnnxSegmenter {
  session: Mutex<Session>,
  input_name: String,
  class_output: String,
  mask_output: String,
}

/// 取出指定输出并补齐被省略的 batch 维
fn extract_output(
  outputs: &SessionOutputs<'_>,
  name: &str,
  rank: usize,
) -> Result<ArrayD<f32>, OnnxSegmenterError> {
  // 输出名称已在 build 时校验
  let (shape, data) = outputs[name].try_extract_tensor::<f32>()?;
  let invalid = || OnnxSegmenterError::InvalidShape {
    name: name.to_string(),
    shape: shape.to_vec(),
  };

  let dims = shape
    .iter()
    .map(|&d| usize::try_from(d).map_err(|_| invalid()))
    .collect::<Result<Vec<_>, _>>()?;
  let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).map_err(|_| invalid())?;

  match array.ndim() {
    n if n == rank => Ok(array),
    n if n + 1 == rank => Ok(array.insert_axis(Axis(0))),
    _ => Err(invalid()),
  }
}

impl Model for OnnxSegmenter {
  type Input = ModelCanvas;
  type Output = QueryLogits;
  type Error = OnnxSegmenterError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let pixel_values = input.to_normalized_nchw(&IMAGENET_MEAN, &IMAGENET_STD);
    let tensor = TensorRef::from_array_view(pixel_values.view())?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| OnnxSegmenterError::SessionPoisoned)?;

    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;

    debug!("获取模型输出");
    let class_queries_logits = extract_output(&outputs, &self.class_output, 3)?;
    let masks_queries_logits = extract_output(&outputs, &self.mask_output, 4)?;
    debug!(
      "输出形状: {:?} / {:?}",
      class_queries_logits.shape(),
      masks_queries_logits.shape()
    );

    Ok(QueryLogits {
      class_queries_logits,
      masks_queries_logits,
    })
  }
}
