// 该文件是 Segcap （分割采集） 项目的一部分。
// src/task.rs - 采集与基准任务
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

use std::{
  fmt::Display,
  str::FromStr,
  sync::mpsc::{Receiver, Sender},
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  CANVAS_H, CANVAS_W,
  error::{CaptureError, FailureKind},
  input::ImageSource,
  letterbox::Letterbox,
  metadata::{
    CLASS_QUERIES_LOGITS, CaptureMetadata, MASKS_QUERIES_LOGITS, PadInfo, metadata_file_name,
    tensor_file_name,
  },
  model::{Model, ModelCanvas, QueryLogits},
  output::ByteSink,
  tensor::{self, TensorError, TensorLayout},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 每张图像的耗时如何拆分为预处理与推理两部分
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingSplit {
  /// 整段耗时各记一半（与既有结果的统计口径一致）
  #[default]
  Halved,
  /// 分别计时 letterbox 与推理
  Measured,
}

impl FromStr for TimingSplit {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "halved" => Ok(TimingSplit::Halved),
      "measured" => Ok(TimingSplit::Measured),
      other => Err(format!("未知的计时方式 '{}'（可选 halved, measured）", other)),
    }
  }
}

/// 一次采集过程中的累计耗时
#[derive(Debug, Clone, Default)]
pub struct TimingAccumulator {
  split: TimingSplit,
  preprocess: Duration,
  inference: Duration,
  count: usize,
}

impl TimingAccumulator {
  pub fn new(split: TimingSplit) -> Self {
    Self {
      split,
      ..Default::default()
    }
  }

  pub fn record(&mut self, preprocess: Duration, inference: Duration) {
    self.preprocess += preprocess;
    self.inference += inference;
    self.count += 1;
  }

  pub fn count(&self) -> usize {
    self.count
  }

  pub fn finish(&self) -> TimingReport {
    let total = (self.preprocess + self.inference).as_secs_f64();
    if self.count == 0 || total <= 0.0 {
      return TimingReport {
        split: self.split,
        count: self.count,
        total_seconds: total,
        avg_preprocess_seconds: 0.0,
        avg_inference_seconds: 0.0,
        fps: 0.0,
      };
    }

    let n = self.count as f64;
    let (avg_preprocess_seconds, avg_inference_seconds) = match self.split {
      TimingSplit::Halved => (total / 2.0 / n, total / 2.0 / n),
      TimingSplit::Measured => (
        self.preprocess.as_secs_f64() / n,
        self.inference.as_secs_f64() / n,
      ),
    };

    TimingReport {
      split: self.split,
      count: self.count,
      total_seconds: total,
      avg_preprocess_seconds,
      avg_inference_seconds,
      fps: n / total,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingReport {
  pub split: TimingSplit,
  pub count: usize,
  pub total_seconds: f64,
  pub avg_preprocess_seconds: f64,
  pub avg_inference_seconds: f64,
  pub fps: f64,
}

/// 采集进度事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
  Started {
    total: usize,
  },
  ItemStarted {
    index: usize,
    total: usize,
    image_id: String,
  },
  ItemCaptured {
    index: usize,
    total: usize,
    image_id: String,
    elapsed: Duration,
  },
  ItemSkipped {
    index: usize,
    total: usize,
    image_id: String,
    kind: FailureKind,
    message: String,
  },
  Interrupted {
    index: usize,
    total: usize,
  },
  Finished {
    processed: usize,
    skipped: usize,
  },
}

impl Display for ProgressEvent {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ProgressEvent::Started { total } => write!(f, "开始评估，共 {} 张图像", total),
      ProgressEvent::ItemStarted { index, total, .. } => {
        write!(f, "正在处理第 {} / {} 张图像...", index + 1, total)
      }
      ProgressEvent::ItemCaptured {
        index,
        total,
        image_id,
        elapsed,
      } => write!(
        f,
        "第 {} / {} 张图像 '{}' 采集完成，耗时 {:.2?}",
        index + 1,
        total,
        image_id,
        elapsed
      ),
      ProgressEvent::ItemSkipped {
        index,
        total,
        image_id,
        kind,
        message,
      } => write!(
        f,
        "跳过第 {} / {} 张图像 '{}' ({}): {}",
        index + 1,
        total,
        image_id,
        kind,
        message
      ),
      ProgressEvent::Interrupted { index, total } => {
        write!(f, "在第 {} / {} 张图像前中断", index + 1, total)
      }
      ProgressEvent::Finished { processed, skipped } => {
        write!(f, "已处理 {} 张图像，跳过 {} 张", processed, skipped)
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedItem {
  pub index: usize,
  pub image_id: String,
  pub kind: FailureKind,
  pub message: String,
}

/// 一次批量采集的结果
#[derive(Debug, Clone, Serialize)]
pub struct CaptureSummary {
  pub total: usize,
  pub processed: Vec<String>,
  pub skipped: Vec<SkippedItem>,
  pub timing: TimingReport,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  pub interrupted: bool,
}

/// 按顺序采集一组图像的原始输出
pub struct CaptureTask {
  image_ids: Vec<String>,
  letterbox: Letterbox,
  timing_split: TimingSplit,
  progress: Option<Sender<ProgressEvent>>,
  interrupt: Option<Receiver<()>>,
}

impl CaptureTask {
  pub fn new<I, S>(image_ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      image_ids: image_ids.into_iter().map(Into::into).collect(),
      letterbox: Letterbox::default(),
      timing_split: TimingSplit::default(),
      progress: None,
      interrupt: None,
    }
  }

  pub fn with_letterbox(mut self, letterbox: Letterbox) -> Self {
    self.letterbox = letterbox;
    self
  }

  pub fn with_timing_split(mut self, split: TimingSplit) -> Self {
    self.timing_split = split;
    self
  }

  /// 接收进度事件；接收端关闭后事件被丢弃
  pub fn with_progress(mut self, progress: Sender<ProgressEvent>) -> Self {
    self.progress = Some(progress);
    self
  }

  /// 每张图像开始前检查中断信号
  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  fn emit(&self, event: ProgressEvent) {
    match &event {
      ProgressEvent::ItemSkipped { .. } | ProgressEvent::Interrupted { .. } => warn!("{}", event),
      _ => info!("{}", event),
    }
    if let Some(progress) = &self.progress {
      let _ = progress.send(event);
    }
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .is_some_and(|rx| rx.try_recv().is_ok())
  }

  /// 处理单张图像，返回 (预处理耗时, 推理耗时)
  fn capture_item<S, M, O>(
    &self,
    input: &S,
    model: &M,
    output: &O,
    image_id: &str,
  ) -> Result<(Duration, Duration), CaptureError>
  where
    S: ImageSource,
    S::Error: Display,
    M: Model<Input = ModelCanvas, Output = QueryLogits>,
    M::Error: Display,
    O: ByteSink,
  {
    let image = input
      .resolve(image_id)
      .map_err(|e| CaptureError::InvalidInput(e.to_string()))?;

    let now = Instant::now();
    let (canvas, placement) = ModelCanvas::letterbox(&image, &self.letterbox)
      .map_err(|e| CaptureError::InvalidInput(e.to_string()))?;
    let preprocess = now.elapsed();
    let logits = model.infer(&canvas).map_err(CaptureError::inference)?;
    let inference = now.elapsed().saturating_sub(preprocess);
    debug!(
      "'{}' 推理完成: class {:?}, mask {:?}",
      image_id,
      logits.class_queries_logits.shape(),
      logits.masks_queries_logits.shape()
    );

    let pad_info = PadInfo::from_placement(&placement, CANVAS_W, CANVAS_H);
    debug!("'{}' 填充信息: {:?}", image_id, pad_info);

    let payloads = encode_record(image_id, &logits, pad_info)?;
    write_record(output, &payloads)?;

    Ok((preprocess, inference))
  }
}

fn expect_layout(tensor: &ndarray::ArrayD<f32>, layout: TensorLayout) -> Result<(), TensorError> {
  match TensorLayout::from_shape(tensor.shape())? {
    found if found == layout => Ok(()),
    _ => Err(TensorError::UnsupportedShape(tensor.shape().to_vec())),
  }
}

/// 在写入前把一条记录的三个文件全部编码到内存
fn encode_record(
  image_id: &str,
  logits: &QueryLogits,
  pad_info: PadInfo,
) -> Result<Vec<(String, Vec<u8>)>, CaptureError> {
  expect_layout(&logits.class_queries_logits, TensorLayout::QueryClass)?;
  expect_layout(&logits.masks_queries_logits, TensorLayout::QueryMask)?;

  let class_bytes = tensor::serialize(logits.class_queries_logits.view())?;
  let mask_bytes = tensor::serialize(logits.masks_queries_logits.view())?;
  let metadata = serde_json::to_vec(&CaptureMetadata::new(logits, pad_info))
    .map_err(std::io::Error::from)?;

  Ok(vec![
    (tensor_file_name(CLASS_QUERIES_LOGITS, image_id), class_bytes),
    (tensor_file_name(MASKS_QUERIES_LOGITS, image_id), mask_bytes),
    (metadata_file_name(image_id), metadata),
  ])
}

/// 依次写入；任一文件失败时删除本条记录的全部文件，包括此前运行留下的旧文件
fn write_record<O: ByteSink>(output: &O, payloads: &[(String, Vec<u8>)]) -> Result<(), CaptureError> {
  for (name, bytes) in payloads {
    if let Err(e) = output.write(name, bytes) {
      for (written, _) in payloads {
        if let Err(remove_error) = output.remove(written) {
          warn!("无法清理 {}: {}", written, remove_error);
        }
      }
      return Err(CaptureError::Io(e));
    }
  }
  Ok(())
}

impl<S, M, O> Task<S, M, O> for CaptureTask
where
  S: ImageSource,
  S::Error: Display,
  M: Model<Input = ModelCanvas, Output = QueryLogits>,
  M::Error: Display,
  O: ByteSink,
{
  type Output = CaptureSummary;
  type Error = CaptureError;

  fn run_task(self, input: S, model: M, output: O) -> Result<Self::Output, Self::Error> {
    if self.image_ids.is_empty() {
      return Err(CaptureError::EmptyBatch);
    }

    let total = self.image_ids.len();
    let started_at = Utc::now();
    let mut timing = TimingAccumulator::new(self.timing_split);
    let mut processed = Vec::with_capacity(total);
    let mut skipped = Vec::new();
    let mut interrupted = false;

    self.emit(ProgressEvent::Started { total });

    for (index, image_id) in self.image_ids.iter().enumerate() {
      if self.interrupted() {
        interrupted = true;
        self.emit(ProgressEvent::Interrupted { index, total });
        break;
      }

      self.emit(ProgressEvent::ItemStarted {
        index,
        total,
        image_id: image_id.clone(),
      });

      match self.capture_item(&input, &model, &output, image_id) {
        Ok((preprocess, inference)) => {
          timing.record(preprocess, inference);
          processed.push(image_id.clone());
          self.emit(ProgressEvent::ItemCaptured {
            index,
            total,
            image_id: image_id.clone(),
            elapsed: preprocess + inference,
          });
        }
        Err(e) => {
          let Some(kind) = e.kind() else {
            return Err(e);
          };
          let message = e.to_string();
          skipped.push(SkippedItem {
            index,
            image_id: image_id.clone(),
            kind,
            message: message.clone(),
          });
          self.emit(ProgressEvent::ItemSkipped {
            index,
            total,
            image_id: image_id.clone(),
            kind,
            message,
          });
        }
      }
    }

    let report = timing.finish();
    self.emit(ProgressEvent::Finished {
      processed: processed.len(),
      skipped: skipped.len(),
    });
    info!("总耗时: {:.4}s", report.total_seconds);
    info!("平均预处理时间: {:.4}s", report.avg_preprocess_seconds);
    info!("平均推理时间: {:.4}s", report.avg_inference_seconds);
    info!("FPS: {:.2}", report.fps);

    Ok(CaptureSummary {
      total,
      processed,
      skipped,
      timing: report,
      started_at,
      finished_at: Utc::now(),
      interrupted,
    })
  }
}

/// 重复推理同一张图像，统计稳定后的平均推理时间
pub struct RepeatShotTask {
  image_id: String,
  repeat: usize,
  warmup: usize,
  letterbox: Letterbox,
}

#[derive(Debug, Clone)]
pub struct RepeatShotReport {
  pub image_id: String,
  pub runs: usize,
  pub measured: usize,
  pub average: Duration,
  pub min: Duration,
  pub max: Duration,
}

impl RepeatShotReport {
  pub fn fps(&self) -> f64 {
    match self.average.as_secs_f64() {
      secs if secs > 0.0 => 1.0 / secs,
      _ => 0.0,
    }
  }
}

impl RepeatShotTask {
  const DEFAULT_REPEAT: usize = 100;
  const DEFAULT_WARMUP: usize = 2;

  pub fn new(image_id: impl Into<String>) -> Self {
    Self {
      image_id: image_id.into(),
      repeat: Self::DEFAULT_REPEAT,
      warmup: Self::DEFAULT_WARMUP,
      letterbox: Letterbox::default(),
    }
  }

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat;
    self
  }

  pub fn with_warmup(mut self, warmup: usize) -> Self {
    self.warmup = warmup;
    self
  }
}

impl<S, M> Task<S, M, ()> for RepeatShotTask
where
  S: ImageSource,
  S::Error: Display,
  M: Model<Input = ModelCanvas, Output = QueryLogits>,
  M::Error: Display,
{
  type Output = RepeatShotReport;
  type Error = CaptureError;

  fn run_task(self, input: S, model: M, _output: ()) -> Result<Self::Output, Self::Error> {
    if self.repeat <= self.warmup {
      return Err(CaptureError::InvalidInput(format!(
        "重复次数 {} 必须大于预热次数 {}",
        self.repeat, self.warmup
      )));
    }

    info!("开始任务...");
    let image = input
      .resolve(&self.image_id)
      .map_err(|e| CaptureError::InvalidInput(e.to_string()))?;
    let (canvas, _) = ModelCanvas::letterbox(&image, &self.letterbox)
      .map_err(|e| CaptureError::InvalidInput(e.to_string()))?;
    info!("输入帧获取成功，开始推理...");

    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      model.infer(&canvas).map_err(CaptureError::inference)?;
      let elapsed = now.elapsed();
      info!("({})推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
    }

    let measured = &times[self.warmup..];
    let average = measured.iter().sum::<Duration>() / measured.len() as u32;
    let report = RepeatShotReport {
      image_id: self.image_id,
      runs: times.len(),
      measured: measured.len(),
      average,
      min: measured.iter().min().copied().unwrap_or_default(),
      max: measured.iter().max().copied().unwrap_or_default(),
    };
    warn!("平均推理时间: {:.2?}", report.average);

    Ok(report)
  }
}
