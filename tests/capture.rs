// 该文件是 Segcap （分割采集） 项目的一部分。
// tests/capture.rs - 批量采集测试
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

#![cfg(all(feature = "read_image_file", feature = "directory_record"))]

use std::cell::Cell;
use std::path::Path;
use std::sync::mpsc;

use image::{Rgb, RgbImage};
use ndarray::{ArrayD, Dimension, IxDyn};

use segcap::{
  error::{CaptureError, FailureKind},
  input::ImageDirectory,
  metadata::CaptureRecord,
  model::{Model, ModelCanvas, QueryLogits},
  output::{ByteSink, DirectoryRecordOutput},
  task::{CaptureTask, ProgressEvent, Task},
};

const QUERIES: usize = 4;
const CLASSES: usize = 3;
const MASK: usize = 8;

/// 输出内容取决于画布左上角像素
struct FakeSegmenter {
  calls: Cell<usize>,
  fail_on_call: Option<usize>,
  class_shape: Vec<usize>,
}

impl FakeSegmenter {
  fn new() -> Self {
    Self {
      calls: Cell::new(0),
      fail_on_call: None,
      class_shape: vec![1, QUERIES, CLASSES],
    }
  }
}

impl Model for FakeSegmenter {
  type Input = ModelCanvas;
  type Output = QueryLogits;
  type Error = String;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let call = self.calls.get() + 1;
    self.calls.set(call);
    if self.fail_on_call == Some(call) {
      return Err("device lost".to_string());
    }
    let seed = input.image().get_pixel(0, 0)[0] as f32;
    Ok(QueryLogits {
      class_queries_logits: ArrayD::from_shape_fn(IxDyn(&self.class_shape), |ix| {
        seed + ix.as_array_view().iter().sum::<usize>() as f32
      }),
      masks_queries_logits: ArrayD::from_shape_fn(IxDyn(&[1, QUERIES, MASK, MASK]), |ix| {
        -(ix[1] as f32) + ix[2] as f32 * 0.5 - ix[3] as f32 * 0.25
      }),
    })
  }
}

/// 对指定名称的写入报错，其余交给目录输出
struct FlakySink<'a> {
  inner: &'a DirectoryRecordOutput,
  fail_prefix: &'static str,
}

impl ByteSink for FlakySink<'_> {
  fn write(&self, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    if name.starts_with(self.fail_prefix) {
      return Err(std::io::Error::other("no space left on device"));
    }
    self.inner.write(name, bytes)
  }

  fn remove(&self, name: &str) -> std::io::Result<()> {
    self.inner.remove(name)
  }
}

fn write_image(dir: &Path, id: &str, width: u32, height: u32, value: u8) {
  RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    .save(dir.join(format!("{}.png", id)))
    .unwrap();
}

fn listing(dir: &Path) -> Vec<String> {
  let mut names = std::fs::read_dir(dir)
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .collect::<Vec<_>>();
  names.sort();
  names
}

fn record_files(id: &str) -> Vec<String> {
  vec![
    format!("class_queries_logits_{}.bin", id),
    format!("masks_queries_logits_{}.bin", id),
    format!("metadata_{}.json", id),
  ]
}

#[test]
fn missing_image_is_skipped_and_batch_continues() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  for (id, (w, h)) in ["1", "2", "4", "5"]
    .iter()
    .zip([(640, 480), (480, 640), (100, 100), (1280, 720)])
  {
    write_image(images.path(), id, w, h, 10);
  }

  let input = ImageDirectory::new(images.path());
  let output = DirectoryRecordOutput::new(captures.path()).unwrap();
  let summary = CaptureTask::new(["1", "2", "3", "4", "5"])
    .run_task(&input, FakeSegmenter::new(), &output)
    .unwrap();

  assert_eq!(summary.total, 5);
  assert_eq!(summary.processed, vec!["1", "2", "4", "5"]);
  assert_eq!(summary.skipped.len(), 1);
  assert_eq!(summary.skipped[0].index, 2);
  assert_eq!(summary.skipped[0].image_id, "3");
  assert_eq!(summary.skipped[0].kind, FailureKind::InvalidInput);
  assert_eq!(summary.timing.count, 4);
  assert!(!summary.interrupted);

  let mut expected = ["1", "2", "4", "5"]
    .iter()
    .flat_map(|id| record_files(id))
    .collect::<Vec<_>>();
  expected.sort();
  assert_eq!(listing(captures.path()), expected);
}

#[test]
fn record_round_trips_with_pad_info() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  write_image(images.path(), "portrait", 480, 640, 7);

  let input = ImageDirectory::new(images.path());
  let output = DirectoryRecordOutput::new(captures.path()).unwrap();
  let model = FakeSegmenter::new();
  CaptureTask::new(["portrait"])
    .run_task(&input, &model, &output)
    .unwrap();

  let record = CaptureRecord::load(captures.path(), "portrait").unwrap();
  let pad = record.metadata.pad_info;
  assert_eq!((pad.paste_x, pad.paste_y), (80, 0));
  assert_eq!((pad.new_w, pad.new_h), (640, 640));
  assert_eq!((pad.original_w, pad.original_h), (480, 640));
  assert_eq!(record.metadata.class_logits_shape, vec![1, QUERIES, CLASSES]);
  assert_eq!(record.metadata.mask_logits_shape, vec![1, QUERIES, MASK, MASK]);

  // 左上角位于黑色填充区
  let expected = model.infer(&ModelCanvas::default()).unwrap();
  assert_eq!(record.class_queries_logits, expected.class_queries_logits);
  assert_eq!(record.masks_queries_logits, expected.masks_queries_logits);

  let json: serde_json::Value = serde_json::from_slice(
    &std::fs::read(captures.path().join("metadata_portrait.json")).unwrap(),
  )
  .unwrap();
  for key in ["pasteX", "pasteY", "newW", "newH", "originalW", "originalH"] {
    assert!(json["pad_info"].get(key).is_some(), "missing {key}");
  }
}

#[test]
fn inference_failure_leaves_no_record() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  for id in ["a", "b", "c"] {
    write_image(images.path(), id, 320, 240, 1);
  }

  let input = ImageDirectory::new(images.path());
  let output = DirectoryRecordOutput::new(captures.path()).unwrap();
  let model = FakeSegmenter {
    fail_on_call: Some(2),
    ..FakeSegmenter::new()
  };
  let summary = CaptureTask::new(["a", "b", "c"])
    .run_task(&input, model, &output)
    .unwrap();

  assert_eq!(summary.processed, vec!["a", "c"]);
  assert_eq!(summary.skipped[0].kind, FailureKind::Inference);
  assert!(summary.skipped[0].message.contains("device lost"));
  assert!(!listing(captures.path()).iter().any(|name| name.contains("_b.")));
}

#[test]
fn unsupported_rank_is_skipped_without_files() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  write_image(images.path(), "x", 64, 32, 1);

  let input = ImageDirectory::new(images.path());
  let output = DirectoryRecordOutput::new(captures.path()).unwrap();
  let model = FakeSegmenter {
    class_shape: vec![QUERIES, CLASSES],
    ..FakeSegmenter::new()
  };
  let summary = CaptureTask::new(["x"])
    .run_task(&input, model, &output)
    .unwrap();

  assert!(summary.processed.is_empty());
  assert_eq!(summary.skipped[0].kind, FailureKind::UnsupportedShape);
  assert_eq!(summary.timing.fps, 0.0);
  assert!(listing(captures.path()).is_empty());
}

#[test]
fn failed_metadata_write_removes_tensor_files() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  write_image(images.path(), "m", 50, 50, 3);

  let input = ImageDirectory::new(images.path());
  let directory = DirectoryRecordOutput::new(captures.path()).unwrap();
  let output = FlakySink {
    inner: &directory,
    fail_prefix: "metadata_",
  };
  let summary = CaptureTask::new(["m"])
    .run_task(&input, FakeSegmenter::new(), output)
    .unwrap();

  assert_eq!(summary.skipped[0].kind, FailureKind::Io);
  assert!(listing(captures.path()).is_empty());
}

#[test]
fn empty_batch_is_fatal() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  let input = ImageDirectory::new(images.path());
  let output = DirectoryRecordOutput::new(captures.path()).unwrap();

  let result = CaptureTask::new(Vec::<String>::new()).run_task(&input, FakeSegmenter::new(), &output);
  assert!(matches!(result, Err(CaptureError::EmptyBatch)));
  assert!(listing(captures.path()).is_empty());
}

#[test]
fn interrupt_stops_before_next_item() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  write_image(images.path(), "a", 10, 10, 1);

  let input = ImageDirectory::new(images.path());
  let output = DirectoryRecordOutput::new(captures.path()).unwrap();
  let (interrupt_tx, interrupt_rx) = mpsc::channel();
  let (progress_tx, progress_rx) = mpsc::channel();
  interrupt_tx.send(()).unwrap();

  let summary = CaptureTask::new(["a", "b"])
    .with_interrupt(interrupt_rx)
    .with_progress(progress_tx)
    .run_task(&input, FakeSegmenter::new(), &output)
    .unwrap();

  assert!(summary.interrupted);
  assert!(summary.processed.is_empty());
  let events = progress_rx.try_iter().collect::<Vec<_>>();
  assert_eq!(
    events,
    vec![
      ProgressEvent::Started { total: 2 },
      ProgressEvent::Interrupted { index: 0, total: 2 },
      ProgressEvent::Finished {
        processed: 0,
        skipped: 0
      },
    ]
  );
}

#[test]
fn progress_reports_every_item() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  write_image(images.path(), "a", 10, 10, 1);

  let input = ImageDirectory::new(images.path());
  let output = DirectoryRecordOutput::new(captures.path()).unwrap();
  let (progress_tx, progress_rx) = mpsc::channel();

  CaptureTask::new(["a", "missing"])
    .with_progress(progress_tx)
    .run_task(&input, FakeSegmenter::new(), &output)
    .unwrap();

  let events = progress_rx.try_iter().collect::<Vec<_>>();
  assert_eq!(events.len(), 6);
  assert!(matches!(events[2], ProgressEvent::ItemCaptured { index: 0, .. }));
  assert!(matches!(
    events[4],
    ProgressEvent::ItemSkipped {
      index: 1,
      kind: FailureKind::InvalidInput,
      ..
    }
  ));
  assert_eq!(
    events[5],
    ProgressEvent::Finished {
      processed: 1,
      skipped: 1
    }
  );
}

#[test]
fn failed_rerun_leaves_no_stale_record() {
  let images = tempfile::tempdir().unwrap();
  let captures = tempfile::tempdir().unwrap();
  write_image(images.path(), "a", 40, 30, 5);

  let input = ImageDirectory::new(images.path());
  let directory = DirectoryRecordOutput::new(captures.path()).unwrap();
  CaptureTask::new(["a"])
    .run_task(&input, FakeSegmenter::new(), &directory)
    .unwrap();
  assert_eq!(listing(captures.path()).len(), 3);

  let output = FlakySink {
    inner: &directory,
    fail_prefix: "masks_",
  };
  let summary = CaptureTask::new(["a"])
    .run_task(&input, FakeSegmenter::new(), output)
    .unwrap();

  assert_eq!(summary.skipped.len(), 1);
  assert_eq!(summary.skipped[0].kind, FailureKind::Io);
  assert!(listing(captures.path()).is_empty());
}
