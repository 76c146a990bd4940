// 该文件是 Chepai （车牌） 项目的一部分。
// src/task.rs - 单个视频的处理任务
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

use std::time::{Duration, Instant};

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  batch::BatchScheduler,
  config::PipelineConfig,
  fanout::{Fanout, FanoutStats, PlateRead},
  feeder::FrameFeeder,
  input::FrameSource,
  model::{Detector, Recognizer},
  normalize::TextNormalizer,
  output::{Render, StorageError},
};

pub trait Task<I, O> {
  type Output;
  type Error;
  fn run_task(&self, input: I, output: &O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("存储错误: {0}")]
  Storage(#[from] StorageError),
  #[error("无法启动解码线程: {0}")]
  WorkerSpawn(std::io::Error),
  #[error("解码线程异常退出")]
  WorkerPanicked,
}

/// 单个视频的处理统计
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TaskReport {
  pub decoded_frames: u64,
  pub selected_frames: u64,
  /// 视频尾部解码失败
  pub truncated: bool,
  pub batches: u64,
  pub failed_batches: u64,
  pub detections: u64,
  pub observations: u64,
  pub recognition_misses: u64,
  pub below_threshold: u64,
  pub elapsed: Duration,
  /// 按解码帧数与帧率推算的视频时长（秒）
  pub video_duration: f64,
}

/// 检测、识别一个已打开的视频，结果交给输出端
pub struct PlateTask<'a> {
  detector: &'a dyn Detector,
  recognizer: &'a dyn Recognizer,
  normalizer: TextNormalizer,
  config: PipelineConfig,
}

impl<'a> PlateTask<'a> {
  pub fn new(detector: &'a dyn Detector, recognizer: &'a dyn Recognizer) -> Self {
    Self {
      detector,
      recognizer,
      normalizer: TextNormalizer::default(),
      config: PipelineConfig::default(),
    }
  }

  pub fn with_config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_normalizer(mut self, normalizer: TextNormalizer) -> Self {
    self.normalizer = normalizer;
    self
  }
}

impl<O> Task<Box<dyn FrameSource>, O> for PlateTask<'_>
where
  O: Render<RgbImage, PlateRead, Error = StorageError>,
{
  type Output = TaskReport;
  type Error = TaskError;

  fn run_task(&self, input: Box<dyn FrameSource>, output: &O) -> Result<TaskReport, TaskError> {
    let now = Instant::now();
    let frame_rate = input.frame_rate();
    info!(
      "开始任务: {}x{} @ {:.2} fps, 每 {} 帧抽取一帧, 批大小 {}",
      input.width(),
      input.height(),
      frame_rate,
      self.config.frame_skip.get(),
      self.config.batch_size
    );

    let (feeder, rx) =
      FrameFeeder::spawn(input, self.config.frame_skip, self.config.queue_capacity)
        .map_err(TaskError::WorkerSpawn)?;

    let scheduler = BatchScheduler::new(self.detector, self.config.batch_size);
    let fanout = Fanout::new(
      self.recognizer,
      &self.normalizer,
      self.config.confidence_threshold,
    );
    let mut fanout_stats = FanoutStats::default();

    // 接收端在 drain 返回时释放，存储失败时解码线程随之退出
    let drained = scheduler.drain(rx, |frames, detections| {
      for (frame, detections) in frames.iter().zip(detections) {
        fanout.process_frame(frame, detections, &mut fanout_stats, |read, crop| {
          output.render_result(crop, read)
        })?;
      }
      Ok::<(), StorageError>(())
    });

    let feed = feeder.join();
    let batch = drained?;
    let feed = feed.ok_or(TaskError::WorkerPanicked)?;

    let report = TaskReport {
      decoded_frames: feed.decoded,
      selected_frames: feed.selected,
      truncated: feed.truncated,
      batches: batch.batches,
      failed_batches: batch.failed_batches,
      detections: fanout_stats.detections,
      observations: fanout_stats.accepted,
      recognition_misses: fanout_stats.misses,
      below_threshold: fanout_stats.below_threshold,
      elapsed: now.elapsed(),
      video_duration: feed.decoded as f64 / frame_rate,
    };

    if report.failed_batches > 0 {
      warn!(
        "{} / {} 个批次检测失败",
        report.failed_batches, report.batches
      );
    }
    info!(
      "任务完成: 解码 {} 帧, 检测 {} 帧, 识别 {} 条, 耗时: {:.2?}",
      report.decoded_frames, report.selected_frames, report.observations, report.elapsed
    );

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::MemoryInput;
  use crate::model::{DetectError, Detection, RecognizeError};
  use crate::output::{MemoryStore, NewVideo, ResultSink, Storage};
  use crate::sampler::FrameSkip;
  use chrono::Utc;
  use std::path::PathBuf;

  struct WholeFrameDetector;

  impl Detector for WholeFrameDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
      Ok(vec![Detection::new(
        0.0,
        0.0,
        frame.width() as f32,
        frame.height() as f32,
        0.8,
      )])
    }
  }

  struct FixedRecognizer(&'static str);

  impl Recognizer for FixedRecognizer {
    fn recognize(&self, _crop: &RgbImage) -> Result<String, RecognizeError> {
      Ok(self.0.to_string())
    }
  }

  fn blank(total_frames: u64, width: u32, height: u32, frame_rate: f64) -> Box<dyn FrameSource> {
    Box::new(MemoryInput::blank(total_frames, width, height, frame_rate))
  }

  fn store_with_video() -> (MemoryStore, crate::output::VideoId) {
    let store = MemoryStore::default();
    let video = store
      .create_video(&NewVideo {
        identity: "memory".to_string(),
        url: None,
        local_path: PathBuf::from("memory"),
        processed_at: Utc::now(),
      })
      .unwrap();
    (store, video)
  }

  #[test]
  fn test_run_task_reports_counts() {
    let (store, video) = store_with_video();
    let sink = ResultSink::new(&store, video, 25.0);
    let config = PipelineConfig::default()
      .with_frame_skip(FrameSkip::new(4).unwrap())
      .with_batch_size(3);
    let task = PlateTask::new(&WholeFrameDetector, &FixedRecognizer("ab 12")).with_config(config);

    let report = task
      .run_task(blank(50, 16, 8, 25.0), &sink)
      .unwrap();

    assert_eq!(report.decoded_frames, 50);
    assert_eq!(report.selected_frames, 13);
    assert_eq!(report.batches, 5);
    assert_eq!(report.observations, 13);
    assert!((report.video_duration - 2.0).abs() < 1e-9);

    let rows = store.observations(video).unwrap();
    assert_eq!(rows.len(), 13);
    assert!(rows.iter().all(|r| r.plate_text == "AB12"));
    assert!((rows[1].timestamp - 4.0 / 25.0).abs() < 1e-9);
  }

  #[test]
  fn test_empty_text_creates_no_rows() {
    let (store, video) = store_with_video();
    let sink = ResultSink::new(&store, video, 30.0);
    let task = PlateTask::new(&WholeFrameDetector, &FixedRecognizer(" -- "));

    let report = task
      .run_task(blank(10, 8, 8, 30.0), &sink)
      .unwrap();

    assert_eq!(report.observations, 0);
    assert_eq!(report.recognition_misses, 2);
    assert!(store.observations(video).unwrap().is_empty());
  }

  #[test]
  fn test_storage_failure_aborts_task() {
    let store = MemoryStore::default();
    let sink = ResultSink::new(&store, crate::output::VideoId(42), 30.0);
    let task = PlateTask::new(&WholeFrameDetector, &FixedRecognizer("X1"));

    let result = task.run_task(blank(10_000, 8, 8, 30.0), &sink);
    assert!(matches!(
      result,
      Err(TaskError::Storage(StorageError::VideoNotFound(_)))
    ));
  }
}
