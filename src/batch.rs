// 该文件是 Chepai （车牌） 项目的一部分。
// src/batch.rs - 批量调度
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

use std::sync::mpsc::Receiver;
use std::time::Instant;

use image::RgbImage;
use tracing::{debug, warn};

use crate::feeder::FeedItem;
use crate::frame::Frame;
use crate::model::{DetectError, Detection, Detector};

/// 批量调度统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
  /// 提交给检测器的批次数
  pub batches: u64,
  /// 检测失败被丢弃的批次数
  pub failed_batches: u64,
  /// 成功完成检测的帧数
  pub frames: u64,
  /// 随失败批次丢弃的帧数
  pub dropped_frames: u64,
}

/// 从队列取帧、凑批、调用检测器
pub struct BatchScheduler<'a> {
  detector: &'a dyn Detector,
  batch_size: usize,
}

impl<'a> BatchScheduler<'a> {
  pub fn new(detector: &'a dyn Detector, batch_size: usize) -> Self {
    Self {
      detector,
      batch_size: batch_size.max(1),
    }
  }

  /// 消费队列直到结束标记
  ///
  /// 每个成功检测的批次交给 `on_batch`；其返回错误时立即停止并丢弃接收端，
  /// 解码线程随之退出。检测器失败的批次被丢弃，不影响后续批次。
  pub fn drain<E, F>(&self, rx: Receiver<FeedItem>, mut on_batch: F) -> Result<BatchStats, E>
  where
    F: FnMut(&[Frame], &[Vec<Detection>]) -> Result<(), E>,
  {
    let mut stats = BatchStats::default();
    let mut batch: Vec<Frame> = Vec::with_capacity(self.batch_size);

    loop {
      match rx.recv() {
        Ok(FeedItem::Frame(frame)) => {
          batch.push(frame);
          if batch.len() >= self.batch_size {
            self.submit(&mut batch, &mut stats, &mut on_batch)?;
          }
        }
        Ok(FeedItem::EndOfStream) => break,
        Err(_) => {
          warn!("解码线程未发送结束标记即退出");
          break;
        }
      }
    }

    if !batch.is_empty() {
      self.submit(&mut batch, &mut stats, &mut on_batch)?;
    }

    Ok(stats)
  }

  fn submit<E, F>(
    &self,
    batch: &mut Vec<Frame>,
    stats: &mut BatchStats,
    on_batch: &mut F,
  ) -> Result<(), E>
  where
    F: FnMut(&[Frame], &[Vec<Detection>]) -> Result<(), E>,
  {
    stats.batches += 1;
    let first = batch.first().map(|f| f.index).unwrap_or_default();
    let now = Instant::now();

    let images: Vec<&RgbImage> = batch.iter().map(|f| &f.image).collect();
    let result = self
      .detector
      .detect_batch(&images)
      .and_then(|detections| {
        if detections.len() == batch.len() {
          Ok(detections)
        } else {
          Err(DetectError::BatchLengthMismatch {
            expected: batch.len(),
            actual: detections.len(),
          })
        }
      });

    match result {
      Ok(detections) => {
        debug!(
          "批次 #{} (起始帧 {}, {} 帧) 检测完成，耗时: {:.2?}",
          stats.batches,
          first,
          batch.len(),
          now.elapsed()
        );
        stats.frames += batch.len() as u64;
        let outcome = on_batch(batch, &detections);
        batch.clear();
        outcome
      }
      Err(e) => {
        warn!(
          "批次 #{} (起始帧 {}, {} 帧) 检测失败，丢弃: {}",
          stats.batches,
          first,
          batch.len(),
          e
        );
        stats.failed_batches += 1;
        stats.dropped_frames += batch.len() as u64;
        batch.clear();
        Ok(())
      }
    }
  }
}
