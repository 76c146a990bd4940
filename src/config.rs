// 该文件是 Chepai （车牌） 项目的一部分。
// src/config.rs - 流水线参数
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

use thiserror::Error;

use crate::sampler::FrameSkip;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("抽帧步长必须不小于 1，实际为 {0}")]
  InvalidFrameSkip(u64),
  #[error("批大小必须不小于 1")]
  InvalidBatchSize,
  #[error("队列容量必须不小于 1")]
  InvalidQueueCapacity,
  #[error("置信度阈值必须位于 0.0 - 1.0 之间，实际为 {0}")]
  InvalidThreshold(f32),
  #[error("必须提供 --video-url、--video-path 或 --list 之一")]
  MissingSource,
  #[error("--force 与 --skip 不能同时使用")]
  ConflictingPolicy,
}

/// 单个视频流水线的可调参数
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
  pub frame_skip: FrameSkip,
  pub batch_size: usize,
  /// 解码线程与推理之间的队列容量
  pub queue_capacity: usize,
  pub confidence_threshold: f32,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      frame_skip: FrameSkip::default(),
      batch_size: DEFAULT_BATCH_SIZE,
      queue_capacity: DEFAULT_BATCH_SIZE * 2,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
    }
  }
}

impl PipelineConfig {
  pub fn with_frame_skip(mut self, frame_skip: FrameSkip) -> Self {
    self.frame_skip = frame_skip;
    self
  }

  /// 同时把队列容量调整为批大小的两倍
  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self.queue_capacity = batch_size.saturating_mul(2);
    self
  }

  pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
    self.queue_capacity = queue_capacity;
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn validate(self) -> Result<Self, ConfigError> {
    if self.batch_size == 0 {
      return Err(ConfigError::InvalidBatchSize);
    }
    if self.queue_capacity == 0 {
      return Err(ConfigError::InvalidQueueCapacity);
    }
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::InvalidThreshold(self.confidence_threshold));
    }
    Ok(self)
  }
}
