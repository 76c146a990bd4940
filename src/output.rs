// 该文件是 Chepai （车牌） 项目的一部分。
// src/output.rs - 结果输出与持久化
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

use std::cell::Cell;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
#[cfg(feature = "crop_record")]
use tracing::warn;
use tracing::trace;

use crate::fanout::PlateRead;
use crate::frame::{BBox, timestamp_seconds};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

mod memory_store;
pub use self::memory_store::MemoryStore;

mod sqlite_store;
pub use self::sqlite_store::SqliteStore;

#[cfg(feature = "crop_record")]
mod crop_record;
#[cfg(feature = "crop_record")]
pub use self::crop_record::{CropRecorder, CropRecorderError};

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("SQLite 错误: {0}")]
  Sqlite(#[from] rusqlite::Error),
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("数据库迁移错误: {0}")]
  Migration(String),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("视频记录不存在: {0}")]
  VideoNotFound(VideoId),
  #[error("无效的时间戳: {0}")]
  InvalidTimestamp(String),
  #[error("存储锁已损坏")]
  Poisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VideoId(pub i64);

impl fmt::Display for VideoId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// 已处理的视频
#[derive(Debug, Clone, PartialEq)]
pub struct Video {
  pub id: VideoId,
  /// 去重用的标识，优先为 URL，否则为本地路径
  pub identity: String,
  pub url: Option<String>,
  pub local_path: PathBuf,
  pub processed_at: DateTime<Utc>,
}

/// 待创建的视频记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewVideo {
  pub identity: String,
  pub url: Option<String>,
  pub local_path: PathBuf,
  pub processed_at: DateTime<Utc>,
}

/// 一次车牌识别记录
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
  pub id: i64,
  pub video_id: VideoId,
  /// 视频内时间（秒）
  pub timestamp: f64,
  pub plate_text: String,
  pub confidence: f32,
  pub bbox: BBox,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewObservation {
  pub timestamp: f64,
  pub plate_text: String,
  pub confidence: f32,
  pub bbox: BBox,
}

/// 视频与识别记录的存储
///
/// 记录只追加，不更新。同一标识可以有多条视频记录（强制重新处理），
/// 查询时返回最新的一条。
pub trait Storage {
  fn find_video_by_identity(&self, identity: &str) -> Result<Option<Video>, StorageError>;

  fn create_video(&self, video: &NewVideo) -> Result<VideoId, StorageError>;

  fn append_observation(
    &self,
    video: VideoId,
    observation: &NewObservation,
  ) -> Result<(), StorageError>;

  /// 按写入顺序返回某个视频的全部记录
  fn observations(&self, video: VideoId) -> Result<Vec<Observation>, StorageError>;
}

/// 把被接受的识别结果写入存储，每条结果写一次
pub struct ResultSink<'a> {
  storage: &'a dyn Storage,
  video: VideoId,
  frame_rate: f64,
  #[cfg(feature = "crop_record")]
  crops: Option<&'a CropRecorder>,
  written: Cell<u64>,
}

impl<'a> ResultSink<'a> {
  pub fn new(storage: &'a dyn Storage, video: VideoId, frame_rate: f64) -> Self {
    Self {
      storage,
      video,
      frame_rate,
      #[cfg(feature = "crop_record")]
      crops: None,
      written: Cell::new(0),
    }
  }

  #[cfg(feature = "crop_record")]
  pub fn with_crops(mut self, crops: Option<&'a CropRecorder>) -> Self {
    self.crops = crops;
    self
  }

  pub fn video(&self) -> VideoId {
    self.video
  }

  /// 已写入的记录数
  pub fn written(&self) -> u64 {
    self.written.get()
  }
}

impl Render<RgbImage, PlateRead> for ResultSink<'_> {
  type Error = StorageError;

  fn render_result(&self, crop: &RgbImage, read: &PlateRead) -> Result<(), Self::Error> {
    let observation = NewObservation {
      timestamp: timestamp_seconds(read.frame_index, self.frame_rate),
      plate_text: read.text.clone(),
      confidence: read.confidence,
      bbox: read.bbox,
    };
    self.storage.append_observation(self.video, &observation)?;
    self.written.set(self.written.get() + 1);
    trace!(
      "记录车牌 {} @ {:.3}s (帧 {})",
      observation.plate_text, observation.timestamp, read.frame_index
    );

    self.record_crop(crop, read);
    Ok(())
  }
}

impl ResultSink<'_> {
  /// 图像保存失败只记录警告，不影响识别记录
  #[cfg(feature = "crop_record")]
  fn record_crop(&self, crop: &RgbImage, read: &PlateRead) {
    if let Some(crops) = self.crops
      && let Err(e) = crops.render_result(crop, &(self.video, read.clone()))
    {
      warn!("保存车牌图像失败: {}", e);
    }
  }

  #[cfg(not(feature = "crop_record"))]
  fn record_crop(&self, _crop: &RgbImage, _read: &PlateRead) {}
}
