// 该文件是 Chepai （车牌） 项目的一部分。
// src/output/memory_store.rs - 内存存储
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

use std::sync::{Mutex, MutexGuard};

use crate::output::{
  NewObservation, NewVideo, Observation, Storage, StorageError, Video, VideoId,
};

#[derive(Debug, Default)]
struct Tables {
  videos: Vec<Video>,
  observations: Vec<Observation>,
}

/// 进程内存储，用于测试与 `--dry-run`
#[derive(Debug, Default)]
pub struct MemoryStore {
  tables: Mutex<Tables>,
}

impl MemoryStore {
  fn lock(&self) -> Result<MutexGuard<'_, Tables>, StorageError> {
    self.tables.lock().map_err(|_| StorageError::Poisoned)
  }

  pub fn video_count(&self) -> Result<usize, StorageError> {
    Ok(self.lock()?.videos.len())
  }

  pub fn observation_count(&self) -> Result<usize, StorageError> {
    Ok(self.lock()?.observations.len())
  }
}

impl Storage for MemoryStore {
  fn find_video_by_identity(&self, identity: &str) -> Result<Option<Video>, StorageError> {
    let tables = self.lock()?;
    Ok(
      tables
        .videos
        .iter()
        .rev()
        .find(|v| v.identity == identity)
        .cloned(),
    )
  }

  fn create_video(&self, video: &NewVideo) -> Result<VideoId, StorageError> {
    let mut tables = self.lock()?;
    let id = VideoId(tables.videos.len() as i64 + 1);
    tables.videos.push(Video {
      id,
      identity: video.identity.clone(),
      url: video.url.clone(),
      local_path: video.local_path.clone(),
      processed_at: video.processed_at,
    });
    Ok(id)
  }

  fn append_observation(
    &self,
    video: VideoId,
    observation: &NewObservation,
  ) -> Result<(), StorageError> {
    let mut tables = self.lock()?;
    if !tables.videos.iter().any(|v| v.id == video) {
      return Err(StorageError::VideoNotFound(video));
    }
    let id = tables.observations.len() as i64 + 1;
    tables.observations.push(Observation {
      id,
      video_id: video,
      timestamp: observation.timestamp,
      plate_text: observation.plate_text.clone(),
      confidence: observation.confidence,
      bbox: observation.bbox,
    });
    Ok(())
  }

  fn observations(&self, video: VideoId) -> Result<Vec<Observation>, StorageError> {
    let tables = self.lock()?;
    Ok(
      tables
        .observations
        .iter()
        .filter(|o| o.video_id == video)
        .cloned()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use std::path::PathBuf;

  #[test]
  fn test_find_returns_latest_video() {
    let store = MemoryStore::default();
    let new_video = NewVideo {
      identity: "https://example.com/v".to_string(),
      url: Some("https://example.com/v".to_string()),
      local_path: PathBuf::from("downloads/v.mp4"),
      processed_at: Utc::now(),
    };
    let first = store.create_video(&new_video).unwrap();
    let second = store.create_video(&new_video).unwrap();

    let found = store
      .find_video_by_identity("https://example.com/v")
      .unwrap()
      .unwrap();
    assert_ne!(first, second);
    assert_eq!(found.id, second);
    assert!(store.find_video_by_identity("other").unwrap().is_none());
    assert_eq!(store.video_count().unwrap(), 2);
  }
}
