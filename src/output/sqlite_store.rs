// 该文件是 Chepai （车牌） 项目的一部分。
// src/output/sqlite_store.rs - SQLite 存储
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

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Transaction, params};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::BBox,
  output::{NewObservation, NewVideo, Observation, Storage, StorageError, Video, VideoId},
};

const CURRENT_SCHEMA_VERSION: i32 = 1;
const MEMORY_PATH: &str = ":memory:";

/// 基于 SQLite 的持久化存储
///
/// URL 形式: `sqlite:license_plate_data.db`（相对路径）、
/// `sqlite:///var/lib/chepai/plates.db`（绝对路径）或 `sqlite::memory:`。
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl FromUrlWithScheme for SqliteStore {
  const SCHEME: &'static str = "sqlite";
}

impl FromUrl for SqliteStore {
  type Error = StorageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StorageError::SchemeMismatch);
    }

    let path = database_path(url);
    if path.as_os_str() == MEMORY_PATH {
      Self::open_in_memory()
    } else {
      Self::open(&path)
    }
  }
}

fn database_path(url: &Url) -> PathBuf {
  match url.host_str().filter(|h| !h.is_empty()) {
    Some(host) => PathBuf::from(format!("{}{}", host, url.path())),
    None => PathBuf::from(url.path()),
  }
}

impl SqliteStore {
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    info!("打开数据库: {}", path.display());
    let conn = Connection::open(path)?;
    if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
      warn!("无法启用 WAL 模式: {}", e);
    }
    Self::init(conn)
  }

  pub fn open_in_memory() -> Result<Self, StorageError> {
    Self::init(Connection::open_in_memory()?)
  }

  fn init(mut conn: Connection) -> Result<Self, StorageError> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    run_migrations(&mut conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::Poisoned)
  }
}

fn run_migrations(conn: &mut Connection) -> Result<(), StorageError> {
  let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

  if version > CURRENT_SCHEMA_VERSION {
    return Err(StorageError::Migration(format!(
      "数据库版本 ({}) 高于支持的版本 ({})",
      version, CURRENT_SCHEMA_VERSION
    )));
  }
  if version == CURRENT_SCHEMA_VERSION {
    return Ok(());
  }

  let tx = conn.transaction()?;
  while version < CURRENT_SCHEMA_VERSION {
    let next_version = version + 1;
    apply_migration(&tx, next_version)?;
    debug!("数据库迁移到版本 {}", next_version);
    version = next_version;
  }
  tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
  tx.commit()?;
  Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<(), StorageError> {
  match version {
    1 => {
      tx.execute_batch(include_str!("schemas/schema_v1.sql"))?;
      Ok(())
    }
    _ => Err(StorageError::Migration(format!(
      "未知的数据库版本: {}",
      version
    ))),
  }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, StorageError> {
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", value, e)))
}

impl Storage for SqliteStore {
  fn find_video_by_identity(&self, identity: &str) -> Result<Option<Video>, StorageError> {
    let conn = self.lock()?;
    let row = conn
      .query_row(
        "SELECT id, identity, url, local_path, processing_date
         FROM videos
         WHERE identity = ?1
         ORDER BY id DESC
         LIMIT 1",
        params![identity],
        |row| {
          Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
          ))
        },
      )
      .optional()?;

    row
      .map(|(id, identity, url, local_path, processed_at)| {
        Ok(Video {
          id: VideoId(id),
          identity,
          url,
          local_path: PathBuf::from(local_path),
          processed_at: parse_datetime(&processed_at)?,
        })
      })
      .transpose()
  }

  fn create_video(&self, video: &NewVideo) -> Result<VideoId, StorageError> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT INTO videos (identity, url, local_path, processing_date)
       VALUES (?1, ?2, ?3, ?4)",
      params![
        video.identity,
        video.url,
        video.local_path.to_string_lossy(),
        video.processed_at.to_rfc3339(),
      ],
    )?;
    Ok(VideoId(conn.last_insert_rowid()))
  }

  fn append_observation(
    &self,
    video: VideoId,
    observation: &NewObservation,
  ) -> Result<(), StorageError> {
    let bbox = serde_json::to_string(&observation.bbox)?;
    let conn = self.lock()?;
    let result = conn.execute(
      "INSERT INTO plates (video_id, timestamp, plate_text, confidence, bbox)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      params![
        video.0,
        observation.timestamp,
        observation.plate_text,
        observation.confidence as f64,
        bbox,
      ],
    );
    match result {
      Ok(_) => Ok(()),
      Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
        Err(StorageError::VideoNotFound(video))
      }
      Err(e) => Err(e.into()),
    }
  }

  fn observations(&self, video: VideoId) -> Result<Vec<Observation>, StorageError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT id, timestamp, plate_text, confidence, bbox
       FROM plates
       WHERE video_id = ?1
       ORDER BY id",
    )?;
    let rows = stmt
      .query_map(params![video.0], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, f64>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, f64>(3)?,
          row.get::<_, String>(4)?,
        ))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    rows
      .into_iter()
      .map(|(id, timestamp, plate_text, confidence, bbox)| {
        Ok(Observation {
          id,
          video_id: video,
          timestamp,
          plate_text,
          confidence: confidence as f32,
          bbox: serde_json::from_str::<BBox>(&bbox)?,
        })
      })
      .collect()
  }
}
