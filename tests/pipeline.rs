// 该文件是 Chepai （车牌） 项目的一部分。
// tests/pipeline.rs - 端到端流水线测试
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
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use image::RgbImage;
use url::Url;

use chepai::{
  FromUrl,
  acquire::{AcquireError, Acquirer},
  config::PipelineConfig,
  input::{DecoderBackend, FfmpegTools, FrameSource, InputError, MemoryInput, OpenVideo},
  model::{DetectError, Detection, Detector, RecognizeError, Recognizer},
  output::{MemoryStore, SqliteStore, Storage},
  sampler::FrameSkip,
  session::{ReprocessPolicy, SessionManager, VideoError, VideoOutcome, VideoRequest},
};

/// 每第 5 个被检测的帧返回一个框
struct EveryFifthDetector {
  calls: Cell<u64>,
}

impl EveryFifthDetector {
  fn new() -> Self {
    Self {
      calls: Cell::new(0),
    }
  }
}

impl Detector for EveryFifthDetector {
  fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
    let call = self.calls.get();
    self.calls.set(call + 1);
    if call % 5 != 0 {
      return Ok(Vec::new());
    }
    Ok(vec![Detection::new(
      10.0,
      8.0,
      frame.width() as f32 - 10.0,
      frame.height() as f32 - 8.0,
      0.9,
    )])
  }
}

struct PlateRecognizer;

impl Recognizer for PlateRecognizer {
  fn recognize(&self, _crop: &RgbImage) -> Result<String, RecognizeError> {
    Ok("ABC123".to_string())
  }
}

/// 把任意 URL 解析为同一个本地文件
struct LocalAcquirer(PathBuf);

impl Acquirer for LocalAcquirer {
  fn resolve(&self, _url: &str) -> Result<PathBuf, AcquireError> {
    Ok(self.0.clone())
  }
}

/// 30 fps、300 帧的合成视频
struct SyntheticVideo;

impl OpenVideo for SyntheticVideo {
  fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, InputError> {
    if path.to_string_lossy().contains("corrupt") {
      return Err(InputError::DecodeError("invalid data found".to_string()));
    }
    Ok(Box::new(MemoryInput::blank(300, 64, 48, 30.0)))
  }
}

fn config() -> PipelineConfig {
  PipelineConfig::default()
    .with_frame_skip(FrameSkip::new(10).unwrap())
    .validate()
    .unwrap()
}

#[test]
fn end_to_end_records_six_observations() {
  let store = MemoryStore::default();
  let detector = EveryFifthDetector::new();
  let sessions = SessionManager::new(&store, &detector, &PlateRecognizer)
    .with_opener(SyntheticVideo)
    .with_config(config());

  let outcome = sessions.process(&VideoRequest::from_path("synthetic.mp4"));
  let report = match outcome {
    VideoOutcome::Done(report) => report,
    other => panic!("expected done, got {:?}", other),
  };
  assert_eq!(report.decoded_frames, 300);
  assert_eq!(report.selected_frames, 30);
  assert_eq!(report.batches, 3);
  assert_eq!(report.observations, 6);
  assert_eq!(detector.calls.get(), 30);

  let video = store
    .find_video_by_identity("synthetic.mp4")
    .unwrap()
    .unwrap();
  let rows = store.observations(video.id).unwrap();
  assert_eq!(rows.len(), 6);
  for (row, frame) in rows.iter().zip([0u32, 50, 100, 150, 200, 250]) {
    assert_eq!(row.plate_text, "ABC123");
    assert_eq!(row.confidence, 0.9);
    assert!((row.timestamp - frame as f64 / 30.0).abs() < 1e-9);
    assert!(row.bbox.x1 < row.bbox.x2 && row.bbox.y1 < row.bbox.y2);
  }
}

#[test]
fn skip_policy_is_idempotent() {
  let store = MemoryStore::default();
  let request = VideoRequest::from_path("synthetic.mp4");
  let first = SessionManager::new(&store, &EveryFifthDetector::new(), &PlateRecognizer)
    .with_opener(SyntheticVideo)
    .with_config(config())
    .process(&request);
  assert!(matches!(first, VideoOutcome::Done(_)));

  let detector = EveryFifthDetector::new();
  let skipping = SessionManager::new(&store, &detector, &PlateRecognizer)
    .with_opener(SyntheticVideo)
    .with_config(config())
    .with_policy(ReprocessPolicy::new(false, true).unwrap());
  let summary = skipping.run_all(&[request], &AtomicBool::new(false));

  assert_eq!(summary.skipped, 1);
  assert_eq!(detector.calls.get(), 0);
  assert_eq!(store.video_count().unwrap(), 1);
  assert_eq!(store.observation_count().unwrap(), 6);
}

#[test]
fn force_policy_creates_new_video() {
  let store = MemoryStore::default();
  let request = VideoRequest::from_path("synthetic.mp4");
  for _ in 0..2 {
    let outcome = SessionManager::new(&store, &EveryFifthDetector::new(), &PlateRecognizer)
      .with_opener(SyntheticVideo)
      .with_config(config())
      .with_policy(ReprocessPolicy::new(true, false).unwrap())
      .process(&request);
    assert!(matches!(outcome, VideoOutcome::Done(_)));
  }

  assert_eq!(store.video_count().unwrap(), 2);
  let latest = store
    .find_video_by_identity("synthetic.mp4")
    .unwrap()
    .unwrap();
  assert_eq!(store.observations(latest.id).unwrap().len(), 6);
}

#[test]
fn corrupt_video_is_fatal_for_that_video_only() {
  let dir = tempfile::tempdir().unwrap();
  let garbage = dir.path().join("garbage.mp4");
  std::fs::write(&garbage, b"definitely not a video").unwrap();

  let store = MemoryStore::default();
  let detector = EveryFifthDetector::new();
  let ffmpeg = SessionManager::new(&store, &detector, &PlateRecognizer)
    .with_opener(DecoderBackend::Ffmpeg)
    .with_config(config());
  let outcome = ffmpeg.process(&VideoRequest::from_path(&garbage));
  assert!(matches!(outcome, VideoOutcome::Failed(VideoError::Open(_))));

  let synthetic = SessionManager::new(&store, &detector, &PlateRecognizer)
    .with_opener(SyntheticVideo)
    .with_config(config());
  let summary = synthetic.run_all(
    &[
      VideoRequest::from_path("corrupt.mp4"),
      VideoRequest::from_path("synthetic.mp4"),
    ],
    &AtomicBool::new(false),
  );

  assert_eq!(summary.failed, 1);
  assert_eq!(summary.completed, 1);
  assert!(store.find_video_by_identity("corrupt.mp4").unwrap().is_none());
  assert!(
    store
      .find_video_by_identity(&garbage.to_string_lossy())
      .unwrap()
      .is_none()
  );
  assert_eq!(store.video_count().unwrap(), 1);
}

#[test]
fn sqlite_store_persists_across_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let db = dir.path().join("data").join("plates.db");
  let url = Url::parse(&format!("sqlite://{}", db.display())).unwrap();

  {
    let store = SqliteStore::from_url(&url).unwrap();
    let outcome = SessionManager::new(&store, &EveryFifthDetector::new(), &PlateRecognizer)
      .with_opener(SyntheticVideo)
      .with_acquirer(LocalAcquirer(dir.path().join("abc.mp4")))
      .with_config(config())
      .process(&VideoRequest::from_url("https://example.com/watch?v=abc"));
    assert!(matches!(outcome, VideoOutcome::Done(_)));
  }

  let store = SqliteStore::from_url(&url).unwrap();
  let video = store
    .find_video_by_identity("https://example.com/watch?v=abc")
    .unwrap()
    .unwrap();
  assert_eq!(video.url.as_deref(), Some("https://example.com/watch?v=abc"));
  assert_eq!(video.local_path, dir.path().join("abc.mp4"));
  let rows = store.observations(video.id).unwrap();
  assert_eq!(rows.len(), 6);
  assert!((rows[5].timestamp - 250.0 / 30.0).abs() < 1e-9);
}

#[cfg(unix)]
fn tool_script(dir: &Path, name: &str, body: &str) -> PathBuf {
  use std::os::unix::fs::PermissionsExt;

  let path = dir.join(name);
  std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
  std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  path
}

/// ffprobe 能识别但 ffmpeg 无法解码的视频
#[cfg(unix)]
#[test]
fn unreadable_codec_fails_without_record() {
  let dir = tempfile::tempdir().unwrap();
  let video = dir.path().join("bad_codec.mp4");
  std::fs::write(&video, b"not really h264").unwrap();
  let tools = FfmpegTools::default()
    .with_ffprobe(tool_script(
      dir.path(),
      "ffprobe",
      r#"echo '{"streams":[{"width":64,"height":48,"avg_frame_rate":"30/1"}]}'"#,
    ))
    .with_ffmpeg(tool_script(
      dir.path(),
      "ffmpeg",
      "echo 'Decoder not found' >&2\nexit 1",
    ));

  let store = MemoryStore::default();
  let detector = EveryFifthDetector::new();
  let sessions = SessionManager::new(&store, &detector, &PlateRecognizer)
    .with_opener(tools)
    .with_config(config())
    .with_policy(ReprocessPolicy::new(false, true).unwrap());

  let outcome = sessions.process(&VideoRequest::from_path(&video));
  assert!(matches!(
    outcome,
    VideoOutcome::Failed(VideoError::Open(InputError::DecodeError(_)))
  ));
  assert_eq!(store.video_count().unwrap(), 0);
  assert_eq!(detector.calls.get(), 0);

  // 之后以 --skip 重跑不会跳过从未处理成功的视频
  let again = sessions.process(&VideoRequest::from_path(&video));
  assert!(matches!(again, VideoOutcome::Failed(_)));
}
