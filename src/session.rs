// 该文件是 Chepai （车牌） 项目的一部分。
// src/session.rs - 视频会话管理
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

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

use crate::{
  acquire::{AcquireError, Acquirer, NoAcquirer},
  config::{ConfigError, PipelineConfig},
  input::{DecoderBackend, FrameSource, InputError, OpenVideo, Prefetched},
  model::{Detector, Recognizer},
  normalize::TextNormalizer,
  output::{NewVideo, ResultSink, Storage, StorageError, Video},
  task::{PlateTask, Task, TaskError, TaskReport},
};

#[cfg(feature = "crop_record")]
use crate::output::CropRecorder;

/// 一个待处理的视频，URL 与本地路径至少提供一个
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRequest {
  pub url: Option<String>,
  pub local_path: Option<PathBuf>,
}

impl VideoRequest {
  pub fn from_url(url: impl Into<String>) -> Self {
    Self {
      url: Some(url.into()),
      local_path: None,
    }
  }

  pub fn from_path(path: impl AsRef<Path>) -> Self {
    Self {
      url: None,
      local_path: Some(path.as_ref().to_path_buf()),
    }
  }

  /// 列表文件中的一行，`http(s)://` 开头视为 URL，否则为本地路径
  pub fn from_entry(entry: &str) -> Self {
    let entry = entry.trim();
    if entry.starts_with("http://") || entry.starts_with("https://") {
      Self::from_url(entry)
    } else {
      Self::from_path(entry)
    }
  }

  /// 去重用的标识，优先使用 URL
  pub fn identity(&self) -> Option<String> {
    self
      .url
      .as_ref()
      .filter(|url| !url.is_empty())
      .cloned()
      .or_else(|| {
        self
          .local_path
          .as_ref()
          .map(|path| path.to_string_lossy().into_owned())
      })
  }
}

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Resolving,
  PolicyCheck,
  Acquiring,
  Processing,
  Done,
  Skipped,
  Failed,
}

impl fmt::Display for SessionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SessionState::Resolving => "resolve",
      SessionState::PolicyCheck => "policy",
      SessionState::Acquiring => "acquire",
      SessionState::Processing => "process",
      SessionState::Done => "done",
      SessionState::Skipped => "skipped",
      SessionState::Failed => "failed",
    };
    write!(f, "{}", name)
  }
}

/// 对已处理过的视频的处理策略
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReprocessPolicy {
  force: bool,
  skip: bool,
}

impl ReprocessPolicy {
  /// 两者都未设置时向用户确认
  pub const PROMPT: ReprocessPolicy = ReprocessPolicy {
    force: false,
    skip: false,
  };

  pub fn new(force: bool, skip: bool) -> Result<Self, ConfigError> {
    if force && skip {
      return Err(ConfigError::ConflictingPolicy);
    }
    Ok(Self { force, skip })
  }

  /// 是否继续处理已存在的视频
  pub fn decide(&self, existing: &Video, confirm: &dyn Confirm) -> bool {
    if self.force {
      true
    } else if self.skip {
      false
    } else {
      confirm.confirm(existing)
    }
  }
}

/// 重新处理前的确认
pub trait Confirm {
  fn confirm(&self, existing: &Video) -> bool;
}

/// 总是拒绝，无终端时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclineConfirm;

impl Confirm for DeclineConfirm {
  fn confirm(&self, _existing: &Video) -> bool {
    false
  }
}

#[derive(Error, Debug)]
pub enum VideoError {
  #[error("未提供视频 URL 或本地路径")]
  MissingIdentity,
  #[error("获取视频失败: {0}")]
  Acquire(#[from] AcquireError),
  #[error("打开视频失败: {0}")]
  Open(#[from] InputError),
  #[error("存储错误: {0}")]
  Storage(#[from] StorageError),
  #[error("处理失败: {0}")]
  Task(TaskError),
}

impl From<TaskError> for VideoError {
  fn from(e: TaskError) -> Self {
    match e {
      TaskError::Storage(e) => VideoError::Storage(e),
      e => VideoError::Task(e),
    }
  }
}

impl VideoError {
  /// 出错的环节，用于日志
  pub fn stage(&self) -> &'static str {
    match self {
      VideoError::MissingIdentity => "resolve",
      VideoError::Acquire(_) => "acquire",
      VideoError::Open(_) => "open",
      VideoError::Storage(_) => "storage",
      VideoError::Task(_) => "process",
    }
  }
}

#[derive(Debug)]
pub enum VideoOutcome {
  Done(TaskReport),
  Skipped,
  Failed(VideoError),
}

impl VideoOutcome {
  pub fn state(&self) -> SessionState {
    match self {
      VideoOutcome::Done(_) => SessionState::Done,
      VideoOutcome::Skipped => SessionState::Skipped,
      VideoOutcome::Failed(_) => SessionState::Failed,
    }
  }
}

/// 多个视频的汇总
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
  pub completed: usize,
  pub skipped: usize,
  pub failed: usize,
  /// 收到中断信号后未处理的视频数
  pub interrupted: usize,
}

/// 依次处理视频：查重、下载、检测识别、写入结果
pub struct SessionManager<'a> {
  storage: &'a dyn Storage,
  detector: &'a dyn Detector,
  recognizer: &'a dyn Recognizer,
  acquirer: Box<dyn Acquirer + 'a>,
  opener: Box<dyn OpenVideo + 'a>,
  confirm: Box<dyn Confirm + 'a>,
  config: PipelineConfig,
  normalizer: TextNormalizer,
  policy: ReprocessPolicy,
  remove_downloaded: bool,
  #[cfg(feature = "crop_record")]
  crops: Option<&'a CropRecorder>,
}

impl<'a> SessionManager<'a> {
  pub fn new(
    storage: &'a dyn Storage,
    detector: &'a dyn Detector,
    recognizer: &'a dyn Recognizer,
  ) -> Self {
    Self {
      storage,
      detector,
      recognizer,
      acquirer: Box::new(NoAcquirer),
      opener: Box::new(DecoderBackend::default()),
      confirm: Box::new(DeclineConfirm),
      config: PipelineConfig::default(),
      normalizer: TextNormalizer::default(),
      policy: ReprocessPolicy::PROMPT,
      remove_downloaded: false,
      #[cfg(feature = "crop_record")]
      crops: None,
    }
  }

  pub fn with_acquirer(mut self, acquirer: impl Acquirer + 'a) -> Self {
    self.acquirer = Box::new(acquirer);
    self
  }

  pub fn with_opener(mut self, opener: impl OpenVideo + 'a) -> Self {
    self.opener = Box::new(opener);
    self
  }

  pub fn with_confirm(mut self, confirm: impl Confirm + 'a) -> Self {
    self.confirm = Box::new(confirm);
    self
  }

  pub fn with_config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn with_normalizer(mut self, normalizer: TextNormalizer) -> Self {
    self.normalizer = normalizer;
    self
  }

  pub fn with_policy(mut self, policy: ReprocessPolicy) -> Self {
    self.policy = policy;
    self
  }

  /// 处理完成后删除下载的文件，用户提供的本地文件不受影响
  pub fn remove_downloaded(mut self, remove: bool) -> Self {
    self.remove_downloaded = remove;
    self
  }

  #[cfg(feature = "crop_record")]
  pub fn with_crop_recorder(mut self, crops: Option<&'a CropRecorder>) -> Self {
    self.crops = crops;
    self
  }

  /// 把播放列表、频道展开为单个视频，展开失败时保留原 URL
  pub fn expand(&self, requests: Vec<VideoRequest>) -> Vec<VideoRequest> {
    let mut expanded = Vec::with_capacity(requests.len());
    for request in requests {
      match (&request.url, &request.local_path) {
        (Some(url), None) => match self.acquirer.expand(url) {
          Ok(urls) => expanded.extend(urls.into_iter().map(VideoRequest::from_url)),
          Err(e) => {
            warn!("无法展开 {}: {}", url, e);
            expanded.push(request);
          }
        },
        _ => expanded.push(request),
      }
    }
    expanded
  }

  /// 按顺序处理所有视频，单个视频失败不影响其他视频
  pub fn run_all(&self, requests: &[VideoRequest], stop: &AtomicBool) -> RunSummary {
    let mut summary = RunSummary::default();
    for (i, request) in requests.iter().enumerate() {
      if stop.load(Ordering::SeqCst) {
        summary.interrupted = requests.len() - i;
        warn!("收到中断信号，剩余 {} 个视频未处理", summary.interrupted);
        break;
      }
      info!("[{}/{}] 处理视频", i + 1, requests.len());
      match self.process(request) {
        VideoOutcome::Done(_) => summary.completed += 1,
        VideoOutcome::Skipped => summary.skipped += 1,
        VideoOutcome::Failed(_) => summary.failed += 1,
      }
    }
    summary
  }

  pub fn process(&self, request: &VideoRequest) -> VideoOutcome {
    debug!("状态: {}", SessionState::Resolving);
    let Some(identity) = request.identity() else {
      error!("处理失败 [{}]: {}", SessionState::Resolving, VideoError::MissingIdentity);
      return VideoOutcome::Failed(VideoError::MissingIdentity);
    };

    let span = info_span!("video", identity = %identity);
    let _enter = span.enter();

    let outcome = match self.run(request, &identity) {
      Ok(Some(report)) => VideoOutcome::Done(report),
      Ok(None) => VideoOutcome::Skipped,
      Err(e) => {
        error!("处理失败 [{}]: {}", e.stage(), e);
        VideoOutcome::Failed(e)
      }
    };
    debug!("状态: {}", outcome.state());
    outcome
  }

  fn run(&self, request: &VideoRequest, identity: &str) -> Result<Option<TaskReport>, VideoError> {
    debug!("状态: {}", SessionState::PolicyCheck);
    if let Some(existing) = self.storage.find_video_by_identity(identity)? {
      if !self.policy.decide(&existing, self.confirm.as_ref()) {
        info!(
          "视频已于 {} 处理过，跳过",
          existing.processed_at.format("%Y-%m-%d %H:%M:%S")
        );
        return Ok(None);
      }
      info!("视频已处理过，重新处理");
    }

    debug!("状态: {}", SessionState::Acquiring);
    let (path, downloaded) = match (&request.local_path, &request.url) {
      (Some(path), _) => (path.clone(), false),
      (None, Some(url)) => (self.acquirer.resolve(url)?, true),
      (None, None) => return Err(VideoError::MissingIdentity),
    };

    debug!("状态: {}", SessionState::Processing);
    let result = self.process_file(request, identity, &path);

    if downloaded && self.remove_downloaded {
      match std::fs::remove_file(&path) {
        Ok(()) => info!("已删除下载的文件: {}", path.display()),
        Err(e) => warn!("无法删除 {}: {}", path.display(), e),
      }
    }

    result.map(Some)
  }

  fn process_file(
    &self,
    request: &VideoRequest,
    identity: &str,
    path: &Path,
  ) -> Result<TaskReport, VideoError> {
    // 首帧解码成功后才创建视频记录，无法解码的文件不留记录
    let source = Prefetched::start(self.opener.open(path)?)?;
    let frame_rate = source.frame_rate();

    let video = self.storage.create_video(&NewVideo {
      identity: identity.to_string(),
      url: request.url.clone(),
      local_path: path.to_path_buf(),
      processed_at: Utc::now(),
    })?;
    debug!("视频记录 #{}", video);

    let sink = ResultSink::new(self.storage, video, frame_rate);
    #[cfg(feature = "crop_record")]
    let sink = sink.with_crops(self.crops);

    let task = PlateTask::new(self.detector, self.recognizer)
      .with_config(self.config)
      .with_normalizer(self.normalizer.clone());
    let report = task.run_task(Box::new(source) as Box<dyn FrameSource>, &sink)?;

    info!(
      "完成: {} 条记录, 视频时长 {:.1}s, 耗时 {:.2?}",
      report.observations, report.video_duration, report.elapsed
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::{FrameSource, MemoryInput};
  use crate::model::{DetectError, Detection, RecognizeError};
  use crate::output::MemoryStore;
  use image::RgbImage;
  use std::cell::Cell;

  struct CornerDetector;

  impl Detector for CornerDetector {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
      Ok(vec![Detection::new(0.0, 0.0, 4.0, 4.0, 0.9)])
    }
  }

  struct FixedRecognizer;

  impl Recognizer for FixedRecognizer {
    fn recognize(&self, _crop: &RgbImage) -> Result<String, RecognizeError> {
      Ok("abc123".to_string())
    }
  }

  /// 路径名包含 "corrupt" 时打开失败，包含 "undecodable" 时首帧解码失败
  struct MemoryOpener;

  impl OpenVideo for MemoryOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, InputError> {
      let name = path.to_string_lossy();
      if name.contains("corrupt") {
        return Err(InputError::ProbeError("moov atom not found".to_string()));
      }
      if name.contains("undecodable") {
        return Ok(Box::new(MemoryInput::blank(20, 8, 8, 10.0).failing_at(0)));
      }
      Ok(Box::new(MemoryInput::blank(20, 8, 8, 10.0)))
    }
  }

  struct ScriptedConfirm {
    answer: bool,
    asked: Cell<usize>,
  }

  impl Confirm for &ScriptedConfirm {
    fn confirm(&self, _existing: &Video) -> bool {
      self.asked.set(self.asked.get() + 1);
      self.answer
    }
  }

  struct FileAcquirer {
    path: Option<PathBuf>,
  }

  impl Acquirer for FileAcquirer {
    fn resolve(&self, url: &str) -> Result<PathBuf, AcquireError> {
      self
        .path
        .clone()
        .ok_or_else(|| AcquireError::DownloadFailed(format!("{}: 404", url)))
    }
  }

  fn manager(store: &MemoryStore) -> SessionManager<'_> {
    SessionManager::new(store, &CornerDetector, &FixedRecognizer).with_opener(MemoryOpener)
  }

  #[test]
  fn test_identity_prefers_url() {
    let request = VideoRequest {
      url: Some("https://example.com/v".to_string()),
      local_path: Some(PathBuf::from("v.mp4")),
    };
    assert_eq!(request.identity().unwrap(), "https://example.com/v");
    assert_eq!(
      VideoRequest::from_path("v.mp4").identity().unwrap(),
      "v.mp4"
    );
    let empty = VideoRequest {
      url: None,
      local_path: None,
    };
    assert!(empty.identity().is_none());
    assert_eq!(
      VideoRequest::from_entry("https://youtu.be/x"),
      VideoRequest::from_url("https://youtu.be/x")
    );
  }

  #[test]
  fn test_conflicting_policy() {
    assert_eq!(
      ReprocessPolicy::new(true, true),
      Err(ConfigError::ConflictingPolicy)
    );
  }

  #[test]
  fn test_process_new_video() {
    let store = MemoryStore::default();
    let outcome = manager(&store).process(&VideoRequest::from_path("clip.mp4"));

    let report = match outcome {
      VideoOutcome::Done(report) => report,
      other => panic!("expected done, got {:?}", other),
    };
    assert_eq!(report.selected_frames, 4);
    assert_eq!(report.observations, 4);
    assert_eq!(store.video_count().unwrap(), 1);
    let video = store.find_video_by_identity("clip.mp4").unwrap().unwrap();
    let rows = store.observations(video.id).unwrap();
    assert!(rows.iter().all(|r| r.plate_text == "ABC123"));
  }

  #[test]
  fn test_skip_policy_creates_nothing() {
    let store = MemoryStore::default();
    let request = VideoRequest::from_path("clip.mp4");
    manager(&store).process(&request);

    let skipping = manager(&store).with_policy(ReprocessPolicy::new(false, true).unwrap());
    assert!(matches!(skipping.process(&request), VideoOutcome::Skipped));
    assert_eq!(store.video_count().unwrap(), 1);
    assert_eq!(store.observation_count().unwrap(), 4);
  }

  #[test]
  fn test_force_policy_reprocesses_without_prompt() {
    let store = MemoryStore::default();
    let request = VideoRequest::from_path("clip.mp4");
    manager(&store).process(&request);

    let confirm = ScriptedConfirm {
      answer: false,
      asked: Cell::new(0),
    };
    let forcing = manager(&store)
      .with_policy(ReprocessPolicy::new(true, false).unwrap())
      .with_confirm(&confirm);
    assert!(matches!(forcing.process(&request), VideoOutcome::Done(_)));
    assert_eq!(confirm.asked.get(), 0);
    assert_eq!(store.video_count().unwrap(), 2);
  }

  #[test]
  fn test_prompt_policy_asks() {
    let store = MemoryStore::default();
    let request = VideoRequest::from_path("clip.mp4");
    manager(&store).process(&request);

    let no = ScriptedConfirm {
      answer: false,
      asked: Cell::new(0),
    };
    let outcome = manager(&store).with_confirm(&no).process(&request);
    assert!(matches!(outcome, VideoOutcome::Skipped));
    assert_eq!(no.asked.get(), 1);

    let yes = ScriptedConfirm {
      answer: true,
      asked: Cell::new(0),
    };
    let outcome = manager(&store).with_confirm(&yes).process(&request);
    assert!(matches!(outcome, VideoOutcome::Done(_)));
    assert_eq!(yes.asked.get(), 1);
    assert_eq!(store.video_count().unwrap(), 2);
  }

  #[test]
  fn test_corrupt_video_leaves_no_record() {
    let store = MemoryStore::default();
    let outcome = manager(&store).process(&VideoRequest::from_path("corrupt.mp4"));

    let e = match outcome {
      VideoOutcome::Failed(e) => e,
      other => panic!("expected failure, got {:?}", other),
    };
    assert!(matches!(e, VideoError::Open(_)));
    assert_eq!(e.stage(), "open");
    assert_eq!(store.video_count().unwrap(), 0);
    assert_eq!(store.observation_count().unwrap(), 0);
  }

  #[test]
  fn test_undecodable_first_frame_leaves_no_record() {
    let store = MemoryStore::default();
    let outcome = manager(&store).process(&VideoRequest::from_path("undecodable.mp4"));

    assert!(matches!(
      outcome,
      VideoOutcome::Failed(VideoError::Open(InputError::DecodeError(_)))
    ));
    assert_eq!(store.video_count().unwrap(), 0);
  }

  #[test]
  fn test_stage_labels() {
    assert_eq!(VideoError::MissingIdentity.stage(), "resolve");
    assert_eq!(
      VideoError::from(TaskError::Storage(StorageError::Poisoned)).stage(),
      "storage"
    );
    assert_eq!(VideoError::from(TaskError::WorkerPanicked).stage(), "process");
  }

  #[test]
  fn test_acquire_failure_does_not_stop_batch() {
    let store = MemoryStore::default();
    let sessions = manager(&store).with_acquirer(FileAcquirer { path: None });
    let requests = vec![
      VideoRequest::from_url("https://example.com/missing"),
      VideoRequest::from_path("clip.mp4"),
      VideoRequest::from_path("corrupt.mp4"),
    ];

    let summary = sessions.run_all(&requests, &AtomicBool::new(false));
    assert_eq!(
      summary,
      RunSummary {
        completed: 1,
        skipped: 0,
        failed: 2,
        interrupted: 0,
      }
    );
  }

  #[test]
  fn test_downloaded_file_is_removed_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("video.mp4");
    std::fs::write(&path, b"fake").unwrap();

    let store = MemoryStore::default();
    let sessions = manager(&store)
      .with_acquirer(FileAcquirer {
        path: Some(path.clone()),
      })
      .remove_downloaded(true);
    let outcome = sessions.process(&VideoRequest::from_url("https://example.com/v"));

    assert!(matches!(outcome, VideoOutcome::Done(_)));
    assert!(!path.exists());
    let video = store
      .find_video_by_identity("https://example.com/v")
      .unwrap()
      .unwrap();
    assert_eq!(video.local_path, path);
  }

  #[test]
  fn test_stop_flag_interrupts_batch() {
    let store = MemoryStore::default();
    let requests = vec![
      VideoRequest::from_path("a.mp4"),
      VideoRequest::from_path("b.mp4"),
    ];
    let summary = manager(&store).run_all(&requests, &AtomicBool::new(true));
    assert_eq!(summary.interrupted, 2);
    assert_eq!(store.video_count().unwrap(), 0);
  }
}
