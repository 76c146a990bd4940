// 该文件是 Chepai （车牌） 项目的一部分。
// src/input.rs - 视频输入
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

use thiserror::Error;

use crate::frame::Frame;

mod ffmpeg_input;
pub use self::ffmpeg_input::{FfmpegInput, FfmpegTools};

mod memory_input;
pub use self::memory_input::MemoryInput;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("视频文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法探测视频信息: {0}")]
  ProbeError(String),
  #[error("无效的帧率: {0}")]
  InvalidFrameRate(f64),
  #[error("解码错误: {0}")]
  DecodeError(String),
  #[error("解码后端不可用: {0}")]
  BackendUnavailable(&'static str),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

/// 顺序解码的帧来源
///
/// 帧索引从 0 开始连续递增，不支持随机访问。
pub trait FrameSource: Send {
  /// 帧率（帧/秒），始终大于 0
  fn frame_rate(&self) -> f64;

  fn width(&self) -> u32;

  fn height(&self) -> u32;

  /// 解码下一帧，`Ok(None)` 表示视频结束
  fn next_frame(&mut self) -> Result<Option<Frame>, InputError>;
}

/// 打开视频文件得到帧来源
pub trait OpenVideo {
  fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, InputError>;
}

/// 已解码出首帧的帧来源
///
/// 首帧解码失败或视频中没有任何帧时视为无法打开。
pub struct Prefetched {
  first: Option<Frame>,
  inner: Box<dyn FrameSource>,
}

impl Prefetched {
  pub fn start(mut inner: Box<dyn FrameSource>) -> Result<Self, InputError> {
    match inner.next_frame()? {
      Some(frame) => Ok(Self {
        first: Some(frame),
        inner,
      }),
      None => Err(InputError::DecodeError("视频中没有可解码的帧".to_string())),
    }
  }
}

impl FrameSource for Prefetched {
  fn frame_rate(&self) -> f64 {
    self.inner.frame_rate()
  }

  fn width(&self) -> u32 {
    self.inner.width()
  }

  fn height(&self) -> u32 {
    self.inner.height()
  }

  fn next_frame(&mut self) -> Result<Option<Frame>, InputError> {
    match self.first.take() {
      Some(frame) => Ok(Some(frame)),
      None => self.inner.next_frame(),
    }
  }
}

/// 解码后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DecoderBackend {
  /// 通过 ffprobe/ffmpeg 子进程解码
  #[default]
  Ffmpeg,
  /// 通过 GStreamer 管道解码（需要 gstreamer_input 特性）
  Gstreamer,
}

impl OpenVideo for DecoderBackend {
  fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, InputError> {
    if !path.is_file() {
      return Err(InputError::NotFound(path.to_path_buf()));
    }

    match self {
      DecoderBackend::Ffmpeg => Ok(Box::new(FfmpegInput::open(path)?)),
      #[cfg(feature = "gstreamer_input")]
      DecoderBackend::Gstreamer => Ok(Box::new(GStreamerInput::open(path)?)),
      #[cfg(not(feature = "gstreamer_input"))]
      DecoderBackend::Gstreamer => Err(InputError::BackendUnavailable(
        "编译时未启用 gstreamer_input 特性",
      )),
    }
  }
}

/// 解析 "30000/1001" 或 "25" 形式的帧率
pub(crate) fn parse_frame_rate(rate: &str) -> Option<f64> {
  let rate = rate.trim();
  let value = match rate.split_once('/') {
    Some((num, den)) => {
      let num: f64 = num.trim().parse().ok()?;
      let den: f64 = den.trim().parse().ok()?;
      if den == 0.0 {
        return None;
      }
      num / den
    }
    None => rate.parse().ok()?,
  };
  (value.is_finite() && value > 0.0).then_some(value)
}
