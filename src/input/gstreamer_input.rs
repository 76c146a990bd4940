// 该文件是 Chepai （车牌） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入模块
//!
//! 通过 `filesrc ! decodebin ! videoconvert ! appsink` 管道顺序解码本地视频文件。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## Cargo 特性
//!
//! ```toml
//! [dependencies]
//! chepai = { version = "0.1", features = ["gstreamer_input"] }
//! ```
//!
//! 与实时预览不同，appsink 不丢帧（`drop=false`），解码速度由消费端决定。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};

use super::{FrameSource, InputError};
use crate::frame::Frame;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

fn file_pipeline(path: &Path) -> String {
  let location = path.display().to_string().replace('"', "\\\"");
  format!(
    "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4 drop=false",
    location
  )
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  frame_rate: f64,
  frame_index: u64,
  finished: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  pub fn open(path: &Path) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let description = file_pipeline(path);
    info!("GStreamer pipeline description: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    // 预滚动以获取尺寸与帧率，预滚动样本之后仍会作为第一帧返回
    pipeline.set_state(gst::State::Paused)?;
    let preroll = match appsink.pull_preroll() {
      Ok(sample) => sample,
      Err(e) => {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(GStreamerInputError::PipelineError(format!(
          "无法预滚动视频: {}",
          e
        )));
      }
    };
    let caps = preroll
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
    let fps = video_info.fps();
    let frame_rate = if fps.denom() > 0 {
      fps.numer() as f64 / fps.denom() as f64
    } else {
      0.0
    };
    if frame_rate <= 0.0 {
      let _ = pipeline.set_state(gst::State::Null);
      return Err(GStreamerInputError::PipelineError(format!(
        "无效的帧率: {}/{}",
        fps.numer(),
        fps.denom()
      )));
    }

    pipeline.set_state(gst::State::Playing)?;

    Ok(Self {
      width: video_info.width(),
      height: video_info.height(),
      frame_rate,
      pipeline,
      appsink,
      frame_index: 0,
      finished: false,
    })
  }
}

impl FrameSource for GStreamerInput {
  fn frame_rate(&self) -> f64 {
    self.frame_rate
  }

  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn next_frame(&mut self) -> Result<Option<Frame>, InputError> {
    if self.finished {
      return Ok(None);
    }

    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(e) => {
        self.finished = true;
        if self.appsink.is_eos() {
          return Ok(None);
        }
        return Err(InputError::DecodeError(e.to_string()));
      }
    };

    let image = convert_sample_to_rgb(sample)?;
    let frame = Frame::new(self.frame_index, image);
    self.frame_index += 1;
    Ok(Some(frame))
  }
}

fn convert_sample_to_rgb(sample: gst::Sample) -> Result<RgbImage, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let row_len = width * 3;
  let expected_size = stride * (height.saturating_sub(1)) + row_len;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // 去掉行对齐填充
  let mut image_data = Vec::with_capacity(row_len * height);
  for y in 0..height {
    let row_start = y * stride;
    image_data.extend_from_slice(&data[row_start..row_start + row_len]);
  }

  RgbImage::from_raw(width as u32, height as u32, image_data)
    .ok_or_else(|| GStreamerInputError::PipelineError("无法创建 RGB 图像".to_string()))
}
