// 该文件是 Chepai （车牌） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use chepai::{
  acquire::{AcquireError, read_list_file},
  config::{ConfigError, DEFAULT_BATCH_SIZE, PipelineConfig},
  input::DecoderBackend,
  sampler::FrameSkip,
  session::{ReprocessPolicy, VideoRequest},
};

/// Chepai 车牌检测与识别
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 视频 URL（单个视频、播放列表或频道）
  #[arg(long, value_name = "URL")]
  pub video_url: Option<String>,

  /// 本地视频文件路径
  #[arg(long, value_name = "FILE")]
  pub video_path: Option<PathBuf>,

  /// 视频列表文件，每行一个 URL 或本地路径
  #[arg(long, value_name = "FILE")]
  pub list: Option<PathBuf>,

  /// 检测置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence_threshold: f32,

  /// 每隔多少帧检测一次
  #[arg(long, default_value = "5", value_name = "N")]
  pub frame_skip: u64,

  /// 每批送入检测器的帧数
  #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "N")]
  pub batch_size: usize,

  /// 解码队列容量，默认为批大小的两倍
  #[arg(long, value_name = "N")]
  pub queue_capacity: Option<usize>,

  /// 已处理过的视频直接重新处理
  #[arg(long)]
  pub force: bool,

  /// 已处理过的视频直接跳过
  #[arg(long)]
  pub skip: bool,

  /// 数据库
  #[arg(long, default_value = "sqlite:license_plate_data.db", value_name = "URL")]
  pub db: Url,

  /// 车牌检测模型，例如 onnx:///models/plate.onnx
  #[arg(long, value_name = "MODEL")]
  pub detector: Url,

  /// 文字识别引擎
  #[arg(long, default_value = "tesseract://?psm=7&lang=eng", value_name = "OCR")]
  pub ocr: Url,

  /// 解码后端
  #[arg(long, value_enum, default_value_t = DecoderBackend::Ffmpeg)]
  pub decoder: DecoderBackend,

  /// 下载目录
  #[arg(long, default_value = "downloads", value_name = "DIR")]
  pub download_dir: PathBuf,

  /// 处理完成后删除下载的视频
  #[arg(long)]
  pub remove_downloaded: bool,

  /// 保存被识别的车牌图像，例如 folder://crops
  #[arg(long, value_name = "FOLDER")]
  pub save_crops: Option<Url>,

  /// 结果只保存在内存中，不写数据库
  #[arg(long)]
  pub dry_run: bool,
}

impl Args {
  pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
    let mut config = PipelineConfig::default()
      .with_frame_skip(FrameSkip::new(self.frame_skip)?)
      .with_batch_size(self.batch_size)
      .with_confidence_threshold(self.confidence_threshold);
    if let Some(capacity) = self.queue_capacity {
      config = config.with_queue_capacity(capacity);
    }
    config.validate()
  }

  pub fn policy(&self) -> Result<ReprocessPolicy, ConfigError> {
    ReprocessPolicy::new(self.force, self.skip)
  }

  /// 汇总所有来源，`--video-url` 与 `--video-path` 同时给出时视为同一个视频
  pub fn requests(&self) -> Result<Vec<VideoRequest>, AcquireError> {
    let mut requests = Vec::new();
    if self.video_url.is_some() || self.video_path.is_some() {
      requests.push(VideoRequest {
        url: self.video_url.clone(),
        local_path: self.video_path.clone(),
      });
    }
    if let Some(list) = &self.list {
      requests.extend(
        read_list_file(list)?
          .iter()
          .map(|entry| VideoRequest::from_entry(entry)),
      );
    }
    Ok(requests)
  }
}
