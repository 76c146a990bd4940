// 该文件是 Chepai （车牌） 项目的一部分。
// src/output/crop_record.rs - 按日期目录保存车牌裁剪图
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

use chrono::{Datelike, Utc};
use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  fanout::PlateRead,
  output::{Render, VideoId},
};

#[derive(Error, Debug)]
pub enum CropRecorderError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 把被接受的车牌裁剪图保存为 `DIR/YYYY/MM/DD/<视频>-<帧>-<文本>.png`
pub struct CropRecorder {
  directory: PathBuf,
}

impl FromUrlWithScheme for CropRecorder {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for CropRecorder {
  type Error = CropRecorderError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(CropRecorderError::SchemeMismatch);
    }
    // folder://crops 为相对路径，folder:///data/crops 为绝对路径
    let directory = match uri.host_str().filter(|h| !h.is_empty()) {
      Some(host) => PathBuf::from(format!("{}{}", host, uri.path())),
      None => PathBuf::from(uri.path()),
    };
    Ok(Self::new(directory))
  }
}

impl CropRecorder {
  pub fn new(directory: impl AsRef<Path>) -> Self {
    Self {
      directory: directory.as_ref().to_path_buf(),
    }
  }

  fn crop_path(&self, video: VideoId, read: &PlateRead) -> Result<PathBuf, CropRecorderError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:06}-{}.png",
      video, read.frame_index, read.text
    )))
  }
}

impl Render<RgbImage, (VideoId, PlateRead)> for CropRecorder {
  type Error = CropRecorderError;

  fn render_result(
    &self,
    crop: &RgbImage,
    result: &(VideoId, PlateRead),
  ) -> Result<(), Self::Error> {
    let (video, read) = result;
    let path = self.crop_path(*video, read)?;
    crop.save(&path)?;
    Ok(())
  }
}
