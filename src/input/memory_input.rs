// 该文件是 Chepai （车牌） 项目的一部分。
// src/input/memory_input.rs - 内存帧输入
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

use image::{Rgb, RgbImage};

use super::{FrameSource, InputError};
use crate::frame::Frame;

/// 内存中的帧序列，帧在读取时按需生成
pub struct MemoryInput {
  width: u32,
  height: u32,
  frame_rate: f64,
  total_frames: u64,
  /// 在该索引处返回解码错误
  fail_at: Option<u64>,
  frame_index: u64,
}

impl MemoryInput {
  /// 生成 `total_frames` 帧纯色图像
  pub fn blank(total_frames: u64, width: u32, height: u32, frame_rate: f64) -> Self {
    Self {
      width,
      height,
      frame_rate,
      total_frames,
      fail_at: None,
      frame_index: 0,
    }
  }

  /// 在第 `index` 帧模拟解码失败
  pub fn failing_at(mut self, index: u64) -> Self {
    self.fail_at = Some(index);
    self
  }
}

impl FrameSource for MemoryInput {
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
    if self.frame_index >= self.total_frames {
      return Ok(None);
    }
    if self.fail_at == Some(self.frame_index) {
      return Err(InputError::DecodeError(format!(
        "第 {} 帧数据损坏",
        self.frame_index
      )));
    }

    let shade = (self.frame_index % 256) as u8;
    let image = RgbImage::from_pixel(self.width, self.height, Rgb([shade, shade, shade]));
    let frame = Frame::new(self.frame_index, image);
    self.frame_index += 1;
    Ok(Some(frame))
  }
}
