// 该文件是 Chepai （车牌） 项目的一部分。
// src/frame.rs - 帧与边界框定义
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

use image::{RgbImage, imageops};
use serde::{Deserialize, Serialize};

/// 解码后的一帧
///
/// 帧由解码线程独占，送入队列后所有权转移到批次，批次处理完毕即释放。
#[derive(Debug, Clone)]
pub struct Frame {
  /// 帧索引，从 0 开始单调递增
  pub index: u64,
  /// RGB 图像数据
  pub image: RgbImage,
}

impl Frame {
  pub fn new(index: u64, image: RgbImage) -> Self {
    Self { index, image }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// 视频内时间戳（秒）
  pub fn timestamp(&self, frame_rate: f64) -> f64 {
    timestamp_seconds(self.index, frame_rate)
  }
}

/// 由帧索引与帧率推导时间戳（秒）
pub fn timestamp_seconds(index: u64, frame_rate: f64) -> f64 {
  if frame_rate > 0.0 {
    index as f64 / frame_rate
  } else {
    0.0
  }
}

/// 源帧像素坐标系下的边界框 [x1, y1, x2, y2]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
  pub x1: f32,
  pub y1: f32,
  pub x2: f32,
  pub y2: f32,
}

impl BBox {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self { x1, y1, x2, y2 }
  }

  /// 裁剪到 [0, width] x [0, height]
  pub fn clip(&self, width: u32, height: u32) -> BBox {
    let (w, h) = (width as f32, height as f32);
    BBox {
      x1: self.x1.clamp(0.0, w),
      y1: self.y1.clamp(0.0, h),
      x2: self.x2.clamp(0.0, w),
      y2: self.y2.clamp(0.0, h),
    }
  }

  /// NaN 坐标也视为空框
  pub fn is_empty(&self) -> bool {
    !(self.x2 > self.x1 && self.y2 > self.y1)
  }

  pub fn area(&self) -> f32 {
    if self.is_empty() {
      0.0
    } else {
      (self.x2 - self.x1) * (self.y2 - self.y1)
    }
  }

  pub fn iou(&self, other: &BBox) -> f32 {
    let inter = BBox {
      x1: self.x1.max(other.x1),
      y1: self.y1.max(other.y1),
      x2: self.x2.min(other.x2),
      y2: self.y2.min(other.y2),
    }
    .area();
    let union = self.area() + other.area() - inter;
    if union > 0.0 { inter / union } else { 0.0 }
  }

  /// 裁剪后的整数像素区域 (x, y, width, height)，区域为空时返回 None
  pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let clipped = self.clip(width, height);
    if clipped.is_empty() {
      return None;
    }

    let x = clipped.x1.floor() as u32;
    let y = clipped.y1.floor() as u32;
    let x_end = (clipped.x2.ceil() as u32).min(width);
    let y_end = (clipped.y2.ceil() as u32).min(height);
    if x_end <= x || y_end <= y {
      return None;
    }

    Some((x, y, x_end - x, y_end - y))
  }
}

/// 按边界框裁剪图像，框超出图像部分会被截掉
pub fn crop(image: &RgbImage, bbox: &BBox) -> Option<RgbImage> {
  let (x, y, w, h) = bbox.pixel_rect(image.width(), image.height())?;
  Some(imageops::crop_imm(image, x, y, w, h).to_image())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_timestamp_from_index() {
    let frame = Frame::new(150, RgbImage::new(4, 4));
    assert!((frame.timestamp(30.0) - 5.0).abs() < 1e-9);
    assert!((timestamp_seconds(1001, 29.97) - 1001.0 / 29.97).abs() < 1e-9);
    assert_eq!(timestamp_seconds(10, 0.0), 0.0);
  }

  #[test]
  fn test_clip_box_outside_frame() {
    let bbox = BBox::new(-12.5, -3.0, 130.0, 70.0);
    let clipped = bbox.clip(100, 60);
    assert_eq!(clipped, BBox::new(0.0, 0.0, 100.0, 60.0));
  }

  #[test]
  fn test_crop_partially_outside_does_not_panic() {
    let image = RgbImage::from_pixel(100, 60, image::Rgb([10, 20, 30]));
    let cropped = crop(&image, &BBox::new(90.0, 50.0, 140.0, 95.0)).unwrap();
    assert_eq!(cropped.dimensions(), (10, 10));
  }

  #[test]
  fn test_crop_fully_outside_is_none() {
    let image = RgbImage::new(100, 60);
    assert!(crop(&image, &BBox::new(120.0, 10.0, 160.0, 30.0)).is_none());
    assert!(crop(&image, &BBox::new(f32::NAN, 0.0, 10.0, 10.0)).is_none());
    assert!(crop(&image, &BBox::new(30.0, 30.0, 20.0, 40.0)).is_none());
  }

  #[test]
  fn test_iou() {
    let a = BBox::new(0.0, 0.0, 10.0, 10.0);
    let b = BBox::new(5.0, 0.0, 15.0, 10.0);
    assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    assert_eq!(a.iou(&BBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
  }
}
