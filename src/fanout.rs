// 该文件是 Chepai （车牌） 项目的一部分。
// src/fanout.rs - 检测框到文字识别的分发
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

use image::RgbImage;
use tracing::{debug, trace};

use crate::frame::{BBox, Frame, crop};
use crate::model::{Detection, Recognizer};
use crate::normalize::TextNormalizer;

/// 一次被接受的识别结果
#[derive(Debug, Clone, PartialEq)]
pub struct PlateRead {
  pub frame_index: u64,
  /// 规范化后的文本，非空
  pub text: String,
  /// 检测器置信度
  pub confidence: f32,
  /// 裁剪到帧边界之后的框
  pub bbox: BBox,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutStats {
  pub detections: u64,
  pub accepted: u64,
  /// 识别失败或文本为空
  pub misses: u64,
  pub below_threshold: u64,
}

pub struct Fanout<'a> {
  recognizer: &'a dyn Recognizer,
  normalizer: &'a TextNormalizer,
  confidence_threshold: f32,
}

impl<'a> Fanout<'a> {
  pub fn new(
    recognizer: &'a dyn Recognizer,
    normalizer: &'a TextNormalizer,
    confidence_threshold: f32,
  ) -> Self {
    Self {
      recognizer,
      normalizer,
      confidence_threshold,
    }
  }

  /// 识别一帧中的全部检测框，每个被接受的结果连同裁剪图交给 `accept`
  ///
  /// 识别失败与空文本只计数，不产生记录。`accept` 的错误会立即返回。
  pub fn process_frame<E, F>(
    &self,
    frame: &Frame,
    detections: &[Detection],
    stats: &mut FanoutStats,
    mut accept: F,
  ) -> Result<(), E>
  where
    F: FnMut(&PlateRead, &RgbImage) -> Result<(), E>,
  {
    for detection in detections {
      stats.detections += 1;
      if detection.score < self.confidence_threshold {
        stats.below_threshold += 1;
        continue;
      }

      let bbox = detection.bbox.clip(frame.width(), frame.height());
      let Some(plate) = crop(&frame.image, &bbox) else {
        trace!("第 {} 帧的检测框裁剪后为空: {:?}", frame.index, detection.bbox);
        stats.misses += 1;
        continue;
      };

      let raw = match self.recognizer.recognize(&plate) {
        Ok(raw) => raw,
        Err(e) => {
          debug!("第 {} 帧识别失败: {}", frame.index, e);
          stats.misses += 1;
          continue;
        }
      };

      let text = self.normalizer.normalize(&raw);
      if text.is_empty() {
        stats.misses += 1;
        continue;
      }

      let read = PlateRead {
        frame_index: frame.index,
        text,
        confidence: detection.score,
        bbox,
      };
      accept(&read, &plate)?;
      stats.accepted += 1;
    }
    Ok(())
  }
}
