// 该文件是 Chepai （车牌） 项目的一部分。
// src/model.rs - 检测与识别能力
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
use thiserror::Error;

use crate::frame::BBox;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("批量结果数量不匹配: 期望 {expected}, 实际 {actual}")]
  BatchLengthMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum RecognizeError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("识别引擎不可用: {0}")]
  Unavailable(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("识别进程失败: {0}")]
  ProcessFailed(String),
}

/// 单个检测框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub bbox: BBox,
  /// 检测器给出的置信度
  pub score: f32,
}

impl Detection {
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
    Self {
      bbox: BBox::new(x1, y1, x2, y2),
      score,
    }
  }
}

/// 车牌检测器
pub trait Detector {
  fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError>;

  /// 批量检测，结果与输入一一对应且保持顺序
  fn detect_batch(&self, frames: &[&RgbImage]) -> Result<Vec<Vec<Detection>>, DetectError> {
    frames.iter().map(|frame| self.detect(frame)).collect()
  }
}

/// 文字识别器
///
/// 返回未规范化的原始文本，空字符串表示没有识别到内容。
pub trait Recognizer {
  fn recognize(&self, crop: &RgbImage) -> Result<String, RecognizeError>;
}

/// 非极大值抑制，返回按置信度降序保留的检测框
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));
  let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
  for det in detections {
    if kept
      .iter()
      .all(|k| k.bbox.iou(&det.bbox) <= iou_threshold)
    {
      kept.push(det);
    }
  }
  kept
}

#[cfg(feature = "detector_onnx")]
mod onnx_yolo;
#[cfg(feature = "detector_onnx")]
pub use self::onnx_yolo::{OnnxPlateDetector, OnnxPlateDetectorBuilder};

mod tesseract;
pub use self::tesseract::TesseractRecognizer;
