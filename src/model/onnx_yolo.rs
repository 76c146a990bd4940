// 该文件是 Chepai （车牌） 项目的一部分。
// src/model/onnx_yolo.rs - ONNX YOLO 车牌检测器
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
use std::sync::Arc;

use image::{RgbImage, imageops};
use ndarray::{Array4, CowArray, IxDyn};
use ort::environment::Environment;
use ort::session::{Session, SessionBuilder};
use ort::value::Value;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectError, Detection, Detector, non_max_suppression},
};

const YOLO_INPUT_W: u32 = 640;
const YOLO_INPUT_H: u32 = 640;
const YOLO_OBJECT_THRESH: f32 = 0.5;
const YOLO_NMS_THRESH: f32 = 0.45;

/// 单类别（车牌）YOLOv8 风格检测器
///
/// 输出张量形状为 `[N, 4 + C, A]` 或 `[N, A, 4 + C]`，前四个通道为中心点坐标与宽高。
pub struct OnnxPlateDetector {
  _environment: Arc<Environment>,
  session: Session,
  confidence_threshold: f32,
  nms_threshold: f32,
  /// 模型是否接受动态批大小
  dynamic_batch: bool,
}

pub struct OnnxPlateDetectorBuilder {
  model_path: PathBuf,
  confidence_threshold: f32,
  nms_threshold: f32,
}

impl FromUrlWithScheme for OnnxPlateDetectorBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxPlateDetectorBuilder {
  type Error = DetectError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut builder = OnnxPlateDetectorBuilder {
      model_path: PathBuf::from(url.path()),
      confidence_threshold: YOLO_OBJECT_THRESH,
      nms_threshold: YOLO_NMS_THRESH,
    };
    for (k, v) in url.query_pairs() {
      if k == "nms" {
        builder.nms_threshold = v
          .parse()
          .map_err(|_| DetectError::ModelPathError(format!("无效的 NMS 阈值: {}", v)))?;
      }
    }
    Ok(builder)
  }
}

impl OnnxPlateDetectorBuilder {
  pub fn confidence(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn build(self) -> Result<OnnxPlateDetector, DetectError> {
    if !self.model_path.is_file() {
      return Err(DetectError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path.display()
      )));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let environment = Environment::builder()
      .with_name("chepai")
      .build()
      .map_err(|e| DetectError::ModelLoadError(e.to_string()))?;
    let environment = Arc::new(environment);

    let session = SessionBuilder::new(&environment)
      .map_err(|e| DetectError::ModelLoadError(e.to_string()))?
      .with_model_from_file(&self.model_path)
      .map_err(|e| DetectError::ModelLoadError(e.to_string()))?;

    let dynamic_batch = session
      .inputs
      .first()
      .and_then(|input| input.dimensions.first().copied())
      .map(|dim| dim.is_none())
      .unwrap_or(false);
    debug!("模型动态批大小: {}", dynamic_batch);
    info!("模型加载完成");

    Ok(OnnxPlateDetector {
      _environment: environment,
      session,
      confidence_threshold: self.confidence_threshold,
      nms_threshold: self.nms_threshold,
      dynamic_batch,
    })
  }
}

impl OnnxPlateDetector {
  /// 缩放到模型输入尺寸并写入 NCHW 张量
  fn preprocess(frames: &[&RgbImage]) -> Result<Array4<f32>, DetectError> {
    let (w, h) = (YOLO_INPUT_W as usize, YOLO_INPUT_H as usize);
    let mut tensor = Array4::<f32>::zeros((frames.len(), 3, h, w));
    for (n, frame) in frames.iter().enumerate() {
      let resized = imageops::resize(
        *frame,
        YOLO_INPUT_W,
        YOLO_INPUT_H,
        imageops::FilterType::Triangle,
      );
      for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
          tensor[[n, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
      }
    }
    Ok(tensor)
  }

  fn run(&self, input: &Array4<f32>) -> Result<(Vec<f32>, Vec<usize>), DetectError> {
    let allocator = self.session.allocator();
    let input_dyn: CowArray<'_, f32, IxDyn> = CowArray::from(input.view().into_dyn());
    let value = Value::from_array(allocator, &input_dyn)
      .map_err(|e| DetectError::InferenceError(e.to_string()))?;
    let outputs = self
      .session
      .run(vec![value])
      .map_err(|e| DetectError::InferenceError(e.to_string()))?;
    let tensor = outputs
      .into_iter()
      .next()
      .ok_or_else(|| DetectError::InferenceError("模型没有输出".to_string()))?
      .try_extract::<f32>()
      .map_err(|e| DetectError::InferenceError(e.to_string()))?;
    let view = tensor.view();
    let shape = view.shape().to_vec();
    let data = view.iter().copied().collect::<Vec<f32>>();
    Ok((data, shape))
  }

  fn infer(&self, frames: &[&RgbImage]) -> Result<Vec<Vec<Detection>>, DetectError> {
    let input = Self::preprocess(frames)?;
    let (data, shape) = self.run(&input)?;
    let [batch, d1, d2] = shape[..] else {
      return Err(DetectError::InferenceError(format!(
        "输出形状无效: {:?}",
        shape
      )));
    };
    if batch != frames.len() {
      return Err(DetectError::BatchLengthMismatch {
        expected: frames.len(),
        actual: batch,
      });
    }

    Ok(
      frames
        .iter()
        .enumerate()
        .map(|(n, frame)| {
          let item = &data[n * d1 * d2..(n + 1) * d1 * d2];
          let detections = decode_output(
            item,
            d1,
            d2,
            frame.width() as f32 / YOLO_INPUT_W as f32,
            frame.height() as f32 / YOLO_INPUT_H as f32,
            self.confidence_threshold,
          );
          non_max_suppression(detections, self.nms_threshold)
        })
        .collect(),
    )
  }
}

/// 解码单张图像的输出，坐标换算回源帧像素
fn decode_output(
  item: &[f32],
  d1: usize,
  d2: usize,
  scale_x: f32,
  scale_y: f32,
  threshold: f32,
) -> Vec<Detection> {
  // 通道数总是小于锚点数
  let channels_first = d1 < d2;
  let (channels, anchors) = if channels_first { (d1, d2) } else { (d2, d1) };
  if channels < 5 {
    return Vec::new();
  }
  let at = |c: usize, a: usize| {
    if channels_first {
      item[c * anchors + a]
    } else {
      item[a * channels + c]
    }
  };

  let mut detections = Vec::new();
  for a in 0..anchors {
    let score = (4..channels).map(|c| at(c, a)).fold(0.0f32, f32::max);
    if score < threshold {
      continue;
    }
    let (cx, cy, w, h) = (at(0, a), at(1, a), at(2, a), at(3, a));
    detections.push(Detection::new(
      (cx - w / 2.0) * scale_x,
      (cy - h / 2.0) * scale_y,
      (cx + w / 2.0) * scale_x,
      (cy + h / 2.0) * scale_y,
      score,
    ));
  }
  detections
}

impl Detector for OnnxPlateDetector {
  fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
    let mut results = self.infer(&[frame])?;
    results.pop().ok_or(DetectError::BatchLengthMismatch {
      expected: 1,
      actual: 0,
    })
  }

  fn detect_batch(&self, frames: &[&RgbImage]) -> Result<Vec<Vec<Detection>>, DetectError> {
    if self.dynamic_batch {
      self.infer(frames)
    } else {
      frames.iter().map(|frame| self.detect(frame)).collect()
    }
  }
}
