// 该文件是 Chepai （车牌） 项目的一部分。
// src/model/tesseract.rs - Tesseract 文字识别
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

use std::io::{Cursor, Write};
use std::process::{Command, Stdio};

use image::{DynamicImage, ImageFormat, RgbImage, imageops};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{RecognizeError, Recognizer},
};

const DEFAULT_PROGRAM: &str = "tesseract";
/// 单行文本模式
const DEFAULT_PSM: u8 = 7;
const DEFAULT_LANG: &str = "eng";

/// 调用 tesseract 可执行文件识别车牌文字
///
/// URL 形式: `tesseract://?psm=7&lang=eng`，路径部分可指定可执行文件位置，
/// 例如 `tesseract:///opt/bin/tesseract`。
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
  program: String,
  psm: u8,
  lang: String,
}

impl Default for TesseractRecognizer {
  fn default() -> Self {
    Self {
      program: DEFAULT_PROGRAM.to_string(),
      psm: DEFAULT_PSM,
      lang: DEFAULT_LANG.to_string(),
    }
  }
}

impl FromUrlWithScheme for TesseractRecognizer {
  const SCHEME: &'static str = "tesseract";
}

impl FromUrl for TesseractRecognizer {
  type Error = RecognizeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecognizeError::SchemeMismatch);
    }

    let mut recognizer = TesseractRecognizer::default();
    let path = url.path();
    if !path.is_empty() && path != "/" {
      recognizer.program = path.to_string();
    }
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "psm" => {
          recognizer.psm = v
            .parse()
            .map_err(|_| RecognizeError::Unavailable(format!("无效的 psm: {}", v)))?;
        }
        "lang" => recognizer.lang = v.into_owned(),
        _ => debug!("忽略未知参数: {}={}", k, v),
      }
    }
    Ok(recognizer)
  }
}

impl TesseractRecognizer {
  /// 检查可执行文件是否可用，在会话开始前调用一次
  pub fn ensure_available(self) -> Result<Self, RecognizeError> {
    let output = Command::new(&self.program)
      .arg("--version")
      .stdin(Stdio::null())
      .output()
      .map_err(|e| RecognizeError::Unavailable(format!("{}: {}", self.program, e)))?;
    if !output.status.success() {
      return Err(RecognizeError::Unavailable(format!(
        "{} --version 返回 {}",
        self.program, output.status
      )));
    }
    let version = String::from_utf8_lossy(&output.stdout);
    info!(
      "OCR 引擎: {}",
      version.lines().next().unwrap_or_default().trim()
    );
    Ok(self)
  }

  fn encode_png(crop: &RgbImage) -> Result<Vec<u8>, RecognizeError> {
    let gray = imageops::grayscale(crop);
    let mut png = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(gray).write_to(&mut png, ImageFormat::Png)?;
    Ok(png.into_inner())
  }
}

impl Recognizer for TesseractRecognizer {
  fn recognize(&self, crop: &RgbImage) -> Result<String, RecognizeError> {
    let png = Self::encode_png(crop)?;

    let mut child = Command::new(&self.program)
      .arg("stdin")
      .arg("stdout")
      .arg("--psm")
      .arg(self.psm.to_string())
      .arg("-l")
      .arg(&self.lang)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
      stdin.write_all(&png)?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(RecognizeError::ProcessFailed(stderr.trim().to_string()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}
