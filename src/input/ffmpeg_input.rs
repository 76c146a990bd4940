// 该文件是 Chepai （车牌） 项目的一部分。
// src/input/ffmpeg_input.rs - ffmpeg 子进程视频输入
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

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{FrameSource, InputError, OpenVideo, parse_frame_rate};
use crate::frame::Frame;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
  width: Option<u32>,
  height: Option<u32>,
  avg_frame_rate: Option<String>,
  r_frame_rate: Option<String>,
}

/// 视频流基本信息
#[derive(Debug, Clone, Copy, PartialEq)]
struct StreamInfo {
  width: u32,
  height: u32,
  frame_rate: f64,
}

/// ffprobe 与 ffmpeg 可执行文件位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
  ffprobe: PathBuf,
  ffmpeg: PathBuf,
}

impl Default for FfmpegTools {
  fn default() -> Self {
    Self {
      ffprobe: PathBuf::from("ffprobe"),
      ffmpeg: PathBuf::from("ffmpeg"),
    }
  }
}

impl FfmpegTools {
  pub fn with_ffprobe(mut self, program: impl Into<PathBuf>) -> Self {
    self.ffprobe = program.into();
    self
  }

  pub fn with_ffmpeg(mut self, program: impl Into<PathBuf>) -> Self {
    self.ffmpeg = program.into();
    self
  }
}

impl OpenVideo for FfmpegTools {
  fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, InputError> {
    Ok(Box::new(FfmpegInput::open_with(self, path)?))
  }
}

/// ffmpeg 视频输入源
///
/// 以 `rawvideo`/`rgb24` 格式从 ffmpeg 标准输出顺序读取每一帧。
/// 输出结束时检查 ffmpeg 退出状态，非零退出视为解码错误。
pub struct FfmpegInput {
  /// ffmpeg 子进程
  child: Child,
  /// 子进程标准输出
  stdout: ChildStdout,
  /// 收集子进程标准错误的线程
  stderr: Option<JoinHandle<String>>,
  /// 视频信息
  info: StreamInfo,
  /// 下一帧索引
  frame_index: u64,
  /// 是否结束
  finished: bool,
}

impl FfmpegInput {
  /// 用 PATH 中的 ffprobe/ffmpeg 打开视频文件
  pub fn open(path: &Path) -> Result<Self, InputError> {
    Self::open_with(&FfmpegTools::default(), path)
  }

  /// 打开视频文件，探测失败视为视频损坏
  pub fn open_with(tools: &FfmpegTools, path: &Path) -> Result<Self, InputError> {
    if !path.is_file() {
      return Err(InputError::NotFound(path.to_path_buf()));
    }

    let info = probe(&tools.ffprobe, path)?;
    info!(
      "视频流: {}x{} @ {:.3} fps",
      info.width, info.height, info.frame_rate
    );

    let mut child = Command::new(&tools.ffmpeg)
      .arg("-v")
      .arg("error")
      .arg("-nostdin")
      .arg("-i")
      .arg(path)
      .arg("-map")
      .arg("0:v:0")
      .arg("-f")
      .arg("rawvideo")
      .arg("-pix_fmt")
      .arg("rgb24")
      .arg("-")
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    let stdout = child
      .stdout
      .take()
      .ok_or_else(|| InputError::DecodeError("无法获取 ffmpeg 标准输出".to_string()))?;

    // 持续读取标准错误，管道写满会阻塞 ffmpeg
    let stderr = match child.stderr.take() {
      Some(mut stderr) => Some(
        thread::Builder::new()
          .name("chepai-ffmpeg-stderr".into())
          .spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = stderr.read_to_end(&mut buf) {
              debug!("读取 ffmpeg 标准错误失败: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
          })?,
      ),
      None => None,
    };

    Ok(Self {
      child,
      stdout,
      stderr,
      info,
      frame_index: 0,
      finished: false,
    })
  }

  fn frame_len(&self) -> usize {
    self.info.width as usize * self.info.height as usize * 3
  }

  /// ffmpeg 标准错误的最后一行
  fn stderr_message(&mut self) -> String {
    self
      .stderr
      .take()
      .and_then(|handle| handle.join().ok())
      .and_then(|text| {
        text
          .lines()
          .map(str::trim)
          .rfind(|line| !line.is_empty())
          .map(str::to_string)
      })
      .unwrap_or_else(|| "无错误输出".to_string())
  }

  /// 标准输出结束后检查退出状态
  fn finish(&mut self) -> Result<Option<Frame>, InputError> {
    self.finished = true;
    let status = self.child.wait()?;
    if status.success() {
      debug!("ffmpeg 输出结束，共 {} 帧", self.frame_index);
      return Ok(None);
    }

    let message = self.stderr_message();
    if self.frame_index == 0 {
      Err(InputError::DecodeError(format!(
        "ffmpeg 无法解码视频 ({}): {}",
        status, message
      )))
    } else {
      Err(InputError::DecodeError(format!(
        "ffmpeg 在第 {} 帧后异常退出 ({}): {}",
        self.frame_index, status, message
      )))
    }
  }
}

fn probe(program: &Path, path: &Path) -> Result<StreamInfo, InputError> {
  let output = Command::new(program)
    .arg("-v")
    .arg("error")
    .arg("-select_streams")
    .arg("v:0")
    .arg("-show_entries")
    .arg("stream=width,height,avg_frame_rate,r_frame_rate")
    .arg("-of")
    .arg("json")
    .arg(path)
    .stdin(Stdio::null())
    .output()?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(InputError::ProbeError(stderr.trim().to_string()));
  }

  parse_probe(&output.stdout)
}

fn parse_probe(stdout: &[u8]) -> Result<StreamInfo, InputError> {
  let probe: ProbeOutput =
    serde_json::from_slice(stdout).map_err(|e| InputError::ProbeError(e.to_string()))?;
  let stream = probe
    .streams
    .into_iter()
    .next()
    .ok_or_else(|| InputError::ProbeError("找不到视频流".to_string()))?;

  let (width, height) = match (stream.width, stream.height) {
    (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
    _ => return Err(InputError::ProbeError("视频尺寸无效".to_string())),
  };

  let frame_rate = stream
    .avg_frame_rate
    .as_deref()
    .and_then(parse_frame_rate)
    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
    .ok_or(InputError::InvalidFrameRate(0.0))?;

  Ok(StreamInfo {
    width,
    height,
    frame_rate,
  })
}

impl FrameSource for FfmpegInput {
  fn frame_rate(&self) -> f64 {
    self.info.frame_rate
  }

  fn width(&self) -> u32 {
    self.info.width
  }

  fn height(&self) -> u32 {
    self.info.height
  }

  fn next_frame(&mut self) -> Result<Option<Frame>, InputError> {
    if self.finished {
      return Ok(None);
    }

    let mut data = vec![0u8; self.frame_len()];
    match self.stdout.read_exact(&mut data) {
      Ok(()) => {}
      // 尾部不完整的帧直接丢弃
      Err(e) if e.kind() == ErrorKind::UnexpectedEof => return self.finish(),
      Err(e) => {
        self.finished = true;
        return Err(InputError::DecodeError(e.to_string()));
      }
    }

    let image = RgbImage::from_raw(self.info.width, self.info.height, data)
      .ok_or_else(|| InputError::DecodeError("无法创建 RGB 图像".to_string()))?;
    let frame = Frame::new(self.frame_index, image);
    self.frame_index += 1;
    Ok(Some(frame))
  }
}

impl Drop for FfmpegInput {
  fn drop(&mut self) {
    if let Err(e) = self.child.kill() {
      if e.kind() != ErrorKind::InvalidInput {
        warn!("无法结束 ffmpeg 进程: {}", e);
      }
    }
    if let Err(e) = self.child.wait() {
      debug!("等待 ffmpeg 进程退出失败: {}", e);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_probe_output() {
    let json = br#"{"streams":[{"width":1280,"height":720,"avg_frame_rate":"30000/1001","r_frame_rate":"30000/1001"}]}"#;
    let info = parse_probe(json).unwrap();
    assert_eq!((info.width, info.height), (1280, 720));
    assert!((info.frame_rate - 29.97).abs() < 0.01);
  }

  #[test]
  fn test_parse_probe_falls_back_to_r_frame_rate() {
    let json =
      br#"{"streams":[{"width":640,"height":480,"avg_frame_rate":"0/0","r_frame_rate":"25/1"}]}"#;
    assert_eq!(parse_probe(json).unwrap().frame_rate, 25.0);
  }

  #[test]
  fn test_parse_probe_without_video_stream() {
    assert!(matches!(
      parse_probe(br#"{"streams":[]}"#),
      Err(InputError::ProbeError(_))
    ));
    assert!(matches!(
      parse_probe(br#"{}"#),
      Err(InputError::ProbeError(_))
    ));
    assert!(parse_probe(b"not json").is_err());
  }

  #[cfg(unix)]
  mod fake_tools {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const PROBE_JSON: &str =
      r#"{"streams":[{"width":2,"height":2,"avg_frame_rate":"10/1","r_frame_rate":"10/1"}]}"#;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
      let path = dir.join(name);
      std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
      std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
      path
    }

    /// 返回工具与一个存在的视频文件
    fn setup(dir: &Path, ffmpeg_body: &str) -> (FfmpegTools, PathBuf) {
      let video = dir.join("clip.mp4");
      std::fs::write(&video, b"fake").unwrap();
      let tools = FfmpegTools::default()
        .with_ffprobe(script(dir, "ffprobe", &format!("echo '{}'", PROBE_JSON)))
        .with_ffmpeg(script(dir, "ffmpeg", ffmpeg_body));
      (tools, video)
    }

    #[test]
    fn test_undecodable_stream_is_decode_error() {
      let dir = tempfile::tempdir().unwrap();
      let (tools, video) = setup(
        dir.path(),
        "echo 'Decoding requested, but no decoder found' >&2\nexit 1",
      );

      let mut input = FfmpegInput::open_with(&tools, &video).unwrap();
      match input.next_frame() {
        Err(InputError::DecodeError(message)) => {
          assert!(message.contains("no decoder found"), "{}", message)
        }
        other => panic!("expected decode error, got {:?}", other.map(|f| f.map(|f| f.index))),
      }
      assert!(input.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_failure_after_frames_is_error() {
      let dir = tempfile::tempdir().unwrap();
      let (tools, video) = setup(dir.path(), "printf '%012d' 0\nexit 1");

      let mut input = FfmpegInput::open_with(&tools, &video).unwrap();
      let frame = input.next_frame().unwrap().unwrap();
      assert_eq!(frame.index, 0);
      assert_eq!((frame.width(), frame.height()), (2, 2));
      assert!(matches!(
        input.next_frame(),
        Err(InputError::DecodeError(_))
      ));
    }

    #[test]
    fn test_clean_exit_ends_stream() {
      let dir = tempfile::tempdir().unwrap();
      let (tools, video) = setup(dir.path(), "printf '%024d' 0");

      let mut input = FfmpegInput::open_with(&tools, &video).unwrap();
      assert_eq!(input.frame_rate(), 10.0);
      assert_eq!(input.next_frame().unwrap().unwrap().index, 0);
      assert_eq!(input.next_frame().unwrap().unwrap().index, 1);
      assert!(input.next_frame().unwrap().is_none());
    }
  }
}
