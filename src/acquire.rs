// 该文件是 Chepai （车牌） 项目的一部分。
// src/acquire.rs - 远程视频获取
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
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

#[derive(Error, Debug)]
pub enum AcquireError {
  #[error("无法启动 {program}: {source}")]
  Spawn {
    program: String,
    source: std::io::Error,
  },
  #[error("下载失败: {0}")]
  DownloadFailed(String),
  #[error("下载完成但文件不存在: {0}")]
  OutputMissing(PathBuf),
  #[error("无法读取列表文件 {path}: {source}")]
  ListFile {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不支持远程获取: {0}")]
  Unsupported(String),
}

/// 把 URL 解析为本地视频文件
pub trait Acquirer {
  /// 下载单个视频，返回本地路径
  fn resolve(&self, url: &str) -> Result<PathBuf, AcquireError>;

  /// 把播放列表或频道展开为单个视频 URL，普通 URL 原样返回
  fn expand(&self, url: &str) -> Result<Vec<String>, AcquireError> {
    Ok(vec![url.to_string()])
  }
}

/// 不支持远程获取，只处理本地文件时使用
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAcquirer;

impl Acquirer for NoAcquirer {
  fn resolve(&self, url: &str) -> Result<PathBuf, AcquireError> {
    Err(AcquireError::Unsupported(url.to_string()))
  }
}

/// 通过 yt-dlp 下载视频
#[derive(Debug, Clone)]
pub struct YtDlpAcquirer {
  program: String,
  output_dir: PathBuf,
}

impl YtDlpAcquirer {
  pub fn new(output_dir: impl AsRef<Path>) -> Self {
    Self {
      program: "yt-dlp".to_string(),
      output_dir: output_dir.as_ref().to_path_buf(),
    }
  }

  pub fn with_program(mut self, program: impl Into<String>) -> Self {
    self.program = program.into();
    self
  }

  fn run(&self, args: &[&str]) -> Result<String, AcquireError> {
    debug!("{} {}", self.program, args.join(" "));
    let output = Command::new(&self.program)
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .output()
      .map_err(|source| AcquireError::Spawn {
        program: self.program.clone(),
        source,
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      debug!("{} stderr: {}", self.program, stderr);
      let message = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("未知错误");
      return Err(AcquireError::DownloadFailed(format!(
        "{} 返回 {}: {}",
        self.program, output.status, message
      )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}

impl Acquirer for YtDlpAcquirer {
  fn resolve(&self, url: &str) -> Result<PathBuf, AcquireError> {
    std::fs::create_dir_all(&self.output_dir)?;
    let template = self.output_dir.join("%(title)s-%(id)s.%(ext)s");
    let template = template.to_string_lossy();

    info!("下载视频: {}", url);
    let stdout = self.run(&[
      "--no-playlist",
      "--no-progress",
      "-f",
      "best[ext=mp4]/best",
      "-o",
      &template,
      "--print",
      "after_move:filepath",
      url,
    ])?;

    let path = stdout
      .lines()
      .rev()
      .map(str::trim)
      .find(|line| !line.is_empty())
      .map(PathBuf::from)
      .ok_or_else(|| AcquireError::DownloadFailed("没有输出文件路径".to_string()))?;
    if !path.is_file() {
      return Err(AcquireError::OutputMissing(path));
    }
    info!("视频已下载到: {}", path.display());
    Ok(path)
  }

  fn expand(&self, url: &str) -> Result<Vec<String>, AcquireError> {
    if !is_collection_url(url) {
      return Ok(vec![url.to_string()]);
    }

    let stdout = self.run(&["--flat-playlist", "--print", "url", url])?;
    let entries: Vec<String> = stdout
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && *line != "NA")
      .map(str::to_string)
      .collect();
    info!("{} 展开为 {} 个视频", url, entries.len());
    Ok(entries)
  }
}

/// 判断 URL 是否指向播放列表或频道
pub fn is_collection_url(url: &str) -> bool {
  let Ok(parsed) = Url::parse(url) else {
    return false;
  };
  let path = parsed.path();
  // watch?v=..&list=.. 按单个视频处理
  let is_watch = parsed.query_pairs().any(|(k, _)| k == "v");
  let has_list = parsed.query_pairs().any(|(k, _)| k == "list");

  path.starts_with("/playlist")
    || (has_list && !is_watch)
    || path.starts_with("/channel/")
    || path.starts_with("/c/")
    || path.starts_with("/user/")
    || path.starts_with("/@")
}

/// 读取视频列表文件，每行一个 URL 或本地路径，忽略空行和 `#` 注释
pub fn read_list_file(path: &Path) -> Result<Vec<String>, AcquireError> {
  let content = std::fs::read_to_string(path).map_err(|source| AcquireError::ListFile {
    path: path.to_path_buf(),
    source,
  })?;
  Ok(
    content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .map(str::to_string)
      .collect(),
  )
}
