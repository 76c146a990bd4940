// 该文件是 Chepai （车牌） 项目的一部分。
// src/main.rs - 命令行入口
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

mod args;

use std::io::{BufRead, IsTerminal, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use chepai::{
  FromUrl,
  acquire::YtDlpAcquirer,
  config::ConfigError,
  model::{Detector, TesseractRecognizer},
  output::{MemoryStore, SqliteStore, Storage, Video},
  session::{Confirm, SessionManager},
};

/// 在终端上询问是否重新处理
struct StdinConfirm;

impl Confirm for StdinConfirm {
  fn confirm(&self, existing: &Video) -> bool {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
      warn!("标准输入不是终端，默认跳过");
      return false;
    }

    print!(
      "视频 {} 已于 {} 处理过，是否重新处理? [y/N] ",
      existing.identity,
      existing.processed_at.format("%Y-%m-%d %H:%M:%S")
    );
    if std::io::stdout().flush().is_err() {
      return false;
    }

    let mut answer = String::new();
    match stdin.lock().read_line(&mut answer) {
      Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
      Err(_) => false,
    }
  }
}

#[cfg(feature = "detector_onnx")]
fn build_detector(url: &Url, confidence: f32) -> Result<Box<dyn Detector>> {
  let detector = chepai::model::OnnxPlateDetectorBuilder::from_url(url)?
    .confidence(confidence)
    .build()?;
  Ok(Box::new(detector))
}

#[cfg(not(feature = "detector_onnx"))]
fn build_detector(url: &Url, _confidence: f32) -> Result<Box<dyn Detector>> {
  anyhow::bail!("不支持的检测模型 {}: 编译时未启用 detector_onnx 特性", url)
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  // 参数错误在开始任何处理之前报告
  let config = args.pipeline_config()?;
  let policy = args.policy()?;
  let requests = args.requests()?;
  if requests.is_empty() {
    return Err(ConfigError::MissingSource.into());
  }

  info!("数据库: {}", args.db);
  info!("检测模型: {}", args.detector);
  info!("识别引擎: {}", args.ocr);
  info!("待处理来源: {} 个", requests.len());

  let stop = Arc::new(AtomicBool::new(false));
  {
    let stop = stop.clone();
    ctrlc::set_handler(move || {
      if stop.swap(true, Ordering::SeqCst) {
        warn!("再次收到中断信号，强制退出");
        std::process::exit(130);
      }
      warn!("收到中断信号，当前视频处理完成后退出...");
    })
    .context("无法设置 Ctrl-C 处理函数")?;
  }

  let recognizer = TesseractRecognizer::from_url(&args.ocr)?.ensure_available()?;
  let detector = build_detector(&args.detector, config.confidence_threshold)?;
  let storage: Box<dyn Storage> = if args.dry_run {
    info!("dry-run: 结果只保存在内存中");
    Box::new(MemoryStore::default())
  } else {
    Box::new(SqliteStore::from_url(&args.db)?)
  };

  #[cfg(feature = "crop_record")]
  let crops = args
    .save_crops
    .as_ref()
    .map(chepai::output::CropRecorder::from_url)
    .transpose()?;
  #[cfg(not(feature = "crop_record"))]
  if args.save_crops.is_some() {
    warn!("编译时未启用 crop_record 特性，忽略 --save-crops");
  }

  let sessions = SessionManager::new(storage.as_ref(), detector.as_ref(), &recognizer)
    .with_acquirer(YtDlpAcquirer::new(&args.download_dir))
    .with_opener(args.decoder)
    .with_confirm(StdinConfirm)
    .with_config(config)
    .with_policy(policy)
    .remove_downloaded(args.remove_downloaded);
  #[cfg(feature = "crop_record")]
  let sessions = sessions.with_crop_recorder(crops.as_ref());

  let requests = sessions.expand(requests);
  let summary = sessions.run_all(&requests, &stop);

  println!();
  println!("处理完成!");
  println!("完成: {}", summary.completed);
  println!("跳过: {}", summary.skipped);
  println!("失败: {}", summary.failed);
  if summary.interrupted > 0 {
    println!("中断: {}", summary.interrupted);
  }

  drop(sessions);
  drop(recognizer);
  info!("识别引擎已释放");

  Ok(())
}
