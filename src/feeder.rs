// 该文件是 Chepai （车牌） 项目的一部分。
// src/feeder.rs - 解码线程
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

use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::frame::Frame;
use crate::input::FrameSource;
use crate::sampler::{FrameSkip, select};

/// 队列中的元素
#[derive(Debug)]
pub enum FeedItem {
  Frame(Frame),
  /// 解码结束标记
  EndOfStream,
}

/// 解码统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
  /// 解码出的帧数
  pub decoded: u64,
  /// 送入队列的帧数
  pub selected: u64,
  /// 解码中途出错，尾部被截断
  pub truncated: bool,
  /// 消费端提前关闭
  pub cancelled: bool,
}

/// 在独立线程中解码并抽帧，经有界队列把选中的帧交给推理端
pub struct FrameFeeder {
  handle: JoinHandle<FeedStats>,
}

impl FrameFeeder {
  /// 启动解码线程，返回线程句柄与队列接收端
  ///
  /// 队列满时解码线程阻塞，以此把解码速度与推理速度耦合。
  pub fn spawn(
    source: Box<dyn FrameSource>,
    skip: FrameSkip,
    capacity: usize,
  ) -> std::io::Result<(Self, Receiver<FeedItem>)> {
    let (tx, rx) = sync_channel(capacity.max(1));
    let handle = thread::Builder::new()
      .name("chepai-feeder".into())
      .spawn(move || {
        let mut source = source;
        feed(source.as_mut(), skip, &tx)
      })?;
    Ok((Self { handle }, rx))
  }

  /// 等待解码线程结束，线程 panic 时返回 None
  pub fn join(self) -> Option<FeedStats> {
    self.handle.join().ok()
  }
}

/// 解码循环，返回统计信息
pub fn feed(source: &mut dyn FrameSource, skip: FrameSkip, tx: &SyncSender<FeedItem>) -> FeedStats {
  let mut stats = FeedStats::default();

  loop {
    match source.next_frame() {
      Ok(Some(frame)) => {
        stats.decoded += 1;
        if !select(frame.index, skip) {
          continue;
        }
        if tx.send(FeedItem::Frame(frame)).is_err() {
          debug!("队列接收端已关闭，停止解码");
          stats.cancelled = true;
          return stats;
        }
        stats.selected += 1;
      }
      Ok(None) => break,
      Err(e) => {
        // 尾部损坏不影响已解码部分
        warn!("第 {} 帧解码失败，按视频结束处理: {}", stats.decoded, e);
        stats.truncated = true;
        break;
      }
    }
  }

  if tx.send(FeedItem::EndOfStream).is_err() {
    stats.cancelled = true;
  }
  debug!(
    "解码结束: 共 {} 帧，选中 {} 帧",
    stats.decoded, stats.selected
  );
  stats
}
