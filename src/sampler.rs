// 该文件是 Chepai （车牌） 项目的一部分。
// src/sampler.rs - 抽帧策略
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

use std::num::NonZeroU64;

use crate::config::ConfigError;

/// 抽帧步长，至少为 1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSkip(NonZeroU64);

impl FrameSkip {
  pub const EVERY_FRAME: FrameSkip = FrameSkip(NonZeroU64::MIN);

  pub fn new(skip: u64) -> Result<Self, ConfigError> {
    NonZeroU64::new(skip)
      .map(FrameSkip)
      .ok_or(ConfigError::InvalidFrameSkip(skip))
  }

  pub fn get(self) -> u64 {
    self.0.get()
  }
}

impl Default for FrameSkip {
  fn default() -> Self {
    FrameSkip(NonZeroU64::new(5).unwrap_or(NonZeroU64::MIN))
  }
}

/// 判断该帧是否送入推理
pub fn select(frame_index: u64, skip: FrameSkip) -> bool {
  frame_index % skip.get() == 0
}
