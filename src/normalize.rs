// 该文件是 Chepai （车牌） 项目的一部分。
// src/normalize.rs - 识别文本规范化
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

/// 单条规范化规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeRule {
  /// 删除固定占位符（大小写敏感）
  RemoveToken(String),
  /// 只保留 ASCII 字母与数字
  StripNonAlphanumeric,
  /// 转为大写
  Uppercase,
  /// 逐字符替换，例如把 'O' 替换为 '0'
  Substitute { from: char, to: char },
  /// 长度不足时视为未识别
  MinLength(usize),
}

impl NormalizeRule {
  fn apply(&self, text: String) -> String {
    match self {
      NormalizeRule::RemoveToken(token) if !token.is_empty() => text.replace(token.as_str(), ""),
      NormalizeRule::RemoveToken(_) => text,
      NormalizeRule::StripNonAlphanumeric => {
        text.chars().filter(char::is_ascii_alphanumeric).collect()
      }
      NormalizeRule::Uppercase => text.to_ascii_uppercase(),
      NormalizeRule::Substitute { from, to } => text
        .chars()
        .map(|c| if c == *from { *to } else { c })
        .collect(),
      NormalizeRule::MinLength(min) => {
        if text.chars().count() < *min {
          String::new()
        } else {
          text
        }
      }
    }
  }
}

/// 按顺序执行的规则表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNormalizer {
  rules: Vec<NormalizeRule>,
}

impl Default for TextNormalizer {
  fn default() -> Self {
    Self {
      rules: vec![NormalizeRule::StripNonAlphanumeric, NormalizeRule::Uppercase],
    }
  }
}

impl TextNormalizer {
  pub fn with_rules(rules: Vec<NormalizeRule>) -> Self {
    Self { rules }
  }

  /// 在规则表末尾追加一条规则
  pub fn with_rule(mut self, rule: NormalizeRule) -> Self {
    self.rules.push(rule);
    self
  }

  pub fn rules(&self) -> &[NormalizeRule] {
    &self.rules
  }

  pub fn normalize(&self, raw: &str) -> String {
    self
      .rules
      .iter()
      .fold(raw.to_string(), |text, rule| rule.apply(text))
  }
}
