// 该文件是 Laobao （劳保） 项目的一部分。
// src/label.rs - 劳保用品标签体系
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

use std::{fmt, str::FromStr};

use serde::{Serialize, Serializer};
use thiserror::Error;

const WORKER_LABEL: &str = "worker";
const NEGATIVE_PREFIX: &str = "no_";

/// 可被要求佩戴的劳保用品
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PpeItem {
  Helmet,
  Vest,
  Gloves,
  Boots,
}

impl PpeItem {
  pub const ALL: [PpeItem; 4] = [PpeItem::Helmet, PpeItem::Vest, PpeItem::Gloves, PpeItem::Boots];

  pub fn as_str(&self) -> &'static str {
    match self {
      PpeItem::Helmet => "helmet",
      PpeItem::Vest => "vest",
      PpeItem::Gloves => "gloves",
      PpeItem::Boots => "boots",
    }
  }
}

impl fmt::Display for PpeItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for PpeItem {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("未知的劳保用品: {0}（可选: helmet, vest, gloves, boots）")]
pub struct UnknownItem(pub String);

impl FromStr for PpeItem {
  type Err = UnknownItem;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    PpeItem::ALL
      .into_iter()
      .find(|item| item.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| UnknownItem(s.to_string()))
  }
}

/// 检测模型输出的标签
///
/// `Lacking` 是模型显式预测的“未佩戴”类别，例如 `no_helmet`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PpeLabel {
  Worker,
  Wearing(PpeItem),
  Lacking(PpeItem),
}

impl PpeLabel {
  /// 解析标签名称，不在标签体系中的名称返回 `None`
  pub fn parse(name: &str) -> Option<Self> {
    if name.eq_ignore_ascii_case(WORKER_LABEL) {
      return Some(PpeLabel::Worker);
    }
    match strip_negative_prefix(name) {
      Some(rest) => rest.parse().ok().map(PpeLabel::Lacking),
      None => name.parse().ok().map(PpeLabel::Wearing),
    }
  }

  /// 标签所涉及的劳保用品，`worker` 没有
  pub fn item(&self) -> Option<PpeItem> {
    match self {
      PpeLabel::Worker => None,
      PpeLabel::Wearing(item) | PpeLabel::Lacking(item) => Some(*item),
    }
  }

  pub fn is_worker(&self) -> bool {
    matches!(self, PpeLabel::Worker)
  }
}

fn strip_negative_prefix(name: &str) -> Option<&str> {
  let prefix = name.get(..NEGATIVE_PREFIX.len())?;
  prefix
    .eq_ignore_ascii_case(NEGATIVE_PREFIX)
    .then(|| &name[NEGATIVE_PREFIX.len()..])
}

impl fmt::Display for PpeLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PpeLabel::Worker => f.write_str(WORKER_LABEL),
      PpeLabel::Wearing(item) => f.write_str(item.as_str()),
      PpeLabel::Lacking(item) => write!(f, "{}{}", NEGATIVE_PREFIX, item.as_str()),
    }
  }
}

impl Serialize for PpeLabel {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

/// 有序且去重的必需用品列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequiredItems(Vec<PpeItem>);

impl RequiredItems {
  pub fn new(items: impl IntoIterator<Item = PpeItem>) -> Self {
    let mut ordered = Vec::new();
    for item in items {
      if !ordered.contains(&item) {
        ordered.push(item);
      }
    }
    Self(ordered)
  }

  pub fn all() -> Self {
    Self::new(PpeItem::ALL)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn contains(&self, item: PpeItem) -> bool {
    self.0.contains(&item)
  }

  pub fn iter(&self) -> impl Iterator<Item = PpeItem> + '_ {
    self.0.iter().copied()
  }

  /// 标签是否与某个必需用品相关（正向或否定标签）
  pub fn is_relevant(&self, label: PpeLabel) -> bool {
    label.item().is_some_and(|item| self.contains(item))
  }
}

impl FromIterator<PpeItem> for RequiredItems {
  fn from_iter<T: IntoIterator<Item = PpeItem>>(iter: T) -> Self {
    Self::new(iter)
  }
}

impl FromStr for RequiredItems {
  type Err = UnknownItem;

  /// 解析逗号分隔的列表，例如 `helmet,vest`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    s.split(',')
      .map(str::trim)
      .filter(|part| !part.is_empty())
      .map(PpeItem::from_str)
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_full_taxonomy() {
    assert_eq!(PpeLabel::parse("worker"), Some(PpeLabel::Worker));
    assert_eq!(PpeLabel::parse("helmet"), Some(PpeLabel::Wearing(PpeItem::Helmet)));
    assert_eq!(PpeLabel::parse("no_boots"), Some(PpeLabel::Lacking(PpeItem::Boots)));
    assert_eq!(PpeLabel::parse("person"), None);
    assert_eq!(PpeLabel::parse("no_hat"), None);
  }

  #[test]
  fn label_case_is_ignored_including_negative_prefix() {
    assert_eq!(PpeLabel::parse("Worker"), Some(PpeLabel::Worker));
    assert_eq!(PpeLabel::parse("VEST"), Some(PpeLabel::Wearing(PpeItem::Vest)));
    assert_eq!(PpeLabel::parse("NO_HELMET"), Some(PpeLabel::Lacking(PpeItem::Helmet)));
    assert_eq!(PpeLabel::parse("No_Gloves"), Some(PpeLabel::Lacking(PpeItem::Gloves)));
    assert_eq!(PpeLabel::parse("no"), None);
  }

  #[test]
  fn label_names_round_trip_through_display() {
    for item in PpeItem::ALL {
      for label in [PpeLabel::Wearing(item), PpeLabel::Lacking(item)] {
        assert_eq!(PpeLabel::parse(&label.to_string()), Some(label));
      }
    }
  }

  #[test]
  fn required_items_keep_order_and_drop_duplicates() {
    let required: RequiredItems = "vest, helmet,vest".parse().unwrap();
    assert_eq!(required.iter().collect::<Vec<_>>(), vec![PpeItem::Vest, PpeItem::Helmet]);
    assert!("helmet,scarf".parse::<RequiredItems>().is_err());
  }

  #[test]
  fn negative_labels_are_relevant_to_their_item() {
    let required = RequiredItems::new([PpeItem::Vest]);
    assert!(required.is_relevant(PpeLabel::Lacking(PpeItem::Vest)));
    assert!(!required.is_relevant(PpeLabel::Wearing(PpeItem::Helmet)));
    assert!(!required.is_relevant(PpeLabel::Worker));
  }
}
