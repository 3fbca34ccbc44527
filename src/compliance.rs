// 该文件是 Laobao （劳保） 项目的一部分。
// src/compliance.rs - 工人与劳保用品关联及合规判定
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

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::{
  geometry::{BoundingBox, inside},
  label::{PpeItem, PpeLabel, RequiredItems},
  model::Detection,
};

/// 一帧内的劳保用品检测
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
  pub bbox: BoundingBox,
  pub label: PpeLabel,
  pub confidence: f32,
}

/// 一帧内的工人，`equipped` 只包含落在工人框内且与必需用品相关的标签
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Worker {
  pub bbox: BoundingBox,
  pub confidence: f32,
  pub equipped: BTreeSet<PpeLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComplianceVerdict {
  Safe,
  Unsafe { missing: Vec<PpeItem> },
}

impl ComplianceVerdict {
  pub fn is_safe(&self) -> bool {
    matches!(self, ComplianceVerdict::Safe)
  }

  /// 缺失的用品，安全时为空
  pub fn missing(&self) -> &[PpeItem] {
    match self {
      ComplianceVerdict::Safe => &[],
      ComplianceVerdict::Unsafe { missing } => missing,
    }
  }
}

/// 一帧的判定结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evaluation {
  pub workers: Vec<(Worker, ComplianceVerdict)>,
  /// 所有可识别的物品，包括不属于任何工人的
  pub items: Vec<Item>,
}

impl Evaluation {
  pub fn unsafe_count(&self) -> usize {
    self.workers.iter().filter(|(_, v)| !v.is_safe()).count()
  }
}

/// 合规判定引擎，不保存任何跨帧状态
#[derive(Debug, Clone)]
pub struct ComplianceEngine {
  required: RequiredItems,
}

impl ComplianceEngine {
  pub fn new(required: RequiredItems) -> Self {
    Self { required }
  }

  pub fn required(&self) -> &RequiredItems {
    &self.required
  }

  pub fn evaluate(&self, detections: &[Detection]) -> Evaluation {
    let mut workers = Vec::new();
    let mut items = Vec::new();

    for detection in detections {
      match PpeLabel::parse(&detection.label) {
        Some(PpeLabel::Worker) => workers.push(Worker {
          bbox: detection.bbox,
          confidence: detection.confidence,
          equipped: BTreeSet::new(),
        }),
        Some(label) => items.push(Item {
          bbox: detection.bbox,
          label,
          confidence: detection.confidence,
        }),
        None => debug!("忽略未知标签: {}", detection.label),
      }
    }

    for worker in workers.iter_mut() {
      for item in items.iter() {
        if self.required.is_relevant(item.label) && inside(&item.bbox, &worker.bbox) {
          worker.equipped.insert(item.label);
        }
      }
    }

    let workers = workers
      .into_iter()
      .map(|worker| {
        let verdict = self.verdict(&worker.equipped);
        (worker, verdict)
      })
      .collect();

    Evaluation { workers, items }
  }

  /// 每个必需用品都要有正向标签，且不能出现对应的否定标签
  pub fn verdict(&self, equipped: &BTreeSet<PpeLabel>) -> ComplianceVerdict {
    let missing: Vec<PpeItem> = self
      .required
      .iter()
      .filter(|item| {
        !equipped.contains(&PpeLabel::Wearing(*item)) || equipped.contains(&PpeLabel::Lacking(*item))
      })
      .collect();

    if missing.is_empty() {
      ComplianceVerdict::Safe
    } else {
      ComplianceVerdict::Unsafe { missing }
    }
  }
}
