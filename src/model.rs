// 该文件是 Laobao （劳保） 项目的一部分。
// src/model.rs - 检测模型适配
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

use std::{
  path::{Path, PathBuf},
  time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{frame::Frame, geometry::BoundingBox};

mod repository;
pub use self::repository::{MODEL_EXTENSION, list_models};

#[cfg(feature = "model_onnx")]
mod yolo_onnx;
#[cfg(feature = "model_onnx")]
pub use self::yolo_onnx::OnnxDetector;

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub label: String,
  pub confidence: f32,
}

impl Detection {
  pub fn new(bbox: impl Into<BoundingBox>, label: impl Into<String>, confidence: f32) -> Self {
    Self {
      bbox: bbox.into(),
      label: label.into(),
      confidence,
    }
  }
}

/// 检测模型：输入一帧，输出已按置信度阈值过滤的检测结果
pub trait Model {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Error = M::Error;

  fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
    (**self).infer(frame)
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载失败: {}\n- 原因: {reason}\n- 请确认文件存在且为 .onnx 格式的检测模型", .path.display())]
  Load { path: PathBuf, reason: String },
  #[error("标签文件错误: {}: {reason}", .path.display())]
  Labels { path: PathBuf, reason: String },
  #[error("推理失败: {0}")]
  Inference(String),
}

impl ModelError {
  pub fn load(path: &Path, reason: impl ToString) -> Self {
    ModelError::Load {
      path: path.to_path_buf(),
      reason: reason.to_string(),
    }
  }
}

/// 类别编号到标签名称的映射
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
  names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LabelFile {
  labels: Vec<LabelEntry>,
}

#[derive(Debug, Deserialize)]
struct LabelEntry {
  id: usize,
  name: String,
}

/// 标签文件允许的最大类别编号
pub const MAX_CLASS_ID: usize = 4096;

const DEFAULT_LABELS: [&str; 9] = [
  "worker",
  "helmet",
  "vest",
  "gloves",
  "boots",
  "no_helmet",
  "no_vest",
  "no_gloves",
  "no_boots",
];

impl Default for LabelMap {
  fn default() -> Self {
    Self {
      names: DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl LabelMap {
  /// 从 TOML 文本解析，格式为若干 `[[labels]]` 表，每个含 `id` 与 `name`
  pub fn from_toml(text: &str) -> Result<Self, String> {
    let file: LabelFile = toml::from_str(text).map_err(|e| e.to_string())?;
    if let Some(entry) = file.labels.iter().find(|entry| entry.id > MAX_CLASS_ID) {
      return Err(format!(
        "类别编号 {} ({}) 超出上限 {}",
        entry.id, entry.name, MAX_CLASS_ID
      ));
    }
    let len = file.labels.iter().map(|entry| entry.id + 1).max().unwrap_or(0);
    let mut names: Vec<String> = (0..len).map(|id| format!("class_{}", id)).collect();
    for entry in file.labels {
      names[entry.id] = entry.name;
    }
    Ok(Self { names })
  }

  pub fn load(path: &Path) -> Result<Self, ModelError> {
    let labels_error = |reason: String| ModelError::Labels {
      path: path.to_path_buf(),
      reason,
    };
    let text = std::fs::read_to_string(path).map_err(|e| labels_error(e.to_string()))?;
    let map = Self::from_toml(&text).map_err(labels_error)?;
    debug!("加载标签文件 {}: {} 个类别", path.display(), map.len());
    Ok(map)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 未登记的编号返回 `class_<id>`
  pub fn name(&self, class_id: usize) -> String {
    self
      .names
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }
}

/// 一次推理的结果与耗时
#[derive(Debug, Clone)]
pub struct Inference {
  pub detections: Vec<Detection>,
  pub elapsed: Duration,
}

impl Inference {
  /// 瞬时帧率，不做平滑
  pub fn fps(&self) -> f32 {
    let seconds = self.elapsed.as_secs_f32();
    if seconds > 0.0 { 1.0 / seconds } else { 0.0 }
  }
}

/// 包装检测模型并计时
pub struct DetectorAdapter<M> {
  model: M,
}

impl<M: Model> DetectorAdapter<M> {
  pub fn new(model: M) -> Self {
    Self { model }
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn infer(&self, frame: &Frame) -> Result<Inference, M::Error> {
    let now = Instant::now();
    let detections = self.model.infer(frame)?;
    let elapsed = now.elapsed();
    debug!("推理完成，检测到 {} 个目标，耗时: {:.2?}", detections.len(), elapsed);
    Ok(Inference { detections, elapsed })
  }
}

#[cfg(test)]
mod tests {
  use std::convert::Infallible;

  use super::*;
  use crate::frame::ChannelOrder;

  struct Canned(Vec<Detection>);

  impl Model for Canned {
    type Error = Infallible;

    fn infer(&self, _frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
      Ok(self.0.clone())
    }
  }

  #[test]
  fn fps_is_reciprocal_of_elapsed() {
    let inference = Inference {
      detections: Vec::new(),
      elapsed: Duration::from_millis(40),
    };
    assert!((inference.fps() - 25.0).abs() < 1e-3);
  }

  #[test]
  fn zero_elapsed_reports_zero_fps() {
    let inference = Inference {
      detections: Vec::new(),
      elapsed: Duration::ZERO,
    };
    assert_eq!(inference.fps(), 0.0);
  }

  #[test]
  fn adapter_passes_detections_through_unfiltered() {
    let canned = vec![
      Detection::new([0.0, 0.0, 1.0, 1.0], "worker", 0.05),
      Detection::new([0.0, 0.0, 1.0, 1.0], "helmet", 0.95),
    ];
    let adapter = DetectorAdapter::new(Canned(canned.clone()));
    let frame = Frame::blank(4, 4, ChannelOrder::Bgr);
    let inference = adapter.infer(&frame).unwrap();
    assert_eq!(inference.detections, canned);
  }

  #[test]
  fn default_label_map_follows_taxonomy_order() {
    let labels = LabelMap::default();
    assert_eq!(labels.name(0), "worker");
    assert_eq!(labels.name(5), "no_helmet");
    assert_eq!(labels.name(42), "class_42");
  }

  #[test]
  fn label_map_from_toml_fills_gaps() {
    let text = r#"
      [[labels]]
      id = 0
      name = "worker"

      [[labels]]
      id = 2
      name = "vest"
    "#;
    let labels = LabelMap::from_toml(text).unwrap();
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.name(1), "class_1");
    assert_eq!(labels.name(2), "vest");
  }

  #[test]
  fn oversized_class_id_is_rejected() {
    let text = r#"
      [[labels]]
      id = 4000000000
      name = "worker"
    "#;
    let err = LabelMap::from_toml(text).unwrap_err();
    assert!(err.contains("4000000000"));

    let text = format!("[[labels]]\nid = {}\nname = \"boots\"\n", MAX_CLASS_ID);
    assert_eq!(LabelMap::from_toml(&text).unwrap().len(), MAX_CLASS_ID + 1);
  }

  #[test]
  fn oversized_class_id_in_file_is_a_label_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.toml");
    std::fs::write(&path, "[[labels]]\nid = 9999999\nname = \"vest\"\n").unwrap();
    let err = LabelMap::load(&path).unwrap_err();
    assert!(matches!(err, ModelError::Labels { .. }));
  }

  #[test]
  fn bundled_label_file_matches_default() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("labels/ppe.toml");
    assert_eq!(LabelMap::load(&path).unwrap(), LabelMap::default());
  }

  #[test]
  fn missing_label_file_is_reported_with_path() {
    let err = LabelMap::load(Path::new("/nonexistent/ppe.toml")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/ppe.toml"));
  }
}
