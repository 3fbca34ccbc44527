// 该文件是 Laobao （劳保） 项目的一部分。
// src/model/yolo_onnx.rs - ONNX YOLO 检测器
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

//! 基于 tract 的 YOLO 检测器
//!
//! 支持 ultralytics 导出的检测模型，输出形状为 `[1, 4 + nc, anchors]`
//! （或其转置 `[1, anchors, 4 + nc]`），前四个通道为中心点与宽高。

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use tract_onnx::prelude::*;
use tracing::{debug, info};

use crate::{
  frame::Frame,
  geometry::BoundingBox,
  model::{Detection, LabelMap, Model, ModelError},
};

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const PAD_VALUE: f32 = 114.0 / 255.0;
const BOX_CHANNELS: usize = 4;

type OnnxPlan = TypedRunnableModel<TypedModel>;

pub struct OnnxDetector {
  plan: OnnxPlan,
  labels: LabelMap,
  confidence_threshold: f32,
  nms_threshold: f32,
  input_size: u32,
}

pub struct OnnxDetectorBuilder {
  model_path: PathBuf,
  labels: LabelMap,
  confidence_threshold: f32,
  nms_threshold: f32,
  input_size: u32,
}

impl OnnxDetectorBuilder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      labels: LabelMap::default(),
      confidence_threshold: 0.5,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      input_size: DEFAULT_INPUT_SIZE,
    }
  }

  pub fn confidence(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn nms(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn labels(mut self, labels: LabelMap) -> Self {
    self.labels = labels;
    self
  }

  pub fn build(self) -> Result<OnnxDetector, ModelError> {
    if !self.model_path.is_file() {
      return Err(ModelError::load(&self.model_path, "文件不存在"));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelError::load(&self.model_path, e))?;
    info!(
      "模型加载完成: 输入 {}x{}, 置信度阈值 {:.2}, {} 个类别",
      self.input_size,
      self.input_size,
      self.confidence_threshold,
      self.labels.len()
    );

    Ok(OnnxDetector {
      plan,
      labels: self.labels,
      confidence_threshold: self.confidence_threshold,
      nms_threshold: self.nms_threshold,
      input_size: self.input_size,
    })
  }
}

impl OnnxDetector {
  pub fn builder(model_path: impl AsRef<Path>) -> OnnxDetectorBuilder {
    OnnxDetectorBuilder::new(model_path)
  }

  /// 以默认参数加载模型
  pub fn load(
    model_path: impl AsRef<Path>,
    confidence_threshold: f32,
    labels: LabelMap,
  ) -> Result<Self, ModelError> {
    Self::builder(model_path)
      .confidence(confidence_threshold)
      .labels(labels)
      .build()
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  /// 等比缩放到输入尺寸，左上角对齐，其余部分填充灰色
  fn preprocess(&self, frame: &Frame) -> (Tensor, f32) {
    let size = self.input_size;
    let (w0, h0) = (frame.width() as f32, frame.height() as f32);
    let ratio = (size as f32 / w0).min(size as f32 / h0);
    let w1 = ((w0 * ratio).round() as u32).clamp(1, size);
    let h1 = ((h0 * ratio).round() as u32).clamp(1, size);

    let resized = image::imageops::resize(&frame.to_rgb_image(), w1, h1, FilterType::Triangle);

    let size = size as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      let (x, y) = (x as u32, y as u32);
      if x < w1 && y < h1 {
        resized.get_pixel(x, y)[c] as f32 / 255.0
      } else {
        PAD_VALUE
      }
    });

    (input.into_tensor(), ratio)
  }

  fn postprocess(
    &self,
    output: &Tensor,
    ratio: f32,
    frame_width: f32,
    frame_height: f32,
  ) -> Result<Vec<Detection>, ModelError> {
    let view = output
      .to_array_view::<f32>()
      .and_then(|view| Ok(view.into_dimensionality::<tract_ndarray::Ix3>()?))
      .map_err(|e| ModelError::Inference(format!("无法解析模型输出: {}", e)))?;

    // 类别数远少于锚点数，据此判断是否需要转置
    let view = if view.shape()[1] > view.shape()[2] {
      view.permuted_axes([0, 2, 1])
    } else {
      view
    };

    let channels = view.shape()[1];
    let anchors = view.shape()[2];
    if channels <= BOX_CHANNELS {
      return Err(ModelError::Inference(format!(
        "模型输出通道数 {} 过少，无法包含类别分数",
        channels
      )));
    }
    let num_classes = channels - BOX_CHANNELS;
    debug!("模型输出: {} 个类别, {} 个锚点", num_classes, anchors);

    let mut candidates = Vec::new();
    for a in 0..anchors {
      let (class_id, score) = (0..num_classes)
        .map(|c| (c, view[[0, BOX_CHANNELS + c, a]]))
        .fold((0usize, f32::MIN), |best, x| if x.1 > best.1 { x } else { best });

      if score < self.confidence_threshold {
        continue;
      }

      let bbox = BoundingBox::from_center(
        view[[0, 0, a]] / ratio,
        view[[0, 1, a]] / ratio,
        view[[0, 2, a]] / ratio,
        view[[0, 3, a]] / ratio,
      )
      .clamp(frame_width, frame_height);

      candidates.push(Candidate {
        bbox,
        class_id,
        score,
      });
    }

    let detections: Vec<Detection> = non_max_suppression(candidates, self.nms_threshold)
      .into_iter()
      .map(|c| Detection::new(c.bbox, self.labels.name(c.class_id), c.score))
      .collect();
    debug!("非极大值抑制后保留 {} 个目标", detections.len());

    Ok(detections)
  }
}

impl Model for OnnxDetector {
  type Error = ModelError;

  fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
    if frame.width() == 0 || frame.height() == 0 {
      return Ok(Vec::new());
    }

    let (input, ratio) = self.preprocess(frame);
    let outputs = self
      .plan
      .run(tvec!(input.into()))
      .map_err(|e| ModelError::Inference(e.to_string()))?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::Inference("模型没有输出".to_string()))?;

    self.postprocess(output, ratio, frame.width() as f32, frame.height() as f32)
  }
}

#[derive(Debug, Clone)]
struct Candidate {
  bbox: BoundingBox,
  class_id: usize,
  score: f32,
}

/// 同类别内按分数降序做非极大值抑制
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    let suppressed = kept.iter().any(|best| {
      best.class_id == candidate.class_id && best.bbox.iou(&candidate.bbox) >= iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}
