// 该文件是 Laobao （劳保） 项目的一部分。
// src/output/draw.rs - 合规检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use tracing::{debug, info, warn};

use crate::{
  color::{Color, color_for},
  compliance::{ComplianceVerdict, Evaluation, Item, Worker},
  frame::Frame,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const MISSING_TEXT_GAP: i32 = 2;

/// 常见的系统字体位置，按顺序尝试
const SYSTEM_FONTS: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

/// 在帧上绘制物品框与工人合规状态
///
/// 绘制永远不会失败：框会被裁剪到帧内，没有可用字体时只画框不写字。
pub struct Annotator {
  font: Option<FontArc>,
  scale: PxScale,
}

impl Default for Annotator {
  fn default() -> Self {
    Self::load(None)
  }
}

impl Annotator {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      scale: PxScale::from(LABEL_FONT_SIZE),
    }
  }

  /// 只画框，不写任何文字
  pub fn without_text() -> Self {
    Self::new(None)
  }

  /// 优先加载指定字体，其次尝试系统字体
  pub fn load(font_path: Option<&Path>) -> Self {
    let candidates = font_path
      .map(Path::to_path_buf)
      .into_iter()
      .chain(SYSTEM_FONTS.iter().map(PathBuf::from));

    for path in candidates {
      match std::fs::read(&path) {
        Ok(data) => match FontArc::try_from_vec(data) {
          Ok(font) => {
            info!("使用字体: {}", path.display());
            return Self::new(Some(font));
          }
          Err(e) => warn!("无法解析字体文件 {}: {}", path.display(), e),
        },
        Err(e) => debug!("字体不可用 {}: {}", path.display(), e),
      }
    }

    warn!("未找到可用字体，将只绘制检测框而不显示文字，可通过 --font 指定字体文件");
    Self::without_text()
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 先画物品，再画工人，保证工人框位于最上层
  pub fn annotate(&self, frame: &mut Frame, evaluation: &Evaluation) {
    for item in evaluation.items.iter() {
      self.draw_item(frame, item);
    }
    for (worker, verdict) in evaluation.workers.iter() {
      self.draw_worker(frame, worker, verdict);
    }
  }

  fn draw_item(&self, frame: &mut Frame, item: &Item) {
    let name = item.label.to_string();
    let color = frame.pixel(color_for(&name));
    let (width, height) = (frame.width(), frame.height());
    let Some(rect) = item.bbox.to_pixel_rect(width, height) else {
      return;
    };

    let image = frame.buffer_mut();
    draw_hollow_rect_mut(image, rect, color);
    self.draw_label_above(image, rect, color, &format!("{} {:.2}", name, item.confidence));
  }

  fn draw_worker(&self, frame: &mut Frame, worker: &Worker, verdict: &ComplianceVerdict) {
    let (status, status_color) = if verdict.is_safe() {
      ("Safe", Color::SAFE)
    } else {
      ("Unsafe", Color::UNSAFE)
    };
    let color = frame.pixel(status_color);
    let missing_color = frame.pixel(Color::UNSAFE);
    let (width, height) = (frame.width(), frame.height());
    let Some(rect) = worker.bbox.to_pixel_rect(width, height) else {
      return;
    };

    let image = frame.buffer_mut();
    draw_hollow_rect_mut(image, rect, color);
    // 第二层边框，线宽 2 像素
    if rect.width() > 2 && rect.height() > 2 {
      let inner = Rect::at(rect.left() + 1, rect.top() + 1)
        .of_size(rect.width() - 2, rect.height() - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    let label = format!("Worker ({}) {:.2}", status, worker.confidence);
    self.draw_label_above(image, rect, color, &label);

    let missing = verdict.missing();
    if !missing.is_empty() {
      let names: Vec<&str> = missing.iter().map(|item| item.as_str()).collect();
      let text = format!("Missing: {}", names.join(", "));
      let y = (rect.bottom() + MISSING_TEXT_GAP).min(height as i32 - LABEL_TEXT_HEIGHT).max(0);
      self.draw_text(image, rect.left(), y, missing_color, &text);
    }
  }

  fn draw_label_above(&self, image: &mut RgbImage, rect: Rect, color: Rgb<u8>, text: &str) {
    let y = (rect.top() - LABEL_TEXT_HEIGHT).max(0);
    self.draw_text(image, rect.left(), y, color, text);
  }

  fn draw_text(&self, image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>, text: &str) {
    if let Some(font) = &self.font {
      draw_text_mut(image, color, x, y, self.scale, font, text);
    }
  }
}
