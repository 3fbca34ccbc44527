// 该文件是 Laobao （劳保） 项目的一部分。
// src/geometry.rs - 边界框与包含关系
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

use imageproc::rect::Rect;
use serde::Serialize;

/// 像素坐标系下的边界框 `[x1, y1, x2, y2]`，保证 `x1 <= x2` 且 `y1 <= y2`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
  x1: f32,
  y1: f32,
  x2: f32,
  y2: f32,
}

impl BoundingBox {
  /// 创建边界框，角点顺序颠倒时自动交换
  pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
    Self {
      x1: x1.min(x2),
      y1: y1.min(y2),
      x2: x1.max(x2),
      y2: y1.max(y2),
    }
  }

  /// 由中心点与宽高创建（YOLO 输出格式）
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
    Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
  }

  pub fn x1(&self) -> f32 {
    self.x1
  }

  pub fn y1(&self) -> f32 {
    self.y1
  }

  pub fn x2(&self) -> f32 {
    self.x2
  }

  pub fn y2(&self) -> f32 {
    self.y2
  }

  pub fn width(&self) -> f32 {
    self.x2 - self.x1
  }

  pub fn height(&self) -> f32 {
    self.y2 - self.y1
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn as_array(&self) -> [f32; 4] {
    [self.x1, self.y1, self.x2, self.y2]
  }

  /// 判断 `self` 是否完全位于 `outer` 之内，边缘重合也算在内
  pub fn is_inside(&self, outer: &BoundingBox) -> bool {
    inside(self, outer)
  }

  /// 交并比，仅供检测器做非极大值抑制
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x1 = self.x1.max(other.x1);
    let y1 = self.y1.max(other.y1);
    let x2 = self.x2.min(other.x2);
    let y2 = self.y2.min(other.y2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }

  /// 裁剪到 `[0, width) x [0, height)` 范围
  pub fn clamp(&self, width: f32, height: f32) -> Self {
    Self::new(
      self.x1.clamp(0.0, width),
      self.y1.clamp(0.0, height),
      self.x2.clamp(0.0, width),
      self.y2.clamp(0.0, height),
    )
  }

  /// 转为绘图用的整数矩形；退化为空时返回 `None`
  pub fn to_pixel_rect(&self, image_width: u32, image_height: u32) -> Option<Rect> {
    if image_width == 0 || image_height == 0 {
      return None;
    }

    let max_x = image_width as i32 - 1;
    let max_y = image_height as i32 - 1;
    let x_min = (self.x1.floor() as i32).clamp(0, max_x);
    let y_min = (self.y1.floor() as i32).clamp(0, max_y);
    let x_max = (self.x2.ceil() as i32).clamp(0, max_x);
    let y_max = (self.y2.ceil() as i32).clamp(0, max_y);

    if x_min >= x_max || y_min >= y_max {
      return None;
    }

    Some(Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32))
  }
}

impl From<[f32; 4]> for BoundingBox {
  fn from(bbox: [f32; 4]) -> Self {
    BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3])
  }
}

/// `inner` 的四条边全部落在 `outer` 的范围内时返回 true
///
/// 没有容差：跨越边界的物品不会被关联到工人身上。
pub fn inside(inner: &BoundingBox, outer: &BoundingBox) -> bool {
  inner.x1 >= outer.x1 && inner.y1 >= outer.y1 && inner.x2 <= outer.x2 && inner.y2 <= outer.y2
}
