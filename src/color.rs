// 该文件是 Laobao （劳保） 项目的一部分。
// src/color.rs - 标签颜色映射
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

use std::hash::{DefaultHasher, Hash, Hasher};

/// RGB 顺序的颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
  pub r: u8,
  pub g: u8,
  pub b: u8,
}

impl Color {
  pub const SAFE: Color = Color::new(0, 255, 0);
  pub const UNSAFE: Color = Color::new(255, 0, 0);

  pub const fn new(r: u8, g: u8, b: u8) -> Self {
    Self { r, g, b }
  }

  pub fn rgb(&self) -> [u8; 3] {
    [self.r, self.g, self.b]
  }

  pub fn bgr(&self) -> [u8; 3] {
    [self.b, self.g, self.r]
  }
}

// 黄金角步进，使相邻哈希值的色相尽量分散
const GOLDEN_RATIO_CONJUGATE: f32 = 0.618_034;

/// 根据标签名称生成颜色，同一进程内相同标签总是得到相同颜色
pub fn color_for(label: &str) -> Color {
  let mut hasher = DefaultHasher::new();
  label.hash(&mut hasher);
  let hash = hasher.finish();

  let hue = ((hash % 1024) as f32 * GOLDEN_RATIO_CONJUGATE).fract() * 360.0;
  hsv_to_rgb(hue, 0.8, 0.95)
}

/// HSV 转 RGB，`h` 取值 [0, 360)
fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Color {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Color::new(
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn same_label_same_color() {
    assert_eq!(color_for("helmet"), color_for("helmet"));
  }

  #[test]
  fn taxonomy_colors_are_mostly_distinct() {
    let labels = [
      "helmet",
      "vest",
      "gloves",
      "boots",
      "no_helmet",
      "no_vest",
      "no_gloves",
      "no_boots",
    ];
    let mut colors: Vec<_> = labels.iter().map(|l| color_for(l).rgb()).collect();
    colors.sort();
    colors.dedup();
    assert!(colors.len() > labels.len() / 2);
  }

  #[test]
  fn hsv_primaries() {
    assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Color::new(255, 0, 0));
    assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Color::new(0, 255, 0));
    assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Color::new(0, 0, 255));
  }
}
