// 该文件是 Laobao （劳保） 项目的一部分。
// src/frame.rs - 帧缓冲与通道顺序
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

use crate::color::Color;

const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 帧内三个通道的排列顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Rgb,
  Bgr,
}

/// HWC 排列的三通道 8 位帧
///
/// 采集端统一产出 BGR 帧，显示端需要 RGB，转换只在 [`Frame::into_display`] 中进行。
#[derive(Debug, Clone)]
pub struct Frame {
  buffer: RgbImage,
  order: ChannelOrder,
}

impl Frame {
  pub fn from_raw(
    width: u32,
    height: u32,
    data: Vec<u8>,
    order: ChannelOrder,
  ) -> Result<Self, FrameError> {
    let expected = CHANNELS * width as usize * height as usize;
    let actual = data.len();
    if actual != expected {
      return Err(FrameError::LengthMismatch { expected, actual });
    }
    let buffer =
      ImageBuffer::from_raw(width, height, data).ok_or(FrameError::LengthMismatch { expected, actual })?;
    Ok(Self { buffer, order })
  }

  /// 全黑帧
  pub fn blank(width: u32, height: u32, order: ChannelOrder) -> Self {
    Self {
      buffer: RgbImage::new(width, height),
      order,
    }
  }

  /// 由 RGB 图像构造 BGR 帧
  pub fn bgr_from_rgb_image(image: RgbImage) -> Self {
    let mut buffer = image;
    swap_red_blue(&mut buffer);
    Self {
      buffer,
      order: ChannelOrder::Bgr,
    }
  }

  pub fn width(&self) -> u32 {
    self.buffer.width()
  }

  pub fn height(&self) -> u32 {
    self.buffer.height()
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  /// 原始 HWC 字节，按 [`Frame::order`] 排列
  pub fn as_raw(&self) -> &[u8] {
    self.buffer.as_raw()
  }

  /// 供绘图使用的底层缓冲区，像素值须经 [`Frame::pixel`] 转换
  pub fn buffer_mut(&mut self) -> &mut RgbImage {
    &mut self.buffer
  }

  /// 将颜色转换为本帧通道顺序下的像素值
  pub fn pixel(&self, color: Color) -> Rgb<u8> {
    match self.order {
      ChannelOrder::Rgb => Rgb(color.rgb()),
      ChannelOrder::Bgr => Rgb(color.bgr()),
    }
  }

  /// 复制为 RGB 图像
  pub fn to_rgb_image(&self) -> RgbImage {
    let mut image = self.buffer.clone();
    if self.order == ChannelOrder::Bgr {
      swap_red_blue(&mut image);
    }
    image
  }

  /// 转为显示端使用的 RGB 图像
  pub fn into_display(self) -> RgbImage {
    let mut image = self.buffer;
    if self.order == ChannelOrder::Bgr {
      swap_red_blue(&mut image);
    }
    image
  }
}

fn swap_red_blue(image: &mut RgbImage) {
  for pixel in image.pixels_mut() {
    pixel.0.swap(0, 2);
  }
}
