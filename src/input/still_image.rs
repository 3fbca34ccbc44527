// 该文件是 Laobao （劳保） 项目的一部分。
// src/input/still_image.rs - 图像文件输入
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

use std::path::Path;

use image::{ImageFormat, ImageReader};
use tracing::info;

use crate::{
  frame::Frame,
  input::{Capture, CaptureError},
};

/// 只产出一帧的图像源
pub struct StillImageCapture {
  width: u32,
  height: u32,
  frame: Option<Frame>,
}

impl StillImageCapture {
  /// 根据扩展名判断是否为可解码的静态图像
  pub fn supports(path: &Path) -> bool {
    matches!(
      ImageFormat::from_path(path),
      Ok(ImageFormat::Png | ImageFormat::Jpeg)
    )
  }

  pub fn open(path: &Path) -> Result<Self, CaptureError> {
    let image = ImageReader::open(path)
      .map_err(|e| CaptureError::Open(format!("{}: {}", path.display(), e)))?
      .decode()?
      .to_rgb8();
    info!(
      "打开图像文件: {} ({}x{})",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(Self {
      width: image.width(),
      height: image.height(),
      frame: Some(Frame::bgr_from_rgb_image(image)),
    })
  }
}

impl Capture for StillImageCapture {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    None
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    Ok(self.frame.take())
  }

  fn release(self) -> Result<(), CaptureError> {
    Ok(())
  }
}
