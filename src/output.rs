// 该文件是 Laobao （劳保） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
#[cfg(feature = "gstreamer_output")]
use tracing::warn;

use crate::frame::Frame;

pub mod draw;
pub use self::draw::Annotator;

mod ffmpeg_video;
pub use self::ffmpeg_video::{FfmpegVideoError, FfmpegVideoWriter};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoWriter, GStreamerVideoWriterError};

/// 源未报告帧率时使用的输出帧率
pub const DEFAULT_FPS: f64 = 30.0;

/// 输出视频的尺寸与帧率
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoSpec {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

impl VideoSpec {
  /// 帧率缺失或无效时回退到 [`DEFAULT_FPS`]
  pub fn new(width: u32, height: u32, fps: Option<f64>) -> Self {
    let fps = fps.filter(|fps| fps.is_finite() && *fps > 0.0).unwrap_or(DEFAULT_FPS);
    Self { width, height, fps }
  }
}

/// 容器类型，由输出文件扩展名决定，未知扩展名按 MP4 处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
  Mp4,
  Mkv,
  Avi,
  Webm,
}

impl Container {
  pub fn from_path(path: &Path) -> Self {
    let ext = path
      .extension()
      .and_then(|ext| ext.to_str())
      .map(str::to_ascii_lowercase);
    match ext.as_deref() {
      Some("mkv") => Container::Mkv,
      Some("avi") => Container::Avi,
      Some("webm") => Container::Webm,
      _ => Container::Mp4,
    }
  }
}

/// 逐帧写入的视频输出
pub trait FrameWriter {
  type Error: std::error::Error + Send + Sync + 'static;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error>;

  /// 完成编码并释放资源
  fn finish(self) -> Result<(), Self::Error>
  where
    Self: Sized;
}

#[derive(Error, Debug)]
pub enum WriterError {
  #[error("ffmpeg 视频输出错误: {0}")]
  Ffmpeg(#[from] FfmpegVideoError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamer(#[from] GStreamerVideoWriterError),
}

pub enum WriterWrapper {
  Ffmpeg(FfmpegVideoWriter),
  #[cfg(feature = "gstreamer_output")]
  GStreamer(GStreamerVideoWriter),
}

impl WriterWrapper {
  /// 启用 `gstreamer_output` 时优先使用 GStreamer 编码，失败后回退到 ffmpeg 命令行
  pub fn create(path: &Path, spec: VideoSpec) -> Result<Self, WriterError> {
    #[cfg(feature = "gstreamer_output")]
    match GStreamerVideoWriter::create(path, spec) {
      Ok(writer) => return Ok(WriterWrapper::GStreamer(writer)),
      Err(e) => warn!("GStreamer 视频输出不可用: {}，改用 ffmpeg", e),
    }

    let writer = FfmpegVideoWriter::create(path, spec)?;
    Ok(WriterWrapper::Ffmpeg(writer))
  }
}

impl FrameWriter for WriterWrapper {
  type Error = WriterError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    match self {
      WriterWrapper::Ffmpeg(writer) => writer.write_frame(frame).map_err(WriterError::from),
      #[cfg(feature = "gstreamer_output")]
      WriterWrapper::GStreamer(writer) => writer.write_frame(frame).map_err(WriterError::from),
    }
  }

  fn finish(self) -> Result<(), Self::Error> {
    match self {
      WriterWrapper::Ffmpeg(writer) => writer.finish().map_err(WriterError::from),
      #[cfg(feature = "gstreamer_output")]
      WriterWrapper::GStreamer(writer) => writer.finish().map_err(WriterError::from),
    }
  }
}
