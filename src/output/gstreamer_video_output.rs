// 该文件是 Laobao （劳保） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 将标注后的 BGR 帧编码为视频文件，容器由扩展名决定：
//!
//! - **MP4** (H.264)
//! - **MKV** (Matroska, H.264)
//! - **AVI** (H.264)
//! - **WebM** (VP8)

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::{ChannelOrder, Frame},
  output::{Container, FrameWriter, VideoSpec},
};

// 等待 EOS 写入文件尾的最长时间
const EOS_TIMEOUT_SECONDS: u64 = 10;
const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum GStreamerVideoWriterError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsrc 元素")]
  AppSrcNotFound,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("缓冲区创建错误")]
  BufferCreationError,
  #[error("帧尺寸 {actual_width}x{actual_height} 与输出尺寸 {width}x{height} 不一致")]
  FrameSizeMismatch {
    width: u32,
    height: u32,
    actual_width: u32,
    actual_height: u32,
  },
}

pub struct GStreamerVideoWriter {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  spec: VideoSpec,
  stride: usize,
  frame_count: u64,
  finished: bool,
}

fn pipeline_description(path: &Path) -> String {
  let location = path.display();
  match Container::from_path(path) {
    Container::Mp4 => format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! mp4mux ! filesink location=\"{}\"",
      location
    ),
    Container::Mkv => format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux ! filesink location=\"{}\"",
      location
    ),
    Container::Avi => format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux ! filesink location=\"{}\"",
      location
    ),
    Container::Webm => format!(
      "appsrc name=src ! videoconvert ! vp8enc ! webmmux ! filesink location=\"{}\"",
      location
    ),
  }
}

/// 按目标行距逐行复制，行尾补零
fn pack_rows(data: &[u8], row: usize, stride: usize, height: usize) -> Vec<u8> {
  if stride == row {
    return data.to_vec();
  }
  let mut packed = vec![0u8; stride * height];
  for (src, dst) in data.chunks_exact(row).zip(packed.chunks_exact_mut(stride)) {
    dst[..row].copy_from_slice(src);
  }
  packed
}

/// 将帧率近似为分数，保留三位小数
fn framerate(fps: f64) -> gst::Fraction {
  gst::Fraction::new((fps * 1000.0).round() as i32, 1000)
}

impl GStreamerVideoWriter {
  pub fn create(path: &Path, spec: VideoSpec) -> Result<Self, GStreamerVideoWriterError> {
    gst::init()?;

    let pipeline_desc = pipeline_description(path);
    info!("创建视频输出管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerVideoWriterError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .and_then(|element| element.downcast::<gst_app::AppSrc>().ok())
      .ok_or(GStreamerVideoWriterError::AppSrcNotFound)?;

    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Bgr, spec.width, spec.height)
      .fps(framerate(spec.fps))
      .build()?;
    let caps = info.to_caps()?;
    appsrc.set_caps(Some(&caps));
    let stride = info.stride()[0] as usize;
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "视频输出已初始化: {}x{} @ {:.2} fps -> {}",
      spec.width,
      spec.height,
      spec.fps,
      path.display()
    );

    Ok(Self {
      pipeline,
      appsrc,
      spec,
      stride,
      frame_count: 0,
      finished: false,
    })
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoWriterError> {
    let row = self.spec.width as usize * CHANNELS;
    let packed = pack_rows(data, row, self.stride, self.spec.height as usize);
    let mut buffer = gst::Buffer::from_mut_slice(packed);

    let frame_duration = (1_000_000_000.0 / self.spec.fps) as u64;
    let buffer_ref = buffer
      .get_mut()
      .ok_or(GStreamerVideoWriterError::BufferCreationError)?;
    buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_duration));
    buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    self.frame_count += 1;

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| GStreamerVideoWriterError::PipelineError(format!("推送缓冲区失败: {:?}", e)))?;
    Ok(())
  }

  /// 发送 EOS 并等待文件写完
  fn close(&mut self) -> Result<(), GStreamerVideoWriterError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let eos = self
      .appsrc
      .end_of_stream()
      .map_err(|e| GStreamerVideoWriterError::PipelineError(format!("发送 EOS 失败: {:?}", e)));

    let mut result = eos.map(|_| ());
    if result.is_ok()
      && let Some(bus) = self.pipeline.bus()
    {
      let message = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
      if let Some(message) = message
        && let gst::MessageView::Error(err) = message.view()
      {
        result = Err(GStreamerVideoWriterError::PipelineError(err.error().to_string()));
      }
    }

    self.pipeline.set_state(gst::State::Null)?;
    info!("视频输出已关闭，共写入 {} 帧", self.frame_count);
    result
  }
}

impl FrameWriter for GStreamerVideoWriter {
  type Error = GStreamerVideoWriterError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    if frame.width() != self.spec.width || frame.height() != self.spec.height {
      return Err(GStreamerVideoWriterError::FrameSizeMismatch {
        width: self.spec.width,
        height: self.spec.height,
        actual_width: frame.width(),
        actual_height: frame.height(),
      });
    }

    match frame.order() {
      ChannelOrder::Bgr => self.push_frame(frame.as_raw()),
      ChannelOrder::Rgb => {
        let bgr = Frame::bgr_from_rgb_image(frame.to_rgb_image());
        self.push_frame(bgr.as_raw())
      }
    }
  }

  fn finish(mut self) -> Result<(), Self::Error> {
    self.close()
  }
}

impl Drop for GStreamerVideoWriter {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!("关闭 GStreamer 视频输出失败: {}", e);
    }
  }
}
