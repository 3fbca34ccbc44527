// 该文件是 Laobao （劳保） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 摄像头与视频文件都被解码为 BGR 帧后经 appsink 取出。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::{ChannelOrder, Frame},
  input::{CameraBackend, Capture, CaptureError},
};

const CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum GStreamerCaptureError {
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

fn appsink_tail(drop: bool) -> String {
  format!(
    "videoconvert ! video/x-raw,format=BGR ! appsink name=sink sync=false max-buffers=2 drop={}",
    drop
  )
}

fn camera_pipeline(index: u32, backend: CameraBackend) -> String {
  let source = match backend {
    CameraBackend::Preferred => format!("v4l2src device=/dev/video{}", index),
    CameraBackend::Default => format!("uridecodebin uri=v4l2:///dev/video{}", index),
  };
  format!("{} ! {}", source, appsink_tail(true))
}

fn file_pipeline(path: &Path) -> String {
  format!(
    "filesrc location=\"{}\" ! decodebin ! {}",
    path.display(),
    appsink_tail(false)
  )
}

/// GStreamer 视频输入
pub struct GStreamerCapture {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: Option<f64>,
  pending: Option<gst::Sample>,
}

impl GStreamerCapture {
  pub fn camera(index: u32, backend: CameraBackend) -> Result<Self, CaptureError> {
    Self::launch(&camera_pipeline(index, backend))
  }

  pub fn file(path: &Path) -> Result<Self, CaptureError> {
    Self::launch(&file_pipeline(path))
  }

  fn launch(description: &str) -> Result<Self, CaptureError> {
    gst::init().map_err(GStreamerCaptureError::from)?;
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(description)
      .map_err(GStreamerCaptureError::from)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerCaptureError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .and_then(|element| element.downcast::<gst_app::AppSink>().ok())
      .ok_or(GStreamerCaptureError::AppSinkNotFound)?;

    if let Err(e) = pipeline.set_state(gst::State::Playing) {
      let reason = bus_error(&pipeline).unwrap_or_default();
      let _ = pipeline.set_state(gst::State::Null);
      return Err(CaptureError::Open(format!("{}: {}", e, reason)));
    }

    // 等待状态切换完成，预滚失败时在此报告
    let (state_change, _, _) = pipeline.state(gst::ClockTime::NONE);
    if let Err(e) = state_change {
      let reason = bus_error(&pipeline).unwrap_or_else(|| e.to_string());
      let _ = pipeline.set_state(gst::State::Null);
      return Err(CaptureError::Open(reason));
    }

    let pulled = appsink.pull_sample().ok();
    let eos = pulled.is_none() && appsink.is_eos();
    let pending = match first_sample(pulled, eos, bus_error(&pipeline)) {
      Ok(pending) => pending,
      Err(e) => {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(e);
      }
    };

    // 没有任何帧时尺寸取自已协商的 caps
    let caps = match pending.as_ref() {
      Some(sample) => sample.caps_owned(),
      None => appsink.static_pad("sink").and_then(|pad| pad.current_caps()),
    };
    let info = caps.and_then(|caps| gst_video::VideoInfo::from_caps(&caps).ok());
    let (width, height, fps) = match info {
      Some(info) => {
        let framerate = info.fps();
        let fps = (framerate.numer() > 0 && framerate.denom() > 0)
          .then(|| framerate.numer() as f64 / framerate.denom() as f64);
        (info.width(), info.height(), fps)
      }
      None => (0, 0, None),
    };

    if pending.is_some() {
      info!(
        "视频源已打开: {}x{} @ {}",
        width,
        height,
        fps.map_or("未知帧率".to_string(), |fps| format!("{:.2} fps", fps))
      );
    } else {
      warn!("视频源在第一帧之前结束");
    }

    Ok(Self {
      pipeline,
      appsink,
      width,
      height,
      fps,
      pending,
    })
  }
}

/// 根据第一次取样的结果决定打开是否成功
///
/// 取到样本则保留到第一次读取；流在第一帧前结束视为空流，
/// 交由读取端报告；其余情况为打开失败。
fn first_sample<T>(
  pulled: Option<T>,
  eos: bool,
  bus_error: Option<String>,
) -> Result<Option<T>, CaptureError> {
  match (pulled, bus_error) {
    (Some(sample), _) => Ok(Some(sample)),
    (None, Some(reason)) => Err(CaptureError::Open(reason)),
    (None, None) if eos => Ok(None),
    (None, None) => Err(CaptureError::Open("未能取得第一帧".to_string())),
  }
}

/// 取出总线上最近的错误消息
fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
  pipeline
    .bus()
    .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]))
    .and_then(|message| match message.view() {
      gst::MessageView::Error(err) => Some(err.error().to_string()),
      _ => None,
    })
}

fn sample_to_frame(sample: &gst::Sample) -> Result<Frame, CaptureError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerCaptureError::PipelineError("样本中没有缓冲区".to_string()))?;
  let info = sample
    .caps()
    .and_then(|caps| gst_video::VideoInfo::from_caps(caps).ok())
    .ok_or(GStreamerCaptureError::VideoInfoError)?;
  if info.format() != gst_video::VideoFormat::Bgr {
    return Err(GStreamerCaptureError::UnsupportedFormat(info.format()).into());
  }

  let width = info.width() as usize;
  let height = info.height() as usize;
  let stride = info.stride()[0] as usize;
  let row = width * CHANNELS;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerCaptureError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = stride * height.saturating_sub(1) + row;
  if data.len() < expected {
    return Err(
      GStreamerCaptureError::BufferSizeMismatch {
        expected,
        actual: data.len(),
      }
      .into(),
    );
  }

  // 行可能按 4 字节对齐填充
  let mut pixels = Vec::with_capacity(row * height);
  for y in 0..height {
    pixels.extend_from_slice(&data[y * stride..y * stride + row]);
  }

  Ok(Frame::from_raw(info.width(), info.height(), pixels, ChannelOrder::Bgr)?)
}

impl Capture for GStreamerCapture {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    let sample = match self.pending.take() {
      Some(sample) => sample,
      None => match self.appsink.pull_sample() {
        Ok(sample) => sample,
        Err(_) if self.appsink.is_eos() => {
          debug!("视频流结束");
          return Ok(None);
        }
        Err(e) => {
          let reason = bus_error(&self.pipeline).unwrap_or_default();
          return Err(CaptureError::Read(format!("{}: {}", e, reason)));
        }
      },
    };
    sample_to_frame(&sample).map(Some)
  }

  fn release(self) -> Result<(), CaptureError> {
    self
      .pipeline
      .set_state(gst::State::Null)
      .map_err(|e| CaptureError::Release(e.to_string()))?;
    Ok(())
  }
}

impl Drop for GStreamerCapture {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}
