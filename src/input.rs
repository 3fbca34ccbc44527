// 该文件是 Laobao （劳保） 项目的一部分。
// src/input.rs - 视频/图像输入
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
  fmt,
  path::{Path, PathBuf},
  str::FromStr,
};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl,
  frame::{Frame, FrameError},
  output::{FrameWriter, VideoSpec, WriterError, WriterWrapper},
};

mod still_image;
pub use self::still_image::StillImageCapture;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerCapture, GStreamerCaptureError};

/// 上传字节流未给出文件名时使用的扩展名
pub const DEFAULT_UPLOAD_SUFFIX: &str = ".mp4";

const CAMERA_SCHEME: &str = "camera";
const FILE_SCHEME: &str = "file";

/// 视频来源
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
  /// 摄像头编号
  Camera(u32),
  /// 本地文件
  File(PathBuf),
  /// 内存中的上传数据，`file_name` 用于推断容器格式
  Bytes {
    data: Vec<u8>,
    file_name: Option<String>,
  },
}

impl SourceDescriptor {
  pub fn bytes(data: Vec<u8>, file_name: Option<String>) -> Self {
    SourceDescriptor::Bytes { data, file_name }
  }

  /// 上传数据写入临时文件时使用的后缀，例如 `.avi`
  pub fn upload_suffix(file_name: Option<&str>) -> String {
    file_name
      .and_then(|name| Path::new(name).extension())
      .and_then(|ext| ext.to_str())
      .filter(|ext| !ext.is_empty())
      .map(|ext| format!(".{}", ext))
      .unwrap_or_else(|| DEFAULT_UPLOAD_SUFFIX.to_string())
  }
}

impl fmt::Display for SourceDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceDescriptor::Camera(index) => write!(f, "摄像头 {}", index),
      SourceDescriptor::File(path) => write!(f, "文件 {}", path.display()),
      SourceDescriptor::Bytes { data, file_name } => write!(
        f,
        "上传数据 {} ({} 字节)",
        file_name.as_deref().unwrap_or("<未命名>"),
        data.len()
      ),
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SourceParseError {
  #[error("空的视频来源")]
  Empty,
  #[error("无效的视频来源 URL: {0}")]
  InvalidUrl(String),
  #[error("不支持的视频来源方案 '{0}'，可用: camera://<编号>, file:///<路径>")]
  SchemeMismatch(String),
  #[error("无效的摄像头编号 '{0}'，应为非负整数")]
  InvalidCamera(String),
}

impl FromUrl for SourceDescriptor {
  type Error = SourceParseError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      CAMERA_SCHEME => {
        let index = url.host_str().unwrap_or_default();
        index
          .parse::<u32>()
          .map(SourceDescriptor::Camera)
          .map_err(|_| SourceParseError::InvalidCamera(index.to_string()))
      }
      FILE_SCHEME => url
        .to_file_path()
        .map(SourceDescriptor::File)
        .map_err(|_| SourceParseError::InvalidUrl(url.to_string())),
      scheme => Err(SourceParseError::SchemeMismatch(scheme.to_string())),
    }
  }
}

impl FromStr for SourceDescriptor {
  type Err = SourceParseError;

  /// 纯数字为摄像头编号，带 `://` 的按 URL 解析，其余视为文件路径
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Err(SourceParseError::Empty);
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
      return s
        .parse::<u32>()
        .map(SourceDescriptor::Camera)
        .map_err(|_| SourceParseError::InvalidCamera(s.to_string()));
    }
    if s.contains("://") {
      let url = Url::parse(s).map_err(|e| SourceParseError::InvalidUrl(e.to_string()))?;
      return Self::from_url(&url);
    }
    Ok(SourceDescriptor::File(PathBuf::from(s)))
  }
}

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("无法打开视频源: {0}")]
  Open(String),
  #[error("读取帧失败: {0}")]
  Read(String),
  #[error("释放视频源失败: {0}")]
  Release(String),
  #[error("不支持的视频源: {0}")]
  Unsupported(String),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamer(#[from] GStreamerCaptureError),
}

/// 已打开的视频源，逐帧产出 BGR 帧
pub trait Capture {
  fn width(&self) -> u32;
  fn height(&self) -> u32;

  /// 源报告的帧率，未知时为 `None`
  fn fps(&self) -> Option<f64>;

  /// `Ok(None)` 表示流已结束
  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

  fn release(self) -> Result<(), CaptureError>
  where
    Self: Sized;
}

/// 摄像头打开方式：先尝试首选后端，失败后回退到默认后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraBackend {
  Preferred,
  Default,
}

/// 视频采集与编码设施
pub trait VideoIo {
  type Capture: Capture;
  type Writer: FrameWriter;

  fn open_camera(&self, index: u32, backend: CameraBackend) -> Result<Self::Capture, CaptureError>;

  fn open_file(&self, path: &Path) -> Result<Self::Capture, CaptureError>;

  fn create_writer(
    &self,
    path: &Path,
    spec: VideoSpec,
  ) -> Result<Self::Writer, <Self::Writer as FrameWriter>::Error>;
}

pub enum CaptureWrapper {
  StillImage(StillImageCapture),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerCapture),
}

impl Capture for CaptureWrapper {
  fn width(&self) -> u32 {
    match self {
      CaptureWrapper::StillImage(capture) => capture.width(),
      #[cfg(feature = "gstreamer_input")]
      CaptureWrapper::GStreamer(capture) => capture.width(),
    }
  }

  fn height(&self) -> u32 {
    match self {
      CaptureWrapper::StillImage(capture) => capture.height(),
      #[cfg(feature = "gstreamer_input")]
      CaptureWrapper::GStreamer(capture) => capture.height(),
    }
  }

  fn fps(&self) -> Option<f64> {
    match self {
      CaptureWrapper::StillImage(capture) => capture.fps(),
      #[cfg(feature = "gstreamer_input")]
      CaptureWrapper::GStreamer(capture) => capture.fps(),
    }
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    match self {
      CaptureWrapper::StillImage(capture) => capture.read_frame(),
      #[cfg(feature = "gstreamer_input")]
      CaptureWrapper::GStreamer(capture) => capture.read_frame(),
    }
  }

  fn release(self) -> Result<(), CaptureError> {
    match self {
      CaptureWrapper::StillImage(capture) => capture.release(),
      #[cfg(feature = "gstreamer_input")]
      CaptureWrapper::GStreamer(capture) => capture.release(),
    }
  }
}

/// 默认的采集与编码实现：静态图像由 `image` 解码，
/// 视频与摄像头需要 `gstreamer_input` 特性
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIo;

impl VideoIo for DefaultIo {
  type Capture = CaptureWrapper;
  type Writer = WriterWrapper;

  #[allow(unused_variables)]
  fn open_camera(&self, index: u32, backend: CameraBackend) -> Result<Self::Capture, CaptureError> {
    #[cfg(feature = "gstreamer_input")]
    {
      let capture = GStreamerCapture::camera(index, backend)?;
      Ok(CaptureWrapper::GStreamer(capture))
    }
    #[cfg(not(feature = "gstreamer_input"))]
    {
      Err(CaptureError::Unsupported(
        "摄像头输入需要启用 gstreamer_input 特性".to_string(),
      ))
    }
  }

  fn open_file(&self, path: &Path) -> Result<Self::Capture, CaptureError> {
    if StillImageCapture::supports(path) {
      debug!("按静态图像打开: {}", path.display());
      return Ok(CaptureWrapper::StillImage(StillImageCapture::open(path)?));
    }

    #[cfg(feature = "gstreamer_input")]
    {
      let capture = GStreamerCapture::file(path)?;
      Ok(CaptureWrapper::GStreamer(capture))
    }
    #[cfg(not(feature = "gstreamer_input"))]
    {
      let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
      Err(CaptureError::Unsupported(format!(
        "无法解码 .{} 文件，视频输入需要启用 gstreamer_input 特性",
        ext
      )))
    }
  }

  fn create_writer(&self, path: &Path, spec: VideoSpec) -> Result<Self::Writer, WriterError> {
    WriterWrapper::create(path, spec)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn digits_select_a_camera() {
    assert_eq!("0".parse::<SourceDescriptor>(), Ok(SourceDescriptor::Camera(0)));
    assert_eq!("12".parse::<SourceDescriptor>(), Ok(SourceDescriptor::Camera(12)));
  }

  #[test]
  fn urls_are_parsed_by_scheme() {
    assert_eq!(
      "camera://2".parse::<SourceDescriptor>(),
      Ok(SourceDescriptor::Camera(2))
    );
    assert_eq!(
      "file:///data/site.mp4".parse::<SourceDescriptor>(),
      Ok(SourceDescriptor::File(PathBuf::from("/data/site.mp4")))
    );
    assert!(matches!(
      "rtsp://camera.local/stream".parse::<SourceDescriptor>(),
      Err(SourceParseError::SchemeMismatch(_))
    ));
    assert!(matches!(
      "camera://front".parse::<SourceDescriptor>(),
      Err(SourceParseError::InvalidCamera(_))
    ));
  }

  #[test]
  fn other_strings_are_paths() {
    assert_eq!(
      "videos/site.avi".parse::<SourceDescriptor>(),
      Ok(SourceDescriptor::File(PathBuf::from("videos/site.avi")))
    );
    assert_eq!("  ".parse::<SourceDescriptor>(), Err(SourceParseError::Empty));
  }

  #[test]
  fn upload_suffix_comes_from_file_name() {
    assert_eq!(SourceDescriptor::upload_suffix(Some("site.avi")), ".avi");
    assert_eq!(SourceDescriptor::upload_suffix(Some("clip")), ".mp4");
    assert_eq!(SourceDescriptor::upload_suffix(None), ".mp4");
  }

  #[cfg(feature = "gstreamer_input")]
  #[test]
  fn default_io_hands_videos_to_gstreamer() {
    let err = DefaultIo
      .open_file(Path::new("/nonexistent/site.mp4"))
      .err()
      .unwrap();
    assert!(!matches!(err, CaptureError::Unsupported(_)));
  }

  #[test]
  fn default_io_decodes_still_images() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("site.png");
    image::RgbImage::from_pixel(4, 3, image::Rgb([255, 0, 0]))
      .save(&path)
      .unwrap();

    let mut capture = DefaultIo.open_file(&path).unwrap();
    assert_eq!((capture.width(), capture.height()), (4, 3));
    assert!(capture.read_frame().unwrap().is_some());
    assert!(capture.read_frame().unwrap().is_none());
    capture.release().unwrap();
  }
}
