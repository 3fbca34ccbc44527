// 该文件是 Laobao （劳保） 项目的一部分。
// src/output/ffmpeg_video.rs - 通过 ffmpeg 命令行保存视频文件
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

//! 视频文件输出模块
//!
//! 标注后的帧先以 PNG 序列缓存在输出文件旁的 `<输出路径>.frames` 目录中，
//! 完成时调用 ffmpeg 编码为视频，随后删除缓存目录。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::{
  ffi::OsString,
  path::{Path, PathBuf},
  process::Command,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  output::{Container, FrameWriter, VideoSpec},
};

#[derive(Error, Debug)]
pub enum FfmpegVideoError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("无法执行 ffmpeg (请确保已安装并在 PATH 中): {0}")]
  EncoderUnavailable(std::io::Error),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("帧尺寸 {actual_width}x{actual_height} 与输出尺寸 {width}x{height} 不一致")]
  FrameSizeMismatch {
    width: u32,
    height: u32,
    actual_width: u32,
    actual_height: u32,
  },
  #[error("视频已完成编码，不能继续写入")]
  Finished,
}

/// 视频帧缓存
struct FrameBuffer {
  temp_dir: PathBuf,
  frames: usize,
}

impl FrameBuffer {
  fn new(output_path: &Path) -> Result<Self, FfmpegVideoError> {
    // 在输出文件旁边创建临时目录
    let mut temp_dir = OsString::from(output_path.as_os_str());
    temp_dir.push(".frames");
    let temp_dir = PathBuf::from(temp_dir);
    std::fs::create_dir_all(&temp_dir)?;

    Ok(FrameBuffer {
      temp_dir,
      frames: 0,
    })
  }

  fn add_frame(&mut self, frame: &Frame) -> Result<(), FfmpegVideoError> {
    let frame_path = self.temp_dir.join(format!("frame_{:06}.png", self.frames));
    frame.to_rgb_image().save(&frame_path)?;
    self.frames += 1;
    Ok(())
  }

  fn encode_to_video(&self, output_path: &Path, fps: f64) -> Result<(), FfmpegVideoError> {
    if self.frames == 0 {
      info!("没有帧可以编码为视频，跳过编码过程");
      return Ok(());
    }

    info!(
      "开始编码视频: {} 帧 @ {:.2} fps -> {}",
      self.frames,
      fps,
      output_path.display()
    );

    let codec_args: &[&str] = match Container::from_path(output_path) {
      Container::Webm => &["-c:v", "libvpx", "-b:v", "2M"],
      Container::Mp4 | Container::Mkv | Container::Avi => {
        &["-c:v", "libx264", "-preset", "fast", "-crf", "23"]
      }
    };

    let output = Command::new("ffmpeg")
      .arg("-y") // 覆盖已存在的文件
      .args(["-loglevel", "error"])
      .arg("-framerate")
      .arg(format!("{}", fps))
      .arg("-i")
      .arg(self.temp_dir.join("frame_%06d.png"))
      // yuv420p 要求宽高为偶数
      .args(["-vf", "pad=ceil(iw/2)*2:ceil(ih/2)*2"])
      .args(codec_args)
      .args(["-pix_fmt", "yuv420p"])
      .arg(output_path)
      .output()
      .map_err(FfmpegVideoError::EncoderUnavailable)?;

    if output.status.success() {
      info!("视频编码成功: {}", output_path.display());
      Ok(())
    } else {
      let stderr = String::from_utf8_lossy(&output.stderr);
      error!("ffmpeg 错误: {}", stderr);
      Err(FfmpegVideoError::EncodingError(format!(
        "ffmpeg 失败: {}",
        stderr
      )))
    }
  }

  fn cleanup(&self) {
    if let Err(e) = std::fs::remove_dir_all(&self.temp_dir) {
      warn!("清理临时目录失败: {}", e);
    }
  }
}

/// RAII 守卫确保清理总是执行
struct CleanupGuard<'a>(&'a FrameBuffer);

impl Drop for CleanupGuard<'_> {
  fn drop(&mut self) {
    self.0.cleanup();
  }
}

pub struct FfmpegVideoWriter {
  path: PathBuf,
  spec: VideoSpec,
  buffer: Option<FrameBuffer>,
}

impl FfmpegVideoWriter {
  /// 检查 ffmpeg 是否可用并创建帧缓存目录
  pub fn create(path: &Path, spec: VideoSpec) -> Result<Self, FfmpegVideoError> {
    let probe = Command::new("ffmpeg")
      .arg("-version")
      .output()
      .map_err(FfmpegVideoError::EncoderUnavailable)?;
    debug!(
      "ffmpeg 版本: {}",
      String::from_utf8_lossy(&probe.stdout).lines().next().unwrap_or_default()
    );
    Self::with_buffer(path, spec)
  }

  fn with_buffer(path: &Path, spec: VideoSpec) -> Result<Self, FfmpegVideoError> {
    let buffer = FrameBuffer::new(path)?;
    info!(
      "初始化视频帧缓冲区: {} ({}x{} @ {:.2} fps)",
      path.display(),
      spec.width,
      spec.height,
      spec.fps
    );
    Ok(Self {
      path: path.to_path_buf(),
      spec,
      buffer: Some(buffer),
    })
  }

  pub fn frames_written(&self) -> usize {
    self.buffer.as_ref().map_or(0, |buffer| buffer.frames)
  }

  fn encode(&mut self) -> Result<(), FfmpegVideoError> {
    let Some(buffer) = self.buffer.take() else {
      return Ok(());
    };
    let _guard = CleanupGuard(&buffer);
    buffer.encode_to_video(&self.path, self.spec.fps)
  }
}

impl FrameWriter for FfmpegVideoWriter {
  type Error = FfmpegVideoError;

  fn write_frame(&mut self, frame: &Frame) -> Result<(), Self::Error> {
    if frame.width() != self.spec.width || frame.height() != self.spec.height {
      return Err(FfmpegVideoError::FrameSizeMismatch {
        width: self.spec.width,
        height: self.spec.height,
        actual_width: frame.width(),
        actual_height: frame.height(),
      });
    }
    let buffer = self.buffer.as_mut().ok_or(FfmpegVideoError::Finished)?;
    buffer.add_frame(frame)
  }

  fn finish(mut self) -> Result<(), Self::Error> {
    self.encode()?;
    info!("视频已保存到文件: {}", self.path.display());
    Ok(())
  }
}

impl Drop for FfmpegVideoWriter {
  fn drop(&mut self) {
    // 未调用 finish 时在销毁前完成编码
    if self.buffer.is_some()
      && let Err(e) = self.encode()
    {
      error!("编码视频时出错: {}", e);
    }
  }
}
