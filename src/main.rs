// 该文件是 Laobao （劳保） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use laobao::model::{MODEL_EXTENSION, list_models};

use args::{Cli, Command};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let cli = Cli::parse();
  match cli.command {
    Command::Models { dir } => print_models(&dir),
    Command::Run(args) => run(args),
  }
}

fn print_models(dir: &Path) -> Result<()> {
  let models = list_models(dir)?;
  if models.is_empty() {
    warn!("目录 {} 中没有 .{} 模型文件", dir.display(), MODEL_EXTENSION);
    return Ok(());
  }

  println!("可用模型 ({}):", dir.display());
  for (index, name) in models.iter().enumerate() {
    println!("{}: {}", index, name);
  }
  Ok(())
}

/// 未指定导出路径时使用 `results/ppe_detection_<时间>.mp4`
fn default_export_path() -> PathBuf {
  let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
  PathBuf::from("results").join(format!("ppe_detection_{}.mp4", stamp))
}

#[cfg(feature = "model_onnx")]
fn run(args: args::RunArgs) -> Result<()> {
  use std::{
    fs::File,
    io::{BufWriter, Read, Write},
  };

  use image::ImageFormat;
  use laobao::{
    compliance::Evaluation,
    input::{DefaultIo, SourceDescriptor},
    model::{LabelMap, OnnxDetector},
    output::Annotator,
    task::{ComplianceTask, StopFlag},
  };
  use serde::Serialize;

  #[derive(Serialize)]
  struct FrameReport<'a> {
    index: u64,
    fps: f32,
    #[serde(flatten)]
    evaluation: &'a Evaluation,
  }

  info!("模型文件路径: {}", args.model.display());
  info!(
    "必需用品: {}",
    args
      .require
      .iter()
      .map(|item| item.as_str())
      .collect::<Vec<_>>()
      .join(", ")
  );
  info!("置信度阈值: {}", args.confidence);

  let labels = match args.labels.as_deref() {
    Some(path) => LabelMap::load(path)?,
    None => LabelMap::default(),
  };
  let model = OnnxDetector::load(&args.model, args.confidence, labels)?;

  let source = if args.source.trim() == "-" {
    let mut data = Vec::new();
    std::io::stdin().read_to_end(&mut data)?;
    info!("从标准输入读取 {} 字节", data.len());
    SourceDescriptor::bytes(data, args.upload_name.clone())
  } else {
    args.source.parse::<SourceDescriptor>()?
  };
  let export = args.export.map(|path| path.unwrap_or_else(default_export_path));

  let task = ComplianceTask::new(model, args.require, DefaultIo)
    .with_annotator(Annotator::load(args.font.as_deref()))
    .with_max_frames(Some(args.max_frames));

  let stop = StopFlag::new();
  let handler_flag = stop.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handler_flag.stop();
  })?;

  let mut report = match args.report.as_deref() {
    Some(path) => Some(BufWriter::new(File::create(path)?)),
    None => None,
  };

  let mut frames = 0u64;
  let mut unsafe_frames = 0u64;
  for result in task.run(source, export.clone(), stop) {
    let frame = result?;
    frames += 1;
    if frame.evaluation.unsafe_count() > 0 {
      unsafe_frames += 1;
    }

    info!(
      "第 {} 帧: {:.1} FPS, 工人 {} 名, 不合规 {} 名",
      frame.index,
      frame.fps,
      frame.evaluation.workers.len(),
      frame.evaluation.unsafe_count()
    );

    if let Some(path) = args.preview.as_deref() {
      frame.image.save_with_format(path, ImageFormat::Png)?;
    }
    if let Some(writer) = report.as_mut() {
      serde_json::to_writer(
        &mut *writer,
        &FrameReport {
          index: frame.index,
          fps: frame.fps,
          evaluation: &frame.evaluation,
        },
      )?;
      writeln!(writer)?;
    }
  }

  if let Some(mut writer) = report {
    writer.flush()?;
  }

  info!("处理完成，共 {} 帧，其中 {} 帧存在不合规工人", frames, unsafe_frames);
  if let Some(path) = export {
    info!("导出文件: {}", path.display());
  }
  Ok(())
}

#[cfg(not(feature = "model_onnx"))]
fn run(_args: args::RunArgs) -> Result<()> {
  anyhow::bail!("当前构建未启用 model_onnx 特性，无法加载检测模型")
}
