// 该文件是 Laobao （劳保） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use laobao::label::RequiredItems;

/// Laobao 劳保用品合规检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 对视频源逐帧检测并标注
  Run(RunArgs),
  /// 列出可用的模型文件
  Models {
    /// 模型目录
    #[arg(long, default_value = "weights/ppe", value_name = "DIR")]
    dir: PathBuf,
  },
}

#[derive(Args, Debug)]
pub struct RunArgs {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// 必需的劳保用品，逗号分隔 (helmet, vest, gloves, boots)
  #[arg(long, default_value = "helmet,vest,gloves,boots", value_parser = parse_required, value_name = "ITEMS")]
  pub require: RequiredItems,

  /// 置信度阈值 (0.1 - 1.0)
  #[arg(long, default_value = "0.5", value_parser = parse_confidence, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 视频来源
  /// 支持格式:
  /// - 摄像头: 0 或 camera://0
  /// - 文件: site.mp4 或 file:///data/site.mp4
  /// - 标准输入: -
  #[arg(long, value_name = "SOURCE")]
  pub source: String,

  /// 上传数据的原始文件名，用于推断容器格式（仅对 `--source -` 有效）
  #[arg(long, value_name = "NAME")]
  pub upload_name: Option<String>,

  /// 导出标注后的视频，不指定路径时写入 results/ 目录
  #[arg(long, num_args = 0..=1, value_name = "PATH")]
  pub export: Option<Option<PathBuf>>,

  /// 类别标签文件 (TOML)
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标注字体文件 (TTF/OTF)
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 最大处理帧数（0 表示无限制）
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub max_frames: u64,

  /// 持续覆盖写入最新一帧标注图像 (PNG)
  #[arg(long, value_name = "FILE")]
  pub preview: Option<PathBuf>,

  /// 逐帧写入判定结果 (JSON Lines)
  #[arg(long, value_name = "FILE")]
  pub report: Option<PathBuf>,
}

fn parse_required(s: &str) -> Result<RequiredItems, String> {
  let required: RequiredItems = s.parse().map_err(|e| format!("{}", e))?;
  if required.is_empty() {
    return Err("至少需要指定一种劳保用品".to_string());
  }
  Ok(required)
}

fn parse_confidence(s: &str) -> Result<f32, String> {
  let value: f32 = s.parse().map_err(|_| format!("无效的数值: {}", s))?;
  if !(0.1..=1.0).contains(&value) {
    return Err(format!("置信度阈值 {} 超出范围 [0.1, 1.0]", value));
  }
  Ok(value)
}

#[cfg(test)]
mod tests {
  use super::*;
  use laobao::label::PpeItem;

  #[test]
  fn confidence_must_be_in_range() {
    assert_eq!(parse_confidence("0.5"), Ok(0.5));
    assert!(parse_confidence("0.05").is_err());
    assert!(parse_confidence("1.5").is_err());
    assert!(parse_confidence("abc").is_err());
  }

  #[test]
  fn required_items_may_not_be_empty() {
    assert!(parse_required("").is_err());
    assert!(parse_required("hat").is_err());
    let required = parse_required("vest, helmet,vest").unwrap();
    assert_eq!(
      required.iter().collect::<Vec<_>>(),
      vec![PpeItem::Vest, PpeItem::Helmet]
    );
  }

  #[test]
  fn export_flag_accepts_optional_path() {
    let cli = Cli::parse_from(["laobao", "run", "--model", "m.onnx", "--source", "0", "--export"]);
    let Command::Run(args) = cli.command else {
      panic!("expected run");
    };
    assert_eq!(args.export, Some(None));

    let cli = Cli::parse_from([
      "laobao", "run", "--model", "m.onnx", "--source", "0", "--export", "out.mkv",
    ]);
    let Command::Run(args) = cli.command else {
      panic!("expected run");
    };
    assert_eq!(args.export, Some(Some(PathBuf::from("out.mkv"))));
  }
}
