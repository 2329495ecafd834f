use std::path::PathBuf;

use anyhow::{Result, ensure};
use clap::{Parser, Subcommand, ValueEnum};
use opencv::imgproc::InterpolationFlags;

use crate::cli::*;
use crate::embed::{Embedder, HistogramEmbedder, OnnxEmbedder, Resizer};
use crate::tiling::{PadMode, TileSlicer, WindowConfig};

#[derive(Parser, Debug, Clone)]
pub struct TileOptions {
    /// 切片窗口边长，应为 patch 大小的整数倍
    #[arg(short, long, value_name = "SIZE", default_value_t = 518)]
    pub window_size: u32,
    /// 相邻切片的重叠比例，范围 [0, 1)
    #[arg(long, value_name = "RATIO", default_value_t = 0.2)]
    pub overlap: f64,
    /// 切片超出图片边界时的填充方式
    #[arg(long, value_enum, default_value_t = PadMode::Replicate)]
    pub pad: PadMode,
    /// 每次送入模型的切片数量
    #[arg(short, long, value_name = "N", default_value_t = 8)]
    pub batch_size: usize,
}

impl TileOptions {
    pub fn slicer(&self) -> Result<TileSlicer> {
        ensure!(self.batch_size >= 1, "batch size 必须大于 0");
        let window = WindowConfig::new(self.window_size, self.overlap)?;
        Ok(TileSlicer::new(window, self.pad))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct EmbedOptions {
    /// 特征提取后端
    #[arg(long, value_enum, default_value_t = Backend::Onnx)]
    pub backend: Backend,
    /// ONNX 模型路径（例如导出的 DINOv2）
    #[arg(long, value_name = "PATH")]
    pub onnx: Option<PathBuf>,
    /// 模型的 patch 大小，输入宽高会向下取整到它的整数倍
    #[arg(long, value_name = "N", default_value_t = 14)]
    pub patch_size: i32,
    /// 全局特征的最大输入边长
    #[arg(long, value_name = "SIZE", default_value_t = 1526)]
    pub global_size: i32,
    /// 局部特征（切片）的最大输入边长
    #[arg(long, value_name = "SIZE", default_value_t = 518)]
    pub local_size: i32,
    /// 缩放插值方式
    #[arg(long, value_name = "FLAG", default_value = "lanczos4", value_parser = parse_interpolation)]
    pub interpolation: InterpolationFlags,
    /// 直方图后端每个通道的分桶数量
    #[arg(long, value_name = "N", default_value_t = 16)]
    pub histogram_bins: usize,
}

impl EmbedOptions {
    pub fn resizer(&self) -> Result<Resizer> {
        ensure!(self.patch_size >= 1, "patch 大小必须大于 0");
        ensure!(
            self.global_size >= self.patch_size && self.local_size >= self.patch_size,
            "输入边长不能小于 patch 大小"
        );
        Ok(Resizer::new(self.patch_size, self.interpolation))
    }

    /// 根据配置创建特征提取器
    pub fn embedder(&self) -> Result<Box<dyn Embedder>> {
        let resizer = self.resizer()?;
        match self.backend {
            Backend::Onnx => {
                let path = self.onnx.as_ref().ok_or_else(|| anyhow::anyhow!("缺少 --onnx 模型路径"))?;
                Ok(Box::new(OnnxEmbedder::open(path, resizer)?))
            }
            Backend::Histogram => {
                Ok(Box::new(HistogramEmbedder::new(self.histogram_bins, resizer)?))
            }
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// 通过 OpenCV DNN 运行 ONNX 模型
    Onnx,
    /// 颜色直方图，无需模型
    Histogram,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "tilefuse", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 运行结束后将指标推送到 Prometheus push gateway
    #[arg(long, value_name = "URL", global = true)]
    pub push_gateway: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 提取目录中所有图片的特征向量
    Extract(ExtractCommand),
    /// 生成缩略图
    Thumb(ThumbCommand),
    /// 将特征向量导出为 npy 矩阵
    Export(ExportCommand),
}

fn parse_interpolation(s: &str) -> Result<InterpolationFlags, String> {
    match s {
        "linear" => Ok(InterpolationFlags::INTER_LINEAR),
        "cubic" => Ok(InterpolationFlags::INTER_CUBIC),
        "area" => Ok(InterpolationFlags::INTER_AREA),
        "lanczos4" => Ok(InterpolationFlags::INTER_LANCZOS4),
        _ => Err(format!("无效的插值方式: {}", s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extract_defaults() {
        let opts = Opts::parse_from(["tilefuse", "extract", "images", "--backend", "histogram"]);
        let SubCommand::Extract(cmd) = opts.subcmd else {
            panic!("expected extract");
        };
        assert_eq!(cmd.tile.window_size, 518);
        assert_eq!(cmd.tile.batch_size, 8);
        assert_eq!(cmd.save_interval, 10);
        assert_eq!(cmd.embed.backend, Backend::Histogram);
        assert_eq!(cmd.embed.interpolation, InterpolationFlags::INTER_LANCZOS4);
        assert_eq!(cmd.output, PathBuf::from("data_vectors.json"));
    }

    #[test]
    fn onnx_backend_requires_model() {
        let opts = Opts::parse_from(["tilefuse", "extract", "images"]);
        let SubCommand::Extract(cmd) = opts.subcmd else {
            panic!("expected extract");
        };
        assert_eq!(cmd.embed.backend, Backend::Onnx);
        assert!(cmd.embed.embedder().is_err());
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let args = ["tilefuse", "extract", "images", "--backend", "histogram", "--overlap", "1.0"];
        let opts = Opts::parse_from(args);
        let SubCommand::Extract(cmd) = opts.subcmd else {
            panic!("expected extract");
        };
        assert!(cmd.tile.slicer().is_err());
    }

    #[test]
    fn interpolation_names() {
        assert_eq!(parse_interpolation("area"), Ok(InterpolationFlags::INTER_AREA));
        assert!(parse_interpolation("nearest").is_err());
    }
}
