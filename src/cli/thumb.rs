use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use indicatif::{ProgressBar, ProgressIterator};
use log::{info, warn};
use opencv::{imgcodecs, imgproc};
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::utils::{self, pb_style, scan_images, suffix_regex};

#[derive(Parser, Debug, Clone)]
pub struct ThumbCommand {
    /// 原图所在目录
    pub input: PathBuf,
    /// 缩略图输出目录
    pub output: PathBuf,
    /// 缩略图最长边
    #[arg(long, value_name = "SIZE", default_value_t = 256)]
    pub size: i32,
    /// WebP 质量，范围 1 到 100
    #[arg(short, long, default_value_t = 80, value_parser = clap::value_parser!(i32).range(1..=100))]
    pub quality: i32,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp,bmp,tiff")]
    pub suffix: String,
}

impl ThumbCommand {
    /// 生成单张缩略图，目标已存在时返回 false
    fn create_thumbnail(&self, src: &Path) -> Result<bool> {
        let stem = src.file_stem().ok_or_else(|| anyhow!("无效的文件名: {}", src.display()))?;
        let dst = self.output.join(format!("{}.webp", stem.to_string_lossy()));
        if dst.exists() {
            return Ok(false);
        }
        let img = utils::imread(src)?;
        let thumb = utils::fit_within(&img, self.size, imgproc::INTER_LANCZOS4)?;
        utils::imwrite(&dst, &thumb, &[imgcodecs::IMWRITE_WEBP_QUALITY, self.quality])?;
        Ok(true)
    }
}

impl SubCommandExtend for ThumbCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let re_suf = suffix_regex(&self.suffix)?;
        let files = scan_images(&self.input, &re_suf)?;
        std::fs::create_dir_all(&self.output)
            .with_context(|| format!("无法创建目录 {}", self.output.display()))?;

        let created = block_in_place(|| {
            let pb = ProgressBar::new(files.len() as u64).with_style(pb_style());
            let mut created = 0;
            for src in files.iter().progress_with(pb.clone()) {
                match self.create_thumbnail(src) {
                    Ok(true) => created += 1,
                    Ok(false) => {}
                    Err(e) => pb.suspend(|| warn!("生成缩略图失败 {}: {:#}", src.display(), e)),
                }
            }
            pb.finish_with_message("缩略图生成完成");
            created
        });

        info!("新生成 {} 张缩略图，共 {} 张图片", created, files.len());
        Ok(())
    }
}
