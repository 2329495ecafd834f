use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::checkpoint::{CheckpointWriter, Database, load_records};
use crate::cli::SubCommandExtend;
use crate::config::{EmbedOptions, Opts, TileOptions};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::utils::{pb_style, scan_images, suffix_regex};

#[derive(Parser, Debug, Clone)]
pub struct ExtractCommand {
    #[command(flatten)]
    pub tile: TileOptions,
    #[command(flatten)]
    pub embed: EmbedOptions,
    /// 图片所在目录
    pub input: PathBuf,
    /// 特征向量输出文件
    #[arg(short, long, default_value = "data_vectors.json")]
    pub output: PathBuf,
    /// 每成功处理多少张图片保存一次检查点，0 表示只在结束时保存
    #[arg(long, value_name = "N", default_value_t = 10)]
    pub save_interval: usize,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    /// 记录中缩略图路径的目录前缀
    #[arg(long, default_value = "thumbnail")]
    pub thumb_prefix: String,
    /// 记录中缩略图的后缀名
    #[arg(long, default_value = "webp")]
    pub thumb_ext: String,
    /// 读取已有的输出文件，跳过其中已处理的图片
    #[arg(long, conflicts_with = "overwrite")]
    pub resume: bool,
    /// 忽略已有的输出文件，重新处理全部图片
    #[arg(long)]
    pub overwrite: bool,
}

impl ExtractCommand {
    fn pipeline_options(&self) -> Result<PipelineOptions> {
        Ok(PipelineOptions {
            slicer: self.tile.slicer()?,
            batch_size: self.tile.batch_size,
            global_size: self.embed.global_size,
            local_size: self.embed.local_size,
            thumb_prefix: self.thumb_prefix.clone(),
            thumb_ext: self.thumb_ext.clone(),
        })
    }

    fn initial_database(&self) -> Result<Option<Database>> {
        if !self.output.exists() || self.overwrite {
            return Ok(Some(Database::new()));
        }
        if self.resume {
            let records = load_records(&self.output)?;
            info!("从 {} 恢复 {} 条记录", self.output.display(), records.len());
            return Ok(Some(Database::from_records(records)));
        }
        Ok(None)
    }
}

impl SubCommandExtend for ExtractCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let re_suf = suffix_regex(&self.suffix)?;
        let options = self.pipeline_options()?;
        let files = scan_images(&self.input, &re_suf)?;
        info!("在 {} 中找到 {} 张图片", self.input.display(), files.len());

        let Some(database) = self.initial_database()? else {
            info!("{} 已存在，跳过特征提取（使用 --resume 或 --overwrite）", self.output.display());
            return Ok(());
        };

        if self.embed.local_size != self.tile.window_size as i32 {
            warn!(
                "局部特征输入边长 {} 与切片窗口 {} 不一致，切片会被再次缩放",
                self.embed.local_size, self.tile.window_size
            );
        }

        let summary = block_in_place(|| -> Result<_> {
            let embedder = self.embed.embedder()?;
            let writer = CheckpointWriter::new(&self.output, self.save_interval);
            let pb = ProgressBar::new(files.len() as u64).with_style(pb_style());
            let mut pipeline = Pipeline::new(embedder, options, writer)
                .with_database(database)
                .with_progress(pb.clone());
            let summary = pipeline.run(&files)?;
            pb.finish_with_message("特征提取完成");
            Ok(summary)
        })?;

        info!(
            "处理 {} 张，跳过 {} 张，失败 {} 张，共 {} 条记录",
            summary.processed, summary.skipped, summary.failed, summary.records
        );

        if let Some(gateway) = &opts.push_gateway {
            block_in_place(|| crate::metrics::push(gateway, "tilefuse_extract"))?;
        }
        Ok(())
    }
}
