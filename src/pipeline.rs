//! 逐张图片的特征提取流程
//!
//! 读取 → 全局特征 → 切片 → 分批提取局部特征 → 融合 → 记录 → 定期保存。
//! 单张图片内的任何错误都会让这张图片整体跳过，不会留下不完整的记录。

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, ensure};
use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::ArrayView1;
use opencv::core::Mat;

use crate::checkpoint::{CheckpointWriter, Database, FeatureRecord};
use crate::embed::Embedder;
use crate::fusion;
use crate::metrics;
use crate::tiling::TileSlicer;
use crate::utils;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub slicer: TileSlicer,
    /// 每批送入模型的切片数量
    pub batch_size: usize,
    /// 全局特征的最大输入边长
    pub global_size: i32,
    /// 局部特征的最大输入边长
    pub local_size: i32,
    pub thumb_prefix: String,
    pub thumb_ext: String,
}

/// 固定容量的缓冲区，装满后整体取出
pub struct Batcher<T> {
    capacity: usize,
    items: Vec<T>,
}

impl<T> Batcher<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, items: Vec::with_capacity(capacity) }
    }

    /// 放入一个元素，缓冲区满时返回整批
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.items.push(item);
        if self.items.len() >= self.capacity { Some(self.take()) } else { None }
    }

    /// 取出剩余的不完整批次
    pub fn finish(mut self) -> Option<Vec<T>> {
        if self.items.is_empty() { None } else { Some(self.take()) }
    }

    fn take(&mut self) -> Vec<T> {
        std::mem::replace(&mut self.items, Vec::with_capacity(self.capacity))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// 本次成功处理的图片
    pub processed: usize,
    /// 已存在于数据库中而跳过的图片
    pub skipped: usize,
    /// 处理失败的图片
    pub failed: usize,
    /// 最终写入的记录总数
    pub records: usize,
}

pub struct Pipeline<E> {
    embedder: E,
    options: PipelineOptions,
    database: Database,
    writer: CheckpointWriter,
    pb: ProgressBar,
}

impl<E: Embedder> Pipeline<E> {
    pub fn new(embedder: E, options: PipelineOptions, writer: CheckpointWriter) -> Self {
        Self { embedder, options, database: Database::new(), writer, pb: ProgressBar::hidden() }
    }

    /// 在已有记录的基础上继续，数据库中已存在的图片会被跳过
    pub fn with_database(mut self, database: Database) -> Self {
        self.database = database;
        self
    }

    pub fn with_progress(mut self, pb: ProgressBar) -> Self {
        self.pb = pb;
        self
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// 按给定顺序处理所有图片，结束时无条件保存一次
    ///
    /// 单张图片失败只会被记录并跳过，写入检查点失败则直接返回错误。
    pub fn run(&mut self, files: &[PathBuf]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        self.pb.set_length(files.len() as u64);
        if !self.database.is_empty() {
            info!("数据库中已有 {} 条记录", self.database.len());
        }

        for path in files {
            self.pb.inc(1);
            let id = match utils::file_name(path) {
                Ok(id) => id,
                Err(e) => {
                    self.pb.suspend(|| warn!("处理失败 {}: {:#}", path.display(), e));
                    summary.failed += 1;
                    metrics::inc_image_failed();
                    continue;
                }
            };
            if self.database.contains(&id) {
                debug!("跳过已处理图片: {}", id);
                summary.skipped += 1;
                continue;
            }
            self.pb.set_message(id.clone());

            let start = Instant::now();
            match self.process_image(path) {
                Ok(record) => {
                    self.database.push(record);
                    summary.processed += 1;
                    metrics::inc_image_processed(start.elapsed().as_secs_f32());
                    self.writer.record(&self.database)?;
                }
                Err(e) => {
                    self.pb.suspend(|| warn!("处理失败 {}: {:#}", id, e));
                    summary.failed += 1;
                    metrics::inc_image_failed();
                }
            }
        }

        info!("正在保存 {} 条记录到 {}", self.database.len(), self.writer.path().display());
        self.writer.flush(&self.database)?;
        summary.records = self.database.len();
        Ok(summary)
    }

    /// 计算单张图片的融合特征
    pub fn process_image(&mut self, path: &Path) -> Result<FeatureRecord> {
        let id = utils::file_name(path)?;
        let image = utils::imread(path)?;

        let global = self
            .embedder
            .extract(&image, self.options.global_size)
            .context("提取全局特征失败")?;
        let locals = self.extract_locals(&image).context("提取局部特征失败")?;

        let dimension = global.len();
        let locals = fusion::stack(&locals, dimension)?;
        let vector = fusion::fuse(ArrayView1::from(&global), locals.view())?;

        let thumb_path =
            utils::thumb_path(path, &self.options.thumb_prefix, &self.options.thumb_ext)?;
        Ok(FeatureRecord {
            id,
            high_res_path: path.to_string_lossy().into_owned(),
            thumb_path,
            vector: vector.to_vec(),
        })
    }

    fn extract_locals(&mut self, image: &Mat) -> Result<Vec<Vec<f32>>> {
        let tiles = self.options.slicer.slice(image)?;
        debug!("切片数量: {}", tiles.total());

        let mut batcher = Batcher::new(self.options.batch_size);
        let mut vectors = vec![];
        for tile in tiles {
            if let Some(batch) = batcher.push(tile?.image) {
                self.extract_batch(&batch, &mut vectors)?;
            }
        }
        if let Some(batch) = batcher.finish() {
            self.extract_batch(&batch, &mut vectors)?;
        }
        Ok(vectors)
    }

    fn extract_batch(&mut self, batch: &[Mat], vectors: &mut Vec<Vec<f32>>) -> Result<()> {
        let result = self.embedder.extract_batch(batch, self.options.local_size)?;
        ensure!(result.len() == batch.len(), "模型返回 {} 个向量，期望 {}", result.len(), batch.len());
        debug!("已提取一批切片: {}", batch.len());
        metrics::inc_tile_count(batch.len());
        vectors.extend(result);
        Ok(())
    }
}
