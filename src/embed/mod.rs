use anyhow::{Result, ensure};
use opencv::core::{Mat, Size};
use opencv::imgproc::{self, InterpolationFlags};
use opencv::prelude::*;

mod histogram;
mod onnx;

pub use histogram::HistogramEmbedder;
pub use onnx::OnnxEmbedder;

/// 图片特征提取器
///
/// 输入图片会先经过 [`Resizer::smart_resize`] 缩放到 `max_side` 以内。
/// 输出不做归一化，同一个提取器的所有输出维度相同。
pub trait Embedder {
    /// 特征向量的维度
    fn dimension(&self) -> usize;

    /// 批量提取特征，每张输入图片对应一个输出向量，顺序一致
    fn extract_batch(&mut self, images: &[Mat], max_side: i32) -> Result<Vec<Vec<f32>>>;

    /// 提取单张图片的特征
    fn extract(&mut self, image: &Mat, max_side: i32) -> Result<Vec<f32>> {
        let mut vectors = self.extract_batch(std::slice::from_ref(image), max_side)?;
        ensure!(vectors.len() == 1, "提取器返回了 {} 个向量", vectors.len());
        Ok(vectors.remove(0))
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn extract_batch(&mut self, images: &[Mat], max_side: i32) -> Result<Vec<Vec<f32>>> {
        (**self).extract_batch(images, max_side)
    }

    fn extract(&mut self, image: &Mat, max_side: i32) -> Result<Vec<f32>> {
        (**self).extract(image, max_side)
    }
}

/// 模型输入尺寸的预处理
#[derive(Debug, Clone, Copy)]
pub struct Resizer {
    patch_size: i32,
    interpolation: InterpolationFlags,
}

impl Resizer {
    pub fn new(patch_size: i32, interpolation: InterpolationFlags) -> Self {
        Self { patch_size, interpolation }
    }

    pub fn patch_size(&self) -> i32 {
        self.patch_size
    }

    /// 计算缩放后的尺寸 `(width, height)`
    ///
    /// 最长边超过 `max_side` 时等比缩小，然后两边都向下取整到 patch 的整数倍，
    /// 且不小于一个 patch。
    pub fn target_size(&self, width: i32, height: i32, max_side: i32) -> (i32, i32) {
        let (mut w, mut h) = (width, height);
        let longest = w.max(h);
        if longest > max_side {
            let ratio = max_side as f64 / longest as f64;
            w = (w as f64 * ratio) as i32;
            h = (h as f64 * ratio) as i32;
        }
        let patch = self.patch_size;
        (((w / patch) * patch).max(patch), ((h / patch) * patch).max(patch))
    }

    pub fn smart_resize(&self, image: &Mat, max_side: i32) -> Result<Mat> {
        let (w, h) = self.target_size(image.cols(), image.rows(), max_side);
        if (w, h) == (image.cols(), image.rows()) {
            return Ok(image.try_clone()?);
        }
        let mut output = Mat::default();
        imgproc::resize(image, &mut output, Size::new(w, h), 0., 0., self.interpolation as i32)?;
        Ok(output)
    }
}
