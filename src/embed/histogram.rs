use anyhow::{Result, ensure};
use opencv::core::Mat;
use opencv::prelude::*;

use super::{Embedder, Resizer};

/// 按通道统计的颜色直方图，维度为 `bins * 3`
///
/// 不依赖模型，结果完全由像素决定，适合离线运行和测试。
pub struct HistogramEmbedder {
    bins: usize,
    resizer: Resizer,
}

impl HistogramEmbedder {
    pub fn new(bins: usize, resizer: Resizer) -> Result<Self> {
        ensure!((1..=256).contains(&bins), "分桶数量必须位于 [1, 256]: {}", bins);
        Ok(Self { bins, resizer })
    }

    fn histogram(&self, image: &Mat) -> Result<Vec<f32>> {
        ensure!(image.channels() == 3, "只支持三通道图片，实际为 {}", image.channels());
        let mut hist = vec![0f32; self.bins * 3];
        let data = image.data_bytes()?;
        for pixel in data.chunks_exact(3) {
            for (c, &v) in pixel.iter().enumerate() {
                hist[c * self.bins + v as usize * self.bins / 256] += 1.0;
            }
        }
        Ok(hist)
    }
}

impl Embedder for HistogramEmbedder {
    fn dimension(&self) -> usize {
        self.bins * 3
    }

    fn extract_batch(&mut self, images: &[Mat], max_side: i32) -> Result<Vec<Vec<f32>>> {
        images
            .iter()
            .map(|image| {
                // smart_resize 总是返回连续内存的新矩阵
                let image = self.resizer.smart_resize(image, max_side)?;
                self.histogram(&image)
            })
            .collect()
    }
}
