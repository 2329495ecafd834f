use std::path::Path;

use anyhow::{Context, Result, anyhow, bail, ensure};
use log::{debug, info};
use opencv::core::{self, CV_32F, CV_32FC3, Mat, Scalar, Size, Vector};
use opencv::dnn::{self, Net};
use opencv::prelude::*;

use super::{Embedder, Resizer};

// ImageNet 均值与标准差，按 BGR 顺序
const MEAN_BGR: [f64; 3] = [0.406, 0.456, 0.485];
const STD_BGR: [f64; 3] = [0.225, 0.224, 0.229];

/// 通过 OpenCV DNN 运行 ONNX 格式的视觉 Transformer（如 DINOv2）
///
/// 模型输出 `[N, T, D]` 时取 CLS token（`[:, 0, :]`），输出 `[N, D]` 时直接使用。
pub struct OnnxEmbedder {
    net: Net,
    resizer: Resizer,
    dimension: usize,
}

impl OnnxEmbedder {
    pub fn open(path: &Path, resizer: Resizer) -> Result<Self> {
        ensure!(path.is_file(), "模型文件不存在: {}", path.display());
        let file = path.to_str().ok_or_else(|| anyhow!("无效的模型路径: {}", path.display()))?;
        let net = dnn::read_net_from_onnx(file).with_context(|| format!("加载模型失败: {}", file))?;
        info!("已加载模型: {}", file);

        let mut embedder = Self { net, resizer, dimension: 0 };
        // 用一张最小的空白图探测输出维度
        let probe = Mat::new_rows_cols_with_default(
            resizer.patch_size(),
            resizer.patch_size(),
            core::CV_8UC3,
            Scalar::all(0.),
        )?;
        let vectors = embedder.forward(&[probe])?;
        embedder.dimension = vectors[0].len();
        info!("模型输出维度: {}", embedder.dimension);
        Ok(embedder)
    }

    fn normalize(image: &Mat) -> Result<Mat> {
        let mut float = Mat::default();
        image.convert_to(&mut float, CV_32FC3, 1.0 / 255.0, 0.0)?;
        let (rows, cols) = (float.rows(), float.cols());
        let mean = Mat::new_rows_cols_with_default(
            rows,
            cols,
            CV_32FC3,
            Scalar::new(MEAN_BGR[0], MEAN_BGR[1], MEAN_BGR[2], 0.),
        )?;
        let std = Mat::new_rows_cols_with_default(
            rows,
            cols,
            CV_32FC3,
            Scalar::new(STD_BGR[0], STD_BGR[1], STD_BGR[2], 1.),
        )?;
        let mut centered = Mat::default();
        core::subtract(&float, &mean, &mut centered, &core::no_array(), -1)?;
        let mut output = Mat::default();
        core::divide2(&centered, &std, &mut output, 1.0, -1)?;
        Ok(output)
    }

    /// 对尺寸相同的一组已缩放图片执行一次前向计算
    fn forward(&mut self, images: &[Mat]) -> Result<Vec<Vec<f32>>> {
        let mut inputs = Vector::<Mat>::new();
        for image in images {
            inputs.push(Self::normalize(image)?);
        }
        let blob = dnn::blob_from_images(
            &inputs,
            1.0,
            Size::default(),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;
        self.net.set_input(&blob, "", 1.0, Scalar::default())?;
        let output = self.net.forward_single("")?;

        let shape = output.mat_size().iter().copied().collect::<Vec<i32>>();
        debug!("模型输出形状: {:?}", shape);
        split_output(&shape, output.data_typed::<f32>()?, images.len())
    }
}

/// 将形状为 `[N, T, D]` 或 `[N, D]` 的输出拆成 N 个向量，三维时取每行的第一个 token
fn split_output(shape: &[i32], data: &[f32], n: usize) -> Result<Vec<Vec<f32>>> {
    let (stride, dim) = match *shape {
        [b, t, d] if b as usize == n && t > 0 && d > 0 => ((t * d) as usize, d as usize),
        [b, d] if b as usize == n && d > 0 => (d as usize, d as usize),
        _ => bail!("无法识别的模型输出形状: {:?}，批次大小 {}", shape, n),
    };
    ensure!(data.len() == n * stride, "模型输出长度 {} 与形状 {:?} 不符", data.len(), shape);
    Ok(data.chunks_exact(stride).map(|chunk| chunk[..dim].to_vec()).collect())
}

impl Embedder for OnnxEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn extract_batch(&mut self, images: &[Mat], max_side: i32) -> Result<Vec<Vec<f32>>> {
        let resized = images
            .iter()
            .map(|image| self.resizer.smart_resize(image, max_side))
            .collect::<Result<Vec<_>>>()?;

        let same_size = resized.windows(2).all(|w| w[0].size().ok() == w[1].size().ok());
        let vectors = if same_size {
            self.forward(&resized)?
        } else {
            // blob 要求同一批次尺寸一致，尺寸不同时逐张计算
            let mut vectors = Vec::with_capacity(resized.len());
            for image in resized {
                vectors.extend(self.forward(std::slice::from_ref(&image))?);
            }
            vectors
        };

        ensure!(vectors.len() == images.len(), "模型返回 {} 个向量，期望 {}", vectors.len(), images.len());
        if self.dimension != 0 {
            ensure!(
                vectors.iter().all(|v| v.len() == self.dimension),
                "模型输出维度与 {} 不一致",
                self.dimension
            );
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::imgproc::InterpolationFlags;

    #[test]
    fn missing_model_is_an_error() {
        let resizer = Resizer::new(14, InterpolationFlags::INTER_LANCZOS4);
        assert!(OnnxEmbedder::open(Path::new("/nonexistent/model.onnx"), resizer).is_err());
    }

    #[test]
    fn token_output_takes_cls() {
        let data = (0..24).map(|i| i as f32).collect::<Vec<_>>();
        let vectors = split_output(&[2, 3, 4], &data, 2).unwrap();
        assert_eq!(vectors, vec![vec![0., 1., 2., 3.], vec![12., 13., 14., 15.]]);
    }

    #[test]
    fn pooled_output_takes_rows() {
        let data = (0..8).map(|i| i as f32).collect::<Vec<_>>();
        let vectors = split_output(&[2, 4], &data, 2).unwrap();
        assert_eq!(vectors, vec![vec![0., 1., 2., 3.], vec![4., 5., 6., 7.]]);
    }

    #[test]
    fn output_shape_must_match_batch() {
        let data = vec![0f32; 3 * 5 * 4];
        assert!(split_output(&[3, 5, 4], &data, 2).is_err());
        assert!(split_output(&[2, 4], &data[..6], 2).is_err());
        assert!(split_output(&[2, 3, 4, 5], &data, 2).is_err());
    }

    #[test]
    fn normalize_matches_imagenet_stats() {
        let img = Mat::new_rows_cols_with_default(2, 2, core::CV_8UC3, Scalar::all(255.)).unwrap();
        let out = OnnxEmbedder::normalize(&img).unwrap();
        let px = *out.at_2d::<core::Vec3f>(0, 0).unwrap();
        for c in 0..3 {
            let expected = ((1.0 - MEAN_BGR[c]) / STD_BGR[c]) as f32;
            assert!((px[c] - expected).abs() < 1e-5);
        }
    }
}
