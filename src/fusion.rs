//! 全局特征与局部特征的融合
//!
//! 全局向量和局部均值向量各自归一化后按 0.5 / 0.5 加权，再整体归一化，
//! 所有输出都落在同一个单位超球面上，可以直接用点积比较。

use anyhow::{Result, ensure};
use ndarray::prelude::*;

const GLOBAL_WEIGHT: f32 = 0.5;
const LOCAL_WEIGHT: f32 = 0.5;

/// L2 归一化，零向量无法归一化时返回错误
pub fn l2_normalize(v: ArrayView1<f32>) -> Result<Array1<f32>> {
    let norm = v.dot(&v).sqrt();
    ensure!(norm.is_finite() && norm > f32::EPSILON, "无法归一化范数为 {} 的向量", norm);
    Ok(&v / norm)
}

/// 融合全局向量与局部向量
///
/// `locals` 每行是一个切片的特征，可以为 0 行，此时结果就是归一化后的全局向量。
pub fn fuse(global: ArrayView1<f32>, locals: ArrayView2<f32>) -> Result<Array1<f32>> {
    let global = l2_normalize(global)?;
    if locals.nrows() == 0 {
        return Ok(global);
    }
    ensure!(
        locals.ncols() == global.len(),
        "局部向量维度 {} 与全局向量维度 {} 不一致",
        locals.ncols(),
        global.len()
    );

    let Some(mean) = locals.mean_axis(Axis(0)) else {
        return Ok(global);
    };
    let local = l2_normalize(mean.view())?;
    let fused = global * GLOBAL_WEIGHT + local * LOCAL_WEIGHT;
    l2_normalize(fused.view())
}

/// 将若干等长向量堆叠为矩阵
pub fn stack(vectors: &[Vec<f32>], dimension: usize) -> Result<Array2<f32>> {
    ensure!(vectors.iter().all(|v| v.len() == dimension), "局部向量维度不一致，期望 {}", dimension);
    let flat = vectors.iter().flatten().copied().collect::<Vec<_>>();
    Ok(Array2::from_shape_vec((vectors.len(), dimension), flat)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn norm(v: &Array1<f32>) -> f32 {
        v.dot(v).sqrt()
    }

    fn random_vector(rng: &mut impl Rng, d: usize) -> Array1<f32> {
        Array1::from_iter((0..d).map(|_| rng.random_range(-3.0f32..3.0)))
    }

    #[test]
    fn fused_vector_is_unit_length() {
        let mut rng = rand::rng();
        for d in [3, 48, 1024] {
            for n in 1..6 {
                let global = random_vector(&mut rng, d);
                let locals = Array2::from_shape_fn((n, d), |_| rng.random_range(-3.0f32..3.0));
                let fused = fuse(global.view(), locals.view()).unwrap();
                assert_eq!(fused.len(), d);
                assert!((norm(&fused) - 1.0).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn empty_locals_returns_normalized_global() {
        let global = array![3.0f32, 4.0, 0.0];
        let locals = Array2::<f32>::zeros((0, 3));
        let fused = fuse(global.view(), locals.view()).unwrap();
        assert_eq!(fused, array![0.6f32, 0.8, 0.0]);
    }

    #[test]
    fn equal_weighting_ignores_magnitude() {
        let global = array![100.0f32, 0.0];
        let locals = array![[0.0f32, 0.01], [0.0, 0.03]];
        let fused = fuse(global.view(), locals.view()).unwrap();
        let h = std::f32::consts::FRAC_1_SQRT_2;
        assert!((fused[0] - h).abs() < 1e-6);
        assert!((fused[1] - h).abs() < 1e-6);
    }

    #[test]
    fn single_local_equal_to_global() {
        let global = array![1.0f32, 2.0, 2.0];
        let locals = array![[2.0f32, 4.0, 4.0]];
        let fused = fuse(global.view(), locals.view()).unwrap();
        let expected = l2_normalize(global.view()).unwrap();
        for (a, b) in fused.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn degenerate_inputs_are_errors() {
        let zero = array![0.0f32, 0.0];
        assert!(fuse(zero.view(), Array2::<f32>::zeros((0, 2)).view()).is_err());

        let global = array![1.0f32, 0.0];
        assert!(fuse(global.view(), array![[1.0f32, 0.0], [-1.0, 0.0]].view()).is_err());
        assert!(fuse(global.view(), array![[1.0f32, 0.0, 0.0]].view()).is_err());
        // 全局与局部方向相反时融合结果为零向量
        assert!(fuse(global.view(), array![[-1.0f32, 0.0]].view()).is_err());
    }

    #[test]
    fn stack_checks_dimension() {
        let m = stack(&[vec![1.0, 2.0], vec![3.0, 4.0]], 2).unwrap();
        assert_eq!(m, array![[1.0f32, 2.0], [3.0, 4.0]]);
        assert!(stack(&[vec![1.0, 2.0], vec![3.0]], 2).is_err());
        assert_eq!(stack(&[], 5).unwrap().dim(), (0, 5));
    }
}
