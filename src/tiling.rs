//! 滑动窗口切片
//!
//! 用固定大小的窗口覆盖任意尺寸的图片：每条轴独立计算起点，最后一个窗口
//! 总是贴齐远端边界，因此不会越界，也不会漏掉边缘的像素带。

use anyhow::{Result, ensure};
use clap::ValueEnum;
use opencv::core::{self, Mat, Rect, Scalar};
use opencv::prelude::*;

/// 单条轴上的窗口参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    window: u32,
    stride: u32,
}

impl WindowConfig {
    /// 由窗口大小和重叠比例计算步长，`stride = floor(window * (1 - overlap))`
    pub fn new(window: u32, overlap: f64) -> Result<Self> {
        ensure!(window > 0, "窗口大小必须大于 0");
        ensure!((0.0..1.0).contains(&overlap), "重叠比例必须位于 [0, 1): {}", overlap);
        let stride = (window as f64 * (1.0 - overlap)).floor() as u32;
        ensure!(stride >= 1, "窗口 {} 与重叠比例 {} 得到的步长为 0", window, overlap);
        Ok(Self { window, stride })
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// 计算长度为 `length` 的轴上所有窗口的起点
    ///
    /// 结果严格递增且从 0 开始；当 `length > window` 时最后一个起点满足
    /// `offset + window == length`，它与前一个起点的距离可能小于一个步长。
    pub fn plan(&self, length: u32) -> Vec<u32> {
        if length <= self.window {
            return vec![0];
        }

        let mut points = vec![];
        let mut current = 0;
        loop {
            points.push(current);
            current += self.stride;
            if current + self.window >= length {
                let last = length - self.window;
                // 整除时最后一个起点已经存在
                if points.last().is_some_and(|&p| last > p) {
                    points.push(last);
                }
                break;
            }
        }
        points
    }
}

/// 切片超出图片边界时的填充策略
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadMode {
    /// 复制最外侧的像素
    Replicate,
    /// 填充黑色
    Constant,
}

impl PadMode {
    fn border_type(self) -> i32 {
        match self {
            PadMode::Replicate => core::BORDER_REPLICATE,
            PadMode::Constant => core::BORDER_CONSTANT,
        }
    }
}

/// 一个切片及其在原图中的左上角坐标
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub image: Mat,
}

#[derive(Debug, Clone, Copy)]
pub struct TileSlicer {
    window: WindowConfig,
    pad: PadMode,
}

impl TileSlicer {
    pub fn new(window: WindowConfig, pad: PadMode) -> Self {
        Self { window, pad }
    }

    /// 返回按行优先顺序惰性生成切片的迭代器
    ///
    /// 宽高都不超过窗口时只产生一个切片，即原图本身。
    pub fn slice<'a>(&self, image: &'a Mat) -> Result<Tiles<'a>> {
        ensure!(!image.empty(), "图片为空");
        let (width, height) = (image.cols() as u32, image.rows() as u32);
        let size = self.window.window();
        let (xs, ys) = if width <= size && height <= size {
            (vec![], vec![])
        } else {
            (self.window.plan(width), self.window.plan(height))
        };
        Ok(Tiles { image, size, pad: self.pad, xs, ys, next: 0, done: false })
    }
}

pub struct Tiles<'a> {
    image: &'a Mat,
    size: u32,
    pad: PadMode,
    xs: Vec<u32>,
    ys: Vec<u32>,
    next: usize,
    done: bool,
}

impl Tiles<'_> {
    /// 切片总数，`|xs| * |ys|`，整图模式下为 1
    pub fn total(&self) -> usize {
        if self.xs.is_empty() { 1 } else { self.xs.len() * self.ys.len() }
    }

    fn crop(&self, x: u32, y: u32) -> Result<Mat> {
        let (width, height) = (self.image.cols(), self.image.rows());
        let (x, y, size) = (x as i32, y as i32, self.size as i32);
        let w = size.min(width - x);
        let h = size.min(height - y);
        let roi = Mat::roi(self.image, Rect::new(x, y, w, h))?;
        if w == size && h == size {
            return Ok(roi.try_clone()?);
        }
        // 短边不足一个窗口时裁剪框越过图片边界，按填充策略补齐
        let mut padded = Mat::default();
        core::copy_make_border(
            &*roi,
            &mut padded,
            0,
            size - h,
            0,
            size - w,
            self.pad.border_type(),
            Scalar::all(0.),
        )?;
        Ok(padded)
    }
}

impl Iterator for Tiles<'_> {
    type Item = Result<Tile>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.xs.is_empty() {
            self.done = true;
            let tile = self.image.try_clone().map(|image| Tile { x: 0, y: 0, image });
            return Some(tile.map_err(Into::into));
        }
        if self.next >= self.xs.len() * self.ys.len() {
            self.done = true;
            return None;
        }
        let y = self.ys[self.next / self.xs.len()];
        let x = self.xs[self.next % self.xs.len()];
        self.next += 1;
        Some(self.crop(x, y).map(|image| Tile { x, y, image }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{CV_8UC3, Vec3b};

    fn image(width: i32, height: i32) -> Mat {
        let color = Scalar::new(10., 20., 30., 0.);
        Mat::new_rows_cols_with_default(height, width, CV_8UC3, color).unwrap()
    }

    fn covers(plan: &[u32], window: u32, length: u32) -> bool {
        let mut reached = 0;
        for &p in plan {
            if p > reached {
                return false;
            }
            reached = reached.max(p + window);
        }
        reached >= length
    }

    #[test]
    fn plan_reference_case() {
        let cfg = WindowConfig::new(518, 0.2).unwrap();
        assert_eq!(cfg.stride(), 414);
        let plan = cfg.plan(1000);
        assert_eq!(plan, vec![0, 414, 482]);
        assert_eq!(plan.last().unwrap() + 518, 1000);
        assert!(covers(&plan, 518, 1000));
    }

    #[test]
    fn plan_short_axis() {
        let cfg = WindowConfig::new(518, 0.2).unwrap();
        assert_eq!(cfg.plan(1), vec![0]);
        assert_eq!(cfg.plan(400), vec![0]);
        assert_eq!(cfg.plan(518), vec![0]);
    }

    #[test]
    fn plan_exact_fit_has_no_duplicate() {
        let cfg = WindowConfig::new(518, 0.2).unwrap();
        assert_eq!(cfg.plan(932), vec![0, 414]);
        let cfg = WindowConfig::new(100, 0.0).unwrap();
        assert_eq!(cfg.plan(300), vec![0, 100, 200]);
    }

    #[test]
    fn plan_invariants_hold() {
        for (window, overlap) in [(518, 0.2), (224, 0.5), (100, 0.0), (37, 0.9), (14, 0.3)] {
            let cfg = WindowConfig::new(window, overlap).unwrap();
            for length in window + 1..window * 6 {
                let plan = cfg.plan(length);
                assert_eq!(plan[0], 0);
                assert!(plan.windows(2).all(|w| w[0] < w[1]), "{plan:?}");
                assert!(plan.iter().all(|&p| p + window <= length));
                assert_eq!(plan.last().unwrap() + window, length);
                assert!(covers(&plan, window, length));
            }
        }
    }

    #[test]
    fn invalid_window_config() {
        assert!(WindowConfig::new(518, 1.0).is_err());
        assert!(WindowConfig::new(518, -0.1).is_err());
        assert!(WindowConfig::new(0, 0.2).is_err());
        assert!(WindowConfig::new(1, 0.5).is_err());
    }

    #[test]
    fn slice_grid_order_and_count() {
        let slicer = TileSlicer::new(WindowConfig::new(518, 0.2).unwrap(), PadMode::Replicate);
        let img = image(1000, 1000);
        let tiles = slicer.slice(&img).unwrap();
        assert_eq!(tiles.total(), 9);
        let tiles = tiles.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(tiles.len(), 9);
        let origins = tiles.iter().map(|t| (t.x, t.y)).collect::<Vec<_>>();
        assert_eq!(origins[..4], [(0, 0), (414, 0), (482, 0), (0, 414)]);
        for tile in &tiles {
            assert_eq!((tile.image.cols(), tile.image.rows()), (518, 518));
        }
    }

    #[test]
    fn small_image_is_single_uncropped_tile() {
        let slicer = TileSlicer::new(WindowConfig::new(518, 0.2).unwrap(), PadMode::Replicate);
        let img = image(300, 200);
        let tiles = slicer.slice(&img).unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!((tiles[0].image.cols(), tiles[0].image.rows()), (300, 200));
    }

    #[test]
    fn short_axis_is_padded() {
        let mut img = image(400, 1000);
        *img.at_2d_mut::<Vec3b>(0, 399).unwrap() = Vec3b::from([200, 100, 50]);

        let slicer = TileSlicer::new(WindowConfig::new(518, 0.2).unwrap(), PadMode::Replicate);
        let tiles = slicer.slice(&img).unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(tiles.len(), 3);
        let first = &tiles[0].image;
        assert_eq!((first.cols(), first.rows()), (518, 518));
        assert_eq!(*first.at_2d::<Vec3b>(0, 517).unwrap(), Vec3b::from([200, 100, 50]));

        let slicer = TileSlicer::new(WindowConfig::new(518, 0.2).unwrap(), PadMode::Constant);
        let tiles = slicer.slice(&img).unwrap().collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(*tiles[0].image.at_2d::<Vec3b>(0, 517).unwrap(), Vec3b::from([0, 0, 0]));
    }

    #[test]
    fn slice_is_restartable() {
        let slicer = TileSlicer::new(WindowConfig::new(100, 0.5).unwrap(), PadMode::Replicate);
        let img = image(250, 120);
        let origins = || {
            let tiles = slicer.slice(&img).unwrap();
            tiles.map(|t| t.map(|t| (t.x, t.y))).collect::<Result<Vec<_>>>().unwrap()
        };
        let (a, b) = (origins(), origins());
        assert_eq!(a, b);
        assert_eq!(a.len(), 4 * 2);
    }
}
