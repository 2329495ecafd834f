use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::Result;
use log::info;
use prometheus::*;

static METRIC_IMAGE_PROCESSED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("tilefuse_image_processed", "count of the images recorded").unwrap()
});

static METRIC_IMAGE_FAILED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("tilefuse_image_failed", "count of the images skipped by errors").unwrap()
});

static METRIC_TILE_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("tilefuse_tile_count", "count of the tiles sent to the embedder").unwrap()
});

static METRIC_IMAGE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "tilefuse_image_duration",
        "duration of the per-image extraction in seconds",
        exponential_buckets(0.05, 2.0, 12).unwrap()
    )
    .unwrap()
});

pub fn inc_image_processed(duration: f32) {
    METRIC_IMAGE_PROCESSED.inc();
    METRIC_IMAGE_DURATION.observe(duration as f64);
}

pub fn inc_image_failed() {
    METRIC_IMAGE_FAILED.inc();
}

pub fn inc_tile_count(n: usize) {
    METRIC_TILE_COUNT.inc_by(n as u64);
}

/// 将默认注册表中的全部指标推送到 push gateway
pub fn push(gateway: &str, job: &str) -> Result<()> {
    push_metrics(job, HashMap::<String, String>::new(), gateway, gather(), None)?;
    info!("已推送指标到 {}", gateway);
    Ok(())
}
