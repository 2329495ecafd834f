use std::path::PathBuf;

use anyhow::{Result, ensure};
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::Opts;
use crate::checkpoint::load_records;
use crate::cli::SubCommandExtend;
use crate::fusion;

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 特征向量文件
    pub input: PathBuf,
    /// 输出的 npy 文件，每行对应一条记录
    #[arg(default_value = "vectors.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let records = load_records(&self.input)?;
        ensure!(!records.is_empty(), "{} 中没有任何记录", self.input.display());

        let dimension = records[0].vector.len();
        ensure!(dimension > 0, "特征向量为空");
        let vectors = records.into_iter().map(|r| r.vector).collect::<Vec<_>>();
        let data = fusion::stack(&vectors, dimension)?;
        write_npy(&self.output, &data)?;
        info!("导出成功: {} x {} -> {}", data.nrows(), data.ncols(), self.output.display());
        Ok(())
    }
}
