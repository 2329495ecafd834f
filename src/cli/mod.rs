mod export;
mod extract;
mod thumb;

pub use export::*;
pub use extract::*;
pub use thumb::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
