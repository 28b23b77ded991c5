use crate::convert::BuildOptions;
use crate::engine::TargetPlatform;
use clap::Args;
use std::path::PathBuf;

/// Convert a source model into the on-device format
#[derive(Debug, Args)]
pub struct ConvertCommand {
    /// Source model (e.g. a Hugging Face checkout)
    pub source: PathBuf,

    /// Where to write the converted model
    #[arg(short, long)]
    pub output: PathBuf,

    /// Target platform (rk3588, rk3576)
    #[arg(long = "target-platform")]
    pub target_platform: Option<TargetPlatform>,

    /// Quantized data type
    #[arg(long)]
    pub dtype: Option<String>,

    #[arg(long = "optimization-level")]
    pub optimization_level: Option<u8>,

    /// Skip quantization
    #[arg(long = "no-quantization")]
    pub no_quantization: bool,

    /// Scratch directory for intermediate artifacts
    #[arg(long = "work-dir")]
    pub work_dir: Option<PathBuf>,
}

impl ConvertCommand {
    pub fn build_options(&self, base: &BuildOptions) -> BuildOptions {
        let mut options = base.clone();
        if let Some(platform) = self.target_platform {
            options.target_platform = platform;
        }
        if let Some(ref dtype) = self.dtype {
            options.quantized_dtype = dtype.clone();
        }
        if let Some(level) = self.optimization_level {
            options.optimization_level = level;
        }
        if self.no_quantization {
            options.do_quantization = false;
        }
        options
    }
}
