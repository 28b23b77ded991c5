use clap::Args;
use std::path::PathBuf;

/// List catalog entries and converted models
#[derive(Debug, Args)]
pub struct ModelsCommand {
    /// Directory to scan, overriding catalog.models_dir
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Catalog (JSON), overriding catalog.path
    #[arg(long)]
    pub catalog: Option<PathBuf>,
}
