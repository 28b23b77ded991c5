//! Model conversion pipeline: load a source model, build (optionally
//! quantize) it for a target platform, and export the result.

pub mod command;

pub use command::{CommandToolkit, StepCommands};

use crate::engine::TargetPlatform;
use crate::error::{Error, PipelineStepKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Options for the build step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub do_quantization: bool,
    pub optimization_level: u8,
    pub quantized_dtype: String,
    pub target_platform: TargetPlatform,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            do_quantization: true,
            optimization_level: 1,
            quantized_dtype: "w8a8".to_string(),
            target_platform: TargetPlatform::Rk3588,
        }
    }
}

/// A source model staged by the load step
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedModel {
    pub source: PathBuf,
    pub work_dir: PathBuf,
}

/// A built model ready for export
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltModel {
    pub model: LoadedModel,
    pub options: BuildOptions,
}

/// The three conversion steps. A step fails with
/// [`Error::PipelineStep`] carrying its status code; any other error is
/// reported as a failure of that step with code 1.
#[async_trait]
pub trait ConversionToolkit: Send + Sync {
    async fn load(&self, source: &Path) -> Result<LoadedModel>;

    async fn build(&self, model: LoadedModel, options: &BuildOptions) -> Result<BuiltModel>;

    async fn export(&self, build: &BuiltModel, output: &Path) -> Result<()>;
}

fn step_failure(step: PipelineStepKind, err: Error) -> Error {
    let code = match err {
        Error::PipelineStep { code, .. } => code,
        ref other => {
            error!("{} step error: {}", step, other);
            other.exit_code()
        }
    };
    error!("Conversion aborted: {} step failed with code {}", step, code);
    Error::PipelineStep { step, code }
}

/// Run load, build and export in order, stopping at the first failing step.
pub async fn run_pipeline(
    toolkit: &dyn ConversionToolkit,
    source: &Path,
    options: &BuildOptions,
    output: &Path,
) -> Result<()> {
    info!("Loading {}", source.display());
    let model = toolkit
        .load(source)
        .await
        .map_err(|e| step_failure(PipelineStepKind::Load, e))?;

    info!(
        "Building for {} (quantize: {}, dtype: {}, optimization level: {})",
        options.target_platform.as_str(),
        options.do_quantization,
        options.quantized_dtype,
        options.optimization_level
    );
    let build = toolkit
        .build(model, options)
        .await
        .map_err(|e| step_failure(PipelineStepKind::Build, e))?;

    info!("Exporting to {}", output.display());
    toolkit
        .export(&build, output)
        .await
        .map_err(|e| step_failure(PipelineStepKind::Export, e))?;

    info!("Conversion finished: {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingToolkit {
        fail_at: Option<(PipelineStepKind, i32)>,
        calls: Mutex<Vec<PipelineStepKind>>,
    }

    impl RecordingToolkit {
        fn step(&self, step: PipelineStepKind) -> Result<()> {
            self.calls.lock().push(step);
            match self.fail_at {
                Some((at, code)) if at == step => Err(Error::PipelineStep { step, code }),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl ConversionToolkit for RecordingToolkit {
        async fn load(&self, source: &Path) -> Result<LoadedModel> {
            self.step(PipelineStepKind::Load)?;
            Ok(LoadedModel {
                source: source.to_path_buf(),
                work_dir: PathBuf::from("/tmp/work"),
            })
        }

        async fn build(&self, model: LoadedModel, options: &BuildOptions) -> Result<BuiltModel> {
            self.step(PipelineStepKind::Build)?;
            Ok(BuiltModel {
                model,
                options: options.clone(),
            })
        }

        async fn export(&self, _build: &BuiltModel, _output: &Path) -> Result<()> {
            self.step(PipelineStepKind::Export)
        }
    }

    #[tokio::test]
    async fn test_pipeline_runs_all_steps() {
        let toolkit = RecordingToolkit::default();
        run_pipeline(
            &toolkit,
            Path::new("Phi-3-mini"),
            &BuildOptions::default(),
            Path::new("out.rkllm"),
        )
        .await
        .unwrap();

        assert_eq!(
            *toolkit.calls.lock(),
            vec![
                PipelineStepKind::Load,
                PipelineStepKind::Build,
                PipelineStepKind::Export
            ]
        );
    }

    #[tokio::test]
    async fn test_pipeline_aborts_at_failing_step() {
        let toolkit = RecordingToolkit {
            fail_at: Some((PipelineStepKind::Build, 3)),
            ..Default::default()
        };
        let err = run_pipeline(
            &toolkit,
            Path::new("Phi-3-mini"),
            &BuildOptions::default(),
            Path::new("out.rkllm"),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            Error::PipelineStep {
                step: PipelineStepKind::Build,
                code: 3
            }
        ));
        assert_eq!(err.exit_code(), 3);
        assert!(!toolkit.calls.lock().contains(&PipelineStepKind::Export));
    }

    #[test]
    fn test_build_option_defaults() {
        let options = BuildOptions::default();
        assert!(options.do_quantization);
        assert_eq!(options.optimization_level, 1);
        assert_eq!(options.quantized_dtype, "w8a8");
        assert_eq!(options.target_platform, TargetPlatform::Rk3588);
    }
}
