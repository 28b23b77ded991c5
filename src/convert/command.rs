//! Conversion toolkit backed by external commands, one per step.
//!
//! Each step is an argv template. Placeholders are substituted per argument:
//! `{source}`, `{work}`, `{output}`, `{dtype}`, `{platform}`,
//! `{optimization_level}` and `{quantize}`. A non-zero exit status fails the
//! step with that status as its code.

use super::{BuildOptions, BuiltModel, ConversionToolkit, LoadedModel};
use crate::error::{Error, PipelineStepKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Argv templates for the three steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepCommands {
    pub load: Vec<String>,
    pub build: Vec<String>,
    pub export: Vec<String>,
}

pub struct CommandToolkit {
    commands: StepCommands,
    work_dir: PathBuf,
}

impl CommandToolkit {
    /// Every step needs a command; `work_dir` is created by the load step.
    pub fn new(commands: StepCommands, work_dir: impl Into<PathBuf>) -> Result<Self> {
        for (step, argv) in [
            (PipelineStepKind::Load, &commands.load),
            (PipelineStepKind::Build, &commands.build),
            (PipelineStepKind::Export, &commands.export),
        ] {
            if argv.is_empty() {
                return Err(Error::Config(format!(
                    "no command configured for the {} step",
                    step
                )));
            }
        }

        Ok(Self {
            commands,
            work_dir: work_dir.into(),
        })
    }

    async fn run_step(
        &self,
        step: PipelineStepKind,
        argv: &[String],
        vars: &HashMap<&'static str, String>,
    ) -> Result<()> {
        let args: Vec<String> = argv.iter().map(|arg| substitute(arg, vars)).collect();
        let (program, rest) = match args.split_first() {
            Some(split) => split,
            None => {
                return Err(Error::Config(format!(
                    "no command configured for the {} step",
                    step
                )))
            }
        };

        info!("Running {} step: {}", step, args.join(" "));
        let output = Command::new(program)
            .args(rest)
            .current_dir(&self.work_dir)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            "{} step exited with {:?}, stdout_len={}, stderr_len={}",
            step,
            output.status.code(),
            stdout.len(),
            stderr.len()
        );

        if output.status.success() {
            return Ok(());
        }
        if !stderr.is_empty() {
            warn!("{} step stderr: {}", step, stderr.trim_end());
        }
        // Killed by a signal
        let code = output.status.code().unwrap_or(-1);
        Err(Error::PipelineStep { step, code })
    }

    fn vars(&self) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert("work", self.work_dir.display().to_string());
        vars
    }
}

/// Replace every `{name}` whose name is in `vars`; unknown braces are kept.
pub fn substitute(template: &str, vars: &HashMap<&'static str, String>) -> String {
    let mut result = template.to_string();
    for (name, value) in vars {
        result = result.replace(&format!("{{{}}}", name), value);
    }
    result
}

#[async_trait]
impl ConversionToolkit for CommandToolkit {
    async fn load(&self, source: &Path) -> Result<LoadedModel> {
        tokio::fs::create_dir_all(&self.work_dir).await?;

        let mut vars = self.vars();
        vars.insert("source", source.display().to_string());
        self.run_step(PipelineStepKind::Load, &self.commands.load, &vars)
            .await?;

        Ok(LoadedModel {
            source: source.to_path_buf(),
            work_dir: self.work_dir.clone(),
        })
    }

    async fn build(&self, model: LoadedModel, options: &BuildOptions) -> Result<BuiltModel> {
        let mut vars = self.vars();
        vars.insert("source", model.source.display().to_string());
        vars.insert("dtype", options.quantized_dtype.clone());
        vars.insert("platform", options.target_platform.as_str().to_string());
        vars.insert("optimization_level", options.optimization_level.to_string());
        vars.insert("quantize", options.do_quantization.to_string());
        self.run_step(PipelineStepKind::Build, &self.commands.build, &vars)
            .await?;

        Ok(BuiltModel {
            model,
            options: options.clone(),
        })
    }

    async fn export(&self, build: &BuiltModel, output: &Path) -> Result<()> {
        let mut vars = self.vars();
        vars.insert("source", build.model.source.display().to_string());
        vars.insert("platform", build.options.target_platform.as_str().to_string());
        vars.insert("output", output.display().to_string());
        self.run_step(PipelineStepKind::Export, &self.commands.export, &vars)
            .await
    }
}
