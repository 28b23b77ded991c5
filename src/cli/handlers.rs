//! Subcommand handlers

use super::commands::{ChatCommand, ConvertCommand, ModelsCommand, ServerCommand};
use crate::bridge::{ChatBridge, Frame, InferenceWorker, RunStatus};
use crate::catalog;
use crate::config::{EdgeChatConfig, ResolvedModel, ServerConfigBuilder};
use crate::convert::{run_pipeline, CommandToolkit};
use crate::engine::loader_for;
use crate::server::{self, ServerState};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tracing::{info, warn};

/// Raise the open-file limit, keeping whatever the system grants
pub fn raise_nofile_limit(limit: u64) {
    match rlimit::increase_nofile_limit(limit) {
        Ok(granted) if granted < limit => {
            warn!("Open-file limit raised to {} (requested {})", granted, limit)
        }
        Ok(granted) => info!("Open-file limit set to {}", granted),
        Err(e) => warn!("Failed to raise open-file limit: {}", e),
    }
}

/// Resolve the model and start the engine per configuration
pub fn build_bridge(
    config: &EdgeChatConfig,
    memory: Option<usize>,
) -> Result<(ChatBridge, ResolvedModel)> {
    let resolved = config.resolve_model()?;
    let loader = loader_for(config.engine.backend)?;

    info!(
        "Model '{}' on {} ({} NPU cores, {:?} engine)",
        resolved.name,
        config.engine.target_platform.as_str(),
        resolved.engine.npu_cores,
        config.engine.lifetime
    );
    let worker = InferenceWorker::new(
        Arc::from(loader),
        resolved.engine.clone(),
        config.engine.lifetime,
        resolved.template.clone(),
    )
    .context("Failed to initialize the inference engine")?
    .with_error_text(config.engine.error_text.as_str());

    let mut bridge = ChatBridge::new(worker).with_poll_interval(config.server.poll_interval());
    if let Some(capacity) = memory {
        bridge = bridge.with_memory(capacity);
    }
    Ok((bridge, resolved))
}

pub async fn handle_serve(mut config: EdgeChatConfig, cmd: ServerCommand) -> Result<()> {
    cmd.engine.apply_to(&mut config);
    config.server = cmd
        .server
        .apply_to_builder(ServerConfigBuilder::from_config(config.server).from_env())
        .build();
    if cmd.memory {
        config.memory.enabled = true;
    }

    raise_nofile_limit(config.server.nofile_limit);

    let memory = config.memory.enabled.then_some(config.memory.capacity);
    let (bridge, resolved) = build_bridge(&config, memory)?;

    let mut state = ServerState::new(bridge, resolved.name, config.server.clone());
    if let Some(catalog) = config.load_catalog()? {
        state = state.with_catalog(catalog);
    }
    if let Some(dir) = &config.catalog.models_dir {
        state = state.with_models_dir(dir.clone());
    }

    server::start_server(state, server::shutdown_signal()).await?;
    info!("Inference engine released");
    Ok(())
}

/// Interactive chat until `exit`, `quit` or end of input
pub async fn handle_chat(mut config: EdgeChatConfig, cmd: ChatCommand) -> Result<()> {
    cmd.engine.apply_to(&mut config);
    let memory = (!cmd.no_memory).then_some(config.memory.capacity);
    let (bridge, resolved) = build_bridge(&config, memory)?;

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(
            format!(
                "edgechat: chatting with {}. Type 'exit' or 'quit' to leave, 'clear' to forget the conversation.\n",
                resolved.name
            )
            .as_bytes(),
        )
        .await?;

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    loop {
        stdout.write_all(b"\nuser: ").await?;
        stdout.flush().await?;

        let line = match lines.next().await {
            Some(line) => line.context("Failed to read from stdin")?,
            None => break,
        };
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "clear" => {
                bridge.clear_memory();
                continue;
            }
            _ => {}
        }

        stdout.write_all(b"robot: ").await?;
        let mut frames = bridge.stream(input)?;
        while let Some(frame) = frames.next().await {
            match frame {
                Frame::Delta(fragment) => {
                    stdout.write_all(fragment.text.as_bytes()).await?;
                    stdout.flush().await?;
                }
                Frame::Done(RunStatus::Error) => warn!("Run ended with an engine error"),
                Frame::Done(_) => {}
            }
        }
        stdout.write_all(b"\n").await?;
    }

    stdout.flush().await?;
    drop(bridge);
    info!("Inference engine released");
    Ok(())
}

/// Run the conversion pipeline; a failing step surfaces as
/// [`crate::Error::PipelineStep`] so the caller can exit with its code.
pub async fn handle_convert(config: EdgeChatConfig, cmd: ConvertCommand) -> Result<()> {
    let options = cmd.build_options(&config.convert.options);
    let work_dir = cmd
        .work_dir
        .clone()
        .unwrap_or_else(|| config.convert.work_dir.clone());

    let toolkit = CommandToolkit::new(config.convert.commands.clone(), work_dir)?;
    run_pipeline(&toolkit, &cmd.source, &options, &cmd.output).await?;
    Ok(())
}

pub async fn handle_models(mut config: EdgeChatConfig, cmd: ModelsCommand) -> Result<()> {
    if let Some(path) = cmd.catalog {
        config.catalog.path = Some(path);
    }
    let dir = cmd.dir.or_else(|| config.catalog.models_dir.clone());

    if let Some(catalog) = config.load_catalog()? {
        println!("Catalog models:");
        for name in catalog.model_names() {
            match catalog.resolve(name) {
                Ok(profile) => match profile.family {
                    Some(family) => println!("  {} ({})", name, family),
                    None => println!("  {}", name),
                },
                Err(e) => println!("  {} (unusable: {})", name, e),
            }
        }
    }

    if let Some(dir) = dir {
        let names = catalog::list_models(&dir)
            .with_context(|| format!("Failed to list {}", dir.display()))?;
        println!("Models in {}:", dir.display());
        for name in names {
            println!("  {}", name);
        }
    }
    Ok(())
}
