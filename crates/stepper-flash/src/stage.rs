//! Toolchain subcommands and the compile/upload stage.

use crate::config::FlashConfig;
use crate::error::FlashError;
use crate::progress::LineSink;
use crate::runner::StreamingRunner;
use crate::toolchain::ToolchainHandle;
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Toolchain invocations that build and deploy firmware.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainCommand {
    /// compile --fqbn <fqbn> <sketch dir>
    Compile { fqbn: String, sketch_dir: String },

    /// upload --fqbn <fqbn> -p <port> <sketch dir>
    Upload {
        fqbn: String,
        port: String,
        sketch_dir: String,
    },

    /// monitor -p <port> --raw -c baudrate=<baud>
    Monitor { port: String, baud_rate: u32 },
}

impl ToolchainCommand {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ToolchainCommand::Compile { .. } => "compile",
            ToolchainCommand::Upload { .. } => "upload",
            ToolchainCommand::Monitor { .. } => "monitor",
        }
    }

    /// Argument vector passed to the toolchain binary.
    pub fn args(&self) -> Vec<String> {
        match self {
            ToolchainCommand::Compile { fqbn, sketch_dir } => {
                vec!["compile".to_string(), "--fqbn".to_string(), fqbn.clone(), sketch_dir.clone()]
            }
            ToolchainCommand::Upload {
                fqbn,
                port,
                sketch_dir,
            } => vec![
                "upload".to_string(),
                "--fqbn".to_string(),
                fqbn.clone(),
                "-p".to_string(),
                port.clone(),
                sketch_dir.clone(),
            ],
            ToolchainCommand::Monitor { port, baud_rate } => vec![
                "monitor".to_string(),
                "-p".to_string(),
                port.clone(),
                "--raw".to_string(),
                "-c".to_string(),
                format!("baudrate={}", baud_rate),
            ],
        }
    }
}

/// Compile the sketch in the configured working directory.
pub async fn compile(handle: &ToolchainHandle, config: &FlashConfig, sink: &LineSink) -> Result<()> {
    let command = ToolchainCommand::Compile {
        fqbn: config.fqbn.clone(),
        sketch_dir: config.work_dir_arg(),
    };
    info!(stage = command.name(), fqbn = %config.fqbn, "Compiling firmware");

    if StreamingRunner::run(handle.binary(), command.args(), sink).await? {
        Ok(())
    } else {
        Err(FlashError::CompileFailed)
    }
}

/// Upload the compiled sketch to the board on `port`.
pub async fn upload(
    handle: &ToolchainHandle,
    config: &FlashConfig,
    port: &str,
    sink: &LineSink,
) -> Result<()> {
    let command = ToolchainCommand::Upload {
        fqbn: config.fqbn.clone(),
        port: port.to_string(),
        sketch_dir: config.work_dir_arg(),
    };
    info!(stage = command.name(), port = %port, "Uploading firmware");

    if StreamingRunner::run(handle.binary(), command.args(), sink).await? {
        Ok(())
    } else {
        Err(FlashError::UploadFailed)
    }
}
