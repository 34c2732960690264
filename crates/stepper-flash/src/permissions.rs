//! Serial port access and interactive permission repair.

use crate::error::FlashError;
use crate::progress::LineSink;
use crate::runner::StreamingRunner;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{info, warn};

/// One-shot source of the elevation password.
///
/// Returning `None` or an empty string means the operator declined.
#[async_trait]
pub trait PasswordRequest: Send + Sync {
    async fn request_password(&self, port: &str) -> Option<String>;
}

/// Never supplies a password. For non-interactive callers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPassword;

#[async_trait]
impl PasswordRequest for NoPassword {
    async fn request_password(&self, _port: &str) -> Option<String> {
        None
    }
}

/// Supplies a fixed password.
#[derive(Clone)]
pub struct StaticPassword(pub String);

impl std::fmt::Debug for StaticPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticPassword(***)")
    }
}

#[async_trait]
impl PasswordRequest for StaticPassword {
    async fn request_password(&self, _port: &str) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Whether the port can be opened for reading right now.
pub async fn can_open(port: &str) -> bool {
    tokio::fs::OpenOptions::new()
        .read(true)
        .open(Path::new(port))
        .await
        .is_ok()
}

/// Make sure `port` is readable, fixing permissions with an elevated command
/// if needed.
///
/// `elevate_command` gets the port appended and receives `password + "\n"` on
/// stdin, which is closed right after.
pub async fn ensure_port_accessible(
    port: &str,
    elevate_command: &[String],
    password: &dyn PasswordRequest,
    sink: &LineSink,
) -> Result<()> {
    if can_open(port).await {
        return Ok(());
    }
    info!(port = %port, "Serial port not accessible");

    sink.out(format!(
        "Need permission to access {}. Please enter your sudo password.",
        port
    ));

    let secret = match password.request_password(port).await {
        Some(secret) if !secret.is_empty() => secret,
        _ => return Err(FlashError::PasswordDeclined),
    };

    let (program, args) = elevate_command
        .split_first()
        .ok_or_else(|| FlashError::InvalidRequest("empty elevate command".to_string()))?;
    let mut cmd = Command::new(program);
    cmd.args(args).arg(port);

    let mut input = secret.into_bytes();
    input.push(b'\n');

    if !StreamingRunner::run_command(cmd, Some(input), sink).await? {
        warn!(port = %port, "Permission fix failed");
        return Err(FlashError::PermissionDenied);
    }

    sink.out(format!("Permissions fixed on {}.", port));
    Ok(())
}
