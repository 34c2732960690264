//! Locating the board-management toolchain binary.

use crate::config::FlashConfig;
use crate::runner::ProcessRunner;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A located toolchain binary.
///
/// Threaded explicitly through every stage that invokes the toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainHandle {
    pub binary: PathBuf,
}

impl ToolchainHandle {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

/// Installation status reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainStatus {
    pub installed: bool,
    pub version: String,
    pub binary: String,
}

/// Find the toolchain on PATH, then under `~/.local/bin`.
///
/// Absence is not an error; it is what triggers installation.
pub async fn locate_toolchain(config: &FlashConfig) -> Result<Option<ToolchainHandle>> {
    match ProcessRunner::run("which", [&config.toolchain_binary]).await {
        Ok(outcome) if outcome.succeeded => {
            let path = outcome.stdout.trim();
            if !path.is_empty() {
                debug!(binary = %path, "Toolchain found on PATH");
                return Ok(Some(ToolchainHandle::new(path)));
            }
        }
        Ok(_) => {}
        Err(e) => debug!(error = %e, "PATH lookup unavailable"),
    }

    let fallback = config.user_toolchain_path();
    if tokio::fs::metadata(&fallback).await.is_ok() {
        debug!(binary = %fallback.display(), "Toolchain found in user bin dir");
        return Ok(Some(ToolchainHandle::new(fallback)));
    }

    info!(binary = %config.toolchain_binary, "Toolchain not found");
    Ok(None)
}

/// Report whether the toolchain is installed and which version.
pub async fn toolchain_status(config: &FlashConfig) -> Result<ToolchainStatus> {
    let Some(handle) = locate_toolchain(config).await? else {
        return Ok(ToolchainStatus {
            installed: false,
            version: String::new(),
            binary: String::new(),
        });
    };

    let outcome = ProcessRunner::run(handle.binary(), ["version"]).await?;
    Ok(ToolchainStatus {
        installed: true,
        version: outcome.stdout.trim().to_string(),
        binary: handle.binary().to_string_lossy().into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn install_fake(config: &FlashConfig, body: &str) -> PathBuf {
        let path = config.user_toolchain_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_locate_absent_is_none() {
        let home = tempdir().unwrap();
        let config =
            FlashConfig::new(home.path()).with_toolchain_binary("stepflash-missing-toolchain");
        assert!(locate_toolchain(&config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locate_falls_back_to_user_bin() {
        let home = tempdir().unwrap();
        let config =
            FlashConfig::new(home.path()).with_toolchain_binary("stepflash-fallback-toolchain");
        let path = install_fake(&config, "exit 0");

        let handle = locate_toolchain(&config).await.unwrap().expect("should locate");
        assert_eq!(handle.binary(), path.as_path());
    }

    #[tokio::test]
    async fn test_status_reports_version() {
        let home = tempdir().unwrap();
        let config =
            FlashConfig::new(home.path()).with_toolchain_binary("stepflash-status-toolchain");
        install_fake(&config, "echo 'Version: 1.2.3'");

        let status = toolchain_status(&config).await.unwrap();
        assert!(status.installed);
        assert_eq!(status.version, "Version: 1.2.3");
        assert!(status.binary.ends_with("stepflash-status-toolchain"));
    }

    #[tokio::test]
    async fn test_status_not_installed() {
        let home = tempdir().unwrap();
        let config =
            FlashConfig::new(home.path()).with_toolchain_binary("stepflash-absent-toolchain");
        let status = toolchain_status(&config).await.unwrap();
        assert!(!status.installed);
        assert!(status.version.is_empty());
    }
}
