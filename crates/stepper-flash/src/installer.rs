//! Toolchain installation via the vendor install script.

use crate::config::{path_arg, FlashConfig};
use crate::error::FlashError;
use crate::progress::LineSink;
use crate::runner::StreamingRunner;
use crate::Result;
use tokio::process::Command;
use tracing::{info, warn};

/// Download the install script over HTTPS.
pub async fn download_install_script(url: &str) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("stepper-flash/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FlashError::DownloadFailed(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FlashError::DownloadFailed(format!(
            "HTTP {} from {}",
            response.status(),
            url
        )));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| FlashError::DownloadFailed(e.to_string()))?;
    Ok(body.to_vec())
}

/// Run an install script through `sh`, installing into `~/.local/bin`.
///
/// The script is written to the shell's stdin, which is closed right after
/// the body so the shell terminates.
pub async fn run_install_script(config: &FlashConfig, script: Vec<u8>, sink: &LineSink) -> Result<()> {
    let bin_dir = config.user_bin_dir();
    tokio::fs::create_dir_all(&bin_dir).await?;

    sink.out("Running installer...");
    let mut cmd = Command::new("sh");
    cmd.env("BINDIR", path_arg(&bin_dir));

    if StreamingRunner::run_command(cmd, Some(script), sink).await? {
        info!(bin_dir = %bin_dir.display(), "Toolchain installed");
        Ok(())
    } else {
        Err(FlashError::InstallFailed(config.toolchain_binary.clone()))
    }
}

/// Download and run the toolchain installer.
///
/// A failed download short-circuits before anything is executed.
pub async fn install_toolchain(config: &FlashConfig, sink: &LineSink) -> Result<()> {
    sink.out(format!("Downloading {} installer...", config.toolchain_binary));

    let script = match download_install_script(&config.install_script_url).await {
        Ok(script) => script,
        Err(e) => {
            warn!(url = %config.install_script_url, error = %e, "Installer download failed");
            sink.err(format!("Failed to download {} installer", config.toolchain_binary));
            return Err(e);
        }
    };

    run_install_script(config, script, sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::LineOrigin;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_install_script_sees_bindir_and_eof() {
        let home = tempdir().unwrap();
        let config = FlashConfig::new(home.path());
        let (sink, mut rx) = LineSink::channel();

        // The trailing cat only returns once the pipe is closed. It runs last
        // because some shells read a piped script one byte at a time.
        let script = b"echo \"bindir=$BINDIR\"\necho done\nexec cat >/dev/null\n".to_vec();
        run_install_script(&config, script, &sink).await.expect("install failed");
        drop(sink);

        let mut lines = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.origin, LineOrigin::Out);
            lines.push(event.line);
        }
        assert_eq!(lines[0], "Running installer...");
        assert_eq!(lines[1], format!("bindir={}", config.user_bin_dir().display()));
        assert_eq!(lines[2], "done");
        assert!(config.user_bin_dir().is_dir());
    }

    #[tokio::test]
    async fn test_failing_install_script_is_install_failed() {
        let home = tempdir().unwrap();
        let config = FlashConfig::new(home.path());

        let err = run_install_script(&config, b"exit 4\n".to_vec(), &LineSink::discard())
            .await
            .unwrap_err();
        assert!(matches!(err, FlashError::InstallFailed(name) if name == "arduino-cli"));
    }

    #[tokio::test]
    async fn test_download_failure_short_circuits() {
        let home = tempdir().unwrap();
        let mut config = FlashConfig::new(home.path());
        config.install_script_url = "http://127.0.0.1:9/install.sh".to_string();

        let err = install_toolchain(&config, &LineSink::discard()).await.unwrap_err();
        assert!(matches!(err, FlashError::DownloadFailed(_)));
        assert!(!config.user_bin_dir().exists());
    }
}
