//! Platform package and library installation.

use crate::config::FlashConfig;
use crate::error::FlashError;
use crate::progress::LineSink;
use crate::runner::StreamingRunner;
use crate::toolchain::ToolchainHandle;
use crate::Result;
use std::path::Path;
use tracing::{debug, info};

/// Bring the toolchain's platform package and libraries up to date.
///
/// Steps run in order and each one gates the next:
/// 1. `core update-index`
/// 2. `core install <platform>`
/// 3. remove conflicting library directories (best effort)
/// 4. `lib install <name>` for every required library
pub async fn install_dependencies(
    handle: &ToolchainHandle,
    config: &FlashConfig,
    sink: &LineSink,
) -> Result<()> {
    sink.out("Updating arduino-cli core index...");
    if !StreamingRunner::run(handle.binary(), ["core", "update-index"], sink).await? {
        return Err(FlashError::InstallFailed("core index".to_string()));
    }

    sink.out("Installing ESP32 board package (this may take a few minutes)...");
    let args = ["core", "install", config.platform.as_str()];
    if !StreamingRunner::run(handle.binary(), args, sink).await? {
        return Err(FlashError::InstallFailed(config.platform.clone()));
    }

    remove_conflicting_libraries(&config.library_dir(), &config.conflicting_libraries, sink).await;

    for library in &config.required_libraries {
        sink.out(format!("Installing {}...", library));
        let args = ["lib", "install", library.as_str()];
        if !StreamingRunner::run(handle.binary(), args, sink).await? {
            sink.err(format!("Failed to install {}", library));
            return Err(FlashError::InstallFailed(library.clone()));
        }
    }

    info!("Dependencies installed");
    Ok(())
}

/// Delete stale library directories that shadow the required libraries.
///
/// Missing directories are skipped silently. Returns the names removed.
pub async fn remove_conflicting_libraries(
    library_dir: &Path,
    names: &[String],
    sink: &LineSink,
) -> Vec<String> {
    let mut removed = Vec::new();
    for name in names {
        let path = library_dir.join(name);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                sink.out(format!("Removed old conflicting library: {}", name));
                removed.push(name.clone());
            }
            Err(e) => debug!(library = %name, error = %e, "Conflicting library not removed"),
        }
    }
    removed
}
