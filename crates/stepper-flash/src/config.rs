//! Flash pipeline configuration
//!
//! Every value the toolchain contract depends on (board qualifier, baud rate,
//! library names, ...) lives here so that embedders and tests can override
//! them without touching the pipeline code.

use crate::error::FlashError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Board qualifier for compile and upload.
pub const DEFAULT_FQBN: &str = "esp32:esp32:esp32s3";

/// Platform support package installed by `core install`.
pub const DEFAULT_PLATFORM: &str = "esp32:esp32";

/// Serial console baud rate of the firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Toolchain binary name.
pub const DEFAULT_TOOLCHAIN_BINARY: &str = "arduino-cli";

/// Vendor install script.
pub const DEFAULT_INSTALL_SCRIPT_URL: &str =
    "https://raw.githubusercontent.com/arduino/arduino-cli/master/install.sh";

/// Working directory the rendered sketch is written to.
pub const DEFAULT_WORK_DIR: &str = "/tmp/stepper_websocket";

/// Sketch file name; must match the working directory name for the toolchain.
pub const DEFAULT_SKETCH_NAME: &str = "stepper_websocket.ino";

/// Libraries that shadow the ones installed below and break compilation.
pub const CONFLICTING_LIBRARIES: [&str; 3] = ["ESPAsyncWebServer", "AsyncTCP", "ESPAsyncTCP"];

/// Libraries installed with `lib install`, in order.
pub const REQUIRED_LIBRARIES: [&str; 2] = ["ESP Async WebServer", "ArduinoJson"];

/// How long the serial watcher waits for the device to report its IP.
pub const DEFAULT_IP_TIMEOUT_MS: u64 = 30_000;

/// Flash pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Per-user home directory (install location and library folder)
    pub home_dir: PathBuf,
    /// Toolchain binary name looked up on PATH and under `~/.local/bin`
    pub toolchain_binary: String,
    /// URL of the toolchain install script
    pub install_script_url: String,
    /// Board qualifier passed as `--fqbn`
    pub fqbn: String,
    /// Platform package installed by `core install`
    pub platform: String,
    /// Serial monitor baud rate
    pub baud_rate: u32,
    /// Firmware template with `{{...}}` placeholders
    pub template_path: PathBuf,
    /// Directory the rendered sketch is written into
    pub work_dir: PathBuf,
    /// Sketch file name inside `work_dir`
    pub sketch_name: String,
    /// Library directories removed before installing libraries
    pub conflicting_libraries: Vec<String>,
    /// Libraries installed with `lib install`
    pub required_libraries: Vec<String>,
    /// Deadline for serial IP discovery, in milliseconds
    pub ip_timeout_ms: u64,
    /// Elevated command fixing port permissions; the port is appended
    pub elevate_command: Vec<String>,
}

impl FlashConfig {
    /// Create a config with default constants rooted at `home_dir`.
    ///
    /// The template defaults to `stepper_websocket.ino` in the current
    /// directory.
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        FlashConfig {
            home_dir: home_dir.into(),
            toolchain_binary: DEFAULT_TOOLCHAIN_BINARY.to_string(),
            install_script_url: DEFAULT_INSTALL_SCRIPT_URL.to_string(),
            fqbn: DEFAULT_FQBN.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            template_path: PathBuf::from(DEFAULT_SKETCH_NAME),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            sketch_name: DEFAULT_SKETCH_NAME.to_string(),
            conflicting_libraries: CONFLICTING_LIBRARIES.iter().map(|s| s.to_string()).collect(),
            required_libraries: REQUIRED_LIBRARIES.iter().map(|s| s.to_string()).collect(),
            ip_timeout_ms: DEFAULT_IP_TIMEOUT_MS,
            elevate_command: vec![
                "sudo".to_string(),
                "-S".to_string(),
                "chmod".to_string(),
                "666".to_string(),
            ],
        }
    }

    /// Create a config from environment variables.
    ///
    /// `HOME` is required. Optional overrides:
    /// `STEPFLASH_TEMPLATE`, `STEPFLASH_WORK_DIR`, `STEPFLASH_IP_TIMEOUT_SECS`,
    /// `STEPFLASH_INSTALL_URL`.
    pub fn from_env() -> Result<Self> {
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .ok_or(FlashError::MissingHome)?;

        let mut config = FlashConfig::new(home);

        if let Ok(template) = std::env::var("STEPFLASH_TEMPLATE") {
            config.template_path = PathBuf::from(template);
        }
        if let Ok(work_dir) = std::env::var("STEPFLASH_WORK_DIR") {
            config.work_dir = PathBuf::from(work_dir);
        }
        if let Ok(secs) = std::env::var("STEPFLASH_IP_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                config.ip_timeout_ms = secs.saturating_mul(1000);
            }
        }
        if let Ok(url) = std::env::var("STEPFLASH_INSTALL_URL") {
            config.install_script_url = url;
        }

        Ok(config)
    }

    /// Set the firmware template path
    pub fn with_template(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = path.into();
        self
    }

    /// Set the working directory
    pub fn with_work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_dir = path.into();
        self
    }

    /// Set the toolchain binary name
    pub fn with_toolchain_binary(mut self, name: &str) -> Self {
        self.toolchain_binary = name.to_string();
        self
    }

    /// Set the serial IP deadline
    pub fn with_ip_timeout(mut self, timeout: Duration) -> Self {
        self.ip_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the elevated permission command
    pub fn with_elevate_command(mut self, command: Vec<String>) -> Self {
        self.elevate_command = command;
        self
    }

    /// Per-user install location of the toolchain, `~/.local/bin`
    pub fn user_bin_dir(&self) -> PathBuf {
        self.home_dir.join(".local").join("bin")
    }

    /// Toolchain path inside the per-user install location
    pub fn user_toolchain_path(&self) -> PathBuf {
        self.user_bin_dir().join(&self.toolchain_binary)
    }

    /// User library folder, `~/Arduino/libraries`
    pub fn library_dir(&self) -> PathBuf {
        self.home_dir.join("Arduino").join("libraries")
    }

    /// Path of the rendered sketch
    pub fn sketch_path(&self) -> PathBuf {
        self.work_dir.join(&self.sketch_name)
    }

    /// Serial IP deadline
    pub fn ip_timeout(&self) -> Duration {
        Duration::from_millis(self.ip_timeout_ms)
    }

    pub(crate) fn work_dir_arg(&self) -> String {
        path_arg(&self.work_dir)
    }
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
