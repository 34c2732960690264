//! Error types for stepper-flash

use thiserror::Error;

/// Errors that can occur while provisioning and flashing a board
#[derive(Error, Debug)]
pub enum FlashError {
    /// Toolchain binary not on PATH and not in the per-user install location
    #[error("arduino-cli not found")]
    ToolNotFound,

    /// Installer ran but the binary is still missing afterwards
    #[error("arduino-cli still not found after install")]
    ToolMissingAfterInstall,

    /// Installer script could not be downloaded
    #[error("Failed to download arduino-cli installer: {0}")]
    DownloadFailed(String),

    /// A toolchain, platform package or library failed to install
    #[error("Failed to install {0}")]
    InstallFailed(String),

    /// `board list` exited unsuccessfully
    #[error("Failed to list boards")]
    BoardListFailed,

    /// Board list output matched neither accepted JSON shape
    #[error("Failed to parse board list: {0}")]
    ParseFailed(String),

    /// No USB-serial device in the board list
    #[error("No ESP32 found on USB")]
    DeviceNotFound,

    /// Operator declined to supply a password
    #[error("No password provided for serial port permissions")]
    PasswordDeclined,

    /// Elevated permission fix failed
    #[error("Failed to fix serial port permissions (wrong password?)")]
    PermissionDenied,

    #[error("Compilation failed")]
    CompileFailed,

    #[error("Upload failed")]
    UploadFailed,

    /// Serial monitor produced no IP before the deadline
    #[error("timed out after {timeout_ms}ms waiting for IP on serial")]
    IpTimeout { timeout_ms: u64 },

    /// Serial monitor exited without ever printing an IP
    #[error("Serial closed without IP")]
    IpStreamClosed,

    /// Executable could not be located or started
    #[error("Failed to start {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    /// Flash request failed validation
    #[error("Invalid flash request: {0}")]
    InvalidRequest(String),

    /// HOME is not set
    #[error("HOME environment variable is not set")]
    MissingHome,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error (installer download)
    #[error("HTTP error: {0}")]
    Http(String),
}

impl FlashError {
    /// Whether this error ends a flash run.
    ///
    /// Only the serial IP watcher failures are recoverable: the firmware is
    /// already on the board and the operator can enter the address by hand.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, FlashError::IpTimeout { .. } | FlashError::IpStreamClosed)
    }

    pub(crate) fn spawn(program: impl Into<String>, err: std::io::Error) -> Self {
        FlashError::SpawnFailed {
            program: program.into(),
            reason: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for FlashError {
    fn from(err: reqwest::Error) -> Self {
        FlashError::Http(err.to_string())
    }
}

/// Result type for flash operations
pub type Result<T> = std::result::Result<T, FlashError>;
