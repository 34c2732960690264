//! stepper-flash - firmware provisioning for ESP32 stepper controllers
//!
//! Drives the board-management toolchain (`arduino-cli`) through the whole
//! flash cycle:
//! - locate or install the toolchain
//! - install the ESP32 platform package and libraries
//! - render the firmware template with WiFi credentials and motor pins
//! - fix serial port permissions with an elevated command
//! - compile, upload, and read the device's IP from its serial console
//!
//! Every stage streams its process output as [`LineEvent`]s so an operator
//! sees progress live.

pub mod board;
pub mod config;
pub mod deps;
pub mod error;
pub mod firmware;
pub mod installer;
pub mod permissions;
pub mod pipeline;
pub mod progress;
pub mod runner;
pub mod serial;
pub mod stage;
pub mod telemetry;
pub mod toolchain;

// Re-export key types
pub use board::{detect_board, detect_board_with, parse_board_list, BoardDetection, BoardList};
pub use config::FlashConfig;
pub use deps::install_dependencies;
pub use error::{FlashError, Result};
pub use firmware::{render_firmware, render_to_work_dir, PinAssignment, RenderedFirmware};
pub use installer::install_toolchain;
pub use permissions::{ensure_port_accessible, NoPassword, PasswordRequest, StaticPassword};
pub use pipeline::{FlashPipeline, FlashRequest, FlashResult, FlashStage};
pub use progress::{LineEvent, LineOrigin, LineSink};
pub use runner::{CommandOutcome, ProcessRunner, StreamingRunner};
pub use serial::{find_ip, watch_for_ip};
pub use stage::{compile, upload, ToolchainCommand};
pub use telemetry::init_tracing;
pub use toolchain::{locate_toolchain, toolchain_status, ToolchainHandle, ToolchainStatus};

/// stepper-flash version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
