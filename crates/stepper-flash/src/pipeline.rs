//! Flash pipeline orchestration.
//!
//! Runs the stages strictly in sequence:
//!
//! `ValidateRequest → LocateToolchain → [InstallToolchain] → InstallDependencies → RenderFirmware
//!  → EnsurePortAccess → Compile → Upload → WatchForIp → Done`
//!
//! The first failing stage ends the run, except `WatchForIp`: once the upload
//! went through, a missing IP still counts as success with an empty address.

use crate::config::FlashConfig;
use crate::deps::install_dependencies;
use crate::error::FlashError;
use crate::firmware::{render_to_work_dir, PinAssignment};
use crate::installer::install_toolchain;
use crate::permissions::{ensure_port_accessible, PasswordRequest};
use crate::progress::LineSink;
use crate::serial::watch_with_config;
use crate::stage::{compile, upload};
use crate::toolchain::{locate_toolchain, ToolchainHandle};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// What the caller wants flashed.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashRequest {
    pub serial_port: String,
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub pin_assignments: Vec<PinAssignment>,
}

impl fmt::Debug for FlashRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlashRequest")
            .field("serial_port", &self.serial_port)
            .field("wifi_ssid", &self.wifi_ssid)
            .field("wifi_password", &"***")
            .field("pin_assignments", &self.pin_assignments)
            .finish()
    }
}

impl FlashRequest {
    /// Reject requests that would only fail halfway through the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.serial_port.trim().is_empty() {
            return Err(FlashError::InvalidRequest("serial port is empty".to_string()));
        }
        if self.wifi_ssid.is_empty() {
            return Err(FlashError::InvalidRequest("WiFi SSID is empty".to_string()));
        }
        if self.wifi_password.is_empty() {
            return Err(FlashError::InvalidRequest("WiFi password is empty".to_string()));
        }
        if self.pin_assignments.is_empty() {
            return Err(FlashError::InvalidRequest("no motor pin assignments".to_string()));
        }
        Ok(())
    }
}

/// Terminal outcome of one flash run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlashResult {
    /// Run ID, also recorded on the tracing span.
    pub run_id: String,

    /// Whether the firmware was uploaded.
    pub succeeded: bool,

    /// Address reported on serial; empty if it could not be determined.
    pub device_ip: String,

    /// Failure message; empty on success.
    pub error_message: String,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl FlashResult {
    fn success(run_id: &str, device_ip: String, duration_ms: u64) -> Self {
        FlashResult {
            run_id: run_id.to_string(),
            succeeded: true,
            device_ip,
            error_message: String::new(),
            duration_ms,
        }
    }

    fn failure(run_id: &str, err: &FlashError, duration_ms: u64) -> Self {
        FlashResult {
            run_id: run_id.to_string(),
            succeeded: false,
            device_ip: String::new(),
            error_message: err.to_string(),
            duration_ms,
        }
    }
}

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FlashStage {
    ValidateRequest,
    LocateToolchain,
    InstallToolchain,
    InstallDependencies,
    RenderFirmware,
    EnsurePortAccess,
    Compile,
    Upload,
    WatchForIp,
    Done,
}

impl FlashStage {
    pub fn name(&self) -> &'static str {
        match self {
            FlashStage::ValidateRequest => "validate_request",
            FlashStage::LocateToolchain => "locate_toolchain",
            FlashStage::InstallToolchain => "install_toolchain",
            FlashStage::InstallDependencies => "install_dependencies",
            FlashStage::RenderFirmware => "render_firmware",
            FlashStage::EnsurePortAccess => "ensure_port_access",
            FlashStage::Compile => "compile",
            FlashStage::Upload => "upload",
            FlashStage::WatchForIp => "watch_for_ip",
            FlashStage::Done => "done",
        }
    }
}

impl fmt::Display for FlashStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flash pipeline orchestrator.
pub struct FlashPipeline {
    config: FlashConfig,
}

impl FlashPipeline {
    pub fn new(config: FlashConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// Run the whole pipeline for `request`.
    ///
    /// Progress lines go to `sink` throughout; the returned result is the
    /// only terminal outcome. `password` is asked at most once.
    pub async fn run(
        &self,
        request: &FlashRequest,
        password: &dyn PasswordRequest,
        sink: &LineSink,
    ) -> FlashResult {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("flash", run_id = %run_id, port = %request.serial_port);

        let outcome = self
            .run_stages(request, password, sink)
            .instrument(span)
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(device_ip) => {
                info!(run_id = %run_id, device_ip = %device_ip, duration_ms, "Flash completed");
                FlashResult::success(&run_id, device_ip, duration_ms)
            }
            Err((stage, err)) => {
                warn!(run_id = %run_id, stage = %stage, error = %err, "Flash failed");
                FlashResult::failure(&run_id, &err, duration_ms)
            }
        }
    }

    async fn run_stages(
        &self,
        request: &FlashRequest,
        password: &dyn PasswordRequest,
        sink: &LineSink,
    ) -> std::result::Result<String, (FlashStage, FlashError)> {
        let config = &self.config;
        request
            .validate()
            .map_err(|e| (FlashStage::ValidateRequest, e))?;

        let handle = self.ensure_toolchain(sink).await?;

        enter(FlashStage::InstallDependencies);
        sink.out("--- Installing ESP32 dependencies ---");
        install_dependencies(&handle, config, sink)
            .await
            .map_err(|e| (FlashStage::InstallDependencies, e))?;

        enter(FlashStage::RenderFirmware);
        sink.out("--- Generating firmware ---");
        render_to_work_dir(
            config,
            &request.wifi_ssid,
            &request.wifi_password,
            &request.pin_assignments,
        )
        .await
        .map_err(|e| (FlashStage::RenderFirmware, e))?;
        sink.out("Firmware generated with custom pin configuration.");

        enter(FlashStage::EnsurePortAccess);
        ensure_port_accessible(
            &request.serial_port,
            &config.elevate_command,
            password,
            sink,
        )
        .await
        .map_err(|e| (FlashStage::EnsurePortAccess, e))?;

        enter(FlashStage::Compile);
        sink.out("--- Compiling firmware (this may take a while on first run) ---");
        compile(&handle, config, sink)
            .await
            .map_err(|e| (FlashStage::Compile, e))?;
        sink.out("Compilation successful!");

        enter(FlashStage::Upload);
        sink.out(format!("--- Uploading firmware to {} ---", request.serial_port));
        upload(&handle, config, &request.serial_port, sink)
            .await
            .map_err(|e| (FlashStage::Upload, e))?;
        sink.out("Firmware uploaded successfully!");

        enter(FlashStage::WatchForIp);
        sink.out(format!(
            "--- Waiting for ESP32 to connect to WiFi ({}s timeout) ---",
            config.ip_timeout().as_secs()
        ));
        let device_ip = match watch_with_config(&handle, config, &request.serial_port, sink).await {
            Ok(ip) => {
                sink.out(format!("ESP32 connected! IP: {}", ip));
                ip
            }
            Err(e) if !e.is_fatal() => {
                sink.err(format!("Could not detect ESP32 IP automatically: {}", e));
                sink.err("You can enter the IP manually on the setup page.");
                String::new()
            }
            Err(e) => return Err((FlashStage::WatchForIp, e)),
        };

        enter(FlashStage::Done);
        Ok(device_ip)
    }

    /// Locate the toolchain, installing it once if absent.
    async fn ensure_toolchain(
        &self,
        sink: &LineSink,
    ) -> std::result::Result<ToolchainHandle, (FlashStage, FlashError)> {
        enter(FlashStage::LocateToolchain);
        let located = locate_toolchain(&self.config)
            .await
            .map_err(|e| (FlashStage::LocateToolchain, e))?;
        if let Some(handle) = located {
            return Ok(handle);
        }

        enter(FlashStage::InstallToolchain);
        sink.out(format!(
            "{} not found. Installing...",
            self.config.toolchain_binary
        ));
        install_toolchain(&self.config, sink)
            .await
            .map_err(|e| (FlashStage::InstallToolchain, e))?;

        locate_toolchain(&self.config)
            .await
            .map_err(|e| (FlashStage::InstallToolchain, e))?
            .ok_or((FlashStage::InstallToolchain, FlashError::ToolMissingAfterInstall))
    }
}

fn enter(stage: FlashStage) {
    info!(stage = %stage, "Entering stage");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FlashRequest {
        FlashRequest {
            serial_port: "/dev/ttyUSB0".to_string(),
            wifi_ssid: "lab-net".to_string(),
            wifi_password: "hunter2".to_string(),
            pin_assignments: vec![PinAssignment::new("x", [4, 5, 6, 7])],
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let mut r = request();
        r.wifi_password.clear();
        assert!(matches!(r.validate(), Err(FlashError::InvalidRequest(_))));

        let mut r = request();
        r.serial_port = "  ".to_string();
        assert!(matches!(r.validate(), Err(FlashError::InvalidRequest(_))));

        let mut r = request();
        r.pin_assignments.clear();
        assert!(matches!(r.validate(), Err(FlashError::InvalidRequest(_))));
    }

    #[test]
    fn test_request_debug_hides_password() {
        let debug = format!("{:?}", request());
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("lab-net"));
    }

    #[test]
    fn test_flash_result_wire_format() {
        let result = FlashResult::success("run-1", "192.168.1.50".to_string(), 10);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["succeeded"], true);
        assert_eq!(json["device_ip"], "192.168.1.50");
        assert_eq!(json["error_message"], "");

        let failed = FlashResult::failure("run-2", &FlashError::UploadFailed, 10);
        assert!(!failed.succeeded);
        assert_eq!(failed.error_message, "Upload failed");
        assert!(failed.device_ip.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_fails_before_any_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlashConfig::new(dir.path())
            .with_toolchain_binary("stepflash-never-invoked")
            .with_work_dir(dir.path().join("work"));
        let pipeline = FlashPipeline::new(config);

        let mut r = request();
        r.wifi_ssid.clear();
        let (sink, mut rx) = LineSink::channel();
        let result = pipeline
            .run(&r, &crate::permissions::NoPassword, &sink)
            .await;
        drop(sink);

        assert!(!result.succeeded);
        assert_eq!(result.error_message, "Invalid flash request: WiFi SSID is empty");
        assert!(rx.recv().await.is_none());
        assert!(!dir.path().join("work").exists());
    }
}
