//! Firmware template rendering
//!
//! The template is plain Arduino source with `{{...}}` placeholders. Rendering
//! is literal substitution; placeholders without a value (for example motor
//! slots beyond the configured list) stay in the output untouched so one
//! template can serve boards with different motor counts.

use crate::config::FlashConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// The four GPIO pins driving one stepper motor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinAssignment {
    pub label: String,
    pub pin1: u8,
    pub pin2: u8,
    pub pin3: u8,
    pub pin4: u8,
}

impl PinAssignment {
    pub fn new(label: &str, pins: [u8; 4]) -> Self {
        PinAssignment {
            label: label.to_string(),
            pin1: pins[0],
            pin2: pins[1],
            pin3: pins[2],
            pin4: pins[3],
        }
    }

    pub fn pins(&self) -> [u8; 4] {
        [self.pin1, self.pin2, self.pin3, self.pin4]
    }
}

impl fmt::Display for PinAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={},{},{},{}",
            self.label, self.pin1, self.pin2, self.pin3, self.pin4
        )
    }
}

/// Parses `label=p1,p2,p3,p4`, the form used on the command line.
impl FromStr for PinAssignment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (label, pins) = s
            .split_once('=')
            .ok_or_else(|| format!("expected label=p1,p2,p3,p4, got '{}'", s))?;

        let pins: Vec<u8> = pins
            .split(',')
            .map(|p| p.trim().parse::<u8>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| format!("invalid GPIO number in '{}': {}", s, e))?;

        let pins: [u8; 4] = pins
            .try_into()
            .map_err(|_| format!("expected exactly four pins in '{}'", s))?;

        Ok(PinAssignment::new(label.trim(), pins))
    }
}

/// Placeholder for pin `n` (1..=4) of motor `index`.
pub fn pin_placeholder(n: usize, index: usize) -> String {
    format!("{{{{n_pin{}__motor_{}}}}}", n, index)
}

pub const WIFI_SSID_PLACEHOLDER: &str = "{{wifi_ssid}}";
pub const WIFI_PASSWORD_PLACEHOLDER: &str = "{{wifi_password}}";

/// Substitute credentials and pin numbers into `template`.
pub fn render_firmware(
    template: &str,
    wifi_ssid: &str,
    wifi_password: &str,
    pins: &[PinAssignment],
) -> String {
    let mut source = template
        .replace(WIFI_SSID_PLACEHOLDER, wifi_ssid)
        .replace(WIFI_PASSWORD_PLACEHOLDER, wifi_password);

    for (index, motor) in pins.iter().enumerate() {
        for (n, pin) in motor.pins().iter().enumerate() {
            source = source.replace(&pin_placeholder(n + 1, index), &pin.to_string());
        }
    }

    source
}

/// A rendered sketch on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedFirmware {
    pub path: PathBuf,
    /// SHA-256 of the rendered source, hex encoded
    pub digest: String,
}

impl RenderedFirmware {
    pub fn short_digest(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

/// Write rendered source to `work_dir/sketch_name`, creating the directory.
pub async fn write_firmware(work_dir: &Path, sketch_name: &str, source: &str) -> Result<RenderedFirmware> {
    tokio::fs::create_dir_all(work_dir).await?;
    let path = work_dir.join(sketch_name);
    tokio::fs::write(&path, source).await?;

    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    debug!(path = %path.display(), digest = %&digest[..12], "Firmware written");
    Ok(RenderedFirmware { path, digest })
}

/// Read the configured template, render it and write it to the work dir.
pub async fn render_to_work_dir(
    config: &FlashConfig,
    wifi_ssid: &str,
    wifi_password: &str,
    pins: &[PinAssignment],
) -> Result<RenderedFirmware> {
    let template = tokio::fs::read_to_string(&config.template_path).await?;
    let source = render_firmware(&template, wifi_ssid, wifi_password, pins);
    let rendered = write_firmware(&config.work_dir, &config.sketch_name, &source).await?;
    info!(
        path = %rendered.path.display(),
        motors = pins.len(),
        digest = %rendered.short_digest(),
        "Firmware rendered"
    );
    Ok(rendered)
}
