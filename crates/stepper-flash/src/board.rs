//! USB board detection from the toolchain's JSON board list.

use crate::config::FlashConfig;
use crate::error::FlashError;
use crate::runner::ProcessRunner;
use crate::toolchain::{locate_toolchain, ToolchainHandle};
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Address substrings identifying a USB-serial adapter.
pub const USB_SERIAL_MARKERS: [&str; 2] = ["ttyUSB", "ttyACM"];

/// Top-level board list, in the two shapes the toolchain has emitted.
///
/// Tried in order: a bare array of entries, then an object carrying the
/// entries under `detected_ports`. Anything else, including an object
/// without that field, fails to parse. A toolchain that prints `{}` when
/// nothing is plugged in therefore surfaces as `ParseFailed` rather than
/// `DeviceNotFound`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum BoardList {
    Entries(Vec<BoardListEntry>),
    Detected { detected_ports: Vec<BoardListEntry> },
}

impl BoardList {
    pub fn entries(&self) -> &[BoardListEntry] {
        match self {
            BoardList::Entries(entries) => entries,
            BoardList::Detected { detected_ports } => detected_ports,
        }
    }
}

/// One detected port.
///
/// The address is either flat on the entry (`{"address": ...}`) or nested
/// one level down (`{"port": {"address": ...}}`). Inside either record the
/// address key may also be spelled `port`.
#[derive(Debug, Default, Deserialize)]
pub struct BoardListEntry {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<PortField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PortField {
    Nested(PortRecord),
    Flat(String),
    Other(serde_json::Value),
}

#[derive(Debug, Default, Deserialize)]
pub struct PortRecord {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
}

impl BoardListEntry {
    /// Normalized serial address, nested record first.
    pub fn address(&self) -> Option<&str> {
        let nested = match &self.port {
            Some(PortField::Nested(record)) => record
                .address
                .as_deref()
                .or(record.port.as_deref()),
            _ => None,
        };
        let flat = match &self.port {
            Some(PortField::Flat(port)) => Some(port.as_str()),
            _ => None,
        };

        nested
            .or(self.address.as_deref())
            .or(flat)
            .filter(|a| !a.is_empty())
    }
}

/// Parse `board list --format json` output.
pub fn parse_board_list(json: &str) -> Result<BoardList> {
    serde_json::from_str(json).map_err(|e| FlashError::ParseFailed(e.to_string()))
}

/// Pick the first USB-serial address, in the toolchain's enumeration order.
pub fn select_usb_port(list: &BoardList) -> Option<&str> {
    list.entries()
        .iter()
        .filter_map(BoardListEntry::address)
        .find(|address| USB_SERIAL_MARKERS.iter().any(|m| address.contains(m)))
}

/// List boards with the toolchain and return the first USB-serial port.
pub async fn detect_board(handle: &ToolchainHandle) -> Result<String> {
    let outcome =
        ProcessRunner::run(handle.binary(), ["board", "list", "--format", "json"]).await?;
    if !outcome.succeeded {
        debug!(stderr = %outcome.stderr.trim(), "board list failed");
        return Err(FlashError::BoardListFailed);
    }

    let list = parse_board_list(&outcome.stdout)?;
    let port = select_usb_port(&list).ok_or(FlashError::DeviceNotFound)?;
    info!(port = %port, "Board detected");
    Ok(port.to_string())
}

/// Detection outcome for UI callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDetection {
    pub found: bool,
    pub port: String,
    pub error: String,
}

impl From<Result<String>> for BoardDetection {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(port) => BoardDetection {
                found: true,
                port,
                error: String::new(),
            },
            Err(e) => BoardDetection {
                found: false,
                port: String::new(),
                error: e.to_string(),
            },
        }
    }
}

/// Locate the toolchain and detect a board in one step.
pub async fn detect_board_with(config: &FlashConfig) -> BoardDetection {
    let result = match locate_toolchain(config).await {
        Ok(Some(handle)) => detect_board(&handle).await,
        Ok(None) => Err(FlashError::ToolNotFound),
        Err(e) => Err(e),
    };
    result.into()
}
