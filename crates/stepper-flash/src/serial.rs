//! Serial console watcher that discovers the device's IP address.

use crate::config::FlashConfig;
use crate::error::FlashError;
use crate::progress::LineSink;
use crate::stage::ToolchainCommand;
use crate::toolchain::ToolchainHandle;
use crate::Result;
use regex::Regex;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info};

fn ip_pattern() -> &'static Regex {
    static IP: OnceLock<Regex> = OnceLock::new();
    IP.get_or_init(|| Regex::new(r"IP:\s*(\d+\.\d+\.\d+\.\d+)").expect("valid IP regex"))
}

/// Find the first `IP: a.b.c.d` in accumulated serial output.
pub fn find_ip(buffer: &str) -> Option<&str> {
    ip_pattern()
        .captures(buffer)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Watch the serial monitor on `port` until the device prints its IP.
///
/// The read loop races `timeout`. Whichever side wins, the monitor process is
/// terminated exactly once afterwards, tolerating a process that already
/// exited.
pub async fn watch_for_ip(
    handle: &ToolchainHandle,
    port: &str,
    baud_rate: u32,
    timeout: Duration,
    sink: &LineSink,
) -> Result<String> {
    let command = ToolchainCommand::Monitor {
        port: port.to_string(),
        baud_rate,
    };

    let mut child = Command::new(handle.binary())
        .args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| FlashError::spawn(handle.binary().to_string_lossy(), e))?;

    let stdout = child.stdout.take();
    let raced = tokio::time::timeout(timeout, read_until_ip(stdout, sink)).await;

    terminate(&mut child).await;

    match raced {
        Ok(result) => result,
        Err(_) => Err(FlashError::IpTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Watch using the configured baud rate and deadline.
pub async fn watch_with_config(
    handle: &ToolchainHandle,
    config: &FlashConfig,
    port: &str,
    sink: &LineSink,
) -> Result<String> {
    watch_for_ip(handle, port, config.baud_rate, config.ip_timeout(), sink).await
}

async fn read_until_ip<R>(reader: Option<R>, sink: &LineSink) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Err(FlashError::IpStreamClosed);
    };

    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => return Err(FlashError::IpStreamClosed),
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Monitor stream read failed");
                return Err(FlashError::IpStreamClosed);
            }
        };
        raw.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&chunk[..n]);
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            sink.out(trimmed);
        }

        // Match against everything so far; an address may straddle chunks.
        let buffer = String::from_utf8_lossy(&raw);
        if let Some(ip) = find_ip(&buffer) {
            info!(ip = %ip, "Device reported IP");
            return Ok(ip.to_string());
        }
    }
}

/// Signal the monitor to stop and reap it.
async fn terminate(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Monitor already exited");
    }
    match child.wait().await {
        Ok(status) => debug!(status = %status, "Monitor terminated"),
        Err(e) => debug!(error = %e, "Monitor wait failed"),
    }
}
