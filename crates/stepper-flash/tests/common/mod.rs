//! Fake `arduino-cli` for integration tests.
//!
//! The fake is a shell script installed under `<home>/.local/bin` with a
//! name no real system has on PATH, so the locator always falls back to it.
//! Every invocation is appended to a log file; the `monitor` subcommand
//! records its PID before running the configured body.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use stepper_flash::{FlashConfig, PinAssignment};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const FAKE_BINARY: &str = "stepflash-fake-cli";

pub const TEMPLATE: &str = r#"#include <WiFi.h>
const char* ssid = "{{wifi_ssid}}";
const char* password = "{{wifi_password}}";
int motor0[] = { {{n_pin1__motor_0}}, {{n_pin2__motor_0}}, {{n_pin3__motor_0}}, {{n_pin4__motor_0}} };
int motor1[] = { {{n_pin1__motor_1}}, {{n_pin2__motor_1}}, {{n_pin3__motor_1}}, {{n_pin4__motor_1}} };
"#;

/// Shell fragments for the subcommands a test wants to control.
pub struct Behaviour {
    pub monitor: String,
    pub lib: String,
    pub core: String,
    pub board: String,
    /// Whether the fake starts out in `~/.local/bin` or only staged for an
    /// installer to copy.
    pub installed: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Behaviour {
            monitor: "printf 'ets Jun  8 2016 rst:0x1\\nWiFi connected\\nIP: 192.168.1.50\\n'; exec sleep 30"
                .to_string(),
            lib: "echo \"Installed $3\"".to_string(),
            core: "echo \"core $2 done\"".to_string(),
            board: "echo '{\"detected_ports\": [{\"port\": {\"address\": \"/dev/ttyUSB0\"}}]}'"
                .to_string(),
            installed: true,
        }
    }
}

impl Behaviour {
    pub fn with_monitor(mut self, body: &str) -> Self {
        self.monitor = body.to_string();
        self
    }

    pub fn with_lib(mut self, body: &str) -> Self {
        self.lib = body.to_string();
        self
    }

    pub fn with_core(mut self, body: &str) -> Self {
        self.core = body.to_string();
        self
    }

    pub fn with_board(mut self, body: &str) -> Self {
        self.board = body.to_string();
        self
    }

    pub fn not_installed(mut self) -> Self {
        self.installed = false;
        self
    }
}

pub struct FakeToolchain {
    pub home: TempDir,
    pub config: FlashConfig,
    pub log: PathBuf,
    pub pid_file: PathBuf,
    /// A readable regular file standing in for the serial device.
    pub port: PathBuf,
    /// Where the fake script was written.
    pub script: PathBuf,
}

impl FakeToolchain {
    pub fn new(behaviour: Behaviour) -> Self {
        let home = tempfile::tempdir().expect("tempdir");
        let log = home.path().join("invocations.log");
        let pid_file = home.path().join("monitor.pid");
        let port = home.path().join("ttyUSB0");
        std::fs::write(&port, "").expect("write port");

        let template = home.path().join("stepper_websocket.ino");
        std::fs::write(&template, TEMPLATE).expect("write template");

        let config = FlashConfig::new(home.path())
            .with_toolchain_binary(FAKE_BINARY)
            .with_template(&template)
            .with_work_dir(home.path().join("work").join("stepper_websocket"))
            .with_ip_timeout(Duration::from_secs(10));

        let script = format!(
            r#"#!/bin/sh
echo "$*" >> "{log}"
case "$1" in
  version) echo "arduino-cli  Version: 1.0.0-test" ;;
  board) {board} ;;
  core) {core} ;;
  lib) {lib} ;;
  compile) echo "Sketch uses 1024 bytes"; echo "compile warning" >&2 ;;
  upload) echo "Hash of data verified." ;;
  monitor)
    echo $$ > "{pid}"
    {monitor}
    ;;
esac
"#,
            log = log.display(),
            pid = pid_file.display(),
            board = behaviour.board,
            lib = behaviour.lib,
            core = behaviour.core,
            monitor = behaviour.monitor,
        );

        let target = if behaviour.installed {
            config.user_toolchain_path()
        } else {
            home.path().join("staged").join(FAKE_BINARY)
        };
        std::fs::create_dir_all(target.parent().expect("bin dir")).expect("create bin dir");
        std::fs::write(&target, script).expect("write fake toolchain");
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake toolchain");

        FakeToolchain {
            home,
            config,
            log,
            pid_file,
            port,
            script: target,
        }
    }

    /// Installer script that copies the staged fake into `$BINDIR`.
    pub fn copying_installer(&self) -> String {
        format!(
            "echo 'Installing {name}'\ncp \"{src}\" \"$BINDIR/{name}\"\nchmod 755 \"$BINDIR/{name}\"\n",
            src = self.script.display(),
            name = FAKE_BINARY,
        )
    }

    pub fn port_str(&self) -> String {
        self.port.to_string_lossy().into_owned()
    }

    /// Subcommand lines the fake was invoked with, in order.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(|l| l.to_string())
            .collect()
    }

    pub fn was_invoked(&self, subcommand: &str) -> bool {
        self.invocations()
            .iter()
            .any(|l| l.split_whitespace().next() == Some(subcommand))
    }

    pub fn monitor_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

pub fn motors() -> Vec<PinAssignment> {
    vec![
        PinAssignment::new("pan", [4, 5, 6, 7]),
        PinAssignment::new("tilt", [15, 16, 17, 18]),
    ]
}

/// Serve `body` to the first HTTP request on a loopback port.
pub async fn serve_once(body: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/x-sh\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    });

    format!("http://{}/install.sh", addr)
}

/// Whether a (reaped) process is gone.
pub fn process_gone(pid: u32) -> bool {
    !Path::new(&format!("/proc/{}", pid)).exists()
}
