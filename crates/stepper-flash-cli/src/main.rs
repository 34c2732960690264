//! stepflash - flash ESP32 stepper controllers from the command line
//!
//! ## Commands
//!
//! - `check`: report whether the toolchain is installed and its version
//! - `detect`: find an ESP32 on USB
//! - `install-toolchain`: download and install the toolchain
//! - `install-deps`: install the ESP32 platform package and libraries
//! - `render`: write the firmware sketch without flashing it
//! - `flash`: run the whole pipeline and report the device IP

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;
use stepper_flash::{
    detect_board_with, install_dependencies, install_toolchain, locate_toolchain,
    render_to_work_dir, toolchain_status, FlashConfig, FlashPipeline, FlashRequest, LineOrigin,
    LineSink, PasswordRequest, PinAssignment,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "stepflash")]
#[command(author = "Stepper Flash Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build and flash ESP32 stepper controller firmware", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print the final outcome as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Firmware template (default: $STEPFLASH_TEMPLATE or ./stepper_websocket.ino)
    #[arg(long, global = true)]
    template: Option<PathBuf>,

    /// Sketch working directory (default: /tmp/stepper_websocket)
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show toolchain installation status
    Check,

    /// Detect an ESP32 connected over USB
    Detect,

    /// Install the toolchain into ~/.local/bin
    InstallToolchain {
        /// Reinstall even if a toolchain is already present
        #[arg(long)]
        force: bool,
    },

    /// Install the ESP32 platform package and required libraries
    InstallDeps,

    /// Render the firmware sketch into the working directory
    Render {
        /// WiFi network name
        #[arg(long, env = "STEPFLASH_WIFI_SSID")]
        ssid: String,

        /// WiFi password
        #[arg(long, env = "STEPFLASH_WIFI_PASSWORD", hide_env_values = true)]
        password: String,

        /// Motor pins as label=p1,p2,p3,p4 (repeat per motor)
        #[arg(short, long = "motor", required = true)]
        motors: Vec<PinAssignment>,
    },

    /// Install, render, compile, upload and wait for the device IP
    Flash {
        /// Serial port (auto-detected when omitted)
        #[arg(short, long)]
        port: Option<String>,

        /// WiFi network name
        #[arg(long, env = "STEPFLASH_WIFI_SSID")]
        ssid: String,

        /// WiFi password
        #[arg(long, env = "STEPFLASH_WIFI_PASSWORD", hide_env_values = true)]
        password: String,

        /// Motor pins as label=p1,p2,p3,p4 (repeat per motor)
        #[arg(short, long = "motor", required = true)]
        motors: Vec<PinAssignment>,

        /// Seconds to wait for the device to report its IP
        #[arg(long)]
        ip_timeout_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stepper_flash::init_tracing(cli.json_logs, level);

    let mut config = FlashConfig::from_env().context("Failed to load configuration")?;
    if let Some(template) = cli.template {
        config = config.with_template(template);
    }
    if let Some(work_dir) = cli.work_dir {
        config = config.with_work_dir(work_dir);
    }

    match cli.command {
        Commands::Check => cmd_check(&config, cli.json).await,
        Commands::Detect => cmd_detect(&config, cli.json).await,
        Commands::InstallToolchain { force } => cmd_install_toolchain(&config, force).await,
        Commands::InstallDeps => cmd_install_deps(&config).await,
        Commands::Render {
            ssid,
            password,
            motors,
        } => cmd_render(&config, &ssid, &password, &motors, cli.json).await,
        Commands::Flash {
            port,
            ssid,
            password,
            motors,
            ip_timeout_secs,
        } => {
            if let Some(secs) = ip_timeout_secs {
                config = config.with_ip_timeout(Duration::from_secs(secs));
            }
            cmd_flash(&config, port, ssid, password, motors, cli.json).await
        }
    }
}

/// Reads the elevation password from stdin.
///
/// On a terminal the password is typed without echo; piped input is read as
/// one line.
struct StdinPassword;

#[async_trait]
impl PasswordRequest for StdinPassword {
    async fn request_password(&self, port: &str) -> Option<String> {
        eprint!("Password for {}: ", port);

        if std::io::stdin().is_terminal() {
            let typed = tokio::task::spawn_blocking(read_hidden_line).await;
            eprintln!();
            return match typed {
                Ok(Ok(secret)) => secret,
                _ => None,
            };
        }

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(strip_line_ending(&line).to_string()),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum KeyOutcome {
    Continue,
    Submit,
    Cancel,
}

fn apply_key(secret: &mut String, key: KeyEvent) -> KeyOutcome {
    if key.kind != KeyEventKind::Press {
        return KeyOutcome::Continue;
    }
    match key.code {
        KeyCode::Enter => KeyOutcome::Submit,
        KeyCode::Esc => KeyOutcome::Cancel,
        KeyCode::Char('c') | KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            KeyOutcome::Cancel
        }
        KeyCode::Backspace => {
            secret.pop();
            KeyOutcome::Continue
        }
        KeyCode::Char(c) => {
            secret.push(c);
            KeyOutcome::Continue
        }
        _ => KeyOutcome::Continue,
    }
}

/// Read one line from the terminal in raw mode, so nothing is echoed.
fn read_hidden_line() -> std::io::Result<Option<String>> {
    enable_raw_mode()?;
    let _raw_mode = RawModeGuard;

    let mut secret = String::new();
    loop {
        if let Event::Key(key) = event::read()? {
            match apply_key(&mut secret, key) {
                KeyOutcome::Continue => {}
                KeyOutcome::Submit => return Ok(Some(secret)),
                KeyOutcome::Cancel => return Ok(None),
            }
        }
    }
}

struct RawModeGuard;

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn strip_line_ending(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

/// Forward progress lines to the terminal until every sink is dropped.
fn progress_printer() -> (LineSink, JoinHandle<()>) {
    let (sink, mut rx) = LineSink::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.origin {
                LineOrigin::Out => println!("{}", event.line),
                LineOrigin::Err => eprintln!("{}", event.line),
            }
        }
    });
    (sink, printer)
}

async fn finish(sink: LineSink, printer: JoinHandle<()>) {
    drop(sink);
    let _ = printer.await;
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn cmd_check(config: &FlashConfig, json: bool) -> Result<()> {
    let status = toolchain_status(config)
        .await
        .context("Failed to query toolchain")?;

    if json {
        return print_json(&status);
    }

    println!("Toolchain: {}", config.toolchain_binary);
    println!("Installed: {}", if status.installed { "yes" } else { "no" });
    if status.installed {
        println!("Binary: {}", status.binary);
        println!("Version: {}", status.version);
    }
    println!("Template: {}", config.template_path.display());
    println!("Work dir: {}", config.work_dir.display());
    Ok(())
}

async fn cmd_detect(config: &FlashConfig, json: bool) -> Result<()> {
    let detection = detect_board_with(config).await;

    if json {
        print_json(&detection)?;
    } else if detection.found {
        println!("ESP32 found on {}", detection.port);
    }

    if !detection.found {
        bail!("{}", detection.error);
    }
    Ok(())
}

async fn cmd_install_toolchain(config: &FlashConfig, force: bool) -> Result<()> {
    if !force {
        if let Some(handle) = locate_toolchain(config).await? {
            println!("Already installed: {}", handle.binary().display());
            return Ok(());
        }
    }

    let (sink, printer) = progress_printer();
    let installed = install_toolchain(config, &sink).await;
    finish(sink, printer).await;
    installed.context("Toolchain installation failed")?;

    match locate_toolchain(config).await? {
        Some(handle) => {
            println!("Installed: {}", handle.binary().display());
            Ok(())
        }
        None => bail!("{} still not found after install", config.toolchain_binary),
    }
}

async fn cmd_install_deps(config: &FlashConfig) -> Result<()> {
    let handle = locate_toolchain(config)
        .await?
        .with_context(|| format!("{} not found; run install-toolchain first", config.toolchain_binary))?;

    let (sink, printer) = progress_printer();
    let installed = install_dependencies(&handle, config, &sink).await;
    finish(sink, printer).await;
    installed.context("Dependency installation failed")?;

    println!("Dependencies installed.");
    Ok(())
}

async fn cmd_render(
    config: &FlashConfig,
    ssid: &str,
    password: &str,
    motors: &[PinAssignment],
    json: bool,
) -> Result<()> {
    let rendered = render_to_work_dir(config, ssid, password, motors)
        .await
        .context(format!(
            "Failed to render firmware from {:?}",
            config.template_path
        ))?;

    if json {
        return print_json(&rendered);
    }

    println!("Firmware: {}", rendered.path.display());
    println!("Digest: {}", rendered.short_digest());
    for motor in motors {
        println!("  {}", motor);
    }
    Ok(())
}

async fn cmd_flash(
    config: &FlashConfig,
    port: Option<String>,
    ssid: String,
    password: String,
    motors: Vec<PinAssignment>,
    json: bool,
) -> Result<()> {
    let serial_port = match port {
        Some(port) => port,
        None => {
            let detection = detect_board_with(config).await;
            if !detection.found {
                bail!("Port auto-detection failed: {}", detection.error);
            }
            println!("Detected ESP32 on {}", detection.port);
            detection.port
        }
    };

    let request = FlashRequest {
        serial_port,
        wifi_ssid: ssid,
        wifi_password: password,
        pin_assignments: motors,
    };
    info!(port = %request.serial_port, motors = request.pin_assignments.len(), "Starting flash");

    let pipeline = FlashPipeline::new(config.clone());
    let (sink, printer) = progress_printer();
    let result = pipeline.run(&request, &StdinPassword, &sink).await;
    finish(sink, printer).await;

    if json {
        print_json(&result)?;
    } else if result.succeeded {
        if result.device_ip.is_empty() {
            println!("Flash complete. Device IP unknown.");
        } else {
            println!("Flash complete. Device IP: {}", result.device_ip);
        }
    }

    if !result.succeeded {
        bail!("{}", result.error_message);
    }
    Ok(())
}
