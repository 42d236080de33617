use clap::{Parser, Subcommand};
use futures::StreamExt;
use serial_session::config::{Config, ConfigLoader};
use serial_session::registry::hotplug;
use serial_session::{logging, OutputSignals, PortHandle, SessionManager, SessionResult};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinError;
use tracing::debug;

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    name = "serial-session",
    version,
    about = "Open, monitor and reset serial-attached devices.",
    long_about = "Lists serial ports, bridges a port to stdin/stdout, and drives the DTR/RTS/BREAK lines used to reset or bootstrap microcontrollers."
)]
struct Args {
    /// Configuration file (defaults to the standard search path).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the serial ports of this machine.
    Ports {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Bridge a port to stdin/stdout until Ctrl-C or the device is unplugged.
    Monitor {
        /// Port path or alias (defaults to the configured or first port).
        #[arg(short, long)]
        port: Option<String>,
        /// Baud rate override.
        #[arg(short, long)]
        baud: Option<u32>,
        /// Pulse the reset lines after opening.
        #[arg(long)]
        reset: bool,
    },
    /// Reset the device with a DTR/RTS pulse.
    Reset {
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Show the modem lines, optionally driving DTR, RTS or BREAK first.
    Signals {
        #[arg(short, long)]
        port: Option<String>,
        #[arg(long)]
        dtr: Option<bool>,
        #[arg(long)]
        rts: Option<bool>,
        #[arg(long = "break")]
        break_active: Option<bool>,
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let loader = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config = loader.into_config();
    if let Err(e) = logging::init_tracing(&config.logging) {
        eprintln!("Logging disabled: {e}");
    }

    let manager = SessionManager::system()
        .with_settings(config.serial.line_settings()?)
        .with_reset_settle(config.serial.reset_settle());

    match args.command {
        Command::Ports { json } => list_ports(&manager, json).await,
        Command::Monitor { port, baud, reset } => {
            select_port(&manager, &config, port.as_deref()).await?;
            if let Some(baud) = baud {
                manager.configure(|settings| settings.set_baud_rate(baud))?;
            }
            monitor(Arc::new(manager), &config, reset).await
        }
        Command::Reset { port } => {
            let handle = select_port(&manager, &config, port.as_deref()).await?;
            manager.open().await?;
            let result = manager.reset_device().await;
            manager.close().await?;
            result?;
            println!("Reset {handle}");
            Ok(())
        }
        Command::Signals {
            port,
            dtr,
            rts,
            break_active,
            json,
        } => {
            select_port(&manager, &config, port.as_deref()).await?;
            manager.open().await?;
            let result = drive_and_sample(
                &manager,
                OutputSignals {
                    data_terminal_ready: dtr,
                    request_to_send: rts,
                    break_active,
                },
            );
            manager.close().await?;
            let signals = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&signals)?);
            } else {
                let flag = |on: bool| if on { "on" } else { "off" };
                println!(
                    "DTR {}  RTS {}  BREAK {}",
                    flag(signals.data_terminal_ready),
                    flag(signals.request_to_send),
                    flag(signals.break_active)
                );
                println!(
                    "DCD {}  DSR {}  CTS {}  RI {}",
                    flag(signals.data_carrier_detect),
                    flag(signals.data_set_ready),
                    flag(signals.clear_to_send),
                    flag(signals.ring_indicator)
                );
            }
            Ok(())
        }
    }
}

async fn list_ports(manager: &SessionManager, json: bool) -> Result<(), Box<dyn Error>> {
    let ports = manager.registry().list_authorized_ports().await?;

    if json {
        let descriptors: Vec<_> = ports.iter().map(PortHandle::descriptor).collect();
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in &ports {
        let info = port.info();
        let description = info
            .product
            .as_deref()
            .or(info.manufacturer.as_deref())
            .unwrap_or("");
        println!(
            "{:<24} {:<10} {}",
            port.path(),
            info.usb_id().unwrap_or_else(|| "-".to_string()),
            description
        );
    }
    Ok(())
}

/// Pick the port named on the command line, else the configured one, else the first
/// authorized one, else ask for one.
async fn select_port(
    manager: &SessionManager,
    config: &Config,
    port: Option<&str>,
) -> Result<PortHandle, Box<dyn Error>> {
    let wanted = port
        .map(|name| config.serial.resolve_port(name))
        .or_else(|| config.serial.preferred_port());

    let handle = match wanted {
        Some(path) => manager
            .registry()
            .list_authorized_ports()
            .await?
            .into_iter()
            .find(|p| p.path() == path)
            .ok_or_else(|| format!("Serial port not found: {path}"))?,
        None => match manager.initialize().await? {
            Some(handle) => handle,
            None => manager.request_port(&config.discovery.filters).await?,
        },
    };

    debug!(port = %handle, "Using serial port");
    manager.select_port(Some(handle.clone()));
    Ok(handle)
}

fn drive_and_sample(
    manager: &SessionManager,
    outputs: OutputSignals,
) -> SessionResult<serial_session::SignalSet> {
    manager.set_output_signals(outputs)?;
    manager.signals()
}

async fn monitor(
    manager: Arc<SessionManager>,
    config: &Config,
    reset: bool,
) -> Result<(), Box<dyn Error>> {
    manager.open().await?;
    let watcher = config
        .discovery
        .hotplug
        .then(|| hotplug::spawn_watcher(manager.registry(), config.discovery.interval()));

    if reset {
        manager.reset_device().await?;
    }
    eprintln!(
        "Connected to {} at {} (Ctrl-C to quit)",
        manager.status().port.unwrap_or_default(),
        manager.line_config()
    );

    let mut chunks = manager.chunks()?;
    let mut input = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { pump_stdin(&manager).await })
    };
    let mut input_done = false;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut stdout = tokio::io::stdout();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            joined = &mut input, if !input_done => {
                input_done = true;
                if let Some(message) = input_failure(joined) {
                    eprintln!("\n{message}");
                    break;
                }
            }
            chunk = chunks.next() => match chunk {
                Some(Ok(bytes)) => {
                    stdout.write_all(&bytes).await?;
                    stdout.flush().await?;
                }
                Some(Err(e)) => {
                    eprintln!("\n{e}");
                    break;
                }
                None => break,
            },
        }
    }

    if !input_done {
        input.abort();
    }
    if let Some(watcher) = watcher {
        watcher.abort();
    }
    drop(chunks);
    if manager.is_open() {
        manager.close().await?;
    }
    eprintln!("\nDisconnected");
    Ok(())
}

/// Message for a stopped stdin pump, or `None` when input simply ended.
fn input_failure(joined: Result<SessionResult<()>, JoinError>) -> Option<String> {
    match joined {
        Ok(Ok(())) => {
            debug!("Standard input closed; still monitoring");
            None
        }
        Ok(Err(e)) => Some(format!("Write failed: {e}")),
        Err(e) => Some(format!("Input task failed: {e}")),
    }
}

async fn pump_stdin(manager: &SessionManager) -> SessionResult<()> {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 1024];
    loop {
        let n = stdin.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        manager.write(&buf[..n]).await?;
    }
}
