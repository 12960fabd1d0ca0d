//! Fieldrelay Client
//!
//! Command-line sessions against a running relay:
//! - Watch live readings as a dashboard
//! - Simulate a field controller
//! - Send a single pump / auto-mode command or refresh request

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use fieldrelay::config::Config;
use fieldrelay::logging::init_tracing;
use fieldrelay::session::{send_once, ReconnectingSession, SessionOptions, SessionRole};
use fieldrelay::telemetry::{
    light_percent, rain_label, soil_moisture_percent, CommandKind, ControlCommand, Metric,
    Reading, Switch,
};
use fieldrelay::websocket::{ControlFrame, InboundMessage};

/// How long one-shot commands wait for the relay
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "fieldrelay-client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Dashboard and controller sessions for a Fieldrelay server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Relay WebSocket URL (default from config, ws://localhost:3000)
    #[arg(long, global = true)]
    url: Option<String>,

    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch live readings as a dashboard
    Consumer {
        /// Key to register under (default from config)
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Simulate a field controller
    Device {
        /// Seconds between readings
        #[arg(short, long, default_value = "5")]
        interval_secs: u64,
    },

    /// Send one command to every controller
    Command {
        /// pump or autoMode
        #[arg(value_parser = parse_command_kind)]
        target: CommandKind,
        /// on or off
        #[arg(value_parser = parse_switch)]
        value: Switch,
    },

    /// Ask every controller to report immediately
    Refresh,
}

fn parse_command_kind(s: &str) -> Result<CommandKind, String> {
    match s {
        "pump" => Ok(CommandKind::Pump),
        "autoMode" | "auto-mode" | "auto" => Ok(CommandKind::AutoMode),
        other => Err(format!("unknown command '{}' (expected pump or autoMode)", other)),
    }
}

fn parse_switch(s: &str) -> Result<Switch, String> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(Switch::On),
        "off" | "false" | "0" => Ok(Switch::Off),
        other => Err(format!("invalid value '{}' (expected on or off)", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging).context("installing tracing subscriber")?;

    let mut options = SessionOptions::from(&config.session);
    if let Some(url) = cli.url {
        options.url = url;
    }

    match cli.command {
        Commands::Consumer { key } => {
            let key = key.unwrap_or_else(|| config.session.consumer_key.clone());
            run_consumer(key, options).await
        }
        Commands::Device { interval_secs } => {
            run_device(Duration::from_secs(interval_secs.max(1)), options).await
        }
        Commands::Command { target, value } => {
            let frame = ControlFrame::Command(ControlCommand::new(target, value));
            send_command(&config.session.consumer_key, &options, &frame).await
        }
        Commands::Refresh => {
            send_command(&config.session.consumer_key, &options, &ControlFrame::Refresh).await
        }
    }
}

async fn run_consumer(key: String, options: SessionOptions) -> anyhow::Result<()> {
    println!("Watching {} as '{}' (Ctrl+C to stop)", options.url, key);

    let session = ReconnectingSession::spawn(SessionRole::Consumer { key }, options);
    let mut events = session.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                // Partial frames are already merged into the session state
                Ok(InboundMessage::Telemetry(_)) => match session.current_state().await.reading {
                    Some(reading) => print_reading(&reading),
                    None => println!("Waiting for a complete reading"),
                },
                Ok(InboundMessage::DeviceStatus { esp_connected }) => {
                    println!("Controller {}", if esp_connected { "online" } else { "offline" });
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Display fell behind, skipped frames");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await;
    Ok(())
}

fn print_reading(reading: &Reading) {
    let soil = soil_moisture_percent(reading.soil_moisture);
    let light = light_percent(reading.light_level);

    println!(
        "[{}] temp {:.1}°C ({})  humidity {:.0}% ({})  soil {:.0}% ({})  light {:.0}%  {}  pump {}  auto {}",
        reading.timestamp.format("%H:%M:%S"),
        reading.temperature,
        Metric::Temperature.status(reading.temperature),
        reading.humidity,
        Metric::Humidity.status(reading.humidity),
        soil,
        Metric::SoilMoisture.status(soil),
        light,
        rain_label(reading.rain_drop),
        Switch::from(reading.pump_status),
        Switch::from(reading.auto_mode),
    );
}

/// Local state of the simulated controller
struct SimulatedController {
    pump_on: bool,
    auto_mode: bool,
    tick: u64,
}

impl SimulatedController {
    fn new() -> Self {
        Self {
            pump_on: false,
            auto_mode: true,
            tick: 0,
        }
    }

    fn apply(&mut self, command: &ControlCommand) {
        match command.command {
            CommandKind::Pump => self.pump_on = command.value.is_on(),
            CommandKind::AutoMode => self.auto_mode = command.value.is_on(),
        }
    }

    /// Slowly drifting synthetic reading
    fn reading(&mut self) -> Reading {
        self.tick += 1;
        let phase = (self.tick as f64 / 12.0).sin();

        let soil_moisture = (600.0 + 250.0 * phase) as i32;
        if self.auto_mode {
            // Dry soil reads high; water when under 30%
            self.pump_on = soil_moisture_percent(soil_moisture) < 30.0;
        }

        Reading {
            temperature: 26.0 + 6.0 * phase,
            humidity: 55.0 - 15.0 * phase,
            soil_moisture,
            light_level: (512.0 - 400.0 * phase) as i32,
            rain_drop: 0,
            pump_status: self.pump_on,
            auto_mode: self.auto_mode,
            timestamp: Utc::now(),
            esp_connected: Some(true),
        }
    }
}

fn send_reading(session: &ReconnectingSession, controller: &mut SimulatedController) {
    let reading = controller.reading();
    match serde_json::to_string(&reading) {
        Ok(json) => {
            if !session.send(json) {
                tracing::debug!("Relay not connected, reading dropped");
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode reading"),
    }
}

async fn run_device(interval: Duration, options: SessionOptions) -> anyhow::Result<()> {
    println!(
        "Simulating a controller on {} every {}s (Ctrl+C to stop)",
        options.url,
        interval.as_secs()
    );

    let session = ReconnectingSession::spawn(SessionRole::Device, options);
    let mut events = session.subscribe();
    let mut controller = SimulatedController::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => send_reading(&session, &mut controller),
            event = events.recv() => match event {
                Ok(InboundMessage::Command(command)) => {
                    tracing::info!(command = %command.command, value = %command.value, "Applying command");
                    controller.apply(&command);
                    send_reading(&session, &mut controller);
                }
                Ok(InboundMessage::Refresh) => send_reading(&session, &mut controller),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Command stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await;
    Ok(())
}

async fn send_command(
    key_prefix: &str,
    options: &SessionOptions,
    frame: &ControlFrame,
) -> anyhow::Result<()> {
    send_once(&options.url, key_prefix, frame, CONNECT_TIMEOUT)
        .await
        .with_context(|| format!("sending to relay at {}", options.url))?;
    println!("Sent");
    Ok(())
}
