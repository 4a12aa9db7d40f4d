use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{ClientEvent, CommandIntent, DeviceSession, ModeChange};
use shared::domain::ActuatorValue;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod config;
mod view;

use config::{load_settings, Settings};

#[derive(Parser, Debug)]
#[command(name = "dashboard", about = "Rack device dashboard")]
struct Args {
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    ws_url: Option<String>,
    #[arg(long, global = true)]
    device_id: Option<String>,
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow device state until interrupted.
    Watch {
        /// Rely on the pull interval alone.
        #[arg(long)]
        no_push: bool,
    },
    /// Switch between manual and automatic control.
    Mode {
        #[command(subcommand)]
        mode: ModeArg,
    },
    /// Send an actuator command. Only accepted in manual mode, and only when a
    /// single actuator is configured.
    Send {
        /// Defaults to the first configured actuator.
        #[arg(long)]
        actuator: Option<String>,
        #[arg(long)]
        value: ActuatorValue,
    },
    Stock {
        #[command(subcommand)]
        action: StockAction,
    },
}

#[derive(Subcommand, Debug)]
enum ModeArg {
    Manual,
    Auto {
        #[arg(long)]
        threshold: String,
    },
}

#[derive(Subcommand, Debug)]
enum StockAction {
    List,
    Adjust {
        name: String,
        #[arg(allow_negative_numbers = true)]
        delta: i64,
    },
}

fn apply_args(settings: &mut Settings, args: &Args) {
    if let Some(v) = &args.api_url {
        settings.api_url = v.clone();
    }
    if let Some(v) = &args.ws_url {
        settings.ws_url = Some(v.clone());
    }
    if let Some(v) = &args.device_id {
        settings.device_id = v.clone();
    }
    if let Some(v) = args.poll_interval_ms {
        settings.poll_interval_ms = v;
    }
}

fn open_session(settings: &Settings, with_push: bool) -> Result<Arc<DeviceSession>> {
    let authority = settings.authority()?;
    let options = settings.session_options(with_push)?;
    Ok(DeviceSession::new(Arc::new(authority), options))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = load_settings()?;
    apply_args(&mut settings, &args);

    match args.command {
        Command::Watch { no_push } => watch(&settings, !no_push).await,
        Command::Mode { mode } => {
            let change = match mode {
                ModeArg::Manual => ModeChange::Manual,
                ModeArg::Auto { threshold } => ModeChange::auto_from_input(&threshold)?,
            };
            let session = open_session(&settings, false)?;
            let result = session.set_mode(change).await;
            print_status(&session).await;
            result?;
            Ok(())
        }
        Command::Send { actuator, value } => {
            settings.ensure_one_shot_command_allowed()?;
            let session = open_session(&settings, false)?;
            let actuator = match actuator {
                Some(actuator) => actuator,
                None => settings
                    .actuators
                    .first()
                    .cloned()
                    .context("no actuator configured")?,
            };
            session.bootstrap().await;
            let result = session
                .send_actuator_command(CommandIntent::new(actuator.as_str(), value))
                .await;
            print_status(&session).await;
            result?;
            print!("{}", view::render_state(&session.snapshot().await));
            Ok(())
        }
        Command::Stock { action } => {
            let session = open_session(&settings, false)?;
            match action {
                StockAction::List => {
                    session.refresh_inventory().await?;
                }
                StockAction::Adjust { name, delta } => {
                    session.adjust_stock(&name, delta).await?;
                }
            }
            print!("{}", view::render_inventory(&session.inventory().await));
            Ok(())
        }
    }
}

async fn print_status(session: &DeviceSession) {
    if let Some(message) = session.status().await {
        println!("{}", view::render_status(&message));
    }
}

async fn watch(settings: &Settings, with_push: bool) -> Result<()> {
    let session = open_session(settings, with_push)?;
    let mut events = session.subscribe_events();
    let mut states = session.watch_state();
    session.start().await;

    print!("{}", view::render_state(&session.snapshot().await));
    print!("{}", view::render_inventory(&session.inventory().await));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print!("{}", view::render_state(&state));
            }
            event = events.recv() => match event {
                Ok(ClientEvent::PushConnected) => println!("live updates connected"),
                Ok(ClientEvent::PushDisconnected { reason }) => {
                    println!("live updates unavailable ({reason}); polling only")
                }
                Ok(ClientEvent::PullFailed { resource, error }) => {
                    println!("failed to refresh {resource}: {}", error.message)
                }
                Ok(ClientEvent::InventoryUpdated(_)) => {
                    print!("{}", view::render_inventory(&session.inventory().await))
                }
                Ok(ClientEvent::Status(message)) => println!("{}", view::render_status(&message)),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "dashboard fell behind on events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}
