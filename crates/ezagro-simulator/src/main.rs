//! Desktop simulator for the ezagro sensor node.
//!
//! Runs the node's boot sequence, telemetry ticks and remote command handling
//! against simulated hardware. State persists in a data directory so restarts
//! behave like on the device.
//!
//! # Environment
//!
//! | Variable                        | Meaning                                   |
//! |---------------------------------|-------------------------------------------|
//! | `EZAGRO_SIM_DATA_DIR`           | Data directory (default `sim-data`)       |
//! | `EZAGRO_SIM_FAULT_EVERY`        | Inject a CO2 fault every N exchanges (5)  |
//! | `EZAGRO_SIM_PORTAL_TIMEOUT_SECS`| Portal window in seconds (180)            |
//! | `EZAGRO_SIM_UNREACHABLE_SSID`   | Network name that never accepts a join    |
//! | `EZAGRO_SIM_UPDATE`             | Update server answer: `ok`, `failed`, `none` |
//! | `EZAGRO_SIM_FORM`               | Form body submitted to the first portal   |
//!
//! # Stdin
//!
//! While the portal is open each line is a form body. Afterwards lines are
//! virtual pin writes (`V22 1` checks for an update, `V23 1` factory
//! resets) or `quit`.

mod display;
mod hardware;
mod network;
mod storage;

use std::env;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use embassy_futures::block_on;
use log::{info, warn};

use ezagro_core::app_state::{BootOutcome, RestartReason, boot};
use ezagro_core::commands::{CommandHandler, REMOTE_COMMANDS, RemoteCommand, UpdateOutcome};
use ezagro_core::constants::{FIRMWARE_VERSION, PORTAL_TIMEOUT, TELEMETRY_INTERVAL};
use ezagro_core::sensors::Mhz19Sensor;
use ezagro_core::storage::ConfigStore;
use ezagro_core::telemetry::{TelemetryScheduler, VirtualPin};

use display::SimDisplay;
use hardware::{SimulatedMhz19Link, StdDelay, SyntheticClimate};
use network::{LogSink, SimPortal, SimUpdater};
use storage::FileStorage;

/// Delay before the simulated node comes back after a restart.
const RESTART_DELAY: Duration = Duration::from_secs(1);

struct SimSettings {
    data_dir: PathBuf,
    fault_every: u32,
    portal_timeout: Duration,
    unreachable_ssid: Option<String>,
    update_outcome: UpdateOutcome,
}

impl SimSettings {
    fn from_env() -> Self {
        let portal_secs = env::var("EZAGRO_SIM_PORTAL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(PORTAL_TIMEOUT.as_secs());
        Self {
            data_dir: env::var_os("EZAGRO_SIM_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sim-data")),
            fault_every: env::var("EZAGRO_SIM_FAULT_EVERY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            portal_timeout: Duration::from_secs(portal_secs),
            unreachable_ssid: env::var("EZAGRO_SIM_UNREACHABLE_SSID").ok(),
            update_outcome: match env::var("EZAGRO_SIM_UPDATE").as_deref() {
                Ok("ok") => UpdateOutcome::Ok,
                Ok("failed") => UpdateOutcome::Failed,
                _ => UpdateOutcome::NoUpdateAvailable,
            },
        }
    }
}

enum RunEnd {
    Restart(RestartReason),
    Quit,
}

/// Parse a `V<pin> <value>` line into a remote command
fn parse_command(line: &str) -> Option<RemoteCommand> {
    let mut parts = line.split_whitespace();
    let pin = parts.next()?;
    let pin = pin.strip_prefix(['V', 'v'])?.parse::<u8>().ok()?;
    let value = parts.next()?.parse::<i32>().ok()?;
    RemoteCommand::from_pin(VirtualPin(pin), value)
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Ok(form) = env::var("EZAGRO_SIM_FORM") {
        let _ = tx.send(form);
    }
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// One power cycle of the node, from boot until a restart or `quit`
fn run_node(settings: &SimSettings, lines: &Receiver<String>) -> RunEnd {
    let mut store = ConfigStore::new(FileStorage::new(&settings.data_dir));
    let mut portal = SimPortal::new(
        &settings.data_dir,
        lines,
        settings.portal_timeout,
        settings.unreachable_ssid.clone(),
    );
    let mut display = SimDisplay::new();

    info!("EZagro {} booting", FIRMWARE_VERSION);
    let mut state = match block_on(boot(&mut store, &mut portal, &mut display)) {
        BootOutcome::Ready(state) => state,
        BootOutcome::Restart(reason) => return RunEnd::Restart(reason),
    };

    let co2 = Mhz19Sensor::new(SimulatedMhz19Link::new(settings.fault_every), StdDelay);
    let mut scheduler = TelemetryScheduler::new(SyntheticClimate::new(), co2, LogSink, display);
    let mut handler = CommandHandler::new(SimUpdater::new(settings.update_outcome));

    let interval = Duration::from_millis(TELEMETRY_INTERVAL.as_millis());
    let mut next_tick = Instant::now();

    loop {
        if Instant::now() >= next_tick {
            block_on(scheduler.tick(&state));
            let finished = Instant::now();
            next_tick += interval;
            if next_tick < finished {
                warn!("Tick overran the {:?} interval", interval);
                next_tick = finished;
            }
        }

        let remaining = next_tick.saturating_duration_since(Instant::now());
        match lines.recv_timeout(remaining) {
            Ok(line) if line.trim() == "quit" => return RunEnd::Quit,
            Ok(line) => match parse_command(&line) {
                Some(command) => {
                    if REMOTE_COMMANDS.try_send(command).is_err() {
                        warn!("Command queue full, dropping {:?}", command);
                    }
                }
                None => warn!("Unrecognised input: {}", line.trim()),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(remaining),
        }

        while let Ok(command) = REMOTE_COMMANDS.try_receive() {
            let outcome = block_on(handler.handle(command, &state, &mut store, &mut portal));
            if let Some(reason) = outcome.restart_reason() {
                state.request_restart(reason);
            }
        }
        if let Some(reason) = state.restart_reason() {
            return RunEnd::Restart(reason);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = SimSettings::from_env();
    std::fs::create_dir_all(&settings.data_dir)?;
    info!("Starting ezagro simulator in {}", settings.data_dir.display());

    let lines = spawn_stdin_reader();
    let mut restarts = 0u32;
    loop {
        match run_node(&settings, &lines) {
            RunEnd::Quit => break,
            RunEnd::Restart(reason) => {
                restarts += 1;
                warn!("Restarting ({:?}), restart #{}", reason, restarts);
                std::thread::sleep(RESTART_DELAY);
            }
        }
    }

    info!("Simulator exiting");
    Ok(())
}
