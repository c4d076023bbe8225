// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Host CLI driving the slot guard against a simulated device and file-backed stores.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! `slotguard` host CLI.
//!
//! Each `boot` invocation is one run of the simulated device. Retained
//! memory, the durable record, the snapshot and the device itself live in
//! the state directory, so consecutive invocations behave like consecutive
//! boots.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use slotguard::durable::FileKv;
use slotguard::ledger::FileRegion;
use slotguard::sim::SimDevice;
use slotguard::snapshot::FsSnapshotStore;
use slotguard::{
    BootOutcome, CrashGuard, DoneReason, Event, GuardConfig, ResetCause, Stores,
};

const REGION_FILE: &str = "rtc.bin";
const KV_DIR: &str = "nvs";
const DEVICE_FILE: &str = "device.json";
const SNAPSHOT_FILE: &str = "crashguard.json";

#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Dual-slot boot-health guardian simulator")]
struct Cli {
    /// Directory holding retained memory, durable storage and device state.
    #[arg(long, value_name = "DIR", default_value = ".slotguard")]
    state_dir: PathBuf,

    /// Guardian configuration TOML.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Reset the device and run one boot.
    Boot {
        /// Reset reason that started this boot (power-on, panic, task-wdt, brownout, ...).
        #[arg(long, default_value = "power-on", value_parser = parse_cause)]
        cause: ResetCause,
        /// Milliseconds the run survives after initialising.
        #[arg(long, default_value_t = 0)]
        uptime_ms: u64,
        /// End the run with a graceful shutdown.
        #[arg(long, default_value_t = false)]
        shutdown: bool,
    },
    /// Print counters, slot roles and history.
    Info,
    /// Print the live state including the boot ledger.
    State,
    /// Select the other slot and restart.
    Switch,
    /// Drop power: retained memory is lost.
    PowerCycle,
}

fn parse_cause(label: &str) -> Result<ResetCause, String> {
    ResetCause::parse(label).ok_or_else(|| format!("unknown reset cause {label:?}"))
}

struct Workspace {
    dir: PathBuf,
    config: GuardConfig,
    device: SimDevice,
}

impl Workspace {
    fn open(dir: PathBuf, config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => GuardConfig::load(path)?,
            None => GuardConfig {
                snapshot_path: dir.join(SNAPSHOT_FILE),
                ..GuardConfig::default()
            }
            .with_env_overrides(),
        };
        let device = SimDevice::load(&dir.join(DEVICE_FILE))
            .with_context(|| format!("loading device state from {}", dir.display()))?;
        Ok(Self {
            dir,
            config,
            device,
        })
    }

    fn stores(&self) -> Stores {
        Stores {
            region: Box::new(FileRegion::new(self.dir.join(REGION_FILE))),
            kv: Box::new(FileKv::new(self.dir.join(KV_DIR))),
            snapshot: Box::new(FsSnapshotStore::new(self.config.snapshot_path.clone())),
        }
    }

    fn boot(&self) -> CrashGuard {
        CrashGuard::boot(self.config.clone(), self.device.platform(), self.stores())
    }

    fn attach(&self) -> Result<CrashGuard> {
        Ok(CrashGuard::attach(
            self.config.clone(),
            self.device.platform(),
            self.stores(),
        )?)
    }

    fn save(&self) -> Result<()> {
        self.device
            .save(&self.dir.join(DEVICE_FILE))
            .context("saving device state")
    }
}

fn run_boot(ws: &Workspace, cause: ResetCause, uptime_ms: u64, shutdown: bool) -> Result<()> {
    ws.device.reboot(cause);
    let mut guard = ws.boot();
    if let BootOutcome::Switched { from, to } = guard.outcome() {
        println!("boot {}: {from} keeps failing, switched to {to}", guard.plan().boot);
        return ws.save();
    }

    guard.handle_event(Event::Init(0));
    guard.handle_event(Event::Inited);
    let step = u64::from(guard.config().snapshot_period_ms).max(1);
    let mut remaining = uptime_ms;
    while remaining > 0 {
        let slice = remaining.min(step);
        ws.device.advance(slice);
        guard.handle_event(Event::Periodic);
        remaining -= slice;
    }
    if shutdown {
        guard.handle_event(Event::Done(DoneReason::Restart));
    }

    let slot = ws
        .device
        .running()
        .map_or_else(|| "factory".to_owned(), |slot| slot.to_string());
    println!(
        "boot {} on {slot}: {} ms, {}",
        guard.plan().boot,
        guard.uptime_ms(),
        if shutdown { "shut down" } else { "still running" }
    );
    ws.save()
}

fn print_request(ws: &Workspace, name: &str) -> Result<()> {
    let mut guard = ws.attach()?;
    let document = guard.handle_request(name)?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    ws.save()
}

fn power_cycle(ws: &Workspace) -> Result<()> {
    match fs::remove_file(ws.dir.join(REGION_FILE)) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(anyhow!("clearing retained memory: {err}")),
    }
    ws.device.reboot(ResetCause::PowerOn);
    info!("retained memory cleared");
    println!("power cycled; next boot starts cold");
    ws.save()
}

fn run(cli: Cli) -> Result<()> {
    let ws = Workspace::open(cli.state_dir, cli.config.as_deref())?;
    match cli.command {
        Command::Boot {
            cause,
            uptime_ms,
            shutdown,
        } => run_boot(&ws, cause, uptime_ms, shutdown),
        Command::Info => print_request(&ws, slotguard::api::REQUEST_INFO),
        Command::State => print_request(&ws, slotguard::api::REQUEST_STATE),
        Command::Switch => print_request(&ws, slotguard::api::REQUEST_SWITCH),
        Command::PowerCycle => power_cycle(&ws),
    }
}

fn main() {
    env_logger::init();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}
