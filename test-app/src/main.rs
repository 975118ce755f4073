// shackctl test application -- CLI tool for exercising rigs, rotators and
// CW keyers described in a TOML profile file.
//
// Usage:
//   shackctl-test-app --profiles station.toml list
//   shackctl-test-app --profiles station.toml --rig k3 status
//   shackctl-test-app --profiles station.toml --rig k3 freq set 14025000
//   shackctl-test-app --profiles station.toml --rig k3 --keyer winkey cw "CQ TEST" --wpm 28
//   shackctl-test-app --profiles station.toml --keyer winkey cw          (type, Ctrl-D ends)
//   shackctl-test-app --profiles station.toml --rotator pst rotate 45 --long-path
//   shackctl-test-app --profiles station.toml --rig ic7610 --sim-bridge watch --duration 10

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rand::Rng;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use shackctl::omnirig::{BridgeVersion, SimulatedBridge};
use shackctl::{
    CwInputBuffer, CwKeyer, DeviceEvent, DriverFactory, Mode, Rig, Rotator, SendMode, SpeedSync,
    Station, TomlProfileStore, Vfo, supported_backends,
};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// shackctl test application -- exercises station devices from the command line.
#[derive(Parser)]
#[command(name = "shackctl-test-app", version, about)]
struct Cli {
    /// TOML file with `[[profile]]` entries.
    #[arg(long, default_value = "station.toml")]
    profiles: PathBuf,

    /// Rig profile to open.
    #[arg(long)]
    rig: Option<String>,

    /// Keyer profile to open.
    #[arg(long)]
    keyer: Option<String>,

    /// Rotator profile to open.
    #[arg(long)]
    rotator: Option<String>,

    /// Serve bridge profiles from an in-process simulated bridge.
    #[arg(long)]
    sim_bridge: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List profiles in the file and the backends compiled in.
    List,

    /// Open every named device and print its state and capabilities.
    Status,

    /// Frequency operations.
    Freq {
        #[command(subcommand)]
        action: FreqAction,
    },

    /// Mode operations.
    Mode {
        #[command(subcommand)]
        action: ModeAction,
    },

    /// PTT operations.
    Ptt {
        #[command(subcommand)]
        action: PttAction,
    },

    /// Send CW. Without text, reads lines from stdin.
    Cw {
        /// Text to send.
        text: Option<String>,

        /// Send the whole text as one unit instead of word by word.
        #[arg(long)]
        whole: bool,

        /// Set the keyer speed first.
        #[arg(long)]
        wpm: Option<u8>,
    },

    /// Set the keyer speed, mirroring it to the rig when the profile asks.
    Speed {
        /// Words per minute.
        wpm: u8,
    },

    /// Turn the rotator.
    Rotate {
        /// Bearing in degrees.
        bearing: f64,

        /// Point at the reciprocal bearing.
        #[arg(long)]
        long_path: bool,
    },

    /// Subscribe to device events and print them in real time.
    Watch {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Stress test: rapid-fire frequency read/write cycles.
    Stress {
        /// Number of read/write cycles.
        #[arg(long, default_value_t = 100)]
        count: u32,
    },
}

#[derive(Subcommand)]
enum FreqAction {
    /// Read a VFO frequency.
    Get {
        #[arg(long, default_value = "A")]
        vfo: Vfo,
    },
    /// Tune a VFO.
    Set {
        /// Frequency in hertz (e.g. 14025000).
        freq_hz: u64,
        #[arg(long, default_value = "A")]
        vfo: Vfo,
    },
}

#[derive(Subcommand)]
enum ModeAction {
    Get,
    Set {
        /// Mode name (e.g. USB, LSB, CW).
        mode: Mode,
    },
}

#[derive(Subcommand)]
enum PttAction {
    Get,
    On,
    Off,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn format_freq(hz: u64) -> String {
    let mhz = hz as f64 / 1_000_000.0;
    format!("{mhz:.6} MHz")
}

/// Prompt the user for y/N confirmation. Returns true only if "y" or "Y" entered.
fn confirm(prompt: &str) -> bool {
    print!("{prompt}");
    io::stdout().flush().ok();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim(), "y" | "Y")
}

fn station(cli: &Cli) -> Result<Station> {
    let store = TomlProfileStore::load(&cli.profiles)
        .with_context(|| format!("loading profiles from {}", cli.profiles.display()))?;
    debug!(profiles = store.len(), "profile store ready");

    let mut factory = DriverFactory::new();
    if cli.sim_bridge {
        for version in [BridgeVersion::V1, BridgeVersion::V2] {
            factory = factory.with_bridge(version, Arc::new(SimulatedBridge::new(version)));
        }
    }
    Ok(Station::new(factory).with_store(Arc::new(store)))
}

/// The devices named on the command line, opened.
struct Devices {
    rig: Option<Rig>,
    keyer: Option<CwKeyer>,
    rotator: Option<Rotator>,
}

impl Devices {
    async fn open(cli: &Cli, station: &Station) -> Result<Self> {
        let rig = match &cli.rig {
            Some(name) => {
                let mut rig = station.rig();
                rig.open_named(name)
                    .await
                    .with_context(|| format!("opening rig {name:?}"))?;
                Some(rig)
            }
            None => None,
        };

        let keyer = match &cli.keyer {
            Some(name) => {
                let mut keyer = station.keyer();
                if let Some(rig) = &rig {
                    keyer.attach_rig(rig)?;
                }
                keyer
                    .open_named(name)
                    .await
                    .with_context(|| format!("opening keyer {name:?}"))?;
                Some(keyer)
            }
            None => None,
        };

        let rotator = match &cli.rotator {
            Some(name) => {
                let mut rotator = station.rotator();
                rotator
                    .open_named(name)
                    .await
                    .with_context(|| format!("opening rotator {name:?}"))?;
                Some(rotator)
            }
            None => None,
        };

        Ok(Self {
            rig,
            keyer,
            rotator,
        })
    }

    fn rig(&self) -> Result<&Rig> {
        self.rig.as_ref().context("this command needs --rig")
    }

    fn keyer(&self) -> Result<&CwKeyer> {
        self.keyer.as_ref().context("this command needs --keyer")
    }

    fn rotator(&self) -> Result<&Rotator> {
        self.rotator.as_ref().context("this command needs --rotator")
    }

    async fn close(self) {
        if let Some(keyer) = &self.keyer {
            keyer.close().await;
        }
        if let Some(rotator) = &self.rotator {
            rotator.close().await;
        }
        if let Some(rig) = &self.rig {
            rig.close().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list(station: &Station) -> Result<()> {
    println!("Profiles");
    for name in station.profile_names() {
        let profile = station.profile(&name)?;
        println!(
            "  {:<16} {:<8} {}",
            profile.name,
            profile.device_kind().to_string(),
            profile.backend.to_string()
        );
    }
    println!();
    println!("Backends compiled in");
    for backend in supported_backends() {
        println!("  {:<24} {}", backend.to_string(), backend.device_kind());
    }
    Ok(())
}

async fn cmd_status(devices: &Devices) -> Result<()> {
    if let Some(rig) = &devices.rig {
        let state = rig.state();
        println!("Rig");
        println!("  Connection:     {}", rig.connection_state());
        println!("  Capabilities:   {}", rig.capabilities());
        println!("  VFO A:          {}", state.freq_a_hz.map_or("-".into(), format_freq));
        println!("  VFO B:          {}", state.freq_b_hz.map_or("-".into(), format_freq));
        println!(
            "  Mode:           {}",
            state.mode.map_or("-".into(), |m| m.to_string())
        );
        println!(
            "  PTT:            {}",
            state.ptt.map_or("-", |on| if on { "ON" } else { "OFF" })
        );
        println!("  Revision:       {}", state.revision);
    }
    if let Some(keyer) = &devices.keyer {
        println!("Keyer");
        println!("  Connection:     {}", keyer.connection_state());
        println!("  Capabilities:   {}", keyer.capabilities());
        match keyer.get_speed().await {
            Ok(wpm) => println!("  Speed:          {wpm} WPM"),
            Err(e) => println!("  Speed:          unavailable ({e})"),
        }
    }
    if let Some(rotator) = &devices.rotator {
        println!("Rotator");
        println!("  Connection:     {}", rotator.connection_state());
        match rotator.get_position().await {
            Ok(az) => println!("  Azimuth:        {az:.0} deg"),
            Err(e) => println!("  Azimuth:        unavailable ({e})"),
        }
    }
    Ok(())
}

async fn cmd_ptt_on(rig: &Rig) -> Result<()> {
    println!("WARNING: This will key the transmitter.");
    println!("Ensure an antenna or dummy load is connected.");
    if !confirm("Continue? [y/N] ") {
        println!("Aborted.");
        return Ok(());
    }
    rig.set_ptt(true).await?;
    println!("PTT: ON");
    Ok(())
}

fn report_sync(sync: SpeedSync) {
    match sync {
        SpeedSync::NotRequested => {}
        SpeedSync::Synced => println!("Rig keyer speed synced."),
        SpeedSync::Mismatch {
            requested,
            reported,
        } => println!("WARNING: rig reports {reported} WPM after setting {requested} WPM"),
    }
}

async fn cmd_cw(keyer: &CwKeyer, text: Option<&str>, mode: SendMode, wpm: Option<u8>) -> Result<()> {
    if let Some(wpm) = wpm {
        report_sync(keyer.set_speed(wpm).await?);
    }

    if let Some(text) = text {
        let units = keyer.send(text, mode).await?;
        println!("Sent {units} unit(s).");
        return Ok(());
    }

    println!("Type CW text; Ctrl-D to finish.");
    let mut buffer = CwInputBuffer::new(mode);
    for line in io::stdin().lock().lines() {
        let mut line = line?;
        line.push('\n');
        for unit in buffer.push_str(&line) {
            keyer.send_unit(&unit).await?;
            println!("> {unit}");
        }
    }
    for unit in buffer.flush() {
        keyer.send_unit(&unit).await?;
        println!("> {unit}");
    }
    Ok(())
}

async fn cmd_rotate(rotator: &Rotator, bearing: f64, long_path: bool) -> Result<()> {
    let azimuth = if long_path {
        rotator.point_long_path(bearing).await?
    } else {
        rotator.set_position(bearing).await?;
        shackctl::normalize_azimuth(bearing)
    };
    println!("Rotating to {azimuth:.0} deg");
    Ok(())
}

async fn cmd_watch(devices: &Devices, duration_secs: u64) -> Result<()> {
    let mut streams: Vec<(&str, broadcast::Receiver<DeviceEvent>)> = Vec::new();
    if let Some(rig) = &devices.rig {
        streams.push(("rig", rig.subscribe()));
    }
    if let Some(keyer) = &devices.keyer {
        streams.push(("keyer", keyer.subscribe()));
    }
    if let Some(rotator) = &devices.rotator {
        streams.push(("rotator", rotator.subscribe()));
    }
    if streams.is_empty() {
        bail!("nothing to watch; name a --rig, --keyer or --rotator");
    }

    println!("Watching device events (Ctrl-C to stop)...");
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    for (device, mut events) in streams {
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if tx.send((device, event)).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!(device, missed = n, "event consumer too slow"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
    drop(tx);

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));
    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Watch duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some((device, event))) => println!("[{device}] {event:?}"),
            Ok(None) => {
                println!("Event channels closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Watch duration elapsed.");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn cmd_stress(rig: &Rig, count: u32) -> Result<()> {
    let base_freq = rig.get_frequency(Vfo::A).await?;
    println!("Stress test: {count} cycles on VFO A");
    println!("Base frequency: {}", format_freq(base_freq));

    let mut rng = rand::thread_rng();
    let mut success = 0u32;
    let mut failures = 0u32;
    let start = Instant::now();

    for i in 1..=count {
        let offset: i64 = rng.gen_range(-500_000..=500_000);
        let target = (base_freq as i64 + offset).max(0) as u64;

        if let Err(e) = rig.set_frequency(Vfo::A, target).await {
            eprintln!("[{i}/{count}] set_frequency failed: {e}");
            failures += 1;
            continue;
        }

        match rig.get_frequency(Vfo::A).await {
            Ok(readback) if readback == target => success += 1,
            Ok(readback) => {
                eprintln!(
                    "[{i}/{count}] mismatch: set {} but read back {}",
                    format_freq(target),
                    format_freq(readback)
                );
                failures += 1;
            }
            Err(e) => {
                eprintln!("[{i}/{count}] get_frequency failed: {e}");
                failures += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    let rate = if elapsed.as_secs_f64() > 0.0 {
        count as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    println!();
    println!("Results:");
    println!("  Total cycles:   {count}");
    println!("  Successes:      {success}");
    println!("  Failures:       {failures}");
    println!("  Elapsed:        {:.3} s", elapsed.as_secs_f64());
    println!("  Rate:           {rate:.1} cycles/sec");

    if let Err(e) = rig.set_frequency(Vfo::A, base_freq).await {
        eprintln!("Warning: failed to restore base frequency: {e}");
    } else {
        println!("  Restored:       {}", format_freq(base_freq));
    }

    if failures > 0 {
        bail!("{failures} out of {count} stress test cycles failed");
    }
    Ok(())
}

async fn run(cli: &Cli, devices: &Devices) -> Result<()> {
    match &cli.command {
        Command::List => unreachable!("list handled before opening devices"),
        Command::Status => cmd_status(devices).await,
        Command::Freq { action } => {
            let rig = devices.rig()?;
            match action {
                FreqAction::Get { vfo } => {
                    println!("{vfo}: {}", format_freq(rig.get_frequency(*vfo).await?));
                }
                FreqAction::Set { freq_hz, vfo } => {
                    rig.set_frequency(*vfo, *freq_hz).await?;
                    println!("{vfo}: set to {}", format_freq(*freq_hz));
                }
            }
            Ok(())
        }
        Command::Mode { action } => {
            let rig = devices.rig()?;
            match action {
                ModeAction::Get => println!("Mode: {}", rig.get_mode().await?),
                ModeAction::Set { mode } => {
                    rig.set_mode(*mode).await?;
                    println!("Mode set to {mode}");
                }
            }
            Ok(())
        }
        Command::Ptt { action } => {
            let rig = devices.rig()?;
            match action {
                PttAction::Get => {
                    let on = rig.get_ptt().await?;
                    println!("PTT: {}", if on { "ON (transmitting)" } else { "OFF (receiving)" });
                    Ok(())
                }
                PttAction::On => cmd_ptt_on(rig).await,
                PttAction::Off => {
                    rig.set_ptt(false).await?;
                    println!("PTT: OFF");
                    Ok(())
                }
            }
        }
        Command::Cw { text, whole, wpm } => {
            let mode = if *whole { SendMode::Whole } else { SendMode::Word };
            cmd_cw(devices.keyer()?, text.as_deref(), mode, *wpm).await
        }
        Command::Speed { wpm } => {
            let sync = devices.keyer()?.set_speed(*wpm).await?;
            println!("Keyer speed: {wpm} WPM");
            report_sync(sync);
            Ok(())
        }
        Command::Rotate { bearing, long_path } => {
            cmd_rotate(devices.rotator()?, *bearing, *long_path).await
        }
        Command::Watch { duration } => cmd_watch(devices, *duration).await,
        Command::Stress { count } => cmd_stress(devices.rig()?, *count).await,
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let station = station(&cli)?;

    if matches!(cli.command, Command::List) {
        return cmd_list(&station);
    }

    let devices = Devices::open(&cli, &station).await?;
    let result = run(&cli, &devices).await;
    devices.close().await;
    result
}
