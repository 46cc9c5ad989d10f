//! Tandem HR CLI
//!
//! Dual heart-rate monitor for a rider and their horse.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tandem_hr::{
    ble::{
        simulated::{spawn_synthetic_feed, DEMO_HORSE_ID, DEMO_HUMAN_ID},
        DeviceIdentity, DeviceScanner, HeartProfile, PeripheralId, Radio, SharedRadio,
        SimulatedRadio,
    },
    config::Config,
    core::{MonitorIdentity, SessionSummary},
    monitor::{load_last_session, DualSession, MonitorStatus},
    stats::{create_shared_stats_with_persistence, SessionStats},
    store::JsonFileStore,
    VERSION,
};
use tracing_subscriber::EnvFilter;

/// Maximum distance between a rider and a horse sample shown as aligned.
const ALIGN_MAX_SKEW_MS: i64 = 2000;
const POWER_ON_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Parser)]
#[command(name = "tandem-hr")]
#[command(version = VERSION)]
#[command(about = "Dual heart-rate monitor for a rider and their horse", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List nearby heart-rate sensors
    Scan {
        /// How long to scan, in seconds
        #[arg(long, default_value = "10")]
        duration: u64,

        /// Use simulated sensors instead of Bluetooth hardware
        #[arg(long)]
        simulate: bool,
    },

    /// Remember which sensor belongs to whom
    Pair {
        /// Peripheral id of the rider's sensor
        #[arg(long)]
        human: Option<String>,

        /// Peripheral id of the horse's sensor
        #[arg(long)]
        horse: Option<String>,
    },

    /// Record both heart rates until Ctrl+C
    Monitor {
        /// Rider sensor id (defaults to the paired sensor)
        #[arg(long)]
        human: Option<String>,

        /// Horse sensor id (defaults to the paired sensor)
        #[arg(long)]
        horse: Option<String>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        /// Use simulated sensors instead of Bluetooth hardware
        #[arg(long)]
        simulate: bool,
    },

    /// Summarize the last saved recordings
    LastSession,

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,

    /// Look up the air quality at a location
    #[cfg(feature = "air-quality")]
    AirQuality {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scan { duration, simulate } => cmd_scan(duration, simulate),
        Commands::Pair { human, horse } => cmd_pair(human, horse),
        Commands::Monitor {
            human,
            horse,
            duration,
            simulate,
        } => cmd_monitor(human, horse, duration, simulate),
        Commands::LastSession => cmd_last_session(),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        #[cfg(feature = "air-quality")]
        Commands::AirQuality { lat, lon } => cmd_air_quality(lat, lon),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_scan(duration: u64, simulate: bool) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let runtime = tokio::runtime::Runtime::new().context("could not start async runtime")?;
    let _guard = runtime.enter();

    let radio = open_radio(&runtime, simulate)?;
    wait_for_power(radio.as_ref())?;

    let scanner = DeviceScanner::spawn(radio, config.sensor_name_filter.clone());
    let updates = scanner.subscribe();
    if !scanner.start_scan() {
        bail!("Bluetooth is not available");
    }

    println!(
        "Scanning for heart-rate sensors matching '{}' for {duration}s...",
        config.sensor_name_filter
    );
    println!();

    let running = ctrlc_flag();
    let deadline = Instant::now() + Duration::from_secs(duration);
    let mut shown = HashSet::new();

    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        match updates.recv_timeout(Duration::from_millis(100)) {
            Ok(devices) => {
                for device in devices {
                    if shown.insert(device.id.clone()) {
                        println!("  {:<40} {}", device.id, device.label());
                    }
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
    scanner.stop_scan();

    println!();
    if shown.is_empty() {
        println!("No sensors found.");
    } else {
        println!("Found {} sensor(s).", shown.len());
        println!("Run 'tandem-hr pair --human <ID> --horse <ID>' to remember them.");
    }
    Ok(())
}

fn cmd_pair(human: Option<String>, horse: Option<String>) -> Result<()> {
    if human.is_none() && horse.is_none() {
        bail!("pass --human and/or --horse");
    }

    let mut config = Config::load().context("could not load configuration")?;
    if human.is_some() {
        config.devices.set(MonitorIdentity::Human, human);
    }
    if horse.is_some() {
        config.devices.set(MonitorIdentity::Horse, horse);
    }
    config.save().context("could not save configuration")?;

    for identity in MonitorIdentity::ALL {
        println!(
            "{identity}: {}",
            config.devices.get(identity).unwrap_or("(not paired)")
        );
    }
    Ok(())
}

fn cmd_monitor(
    human: Option<String>,
    horse: Option<String>,
    duration: Option<u64>,
    simulate: bool,
) -> Result<()> {
    println!("Tandem HR v{VERSION}");
    println!();

    let config = Config::load().context("could not load configuration")?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    let options = config.session_options()?;

    let runtime = tokio::runtime::Runtime::new().context("could not start async runtime")?;
    let _guard = runtime.enter();

    let radio = open_radio(&runtime, simulate)?;
    wait_for_power(radio.as_ref())?;

    let stats = create_shared_stats_with_persistence(config.stats_path());
    let store = Arc::new(JsonFileStore::new(config.store_path()));
    let dual = DualSession::spawn(radio, &options, store, stats.clone());

    let running = ctrlc_flag();

    let mut targets = [
        (MonitorIdentity::Human, human),
        (MonitorIdentity::Horse, horse),
    ];
    for (identity, id) in targets.iter_mut() {
        if id.is_none() {
            *id = config.devices.get(*identity).map(str::to_string);
        }
        if id.is_none() && simulate {
            *id = Some(match identity {
                MonitorIdentity::Human => DEMO_HUMAN_ID.to_string(),
                MonitorIdentity::Horse => DEMO_HORSE_ID.to_string(),
            });
        }
    }

    // Discover names, and fill in unpaired sensors in discovery order.
    let discovered = discover(&dual, &running, Duration::from_secs(5));
    let taken: Vec<String> = targets.iter().filter_map(|(_, id)| id.clone()).collect();
    let mut spare = discovered
        .iter()
        .filter(|d| !taken.iter().any(|id| id == d.id.as_str()));
    for (identity, id) in targets.iter_mut() {
        if id.is_none() {
            if let Some(device) = spare.next() {
                println!("Using {device} for {identity}");
                *id = Some(device.id.to_string());
            }
        }
    }

    for (identity, id) in &targets {
        let Some(id) = id else {
            println!("{identity}: no sensor available");
            continue;
        };
        let device = discovered
            .iter()
            .find(|d| d.id.as_str() == id)
            .cloned()
            .unwrap_or_else(|| DeviceIdentity {
                id: PeripheralId::new(id.clone()),
                name: None,
            });
        println!("{identity}: connecting to {device}");
        dual.session(*identity).connect(device);
    }

    if !wait_for_connections(&dual, &running) {
        bail!("no sensor connected");
    }

    println!();
    println!("Recording. Press Ctrl+C to stop.");
    println!();

    dual.start_measuring();
    let status_updates = [dual.human().subscribe(), dual.horse().subscribe()];
    let mut last_states = [dual.human().status(), dual.horse().status()].map(|s| s.connection);
    let deadline = duration.map(|d| Instant::now() + Duration::from_secs(d));
    let mut last_print = Instant::now();

    while running.load(Ordering::SeqCst) && deadline.map_or(true, |d| Instant::now() < d) {
        thread::sleep(Duration::from_millis(100));

        for (slot, updates) in status_updates.iter().enumerate() {
            for status in updates.try_iter() {
                if status.connection != last_states[slot] {
                    println!("  {}: {}", status.identity, status.connection);
                    last_states[slot] = status.connection;
                }
            }
        }

        if last_print.elapsed() >= Duration::from_secs(1) {
            print_live_line(&dual);
            last_print = Instant::now();
        }
    }

    println!();
    println!("Stopping...");
    dual.stop_measuring();

    for (identity, export) in dual.export_all() {
        match export {
            Ok(path) => println!("{identity}: exported to {}", path.display()),
            Err(e) => eprintln!("{identity}: export failed: {e}"),
        }
    }
    println!();
    for identity in MonitorIdentity::ALL {
        print_summary(identity, dual.session(identity).summary());
    }

    for identity in MonitorIdentity::ALL {
        dual.session(identity).disconnect();
    }
    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save statistics: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

fn cmd_last_session() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = JsonFileStore::new(config.store_path());

    for identity in MonitorIdentity::ALL {
        match load_last_session(&store, identity) {
            Ok(Some(points)) => print_summary(identity, SessionSummary::from_points(&points)),
            Ok(None) => println!("{identity}: no saved recording"),
            Err(e) => eprintln!("{identity}: could not read saved recording: {e}"),
        }
    }
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Tandem HR Status");
    println!("================");
    println!();
    println!("Configuration:");
    println!("  Window: {}s", config.window_duration.as_secs());
    println!("  Reconnect delay: {}ms", config.reconnect_delay.as_millis());
    println!("  Sensor filter: '{}'", config.sensor_name_filter);
    for identity in MonitorIdentity::ALL {
        println!(
            "  {identity} sensor: {}",
            config.devices.get(identity).unwrap_or("(not paired)")
        );
    }
    println!(
        "  Bluetooth backend: {}",
        if cfg!(feature = "ble-central") {
            "btleplug"
        } else {
            "simulated only"
        }
    );
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        println!("{}", SessionStats::with_persistence(stats_path).summary());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[cfg(feature = "air-quality")]
fn cmd_air_quality(lat: f64, lon: f64) -> Result<()> {
    use tandem_hr::air_quality::AirQualityClient;
    use tandem_hr::location::{Coordinates, FixedLocation, LocationProvider};

    let config = Config::load().unwrap_or_default();
    let at = Coordinates::new(lat, lon).context("coordinates out of range")?;
    let location = FixedLocation(at);
    if !location.authorization_status().is_authorized() {
        bail!("location access not authorized");
    }
    let Some(at) = location.current_location() else {
        bail!("location unavailable");
    };

    let client = AirQualityClient::new(config.air_quality.clone())?;
    let runtime = tokio::runtime::Runtime::new().context("could not start async runtime")?;
    let quality = runtime.block_on(client.fetch(at))?;

    println!("Air quality at {at}: {quality}");
    Ok(())
}

/// Open the Bluetooth radio, or a simulated one with synthetic heartbeats.
fn open_radio(runtime: &tokio::runtime::Runtime, simulate: bool) -> Result<SharedRadio> {
    if simulate {
        let radio = Arc::new(SimulatedRadio::demo());
        spawn_synthetic_feed(
            Arc::clone(&radio),
            vec![
                (PeripheralId::new(DEMO_HUMAN_ID), HeartProfile::RIDER),
                (PeripheralId::new(DEMO_HORSE_ID), HeartProfile::HORSE),
            ],
            Duration::from_secs(1),
        );
        return Ok(radio);
    }

    #[cfg(feature = "ble-central")]
    {
        let radio = runtime
            .block_on(tandem_hr::ble::BtleplugRadio::new())
            .context("could not open Bluetooth adapter")?;
        Ok(radio)
    }

    #[cfg(not(feature = "ble-central"))]
    {
        let _ = runtime;
        bail!("built without Bluetooth support; rebuild with --features ble-central or pass --simulate")
    }
}

fn wait_for_power(radio: &dyn Radio) -> Result<()> {
    let deadline = Instant::now() + POWER_ON_TIMEOUT;
    loop {
        let state = radio.state();
        if state.is_powered_on() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("Bluetooth radio is {state:?}; turn it on and grant access");
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// Scan briefly and return what was found.
fn discover(dual: &DualSession, running: &AtomicBool, window: Duration) -> Vec<DeviceIdentity> {
    let scanner = dual.scanner();
    if !scanner.start_scan() {
        return Vec::new();
    }
    let deadline = Instant::now() + window;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        if scanner.discovered().len() >= 2 {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    scanner.stop_scan();
    scanner.discovered()
}

/// Wait until every requested link settles. Returns whether any connected.
fn wait_for_connections(dual: &DualSession, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    while running.load(Ordering::SeqCst) && Instant::now() < deadline {
        let statuses: Vec<MonitorStatus> = MonitorIdentity::ALL
            .iter()
            .map(|&id| dual.session(id).status())
            .collect();
        if statuses.iter().all(|s| s.is_connected() || s.device.is_none()) {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }

    let mut any = false;
    for identity in MonitorIdentity::ALL {
        let status = dual.session(identity).status();
        if status.is_connected() {
            any = true;
            println!("{identity}: connected");
        } else {
            println!("{identity}: not connected ({})", status.connection);
        }
    }
    any
}

fn print_live_line(dual: &DualSession) {
    let snapshot = dual.snapshot();
    let skew = snapshot
        .aligned(chrono::Duration::milliseconds(ALIGN_MAX_SKEW_MS))
        .last()
        .map(|p| format!("{:+} ms", p.skew.num_milliseconds()))
        .unwrap_or_else(|| "--".to_string());

    println!(
        "[{}] Human: {:>8} | Horse: {:>8} | skew: {}",
        chrono::Local::now().format("%H:%M:%S"),
        snapshot.current(MonitorIdentity::Human).to_string(),
        snapshot.current(MonitorIdentity::Horse).to_string(),
        skew
    );
}

fn print_summary(identity: MonitorIdentity, summary: Option<SessionSummary>) {
    match summary {
        Some(summary) => println!("{identity}: {summary}"),
        None => println!("{identity}: no samples recorded"),
    }
}

/// Set up the Ctrl+C handler and return the running flag.
fn ctrlc_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
    running
}
